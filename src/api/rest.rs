use actix_web::{HttpResponse, ResponseError, http::StatusCode, web};
use serde::{Deserialize, Serialize};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{ConsumptionAddInputType, ConsumptionDetailType, FlagCategory},
};

/***************** Consumption:register models *********************/

/**
 * Request structure for registering a reading.
 *
 * Field names follow the public JSON contract of the consumption API.
 */
#[derive(Debug, Deserialize)]
pub struct ConsumptionAddRequest {
    /**
     * National id of the customer.
     */
    #[serde(rename = "cpf")]
    pub customer_id: String,
    #[serde(rename = "mes")]
    pub month: i32,
    #[serde(rename = "ano")]
    pub year: i32,
    /**
     * Cubic meters consumed.
     */
    #[serde(rename = "m3Consumidos")]
    pub volume_consumed: f64,
    /**
     * Tariff flag label. Defaults to verde.
     */
    #[serde(rename = "bandeira", default)]
    pub flag_category: Option<String>,
    #[serde(rename = "possuiEsgoto", default)]
    pub has_sewage: bool,
}

/**
 * Converts the request into the registration input. Unknown flag labels are classified as verde.
 */
impl From<web::Json<ConsumptionAddRequest>> for ConsumptionAddInputType {
    fn from(request: web::Json<ConsumptionAddRequest>) -> Self {
        let request = request.into_inner();
        ConsumptionAddInputType {
            customer_id: request.customer_id,
            month: request.month,
            year: request.year,
            volume_consumed: request.volume_consumed,
            flag_category: request.flag_category.as_deref().map(FlagCategory::classify).unwrap_or_default(),
            has_sewage: request.has_sewage,
        }
    }
}

/***************** Consumption detail models *********************/

/**
 * A stored reading as returned by the API.
 */
#[derive(Debug, Serialize)]
pub struct ConsumptionResponse {
    id: i64,
    #[serde(rename = "cpf")]
    customer_id: String,
    #[serde(rename = "mes")]
    month: i32,
    #[serde(rename = "ano")]
    year: i32,
    #[serde(rename = "m3Consumidos")]
    volume_consumed: f64,
    /**
     * Volume the tariff is applied to.
     */
    #[serde(rename = "consumoFaturado")]
    billed_volume: f64,
    #[serde(rename = "tarifa")]
    tariff_rate: f64,
    #[serde(rename = "valorAgua")]
    water_charge: f64,
    #[serde(rename = "bandeira")]
    flag_category: FlagCategory,
    #[serde(rename = "adicionalBandeira")]
    flag_surcharge: f64,
    #[serde(rename = "possuiEsgoto")]
    has_sewage: bool,
    #[serde(rename = "taxaEsgoto")]
    sewage_fee: f64,
    total: f64,
}

impl From<ConsumptionDetailType> for ConsumptionResponse {
    fn from(consumption: ConsumptionDetailType) -> Self {
        ConsumptionResponse {
            id: consumption.id,
            customer_id: consumption.customer_id,
            month: consumption.month,
            year: consumption.year,
            volume_consumed: consumption.volume_consumed,
            billed_volume: consumption.billed_volume,
            tariff_rate: consumption.tariff_rate,
            water_charge: consumption.water_charge,
            flag_category: consumption.flag_category,
            flag_surcharge: consumption.flag_surcharge,
            has_sewage: consumption.has_sewage,
            sewage_fee: consumption.sewage_fee,
            total: consumption.total,
        }
    }
}

/***************** Consumption:total models *********************/

/**
 * Sum of the total of every reading.
 */
#[derive(Debug, Serialize)]
pub struct TotalResponse {
    #[serde(rename = "totalGeral")]
    pub total: f64,
}

/***************** Error models *********************/

/**
 * Custom error response for the application.
 */
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /**
     * The error code associated with the error type.
     */
    pub code: u16,
    /**
     * A human-readable message describing the error.
     */
    pub message: String,
}

impl ResponseError for ApplicationError {
    fn status_code(&self) -> StatusCode {
        get_statuscode(&self.error_type)
    }

    /**
     * Generates an error response for the application error.
     */
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse { code: get_error_code(&self.error_type), message: self.message.clone() };
        HttpResponse::build(get_statuscode(&self.error_type)).json(&error_response)
    }
}

/**
* Maps application errors to HTTP status codes.
*
* # Arguments
* `application_error`: The type of error that occurred.
*
* # Returns
* The corresponding HTTP status code.
*/
fn get_statuscode(application_error: &ErrorType) -> StatusCode {
    match application_error {
        ErrorType::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorType::AlreadyExists => StatusCode::CONFLICT,
        ErrorType::NotFound => StatusCode::NOT_FOUND,
        ErrorType::DatabaseError | ErrorType::Initialization => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/**
 * Maps application errors to error codes.
 *
 * # Arguments
 * `application_error`: The type of error that occurred.
 *
 * # Returns
 * The corresponding error code.
 */
fn get_error_code(application_error: &ErrorType) -> u16 {
    match application_error {
        ErrorType::InvalidArgument => 1000,
        ErrorType::AlreadyExists => 1001,
        ErrorType::NotFound => 1002,
        ErrorType::DatabaseError => 1003,
        ErrorType::Initialization => 1004,
    }
}
