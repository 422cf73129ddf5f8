use actix_web::{
    HttpRequest, HttpResponse, delete,
    error::JsonPayloadError,
    get,
    http::header::{self, HeaderValue},
    post,
    web::{self, Path},
};
use tracing::{Instrument, instrument};

use crate::{
    api::{
        rest::{ConsumptionAddRequest, ConsumptionResponse, TotalResponse},
        state::AppState,
    },
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{ConsumptionAddInputType, ConsumptionKey},
    },
};

/**
 * Registers the consumption endpoints and the JSON body configuration.
 */
pub fn configure(config: &mut web::ServiceConfig) {
    config
        .app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(register_consumption)
        .service(list_consumptions)
        .service(find_consumption)
        .service(delete_consumption)
        .service(total_consumption);
}

/**
 * Endpoint to register a reading. Responds with the stored reading and its lookup path in `Location`.
 */
#[instrument(level = "info", skip(http_request, app_state), fields(service = "registerConsumption", trace_id = get_trace_id(&http_request), result))]
#[post("/api/consumo/cadastrar")]
pub async fn register_consumption(http_request: HttpRequest, request_body: web::Json<ConsumptionAddRequest>, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let consumption_add_input = ConsumptionAddInputType::from(request_body).validate()?;
    let location = HeaderValue::from_str(&consumption_add_input.key().lookup_path()).map_err(|err| ApplicationError::new(ErrorType::InvalidArgument, format!("customer id cannot be used in a path: {err}")))?;
    let consumption = app_state.consumption_service.register_consumption(consumption_add_input).instrument(span).await?;
    Ok(HttpResponse::Created().insert_header((header::LOCATION, location)).json(ConsumptionResponse::from(consumption)))
}

/**
 * Endpoint to list every reading.
 */
#[instrument(skip(http_request, app_state), fields(service = "listConsumptions", trace_id = get_trace_id(&http_request), result))]
#[get("/api/consumo/listar")]
pub async fn list_consumptions(http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let consumptions = app_state.consumption_service.get_consumption_list().instrument(span).await?;
    Ok(HttpResponse::Ok().json(consumptions.into_iter().map(ConsumptionResponse::from).collect::<Vec<_>>()))
}

/**
 * Endpoint to look up a reading by customer and period.
 */
#[instrument(skip(http_request, app_state), fields(service = "findConsumption", trace_id = get_trace_id(&http_request), result))]
#[get("/api/consumo/buscar/{cpf}/{mes}/{ano}")]
pub async fn find_consumption(path: Path<(String, i32, i32)>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let (customer_id, month, year) = path.into_inner();
    let consumption = app_state.consumption_service.get_consumption(&ConsumptionKey::new(customer_id, month, year)).instrument(span).await?;
    Ok(HttpResponse::Ok().json(ConsumptionResponse::from(consumption)))
}

/**
 * Endpoint to delete a reading.
 */
#[instrument(skip(http_request, app_state), fields(service = "deleteConsumption", trace_id = get_trace_id(&http_request), result))]
#[delete("/api/consumo/remover/{cpf}/{mes}/{ano}")]
pub async fn delete_consumption(path: Path<(String, i32, i32)>, http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let (customer_id, month, year) = path.into_inner();
    app_state.consumption_service.delete_consumption(&ConsumptionKey::new(customer_id, month, year)).instrument(span).await?;
    Ok(HttpResponse::Ok().finish())
}

/**
 * Endpoint to sum the total of every reading.
 */
#[instrument(skip(http_request, app_state), fields(service = "totalConsumption", trace_id = get_trace_id(&http_request), result))]
#[get("/api/consumo/total-geral")]
pub async fn total_consumption(http_request: HttpRequest, app_state: web::Data<AppState>) -> Result<HttpResponse, ApplicationError> {
    let span = tracing::Span::current();
    let total = app_state.consumption_service.get_total().instrument(span).await?;
    Ok(HttpResponse::Ok().json(TotalResponse { total }))
}

/**
 * Maps malformed JSON bodies to a bad request with the regular error body.
 */
fn json_error_handler(err: JsonPayloadError, _http_request: &HttpRequest) -> actix_web::Error {
    tracing::debug!("Rejected request body: {}", err);
    ApplicationError::new(ErrorType::InvalidArgument, format!("Invalid request body: {err}")).into()
}

/**
 * Retrieves the trace ID from the HTTP request headers.
 * If the trace ID is not present, a new UUID is generated.
 */
fn get_trace_id(http_request: &HttpRequest) -> String {
    http_request.headers().get("X-Trace-ID")
        .and_then(|v| v.to_str().ok().map(std::string::ToString::to_string))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod test {
    use actix_web::{
        App,
        http::StatusCode,
        test::{self, TestRequest},
    };
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        dao::consumption::{ConsumptionDao, init_test_db},
        service::consumption::ConsumptionService,
    };

    async fn app_state() -> web::Data<AppState> {
        web::Data::new(AppState::new(ConsumptionService::new(ConsumptionDao::new(), init_test_db().await)))
    }

    fn register_request(body: Value) -> TestRequest {
        TestRequest::post().uri("/api/consumo/cadastrar").set_json(body)
    }

    #[actix_web::test]
    async fn test_get_trace_id_exists() {
        let request = TestRequest::default()
            .insert_header(("X-Trace-ID", "test"))
            .to_http_request();
        let trace_id = get_trace_id(&request);
        assert_eq!(trace_id, "test");
    }

    #[actix_web::test]
    async fn test_get_trace_id_not_exists() {
        let request = TestRequest::default()
            .to_http_request();
        let trace_id = get_trace_id(&request);
        assert!(!trace_id.is_empty());
    }

    #[actix_web::test]
    async fn test_register_created() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        let response = test::call_service(&app, register_request(json!({"cpf": "12345678900", "mes": 5, "ano": 2024, "m3Consumidos": 30.0, "bandeira": "Amarela", "possuiEsgoto": true})).to_request()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/api/consumo/buscar/12345678900/5/2024");
        let body: Value = test::read_body_json(response).await;
        assert_eq!(body["consumoFaturado"], 30.0);
        assert_eq!(body["tarifa"], 5.0);
        assert_eq!(body["valorAgua"], 150.0);
        assert_eq!(body["bandeira"], "amarela");
        assert!((body["adicionalBandeira"].as_f64().unwrap() - 15.0).abs() < 1e-9);
        assert!((body["taxaEsgoto"].as_f64().unwrap() - 132.0).abs() < 1e-9);
        assert!((body["total"].as_f64().unwrap() - 297.0).abs() < 1e-9);
    }

    #[actix_web::test]
    async fn test_register_invalid_fields() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        for (body, message) in [
            (json!({"cpf": "1", "mes": 13, "ano": 2024, "m3Consumidos": 5.0}), "month out of range"),
            (json!({"cpf": "1", "mes": 1, "ano": 1999, "m3Consumidos": 5.0}), "year out of range"),
            (json!({"cpf": "1", "mes": 1, "ano": 2024, "m3Consumidos": 0.0}), "volume must be positive"),
        ] {
            let response = test::call_service(&app, register_request(body).to_request()).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(response).await;
            assert_eq!(body["code"], 1000);
            assert_eq!(body["message"], message);
        }
    }

    #[actix_web::test]
    async fn test_register_rejected_input_is_not_stored() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        for (body, message) in [
            (json!({"cpf": "123\n", "mes": 5, "ano": 2024, "m3Consumidos": 5.0}), "customer id must not contain control characters"),
            (json!({"cpf": "123", "mes": 5, "ano": 2024, "m3Consumidos": 1.0e308}), "volume too large to bill"),
        ] {
            let response = test::call_service(&app, register_request(body).to_request()).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(response).await;
            assert_eq!(body["code"], 1000);
            assert_eq!(body["message"], message);
        }
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/listar").to_request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/total-geral").to_request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_register_non_ascii_customer_id() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        let response = test::call_service(&app, register_request(json!({"cpf": "João", "mes": 5, "ano": 2024, "m3Consumidos": 5.0})).to_request()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get(header::LOCATION).unwrap().as_bytes(), "/api/consumo/buscar/João/5/2024".as_bytes());
    }

    #[actix_web::test]
    async fn test_register_malformed_body() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        let request = TestRequest::post().uri("/api/consumo/cadastrar").insert_header((header::CONTENT_TYPE, "application/json")).set_payload("{\"cpf\": \"1\"").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_register_duplicate_conflict() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        let body = json!({"cpf": "12345678900", "mes": 5, "ano": 2024, "m3Consumidos": 5.0});
        let response = test::call_service(&app, register_request(body.clone()).to_request()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = test::call_service(&app, register_request(body).to_request()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/listar").to_request()).await;
        let list: Value = test::read_body_json(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_list_empty_not_found() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/listar").to_request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_find_consumption() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        test::call_service(&app, register_request(json!({"cpf": "12345678900", "mes": 5, "ano": 2024, "m3Consumidos": 5.0, "bandeira": "Verde"})).to_request()).await;
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/buscar/12345678900/5/2024").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = test::read_body_json(response).await;
        assert_eq!(body["cpf"], "12345678900");
        assert_eq!(body["total"], 25.0);
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/buscar/12345678900/6/2024").to_request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/buscar/12345678900/maio/2024").to_request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_delete_consumption() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        test::call_service(&app, register_request(json!({"cpf": "12345678900", "mes": 5, "ano": 2024, "m3Consumidos": 5.0})).to_request()).await;
        let response = test::call_service(&app, TestRequest::delete().uri("/api/consumo/remover/12345678900/4/2024").to_request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = test::call_service(&app, TestRequest::delete().uri("/api/consumo/remover/12345678900/5/2024").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(test::read_body(response).await.is_empty());
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/buscar/12345678900/5/2024").to_request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_total() {
        let app = test::init_service(App::new().app_data(app_state().await).configure(configure)).await;
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/total-geral").to_request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        test::call_service(&app, register_request(json!({"cpf": "12345678900", "mes": 5, "ano": 2024, "m3Consumidos": 5.0})).to_request()).await;
        let response = test::call_service(&app, TestRequest::get().uri("/api/consumo/total-geral").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = test::read_body_json(response).await;
        assert_eq!(body, json!({"totalGeral": 25.0}));
    }
}
