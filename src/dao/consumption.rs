use sqlx::SqliteConnection;
use tracing::{Instrument, instrument};

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    models::{BillingBreakdown, ConsumptionAddInputType, ConsumptionDetailType, ConsumptionKey, FlagCategory},
};

/**
 * Database response type for querying consumption records.
 */
pub type QueryConsumptionDbResp = (i64, String, i32, i32, f64, f64, f64, f64, String, f64, bool, f64, f64);

/**
 * SQL query to retrieve a reading by customer and period.
 */
const QUERY_CONSUMPTION: &str = "SELECT id, cpf, mes, ano, m3_consumidos, consumo_faturado, tarifa, valor_agua, bandeira, adicional_bandeira, possui_esgoto, taxa_esgoto, total
                                 FROM consumo WHERE cpf = $1 AND mes = $2 AND ano = $3";

/**
 * SQL query to retrieve every reading.
 */
const QUERY_CONSUMPTION_LIST: &str = "SELECT id, cpf, mes, ano, m3_consumidos, consumo_faturado, tarifa, valor_agua, bandeira, adicional_bandeira, possui_esgoto, taxa_esgoto, total
                                      FROM consumo ORDER BY id";

/**
 * SQL query to check whether a reading exists for a customer and period.
 */
const EXISTS_CONSUMPTION: &str = "SELECT EXISTS(SELECT 1 FROM consumo WHERE cpf = $1 AND mes = $2 AND ano = $3)";

/**
 * SQL query to add a new reading.
 */
const ADD_CONSUMPTION: &str = "INSERT INTO consumo (cpf, mes, ano, m3_consumidos, consumo_faturado, tarifa, valor_agua, bandeira, adicional_bandeira, possui_esgoto, taxa_esgoto, total)
                               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                               RETURNING id";

/**
 * SQL query to delete a reading.
 */
const DELETE_CONSUMPTION: &str = "DELETE FROM consumo WHERE cpf = $1 AND mes = $2 AND ano = $3";

/**
 * SQL query to sum the total of all readings. Yields NULL when there are none.
 */
const QUERY_TOTAL: &str = "SELECT SUM(total) FROM consumo";

/**
 * DAO for consumption-related database operations.
 */
pub struct ConsumptionDao {}

impl ConsumptionDao {
    /**
     * Creates a new instance of `ConsumptionDao`.
     *
     * # Returns
     * A new instance of `ConsumptionDao`.
     */
    pub fn new() -> Self {
        ConsumptionDao {}
    }

    /**
     * Checks whether a reading already exists for the key.
     *
     * # Arguments
     * `connection`: The database connection.
     * `key`: Customer and billing period.
     *
     * # Returns
     * A Result containing true if a reading exists.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn exists(&self, connection: &mut SqliteConnection, key: &ConsumptionKey) -> Result<bool, ApplicationError> {
        let span = tracing::Span::current();
        let result: (i64,) = sqlx::query_as(EXISTS_CONSUMPTION)
            .bind(&key.customer_id)
            .bind(key.month)
            .bind(key.year)
            .fetch_one(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to check consumption: {err}")))?;
        Ok(result.0 != 0)
    }

    /**
     * Adds a new reading to the database.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `consumption_add_input`: The validated reading.
     * `billing`: The billing amounts computed for the reading.
     *
     * # Returns
     * A Result containing the id assigned to the reading.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn add_consumption(&self, transaction: &mut SqliteConnection, consumption_add_input: &ConsumptionAddInputType, billing: &BillingBreakdown) -> Result<i64, ApplicationError> {
        let span = tracing::Span::current();
        let id: (i64,) = sqlx::query_as(ADD_CONSUMPTION)
            .bind(&consumption_add_input.customer_id)
            .bind(consumption_add_input.month)
            .bind(consumption_add_input.year)
            .bind(consumption_add_input.volume_consumed)
            .bind(billing.billed_volume)
            .bind(billing.tariff_rate)
            .bind(billing.water_charge)
            .bind(consumption_add_input.flag_category.as_str())
            .bind(billing.flag_surcharge)
            .bind(consumption_add_input.has_sewage)
            .bind(billing.sewage_fee)
            .bind(billing.total)
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| Self::handle_database_error(&err))?;
        Ok(id.0)
    }

    /**
     * Retrieves a reading by customer and period.
     *
     * # Arguments
     * `connection`: The database connection.
     * `key`: Customer and billing period.
     *
     * # Returns
     * A Result containing the reading, or an `ApplicationError` of type `NotFound`.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_consumption(&self, connection: &mut SqliteConnection, key: &ConsumptionKey) -> Result<ConsumptionDetailType, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryConsumptionDbResp> = sqlx::query_as(QUERY_CONSUMPTION)
            .bind(&key.customer_id)
            .bind(key.month)
            .bind(key.year)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get consumption: {err}")))?;
        result.map(ConsumptionDetailType::from).ok_or_else(|| ApplicationError::new(ErrorType::NotFound, "Consumption not found".to_string()))
    }

    /**
     * Retrieves every reading ordered by id.
     *
     * # Arguments
     * `connection`: The database connection.
     *
     * # Returns
     * A Result containing the readings. The list may be empty.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_consumption_list(&self, connection: &mut SqliteConnection) -> Result<Vec<ConsumptionDetailType>, ApplicationError> {
        let span = tracing::Span::current();
        let results: Vec<QueryConsumptionDbResp> = sqlx::query_as(QUERY_CONSUMPTION_LIST)
            .fetch_all(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get consumption list: {err}")))?;
        Ok(results.into_iter().map(ConsumptionDetailType::from).collect())
    }

    /**
     * Deletes a reading by customer and period.
     *
     * # Arguments
     * `transaction`: The database transaction to execute the query within.
     * `key`: Customer and billing period.
     *
     * # Returns
     * A result indicating success or failure of the operation.
     */
    #[instrument(skip(self, transaction), fields(result))]
    pub async fn delete_consumption(&self, transaction: &mut SqliteConnection, key: &ConsumptionKey) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(DELETE_CONSUMPTION)
            .bind(&key.customer_id)
            .bind(key.month)
            .bind(key.year)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to delete consumption: {err}")))?;
        if result.rows_affected() == 0 {
            tracing::debug!("Consumption for {:?} not found for deletion", key);
            return Err(ApplicationError::new(ErrorType::NotFound, "Consumption not found".to_string()));
        }
        Ok(())
    }

    /**
     * Sums the total of all readings.
     *
     * # Arguments
     * `connection`: The database connection.
     *
     * # Returns
     * A Result containing the sum, or None when there are no readings.
     */
    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_total(&self, connection: &mut SqliteConnection) -> Result<Option<f64>, ApplicationError> {
        let span = tracing::Span::current();
        let result: (Option<f64>,) = sqlx::query_as(QUERY_TOTAL)
            .fetch_one(connection)
            .instrument(span)
            .await
            .map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute query to get total: {err}")))?;
        Ok(result.0)
    }

    /**
     * Handles database errors and maps them to application errors.
     *
     * # Arguments
     * `error`: The error returned by the database driver.
     *
     * # Returns
     * An `ApplicationError` corresponding to the database error.
     */
    fn handle_database_error(error: &sqlx::Error) -> ApplicationError {
        if let Some(db_error) = error.as_database_error() {
            tracing::debug!("Database error: {}", db_error);
            if db_error.is_unique_violation() {
                return ApplicationError::new(ErrorType::AlreadyExists, "Reading already registered for this customer, month and year".to_string());
            }
            if db_error.is_check_violation() {
                return ApplicationError::new(ErrorType::InvalidArgument, "Value out of range".to_string());
            }
            tracing::error!("Unhandled database error: {}", db_error);
            return ApplicationError::new(ErrorType::DatabaseError, "Unhandled database error".to_string());
        }
        ApplicationError::new(ErrorType::DatabaseError, format!("Failed to execute database operation: {error}"))
    }
}

impl From<QueryConsumptionDbResp> for ConsumptionDetailType {
    fn from(row: QueryConsumptionDbResp) -> Self {
        let (id, customer_id, month, year, volume_consumed, billed_volume, tariff_rate, water_charge, flag_category, flag_surcharge, has_sewage, sewage_fee, total) = row;
        ConsumptionDetailType {
            id,
            customer_id,
            month,
            year,
            volume_consumed,
            billed_volume,
            tariff_rate,
            water_charge,
            flag_category: FlagCategory::classify(&flag_category),
            flag_surcharge,
            has_sewage,
            sewage_fee,
            total,
        }
    }
}

/**
 * Opens an in-memory database with the migrations applied. A single connection keeps every query on the same database.
 */
#[cfg(test)]
pub async fn init_test_db() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
