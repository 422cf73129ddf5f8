use sqlx::{Pool, Sqlite, Transaction};

use crate::{
    dao::consumption::ConsumptionDao,
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{BillingBreakdown, ConsumptionAddInputType, ConsumptionDetailType, ConsumptionKey},
    },
    service::billing::compute_billing,
};

/**
 * Represents the service for managing consumption readings.
 */
pub struct ConsumptionService {
    /**
     * The DAO for consumption operations.
     */
    consumption_dao: ConsumptionDao,
    /**
     * Connection pool for database operations.
     */
    connection_pool: Pool<Sqlite>,
}

impl ConsumptionService {
    /**
     * Creates a new instance of `ConsumptionService`.
     *
     * # Arguments
     * `consumption_dao`: The DAO for consumption operations.
     * `connection_pool`: Connection pool for database operations.
     *
     * # Returns
     * A new instance of `ConsumptionService`.
     */
    pub fn new(consumption_dao: ConsumptionDao, connection_pool: Pool<Sqlite>) -> Self {
        ConsumptionService { consumption_dao, connection_pool }
    }

    /**
     * Registers a reading and computes its billing.
     *
     * The existence check and the insert run in one transaction. The unique index on customer and period
     * still has the final say, and a violation surfaces as `AlreadyExists` as well.
     *
     * # Arguments
     * `consumption_add_input`: The validated reading.
     *
     * # Returns
     * A Result containing the stored reading or an `ApplicationError`. Volumes whose charges overflow are rejected as `InvalidArgument`.
     */
    pub async fn register_consumption(&self, consumption_add_input: ConsumptionAddInputType) -> Result<ConsumptionDetailType, ApplicationError> {
        let billing = compute_billing(consumption_add_input.volume_consumed, consumption_add_input.flag_category, consumption_add_input.has_sewage);
        if !billing.is_finite() {
            tracing::debug!("Billing for volume {} is not finite", consumption_add_input.volume_consumed);
            return Err(ApplicationError::new(ErrorType::InvalidArgument, "volume too large to bill".to_string()));
        }
        let mut transaction = self.begin().await?;
        match self.insert_consumption(&mut transaction, &consumption_add_input, &billing).await {
            Ok(id) => {
                Self::commit(transaction).await?;
                tracing::info!("Registered consumption {} for period {}/{}", id, consumption_add_input.month, consumption_add_input.year);
                Ok(ConsumptionDetailType::new(id, consumption_add_input, billing))
            }
            Err(err) => {
                Self::rollback(transaction).await?;
                Err(err)
            }
        }
    }

    /**
     * Retrieves all readings.
     *
     * # Returns
     * A Result containing the readings, or an `ApplicationError` of type `NotFound` when there are none.
     */
    pub async fn get_consumption_list(&self) -> Result<Vec<ConsumptionDetailType>, ApplicationError> {
        let mut connection = self.acquire().await?;
        let consumptions = self.consumption_dao.get_consumption_list(&mut connection).await?;
        if consumptions.is_empty() {
            return Err(ApplicationError::new(ErrorType::NotFound, "No consumption readings found".to_string()));
        }
        Ok(consumptions)
    }

    /**
     * Retrieves a reading by customer and period.
     */
    pub async fn get_consumption(&self, key: &ConsumptionKey) -> Result<ConsumptionDetailType, ApplicationError> {
        let mut connection = self.acquire().await?;
        self.consumption_dao.get_consumption(&mut connection, key).await
    }

    /**
     * Deletes a reading by customer and period.
     *
     * # Arguments
     * `key`: Customer and billing period.
     *
     * # Returns
     * A Result indicating success or an `ApplicationError` of type `NotFound`.
     */
    pub async fn delete_consumption(&self, key: &ConsumptionKey) -> Result<(), ApplicationError> {
        let mut transaction = self.begin().await?;
        match self.consumption_dao.delete_consumption(&mut transaction, key).await {
            Ok(()) => Self::commit(transaction).await?,
            Err(err) => {
                Self::rollback(transaction).await?;
                return Err(err);
            }
        }
        Ok(())
    }

    /**
     * Sums the total of all readings.
     *
     * # Returns
     * A Result containing the sum, or an `ApplicationError` of type `NotFound` when there are no readings.
     */
    pub async fn get_total(&self) -> Result<f64, ApplicationError> {
        let mut connection = self.acquire().await?;
        self.consumption_dao
            .get_total(&mut connection)
            .await?
            .ok_or_else(|| ApplicationError::new(ErrorType::NotFound, "No consumption readings found".to_string()))
    }

    async fn insert_consumption(&self, transaction: &mut Transaction<'static, Sqlite>, consumption_add_input: &ConsumptionAddInputType, billing: &BillingBreakdown) -> Result<i64, ApplicationError> {
        let key = consumption_add_input.key();
        if self.consumption_dao.exists(transaction, &key).await? {
            tracing::debug!("Consumption for {:?} already registered", key);
            return Err(ApplicationError::new(ErrorType::AlreadyExists, "Reading already registered for this customer, month and year".to_string()));
        }
        self.consumption_dao.add_consumption(transaction, consumption_add_input, billing).await
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>, ApplicationError> {
        self.connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, ApplicationError> {
        self.connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))
    }

    async fn commit(transaction: Transaction<'static, Sqlite>) -> Result<(), ApplicationError> {
        transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))
    }

    async fn rollback(transaction: Transaction<'static, Sqlite>) -> Result<(), ApplicationError> {
        transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))
    }
}
