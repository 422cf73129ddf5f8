use serde::Serialize;

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Earliest year accepted for a reading.
 */
pub const MIN_YEAR: i32 = 2000;

/**
 * Tariff flag in effect for a reading. Each flag adds a surcharge on top of the water charge.
 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagCategory {
    #[default]
    Verde,
    Amarela,
    Vermelha,
}

impl FlagCategory {
    /**
     * Classifies a free-text flag label.
     *
     * Matching is case-insensitive and by substring, with "amarela" checked before "vermelha".
     * Anything that matches neither, including "verde", is treated as `Verde`.
     *
     * # Arguments
     * `label`: The flag label as sent by the client.
     *
     * # Returns
     * The matching `FlagCategory`.
     */
    pub fn classify(label: &str) -> Self {
        let label = label.to_lowercase();
        if label.contains("amarela") {
            FlagCategory::Amarela
        } else if label.contains("vermelha") {
            FlagCategory::Vermelha
        } else {
            FlagCategory::Verde
        }
    }

    /**
     * Fraction of the water charge added as surcharge.
     */
    pub fn surcharge_percent(self) -> f64 {
        match self {
            FlagCategory::Verde => 0.0,
            FlagCategory::Amarela => 0.10,
            FlagCategory::Vermelha => 0.20,
        }
    }

    /**
     * Name used when persisting the flag.
     */
    pub fn as_str(self) -> &'static str {
        match self {
            FlagCategory::Verde => "verde",
            FlagCategory::Amarela => "amarela",
            FlagCategory::Vermelha => "vermelha",
        }
    }
}

/**
 * Identifies a single reading: one per customer and billing period.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionKey {
    pub customer_id: String,
    pub month: i32,
    pub year: i32,
}

impl ConsumptionKey {
    pub fn new(customer_id: String, month: i32, year: i32) -> Self {
        ConsumptionKey { customer_id, month, year }
    }

    /**
     * Path where the reading identified by this key can be looked up.
     */
    pub fn lookup_path(&self) -> String {
        format!("/api/consumo/buscar/{}/{}/{}", self.customer_id, self.month, self.year)
    }
}

/**
 * Input type for registering a new reading.
 */
#[derive(Debug, Clone)]
pub struct ConsumptionAddInputType {
    pub customer_id: String,
    pub month: i32,
    pub year: i32,
    /**
     * Cubic meters consumed in the period.
     */
    pub volume_consumed: f64,
    pub flag_category: FlagCategory,
    pub has_sewage: bool,
}

impl ConsumptionAddInputType {
    /**
     * Validates the reading.
     *
     * # Returns
     * The input itself, or an `ApplicationError` of type `InvalidArgument` naming the first invalid field.
     */
    pub fn validate(self) -> Result<Self, ApplicationError> {
        if self.customer_id.trim().is_empty() {
            return Err(ApplicationError::new(ErrorType::InvalidArgument, "customer id must not be empty".to_string()));
        }
        if self.customer_id.chars().any(char::is_control) {
            return Err(ApplicationError::new(ErrorType::InvalidArgument, "customer id must not contain control characters".to_string()));
        }
        if !(1..=12).contains(&self.month) {
            return Err(ApplicationError::new(ErrorType::InvalidArgument, "month out of range".to_string()));
        }
        if self.year < MIN_YEAR {
            return Err(ApplicationError::new(ErrorType::InvalidArgument, "year out of range".to_string()));
        }
        if self.volume_consumed.is_nan() || self.volume_consumed <= 0.0 {
            return Err(ApplicationError::new(ErrorType::InvalidArgument, "volume must be positive".to_string()));
        }
        if self.volume_consumed.is_infinite() {
            return Err(ApplicationError::new(ErrorType::InvalidArgument, "volume must be finite".to_string()));
        }
        Ok(self)
    }

    pub fn key(&self) -> ConsumptionKey {
        ConsumptionKey::new(self.customer_id.clone(), self.month, self.year)
    }
}

/**
 * Derived billing amounts for a reading.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingBreakdown {
    pub billed_volume: f64,
    pub tariff_rate: f64,
    pub water_charge: f64,
    pub flag_surcharge: f64,
    pub sewage_fee: f64,
    pub total: f64,
}

impl BillingBreakdown {
    /**
     * Whether every amount is a finite number. Large volumes can overflow the charges.
     */
    pub fn is_finite(&self) -> bool {
        [self.billed_volume, self.tariff_rate, self.water_charge, self.flag_surcharge, self.sewage_fee, self.total].iter().all(|amount| amount.is_finite())
    }
}

/**
 * A stored reading with every derived billing field populated.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionDetailType {
    pub id: i64,
    pub customer_id: String,
    pub month: i32,
    pub year: i32,
    pub volume_consumed: f64,
    pub billed_volume: f64,
    pub tariff_rate: f64,
    pub water_charge: f64,
    pub flag_category: FlagCategory,
    pub flag_surcharge: f64,
    pub has_sewage: bool,
    pub sewage_fee: f64,
    pub total: f64,
}

impl ConsumptionDetailType {
    /**
     * Assembles a stored reading from the registration input and its billing breakdown.
     *
     * # Arguments
     * `id`: The surrogate id assigned by the database.
     * `input`: The validated registration input.
     * `billing`: The computed billing amounts.
     */
    pub fn new(id: i64, input: ConsumptionAddInputType, billing: BillingBreakdown) -> Self {
        ConsumptionDetailType {
            id,
            customer_id: input.customer_id,
            month: input.month,
            year: input.year,
            volume_consumed: input.volume_consumed,
            billed_volume: billing.billed_volume,
            tariff_rate: billing.tariff_rate,
            water_charge: billing.water_charge,
            flag_category: input.flag_category,
            flag_surcharge: billing.flag_surcharge,
            has_sewage: input.has_sewage,
            sewage_fee: billing.sewage_fee,
            total: billing.total,
        }
    }

    pub fn key(&self) -> ConsumptionKey {
        ConsumptionKey::new(self.customer_id.clone(), self.month, self.year)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn input(customer_id: &str, month: i32, year: i32, volume_consumed: f64) -> ConsumptionAddInputType {
        ConsumptionAddInputType { customer_id: customer_id.to_string(), month, year, volume_consumed, flag_category: FlagCategory::default(), has_sewage: false }
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(FlagCategory::classify("Amarela"), FlagCategory::Amarela);
        assert_eq!(FlagCategory::classify("VERMELHA"), FlagCategory::Vermelha);
        assert_eq!(FlagCategory::classify("Verde"), FlagCategory::Verde);
    }

    #[test]
    fn test_classify_unknown_is_verde() {
        assert_eq!(FlagCategory::classify("Azul"), FlagCategory::Verde);
        assert_eq!(FlagCategory::classify(""), FlagCategory::Verde);
    }

    #[test]
    fn test_classify_by_substring_amarela_first() {
        assert_eq!(FlagCategory::classify("bandeira vermelha patamar 2"), FlagCategory::Vermelha);
        assert_eq!(FlagCategory::classify("vermelha/amarela"), FlagCategory::Amarela);
    }

    #[test]
    fn test_flag_default_is_verde() {
        assert_eq!(FlagCategory::default(), FlagCategory::Verde);
        assert_eq!(FlagCategory::default().surcharge_percent(), 0.0);
    }

    #[test]
    fn test_validate_ok() {
        assert!(input("12345678900", 1, 2000, 0.5).validate().is_ok());
        assert!(input("12345678900", 12, 2025, 120.0).validate().is_ok());
    }

    #[test]
    fn test_validate_month_out_of_range() {
        for month in [0, 13, -1] {
            let err = input("12345678900", month, 2024, 5.0).validate().unwrap_err();
            assert_eq!(err.error_type, ErrorType::InvalidArgument);
            assert_eq!(err.message, "month out of range");
        }
    }

    #[test]
    fn test_validate_year_out_of_range() {
        let err = input("12345678900", 6, 1999, 5.0).validate().unwrap_err();
        assert_eq!(err.error_type, ErrorType::InvalidArgument);
        assert_eq!(err.message, "year out of range");
    }

    #[test]
    fn test_validate_volume_not_positive() {
        for volume in [0.0, -3.0, f64::NAN] {
            let err = input("12345678900", 6, 2024, volume).validate().unwrap_err();
            assert_eq!(err.error_type, ErrorType::InvalidArgument);
            assert_eq!(err.message, "volume must be positive");
        }
    }

    #[test]
    fn test_validate_volume_not_finite() {
        let err = input("12345678900", 6, 2024, f64::INFINITY).validate().unwrap_err();
        assert_eq!(err.error_type, ErrorType::InvalidArgument);
        assert_eq!(err.message, "volume must be finite");
        assert!(input("12345678900", 6, 2024, 1.0e308).validate().is_ok());
    }

    #[test]
    fn test_validate_customer_id_control_characters() {
        for customer_id in ["123\n", "12\r345", "\t123"] {
            let err = input(customer_id, 6, 2024, 5.0).validate().unwrap_err();
            assert_eq!(err.error_type, ErrorType::InvalidArgument);
            assert_eq!(err.message, "customer id must not contain control characters");
        }
        assert!(input("João-123", 6, 2024, 5.0).validate().is_ok());
    }

    #[test]
    fn test_validate_empty_customer_id() {
        let err = input("  ", 6, 2024, 5.0).validate().unwrap_err();
        assert_eq!(err.error_type, ErrorType::InvalidArgument);
    }

    #[test]
    fn test_lookup_path() {
        let key = ConsumptionKey::new("12345678900".to_string(), 3, 2024);
        assert_eq!(key.lookup_path(), "/api/consumo/buscar/12345678900/3/2024");
    }
}
