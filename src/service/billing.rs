use crate::model::models::{BillingBreakdown, FlagCategory};

/**
 * Volume billed when less than this is consumed.
 */
pub const MINIMUM_BILLED_VOLUME: f64 = 10.0;

/**
 * Tariff tiers as (inclusive upper bound of billed volume, rate per cubic meter).
 */
const TARIFF_TIERS: [(f64, f64); 3] = [(10.0, 2.50), (20.0, 3.50), (50.0, 5.00)];

/**
 * Rate applied above the last tier.
 */
const TOP_TARIFF_RATE: f64 = 6.50;

/**
 * Sewage fee as a fraction of water charge plus flag surcharge.
 */
const SEWAGE_FEE_PERCENT: f64 = 0.80;

/**
 * Selects the rate for a billed volume. The whole volume is charged at the selected rate.
 */
pub fn tariff_rate(billed_volume: f64) -> f64 {
    TARIFF_TIERS.iter().find(|(upper_bound, _)| billed_volume <= *upper_bound).map_or(TOP_TARIFF_RATE, |(_, rate)| *rate)
}

/**
 * Computes the billing amounts for a reading.
 *
 * # Arguments
 * `volume_consumed`: Cubic meters consumed. Must be positive.
 * `flag_category`: Tariff flag in effect.
 * `has_sewage`: Whether the customer is charged for sewage.
 *
 * # Returns
 * The full `BillingBreakdown`. No rounding is applied.
 */
pub fn compute_billing(volume_consumed: f64, flag_category: FlagCategory, has_sewage: bool) -> BillingBreakdown {
    let billed_volume = volume_consumed.max(MINIMUM_BILLED_VOLUME);
    let tariff_rate = tariff_rate(billed_volume);
    let water_charge = billed_volume * tariff_rate;
    let flag_surcharge = water_charge * flag_category.surcharge_percent();
    let sewage_fee = if has_sewage { (water_charge + flag_surcharge) * SEWAGE_FEE_PERCENT } else { 0.0 };
    BillingBreakdown { billed_volume, tariff_rate, water_charge, flag_surcharge, sewage_fee, total: water_charge + flag_surcharge + sewage_fee }
}
