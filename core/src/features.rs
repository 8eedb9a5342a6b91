//! Feature builder: transaction + behaviour signals → fixed feature vector.
//!
//! Pure and deterministic. No I/O, no locks.

use crate::{config::RuleConfig, transaction::Transaction, velocity::VelocityStats};
use chrono::Timelike;
use serde::{Deserialize, Serialize};

/// Ratio above which `amount_vs_baseline` stops growing.
pub const AMOUNT_RATIO_CAP: f64 = 20.0;

/// Last hour (inclusive) of the "midnight" band that starts at 00:00.
pub const MIDNIGHT_LAST_HOUR: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub amount: f64,
    pub amount_vs_baseline: f64,
    pub velocity_count: u32,
    pub velocity_amount_sum: f64,
    pub is_midnight: bool,
    pub is_new_country: bool,
}

impl FeatureVector {
    /// Row layout expected by the trained scoring models:
    /// amount, amount_vs_avg, time_diff_sec, txn_count, amt_sum, is_midnight, is_new_country.
    /// `time_diff_sec` is always 0.
    pub fn to_model_row(&self) -> [f64; 7] {
        [
            self.amount,
            self.amount_vs_baseline,
            0.0,
            f64::from(self.velocity_count),
            self.velocity_amount_sum,
            if self.is_midnight { 1.0 } else { 0.0 },
            if self.is_new_country { 1.0 } else { 0.0 },
        ]
    }
}

pub fn build_features(
    txn: &Transaction,
    velocity: VelocityStats,
    last_country: &str,
    config: &RuleConfig,
) -> FeatureVector {
    let amount_vs_baseline = (txn.amount / config.baseline_amount.max(1.0)).min(AMOUNT_RATIO_CAP);

    FeatureVector {
        amount: txn.amount,
        amount_vs_baseline,
        velocity_count: velocity.count,
        velocity_amount_sum: velocity.amount_sum,
        // Hours 0..=4 in the caller's own offset. Not symmetric around midnight.
        is_midnight: txn.occurred_at.hour() <= MIDNIGHT_LAST_HOUR,
        is_new_country: txn.country != last_country,
    }
}
