//! Decision engine — ordered rules over features, scores and config.
//!
//! RULE ORDER (fixed, never reordered):
//!   1. BLOCK velocity          — short-circuits everything below
//!   2. BLOCK risk + spike      — short-circuits the FLAG tier
//!   3. FLAG tier, each evaluated independently, reasons accumulate:
//!        new country, amount spike, midnight hour, anomaly, risk pattern
//!   4. ALLOW with a single canned reason when nothing tripped
//!
//! A disabled check never adds a reason and never changes the tier.

use crate::{
    config::{CheckName, RuleConfig},
    features::FeatureVector,
    scorer::RiskScores,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Allow,
    Flag,
    Block,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Flag => "FLAG",
            Self::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one decision. `reasons` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub action: Action,
    pub reasons: Vec<String>,
    pub risk_score: f64,
    pub anomaly_score: f64,
    pub velocity_count: u32,
    pub velocity_amount_sum: f64,
}

impl DecisionResult {
    /// Reasons joined the way the decision log stores them.
    pub fn reason_summary(&self) -> String {
        self.reasons.join(", ")
    }
}

pub const NORMAL_BEHAVIOR_REASON: &str = "Normal transaction behavior";
pub const ANOMALY_REASON: &str = "Unusual behavior detected by anomaly model";

pub fn decide(config: &RuleConfig, features: &FeatureVector, scores: RiskScores) -> DecisionResult {
    let checks = &config.enabled_checks;
    let on = |check: CheckName| checks.is_enabled(check);
    let RiskScores {
        risk_score,
        anomaly_score,
    } = scores;
    let spike = features.amount_vs_baseline >= config.amount_spike_multiplier;

    let result = |action: Action, reasons: Vec<String>| DecisionResult {
        action,
        reasons,
        risk_score,
        anomaly_score,
        velocity_count: features.velocity_count,
        velocity_amount_sum: features.velocity_amount_sum,
    };

    // ── BLOCK tier ──────────────────────────────────────────────

    if on(CheckName::Velocity) && features.velocity_count >= config.velocity_threshold {
        return result(
            Action::Block,
            vec![format!(
                "High transaction velocity (≥{} in {})",
                config.velocity_threshold,
                describe_window(config.velocity_window_seconds)
            )],
        );
    }

    if on(CheckName::MlRiskScore)
        && on(CheckName::AmountSpike)
        && risk_score > config.high_risk_threshold
        && spike
    {
        return result(
            Action::Block,
            vec!["High fraud risk with sudden amount spike".to_string()],
        );
    }

    // ── FLAG tier ───────────────────────────────────────────────

    let mut reasons = Vec::new();

    if on(CheckName::GeoLocation) && features.is_new_country {
        reasons.push("Transaction from a new country".to_string());
    }
    if on(CheckName::AmountSpike) && spike {
        reasons.push("Sudden large amount compared to user history".to_string());
    }
    if on(CheckName::Midnight) && features.is_midnight {
        reasons.push("Transaction during unusual hours (midnight)".to_string());
    }
    if on(CheckName::AnomalyDetection) && anomaly_score > config.anomaly_score_threshold {
        reasons.push(ANOMALY_REASON.to_string());
    }
    if on(CheckName::MlRiskScore) && risk_score > config.flag_risk_threshold {
        reasons.push("Matches known fraud patterns".to_string());
    }

    if reasons.is_empty() {
        result(Action::Allow, vec![NORMAL_BEHAVIOR_REASON.to_string()])
    } else {
        result(Action::Flag, reasons)
    }
}

fn describe_window(seconds: u64) -> String {
    match seconds {
        60 => "1 minute".to_string(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{s} seconds"),
    }
}
