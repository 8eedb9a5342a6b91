//! Rule configuration, the closed set of checks, and partial updates.

use crate::error::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ── Checks ───────────────────────────────────────────────────────────────────

/// Every rule the engine knows how to switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    Velocity,
    GeoLocation,
    AmountSpike,
    Midnight,
    MlRiskScore,
    AnomalyDetection,
}

impl CheckName {
    pub const ALL: [CheckName; 6] = [
        CheckName::Velocity,
        CheckName::GeoLocation,
        CheckName::AmountSpike,
        CheckName::Midnight,
        CheckName::MlRiskScore,
        CheckName::AnomalyDetection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Velocity => "velocity",
            Self::GeoLocation => "geo_location",
            Self::AmountSpike => "amount_spike",
            Self::Midnight => "midnight",
            Self::MlRiskScore => "ml_risk_score",
            Self::AnomalyDetection => "anomaly_detection",
        }
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown check '{s}'"))
    }
}

/// On/off switch per check. Missing keys in persisted JSON load as enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledChecks {
    #[serde(default = "enabled")]
    pub velocity: bool,
    #[serde(default = "enabled")]
    pub geo_location: bool,
    #[serde(default = "enabled")]
    pub amount_spike: bool,
    #[serde(default = "enabled")]
    pub midnight: bool,
    #[serde(default = "enabled")]
    pub ml_risk_score: bool,
    #[serde(default = "enabled")]
    pub anomaly_detection: bool,
}

fn enabled() -> bool {
    true
}

impl Default for EnabledChecks {
    fn default() -> Self {
        Self::all(true)
    }
}

impl EnabledChecks {
    pub fn all(on: bool) -> Self {
        Self {
            velocity: on,
            geo_location: on,
            amount_spike: on,
            midnight: on,
            ml_risk_score: on,
            anomaly_detection: on,
        }
    }

    pub fn is_enabled(&self, check: CheckName) -> bool {
        match check {
            CheckName::Velocity => self.velocity,
            CheckName::GeoLocation => self.geo_location,
            CheckName::AmountSpike => self.amount_spike,
            CheckName::Midnight => self.midnight,
            CheckName::MlRiskScore => self.ml_risk_score,
            CheckName::AnomalyDetection => self.anomaly_detection,
        }
    }

    pub fn set(&mut self, check: CheckName, on: bool) {
        match check {
            CheckName::Velocity => self.velocity = on,
            CheckName::GeoLocation => self.geo_location = on,
            CheckName::AmountSpike => self.amount_spike = on,
            CheckName::Midnight => self.midnight = on,
            CheckName::MlRiskScore => self.ml_risk_score = on,
            CheckName::AnomalyDetection => self.anomaly_detection = on,
        }
    }
}

// ── Rule config ──────────────────────────────────────────────────────────────

const DEFAULT_VELOCITY_THRESHOLD: u32 = 3;
const DEFAULT_VELOCITY_WINDOW_SECONDS: u64 = 600; // 10 minutes
const DEFAULT_HIGH_RISK_THRESHOLD: f64 = 0.9;
const DEFAULT_FLAG_RISK_THRESHOLD: f64 = 0.8;
const DEFAULT_AMOUNT_SPIKE_MULTIPLIER: f64 = 3.0;
const DEFAULT_ANOMALY_SCORE_THRESHOLD: f64 = 0.03;
const DEFAULT_BASELINE_AMOUNT: f64 = 1500.0;

/// Longest accepted velocity window: one year.
pub const MAX_VELOCITY_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

/// The single global rule configuration. This is also the persisted JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub velocity_threshold: u32,
    pub velocity_window_seconds: u64,
    pub high_risk_threshold: f64,
    pub flag_risk_threshold: f64,
    pub amount_spike_multiplier: f64,
    pub anomaly_score_threshold: f64,
    pub baseline_amount: f64,
    pub enabled_checks: EnabledChecks,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            velocity_threshold: DEFAULT_VELOCITY_THRESHOLD,
            velocity_window_seconds: DEFAULT_VELOCITY_WINDOW_SECONDS,
            high_risk_threshold: DEFAULT_HIGH_RISK_THRESHOLD,
            flag_risk_threshold: DEFAULT_FLAG_RISK_THRESHOLD,
            amount_spike_multiplier: DEFAULT_AMOUNT_SPIKE_MULTIPLIER,
            anomaly_score_threshold: DEFAULT_ANOMALY_SCORE_THRESHOLD,
            baseline_amount: DEFAULT_BASELINE_AMOUNT,
            enabled_checks: EnabledChecks::default(),
        }
    }
}

impl RuleConfig {
    /// The velocity window, also used as the geo TTL. Clamped to
    /// `MAX_VELOCITY_WINDOW_SECONDS` whatever the field holds.
    pub fn window(&self) -> chrono::Duration {
        let secs = self.velocity_window_seconds.clamp(1, MAX_VELOCITY_WINDOW_SECONDS);
        chrono::Duration::seconds(secs as i64)
    }

    /// Re-check a config that did not come through `apply`, such as one
    /// read back from storage. Out-of-range fields fall back to defaults.
    pub fn validated(&self) -> (RuleConfig, Vec<FieldRejection>) {
        RuleConfig::default().apply(&ConfigPatch::from(self))
    }

    /// Apply `patch` on top of `self`. Fields that fail validation are left
    /// unchanged and reported; the rest are applied.
    pub fn apply(&self, patch: &ConfigPatch) -> (RuleConfig, Vec<FieldRejection>) {
        let mut next = self.clone();
        let mut rejected = Vec::new();

        if let Some(v) = patch.velocity_threshold {
            if v >= 1 {
                next.velocity_threshold = v;
            } else {
                rejected.push(FieldRejection::new("velocity_threshold", "must be at least 1"));
            }
        }
        if let Some(v) = patch.velocity_window_seconds {
            if (1..=MAX_VELOCITY_WINDOW_SECONDS).contains(&v) {
                next.velocity_window_seconds = v;
            } else {
                rejected.push(FieldRejection::new(
                    "velocity_window_seconds",
                    format!("must be between 1 and {MAX_VELOCITY_WINDOW_SECONDS}"),
                ));
            }
        }
        if let Some(v) = patch.high_risk_threshold {
            match unit_interval(v) {
                Ok(v) => next.high_risk_threshold = v,
                Err(reason) => rejected.push(FieldRejection::new("high_risk_threshold", reason)),
            }
        }
        if let Some(v) = patch.flag_risk_threshold {
            match unit_interval(v) {
                Ok(v) => next.flag_risk_threshold = v,
                Err(reason) => rejected.push(FieldRejection::new("flag_risk_threshold", reason)),
            }
        }
        if let Some(v) = patch.amount_spike_multiplier {
            if v.is_finite() && v >= 1.0 {
                next.amount_spike_multiplier = v;
            } else {
                rejected.push(FieldRejection::new("amount_spike_multiplier", "must be a number >= 1"));
            }
        }
        if let Some(v) = patch.anomaly_score_threshold {
            if v.is_finite() && v >= 0.0 {
                next.anomaly_score_threshold = v;
            } else {
                rejected.push(FieldRejection::new("anomaly_score_threshold", "must be a number >= 0"));
            }
        }
        if let Some(v) = patch.baseline_amount {
            if v.is_finite() && v > 0.0 {
                next.baseline_amount = v;
            } else {
                rejected.push(FieldRejection::new("baseline_amount", "must be a positive number"));
            }
        }
        // Merged key by key; untouched checks keep their current value.
        for (name, on) in &patch.enabled_checks {
            match name.parse::<CheckName>() {
                Ok(check) => next.enabled_checks.set(check, *on),
                Err(reason) => rejected.push(FieldRejection::new(format!("enabled_checks.{name}"), reason)),
            }
        }

        (next, rejected)
    }
}

fn unit_interval(v: f64) -> Result<f64, &'static str> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err("must be between 0 and 1")
    }
}

// ── Partial updates ──────────────────────────────────────────────────────────

/// A partial config update. Absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_window_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_risk_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_risk_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_spike_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_score_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enabled_checks: BTreeMap<String, bool>,
}

impl From<&RuleConfig> for ConfigPatch {
    /// A patch that sets every field to the value in `config`.
    fn from(config: &RuleConfig) -> Self {
        Self {
            velocity_threshold: Some(config.velocity_threshold),
            velocity_window_seconds: Some(config.velocity_window_seconds),
            high_risk_threshold: Some(config.high_risk_threshold),
            flag_risk_threshold: Some(config.flag_risk_threshold),
            amount_spike_multiplier: Some(config.amount_spike_multiplier),
            anomaly_score_threshold: Some(config.anomaly_score_threshold),
            baseline_amount: Some(config.baseline_amount),
            enabled_checks: CheckName::ALL
                .into_iter()
                .map(|c| (c.as_str().to_string(), config.enabled_checks.is_enabled(c)))
                .collect(),
        }
    }
}

impl ConfigPatch {
    pub fn check(mut self, check: CheckName, on: bool) -> Self {
        self.enabled_checks.insert(check.as_str().to_string(), on);
        self
    }

    /// Parse an untyped admin payload field by field. A field with the wrong
    /// type, or a key that names no field, is rejected on its own without
    /// discarding the rest. Only a non-object payload is an error.
    pub fn from_json_value(value: &Value) -> GuardResult<(ConfigPatch, Vec<FieldRejection>)> {
        let object = value
            .as_object()
            .ok_or_else(|| GuardError::InvalidConfigPatch("expected a JSON object".into()))?;

        let mut patch = ConfigPatch::default();
        let mut rejected = Vec::new();

        for (key, raw) in object {
            match key.as_str() {
                "velocity_threshold" => match raw.as_u64().and_then(|v| u32::try_from(v).ok()) {
                    Some(v) => patch.velocity_threshold = Some(v),
                    None => rejected.push(FieldRejection::new(key.as_str(), "expected a non-negative integer")),
                },
                "velocity_window_seconds" => match raw.as_u64() {
                    Some(v) => patch.velocity_window_seconds = Some(v),
                    None => rejected.push(FieldRejection::new(key.as_str(), "expected a non-negative integer")),
                },
                "high_risk_threshold" => take_f64(raw, key, &mut patch.high_risk_threshold, &mut rejected),
                "flag_risk_threshold" => take_f64(raw, key, &mut patch.flag_risk_threshold, &mut rejected),
                "amount_spike_multiplier" => take_f64(raw, key, &mut patch.amount_spike_multiplier, &mut rejected),
                "anomaly_score_threshold" => take_f64(raw, key, &mut patch.anomaly_score_threshold, &mut rejected),
                "baseline_amount" => take_f64(raw, key, &mut patch.baseline_amount, &mut rejected),
                "enabled_checks" => match raw.as_object() {
                    Some(checks) => {
                        for (name, flag) in checks {
                            match flag.as_bool() {
                                Some(on) => {
                                    patch.enabled_checks.insert(name.clone(), on);
                                }
                                None => rejected.push(FieldRejection::new(
                                    format!("enabled_checks.{name}"),
                                    "expected a boolean",
                                )),
                            }
                        }
                    }
                    None => rejected.push(FieldRejection::new(key.as_str(), "expected an object of booleans")),
                },
                _ => rejected.push(FieldRejection::new(key.as_str(), "unknown field")),
            }
        }

        Ok((patch, rejected))
    }
}

fn take_f64(raw: &Value, key: &str, slot: &mut Option<f64>, rejected: &mut Vec<FieldRejection>) {
    match raw.as_f64() {
        Some(v) => *slot = Some(v),
        None => rejected.push(FieldRejection::new(key, "expected a number")),
    }
}

/// One field of a patch that was not applied, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRejection {
    pub field: String,
    pub reason: String,
}

impl FieldRejection {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn check_names_round_trip_through_strings() {
        for check in CheckName::ALL {
            assert_eq!(check.as_str().parse::<CheckName>().unwrap(), check);
        }
        assert!("geo".parse::<CheckName>().is_err());
    }

    #[test]
    fn persisted_config_with_missing_fields_loads_defaults() {
        let cfg: RuleConfig =
            serde_json::from_value(json!({ "velocity_threshold": 8, "enabled_checks": { "midnight": false } }))
                .unwrap();
        assert_eq!(cfg.velocity_threshold, 8);
        assert_eq!(cfg.baseline_amount, 1500.0);
        assert!(!cfg.enabled_checks.midnight);
        assert!(cfg.enabled_checks.velocity);
    }

    #[test]
    fn untyped_patch_keeps_good_fields_and_reports_bad_ones() {
        let (patch, rejected) = ConfigPatch::from_json_value(&json!({
            "velocity_threshold": "eight",
            "high_risk_threshold": 0.92,
            "surprise": 1,
            "enabled_checks": { "velocity": false, "midnight": "no" }
        }))
        .unwrap();

        assert_eq!(patch.velocity_threshold, None);
        assert_eq!(patch.high_risk_threshold, Some(0.92));
        assert_eq!(patch.enabled_checks.get("velocity"), Some(&false));

        let fields: Vec<&str> = rejected.iter().map(|r| r.field.as_str()).collect();
        assert!(fields.contains(&"velocity_threshold"));
        assert!(fields.contains(&"surprise"));
        assert!(fields.contains(&"enabled_checks.midnight"));
    }

    #[test]
    fn non_object_payload_is_an_error() {
        assert!(ConfigPatch::from_json_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected_individually() {
        let patch = ConfigPatch {
            velocity_threshold: Some(0),
            high_risk_threshold: Some(1.5),
            baseline_amount: Some(2000.0),
            amount_spike_multiplier: Some(0.5),
            anomaly_score_threshold: Some(-0.1),
            ..Default::default()
        }
        .check(CheckName::Midnight, false);
        let mut patch = patch;
        patch.enabled_checks.insert("geo".into(), false);

        let base = RuleConfig::default();
        let (next, rejected) = base.apply(&patch);

        assert_eq!(next.velocity_threshold, base.velocity_threshold);
        assert_eq!(next.high_risk_threshold, base.high_risk_threshold);
        assert_eq!(next.amount_spike_multiplier, base.amount_spike_multiplier);
        assert_eq!(next.anomaly_score_threshold, base.anomaly_score_threshold);
        assert_eq!(next.baseline_amount, 2000.0);
        assert!(!next.enabled_checks.midnight);
        assert_eq!(rejected.len(), 5, "rejections: {rejected:?}");
        assert!(rejected.iter().any(|r| r.field == "enabled_checks.geo"));
    }
}
