//! Risk scorer seam.
//!
//! The trained models live outside this crate. Anything that can turn a
//! `FeatureVector` into a fraud probability and an anomaly score plugs in
//! here. An absent or failing scorer is never fatal: the engine falls back
//! to `RiskScores::ZERO`, which switches off every score-driven rule.

use crate::{error::GuardResult, features::FeatureVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskScores {
    /// Fraud probability in [0, 1].
    pub risk_score: f64,
    /// Isolation-style anomaly score; larger is stranger.
    pub anomaly_score: f64,
}

impl RiskScores {
    pub const ZERO: RiskScores = RiskScores {
        risk_score: 0.0,
        anomaly_score: 0.0,
    };

    pub fn new(risk_score: f64, anomaly_score: f64) -> Self {
        Self {
            risk_score,
            anomaly_score,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.risk_score.is_finite() && self.anomaly_score.is_finite()
    }
}

pub trait RiskScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, features: &FeatureVector) -> GuardResult<RiskScores>;
}

/// Returns the same scores for every transaction.
/// Stands in for a model in replays and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticScorer {
    scores: RiskScores,
}

impl StaticScorer {
    pub fn new(risk_score: f64, anomaly_score: f64) -> Self {
        Self {
            scores: RiskScores::new(risk_score, anomaly_score),
        }
    }
}

impl RiskScorer for StaticScorer {
    fn name(&self) -> &'static str {
        "static"
    }

    fn score(&self, _features: &FeatureVector) -> GuardResult<RiskScores> {
        Ok(self.scores)
    }
}
