//! The guard engine — one call per inbound transaction.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Admission check         (rejected → no state touched)
//!   2. Config snapshot         (one snapshot for the whole decision)
//!   3. VelocityTracker.update
//!   4. GeoTracker.observe
//!   5. build_features
//!   6. RiskScorer.score        (absent / failed → zero scores)
//!   7. decide
//!   8. AuditSink.append        (queued, best effort)
//!
//! RULES:
//!   - Only step 1 and an unauthorized config merge ever return an error.
//!   - Scorer and audit failures are logged, never surfaced.
//!   - Config is read from the injected store, never from ambient state.
//!   - Steps 3 and 4 are each atomic per user, not as a pair. Two decisions
//!     racing on one user may pair a velocity count with the geo record
//!     from either side of the other's observe. Counts are never lost.

use crate::{
    audit::AuditSink,
    clock::{Clock, SystemClock},
    config::{ConfigPatch, RuleConfig},
    config_store::{ConfigStore, MergeOutcome},
    decision::{decide, DecisionResult},
    error::{GuardError, GuardResult},
    event::AuditRecord,
    features::{build_features, FeatureVector},
    geo::GeoTracker,
    scorer::{RiskScorer, RiskScores},
    transaction::Transaction,
    types::Timestamp,
    velocity::{VelocityStats, VelocityTracker},
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Idle velocity windows and lapsed geo records are swept after this many decisions.
pub const MAINTENANCE_INTERVAL: u64 = 4096;

pub struct GuardEngine {
    config: Arc<ConfigStore>,
    velocity: VelocityTracker,
    geo: GeoTracker,
    scorer: Option<Arc<dyn RiskScorer>>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    decisions: AtomicU64,
}

impl GuardEngine {
    pub fn new(config: Arc<ConfigStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            config,
            velocity: VelocityTracker::new(),
            geo: GeoTracker::new(),
            scorer: None,
            audit,
            clock: Arc::new(SystemClock),
            decisions: AtomicU64::new(0),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RiskScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decide one transaction.
    pub fn decide(&self, txn: &Transaction) -> GuardResult<DecisionResult> {
        if let Err(e) = txn.validate() {
            log::warn!("transaction {:?} for user {:?} rejected: {e}", txn.transaction_id, txn.user_id);
            return Err(e);
        }

        let now = self.clock.now();
        let config = self.config.get();
        let window = config.window();

        let velocity = self.velocity.update(&txn.user_id, txn.amount, now, window);
        let last_country = self.geo.observe(&txn.user_id, &txn.country, now, window);

        let features = build_features(txn, velocity, &last_country, &config);
        let scores = self.score(&features);
        let result = decide(&config, &features, scores);

        log::debug!(
            "user={} txn={} action={} velocity={} risk={:.2} anomaly={:.2}",
            txn.user_id,
            txn.transaction_id,
            result.action,
            result.velocity_count,
            result.risk_score,
            result.anomaly_score
        );

        let record = AuditRecord::decision(now, txn.clone(), result.clone());
        if let Err(e) = self.audit.append(&record) {
            log::error!("decision audit for txn {} dropped: {e}", txn.transaction_id);
        }

        self.maintain_every(now, window);
        Ok(result)
    }

    /// Current config snapshot.
    pub fn config(&self) -> Arc<RuleConfig> {
        self.config.get()
    }

    /// Merge a partial config update. `authorize` is the caller's access
    /// check; it runs before anything is read or written.
    pub fn merge_config(&self, patch: &ConfigPatch, authorize: impl FnOnce() -> bool) -> GuardResult<MergeOutcome> {
        if !authorize() {
            log::warn!("unauthorized config merge refused");
            return Err(GuardError::Unauthorized);
        }
        Ok(self.config.merge(patch, self.clock.now()))
    }

    /// Read-only velocity view for one user under the current config.
    pub fn velocity_stats(&self, user_id: &str) -> VelocityStats {
        let config = self.config.get();
        self.velocity.stats(user_id, self.clock.now(), config.window())
    }

    /// Live last country for one user, if any.
    pub fn last_country(&self, user_id: &str) -> Option<String> {
        self.geo.last_country(user_id, self.clock.now())
    }

    /// Users currently holding velocity / geo state.
    pub fn tracked_users(&self) -> (usize, usize) {
        (self.velocity.tracked_users(), self.geo.tracked_users())
    }

    /// Evict idle velocity windows and lapsed geo records.
    pub fn maintain(&self) -> (usize, usize) {
        let window = self.config.get().window();
        self.maintain_at(self.clock.now(), window)
    }

    /// Wait for queued audit records to reach the sink.
    pub fn flush_audit(&self) -> GuardResult<()> {
        self.audit.flush()
    }

    fn score(&self, features: &FeatureVector) -> RiskScores {
        let Some(scorer) = &self.scorer else {
            return RiskScores::ZERO;
        };
        match scorer.score(features) {
            Ok(scores) if scores.is_finite() => scores,
            Ok(scores) => {
                log::warn!("scorer {} returned non-finite scores {scores:?}, using zero", scorer.name());
                RiskScores::ZERO
            }
            Err(e) => {
                log::warn!("scorer {} unavailable, using zero scores: {e}", scorer.name());
                RiskScores::ZERO
            }
        }
    }

    fn maintain_every(&self, now: Timestamp, window: chrono::Duration) {
        let n = self.decisions.fetch_add(1, Ordering::Relaxed) + 1;
        if n % MAINTENANCE_INTERVAL == 0 {
            self.maintain_at(now, window);
        }
    }

    fn maintain_at(&self, now: Timestamp, window: chrono::Duration) -> (usize, usize) {
        let windows = self.velocity.evict_idle(now, window);
        let geo = self.geo.evict_expired(now);
        if windows + geo > 0 {
            log::debug!("evicted {windows} idle velocity windows and {geo} geo records");
        }
        (windows, geo)
    }
}
