//! Config store — the live `RuleConfig` behind an explicit handle.
//!
//! Reads hand out an `Arc<RuleConfig>` snapshot and never wait longer than
//! a pointer swap. Merges are read-modify-write under a single writer lock:
//!   1. apply the patch to the current snapshot
//!   2. persist the merged JSON through the backend
//!   3. swap the snapshot in
//!   4. append a `ConfigMerged` audit record carrying the previous config
//!
//! A persistence failure is logged and reported in the outcome; the merged
//! config still goes live in memory.

use crate::{
    audit::AuditSink,
    config::{ConfigPatch, FieldRejection, RuleConfig},
    error::GuardResult,
    event::AuditRecord,
    types::Timestamp,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Key under which the rule config JSON is persisted.
pub const RULE_CONFIG_KEY: &str = "rule_config";

/// Durable string key-value storage.
pub trait ConfigBackend: Send + Sync {
    fn get(&self, key: &str) -> GuardResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> GuardResult<()>;
}

impl<T: ConfigBackend + ?Sized> ConfigBackend for Arc<T> {
    fn get(&self, key: &str) -> GuardResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> GuardResult<()> {
        (**self).set(key, value)
    }
}

/// Process-local backend. For tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigBackend for MemoryBackend {
    fn get(&self, key: &str) -> GuardResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> GuardResult<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Result of one merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub previous: RuleConfig,
    pub current: RuleConfig,
    pub rejected: Vec<FieldRejection>,
    /// False when the backend refused the write. The new config is live
    /// in memory either way.
    pub persisted: bool,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

pub struct ConfigStore {
    current: RwLock<Arc<RuleConfig>>,
    writer: Mutex<()>,
    backend: Arc<dyn ConfigBackend>,
    audit: Arc<dyn AuditSink>,
}

impl ConfigStore {
    /// Load the persisted config once. Missing or unreadable → defaults;
    /// individual out-of-range fields → that field's default.
    pub fn load(backend: Arc<dyn ConfigBackend>, audit: Arc<dyn AuditSink>) -> Self {
        let initial = match backend.get(RULE_CONFIG_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<RuleConfig>(&json) {
                Ok(stored) => {
                    let (config, rejected) = stored.validated();
                    for r in &rejected {
                        log::warn!("persisted config field {} out of range ({}), using default", r.field, r.reason);
                    }
                    log::info!("loaded persisted rule config");
                    config
                }
                Err(e) => {
                    log::warn!("persisted rule config is unreadable, using defaults: {e}");
                    RuleConfig::default()
                }
            },
            Ok(None) => {
                log::info!("no persisted rule config, using defaults");
                RuleConfig::default()
            }
            Err(e) => {
                log::warn!("config backend unavailable at startup, using defaults: {e}");
                RuleConfig::default()
            }
        };
        Self::with_config(initial, backend, audit)
    }

    pub fn with_config(config: RuleConfig, backend: Arc<dyn ConfigBackend>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            writer: Mutex::new(()),
            backend,
            audit,
        }
    }

    /// The current config snapshot.
    pub fn get(&self) -> Arc<RuleConfig> {
        Arc::clone(&self.current.read())
    }

    /// Merge `patch` into the live config.
    pub fn merge(&self, patch: &ConfigPatch, now: Timestamp) -> MergeOutcome {
        let _writer = self.writer.lock();

        let previous = self.get();
        let (next, rejected) = previous.apply(patch);
        for r in &rejected {
            log::warn!("config field {} rejected: {}", r.field, r.reason);
        }

        if next == *previous {
            return MergeOutcome {
                previous: (*previous).clone(),
                current: next,
                rejected,
                persisted: true,
            };
        }

        let persisted = match self.persist(&next) {
            Ok(()) => true,
            Err(e) => {
                log::error!("rule config not persisted, running with in-memory copy: {e}");
                false
            }
        };

        *self.current.write() = Arc::new(next.clone());

        let record = AuditRecord::config_merged(now, (*previous).clone(), next.clone(), rejected.clone());
        if let Err(e) = self.audit.append(&record) {
            log::error!("config change audit record dropped: {e}");
        }

        log::info!(
            "rule config merged ({} field(s) rejected, persisted={persisted})",
            rejected.len()
        );

        MergeOutcome {
            previous: (*previous).clone(),
            current: next,
            rejected,
            persisted,
        }
    }

    fn persist(&self, config: &RuleConfig) -> GuardResult<()> {
        let json = serde_json::to_string(config)?;
        self.backend.set(RULE_CONFIG_KEY, &json)
    }
}
