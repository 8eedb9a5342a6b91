//! Config store tests — partial merges, persistence, audit, concurrency.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use txguard_core::audit::{AuditSink, MemoryAuditSink, NullAuditSink};
use txguard_core::config::{CheckName, ConfigPatch, RuleConfig, MAX_VELOCITY_WINDOW_SECONDS};
use txguard_core::config_store::{ConfigBackend, ConfigStore, MemoryBackend, RULE_CONFIG_KEY};
use txguard_core::error::{GuardError, GuardResult};
use txguard_core::event::AuditRecord;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn store() -> (ConfigStore, Arc<MemoryBackend>, Arc<MemoryAuditSink>) {
    let backend = Arc::new(MemoryBackend::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let store = ConfigStore::load(backend.clone(), audit.clone());
    (store, backend, audit)
}

/// Accepts nothing.
struct BrokenBackend;

impl ConfigBackend for BrokenBackend {
    fn get(&self, _key: &str) -> GuardResult<Option<String>> {
        Err(GuardError::Other(anyhow::anyhow!("backend offline")))
    }

    fn set(&self, _key: &str, _value: &str) -> GuardResult<()> {
        Err(GuardError::Other(anyhow::anyhow!("backend offline")))
    }
}

fn config_merges(audit: &MemoryAuditSink) -> Vec<(RuleConfig, RuleConfig)> {
    audit
        .records()
        .into_iter()
        .filter_map(|r| match r {
            AuditRecord::ConfigMerged { previous, current, .. } => Some((previous, current)),
            _ => None,
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn cold_start_uses_defaults() {
    let (store, _, _) = store();
    assert_eq!(*store.get(), RuleConfig::default());
}

/// Patching one field leaves every other field untouched.
#[test]
fn single_field_merge_leaves_the_rest_alone() {
    let (store, _, _) = store();
    let outcome = store.merge(
        &ConfigPatch {
            velocity_threshold: Some(5),
            ..Default::default()
        },
        now(),
    );

    let expected = RuleConfig {
        velocity_threshold: 5,
        ..RuleConfig::default()
    };
    assert_eq!(outcome.current, expected);
    assert_eq!(*store.get(), expected);
    assert!(outcome.changed());
    assert!(outcome.persisted);
}

/// `enabled_checks` merges key by key, not wholesale.
#[test]
fn enabled_checks_merge_by_key() {
    let (store, _, _) = store();
    store.merge(&ConfigPatch::default().check(CheckName::Midnight, false), now());
    store.merge(&ConfigPatch::default().check(CheckName::GeoLocation, false), now());

    let checks = store.get().enabled_checks;
    assert!(!checks.midnight);
    assert!(!checks.geo_location);
    assert!(checks.velocity && checks.amount_spike && checks.ml_risk_score && checks.anomaly_detection);
}

#[test]
fn merged_config_is_persisted_and_reloaded() {
    let (store, backend, _) = store();
    store.merge(
        &ConfigPatch {
            baseline_amount: Some(2500.0),
            ..Default::default()
        }
        .check(CheckName::AnomalyDetection, false),
        now(),
    );

    let raw = backend.get(RULE_CONFIG_KEY).unwrap().expect("config persisted");
    let persisted: RuleConfig = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted, *store.get());

    let reloaded = ConfigStore::load(backend, Arc::new(NullAuditSink));
    assert_eq!(reloaded.get().baseline_amount, 2500.0);
    assert!(!reloaded.get().enabled_checks.anomaly_detection);
}

#[test]
fn unreadable_persisted_config_falls_back_to_defaults() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set(RULE_CONFIG_KEY, "{not json").unwrap();
    let store = ConfigStore::load(backend, Arc::new(NullAuditSink));
    assert_eq!(*store.get(), RuleConfig::default());
}

/// A stored config is re-checked on load; bad fields fall back one by one.
#[test]
fn out_of_range_persisted_fields_load_as_defaults() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .set(
            RULE_CONFIG_KEY,
            r#"{"velocity_threshold":0,"high_risk_threshold":7.5,"baseline_amount":-3,
                "velocity_window_seconds":10000000000000,"flag_risk_threshold":0.7,
                "enabled_checks":{"midnight":false}}"#,
        )
        .unwrap();

    let store = ConfigStore::load(backend, Arc::new(NullAuditSink));
    let cfg = store.get();
    let defaults = RuleConfig::default();
    assert_eq!(cfg.velocity_threshold, defaults.velocity_threshold);
    assert_eq!(cfg.high_risk_threshold, defaults.high_risk_threshold);
    assert_eq!(cfg.baseline_amount, defaults.baseline_amount);
    assert_eq!(cfg.velocity_window_seconds, defaults.velocity_window_seconds);
    assert_eq!(cfg.flag_risk_threshold, 0.7, "valid fields survive");
    assert!(!cfg.enabled_checks.midnight, "valid fields survive");
}

/// A window too large to subtract from a timestamp is refused.
#[test]
fn oversized_window_is_rejected() {
    let (store, _, _) = store();
    let (patch, parse_rejections) =
        ConfigPatch::from_json_value(&json!({ "velocity_window_seconds": 10_000_000_000_000u64 })).unwrap();
    assert!(parse_rejections.is_empty());

    let outcome = store.merge(&patch, now());
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].field, "velocity_window_seconds");
    assert_eq!(store.get().velocity_window_seconds, 600);
    assert!(!outcome.changed());

    let at_max = store.merge(
        &ConfigPatch {
            velocity_window_seconds: Some(MAX_VELOCITY_WINDOW_SECONDS),
            ..Default::default()
        },
        now(),
    );
    assert!(at_max.rejected.is_empty());
    assert_eq!(store.get().velocity_window_seconds, MAX_VELOCITY_WINDOW_SECONDS);
}

#[test]
fn window_is_clamped_whatever_the_field_holds() {
    let cfg = RuleConfig {
        velocity_window_seconds: u64::MAX,
        ..RuleConfig::default()
    };
    assert_eq!(cfg.window().num_seconds(), MAX_VELOCITY_WINDOW_SECONDS as i64);
}

/// A change is audited with the config it replaced.
#[test]
fn merge_is_audited_with_previous_config() {
    let (store, _, audit) = store();
    store.merge(
        &ConfigPatch {
            flag_risk_threshold: Some(0.7),
            ..Default::default()
        },
        now(),
    );

    let merges = config_merges(&audit);
    assert_eq!(merges.len(), 1);
    let (previous, current) = &merges[0];
    assert_eq!(*previous, RuleConfig::default());
    assert_eq!(current.flag_risk_threshold, 0.7);
}

#[test]
fn no_op_merge_is_not_audited_or_persisted() {
    let (store, backend, audit) = store();
    let outcome = store.merge(
        &ConfigPatch {
            velocity_threshold: Some(3),
            ..Default::default()
        },
        now(),
    );
    assert!(!outcome.changed());
    assert!(audit.is_empty());
    assert!(backend.get(RULE_CONFIG_KEY).unwrap().is_none());
}

#[test]
fn invalid_fields_are_rejected_and_valid_ones_applied() {
    let (store, _, audit) = store();
    let (patch, parse_rejections) = ConfigPatch::from_json_value(&json!({
        "velocity_threshold": 0,
        "high_risk_threshold": 0.95,
        "baseline_amount": -10,
        "colour": "red",
    }))
    .unwrap();
    assert_eq!(parse_rejections.len(), 1, "only the unknown key fails parsing");

    let outcome = store.merge(&patch, now());
    assert_eq!(outcome.current.high_risk_threshold, 0.95);
    assert_eq!(outcome.current.velocity_threshold, 3);
    assert_eq!(outcome.current.baseline_amount, 1500.0);

    let fields: Vec<&str> = outcome.rejected.iter().map(|r| r.field.as_str()).collect();
    assert_eq!(fields, vec!["velocity_threshold", "baseline_amount"]);

    match &audit.records()[..] {
        [AuditRecord::ConfigMerged { rejected, .. }] => assert_eq!(rejected.len(), 2),
        other => panic!("expected one config record, got {other:?}"),
    }
}

/// A backend write failure still applies the config in memory.
#[test]
fn persistence_failure_keeps_in_memory_config() {
    let audit = Arc::new(MemoryAuditSink::new());
    let store = ConfigStore::load(Arc::new(BrokenBackend), audit.clone());
    assert_eq!(*store.get(), RuleConfig::default());

    let outcome = store.merge(
        &ConfigPatch {
            velocity_threshold: Some(7),
            ..Default::default()
        },
        now(),
    );
    assert!(!outcome.persisted);
    assert_eq!(store.get().velocity_threshold, 7);
    assert_eq!(audit.len(), 1);
}

/// Readers holding an old snapshot are unaffected by a later merge.
#[test]
fn snapshots_are_immutable() {
    let (store, _, _) = store();
    let before = store.get();
    store.merge(
        &ConfigPatch {
            velocity_window_seconds: Some(120),
            ..Default::default()
        },
        now(),
    );
    assert_eq!(before.velocity_window_seconds, 600);
    assert_eq!(store.get().velocity_window_seconds, 120);
}

/// Concurrent merges touching different fields never lose each other.
#[test]
fn concurrent_merges_do_not_lose_updates() {
    let (store, _, audit) = store();
    let rounds: u32 = 100;

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 1..=rounds {
                store.merge(
                    &ConfigPatch {
                        velocity_threshold: Some(10 + i),
                        ..Default::default()
                    },
                    now(),
                );
            }
        });
        s.spawn(|| {
            for i in 1..=rounds {
                store.merge(
                    &ConfigPatch {
                        baseline_amount: Some(1000.0 + f64::from(i)),
                        ..Default::default()
                    },
                    now(),
                );
            }
        });
    });

    let cfg = store.get();
    assert_eq!(cfg.velocity_threshold, 10 + rounds);
    assert_eq!(cfg.baseline_amount, 1000.0 + f64::from(rounds));

    // Every merge changed exactly one field relative to the one before it.
    let merges = config_merges(&audit);
    assert_eq!(merges.len(), 2 * rounds as usize);
    for (previous, current) in &merges {
        let threshold_moved = previous.velocity_threshold != current.velocity_threshold;
        let baseline_moved = previous.baseline_amount != current.baseline_amount;
        assert!(threshold_moved ^ baseline_moved, "{previous:?} -> {current:?}");
    }
    for pair in merges.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "audit chain must be contiguous");
    }
}

#[test]
fn memory_sink_is_usable_through_the_trait_object() {
    let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
    let store = ConfigStore::with_config(RuleConfig::default(), Arc::new(MemoryBackend::new()), audit.clone());
    store.merge(&ConfigPatch::default().check(CheckName::Velocity, false), now());
    assert!(audit.flush().is_ok());
    assert!(!store.get().enabled_checks.velocity);
}
