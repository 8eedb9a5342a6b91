//! guard-runner: headless driver for txguard-core.
//!
//! Usage:
//!   guard-runner --seed 12345 --transactions 500 --db guard.db
//!   guard-runner --db guard.db --ipc-mode --admin-token s3cret
//!
//! In IPC mode every stdin line is one JSON command and every stdout line
//! is one JSON reply.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use txguard_core::{
    audit::{AuditQueue, AuditSink, DEFAULT_QUEUE_CAPACITY},
    clock::ManualClock,
    config::ConfigPatch,
    config_store::{ConfigBackend, ConfigStore},
    decision::{Action, DecisionResult},
    engine::GuardEngine,
    error::{GuardError, GuardResult},
    scorer::StaticScorer,
    store::{GuardStore, DEFAULT_HISTORY_LIMIT},
    synthetic::TrafficGenerator,
    transaction::Transaction,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Decide {
        transaction: serde_json::Value,
    },
    GetConfig,
    MergeConfig {
        #[serde(default)]
        token: Option<String>,
        patch: serde_json::Value,
    },
    History {
        #[serde(default)]
        limit: Option<usize>,
    },
    Stats,
    ConfigHistory {
        #[serde(default)]
        limit: Option<usize>,
    },
    AnomalyPatterns {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Dashboard {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct DecisionReply<'a> {
    user_id: &'a str,
    transaction_id: &'a str,
    #[serde(flatten)]
    decision: &'a DecisionResult,
    reason: String,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let transactions = parse_arg(&args, "--transactions", 200u64);
    let step_secs = parse_arg(&args, "--step-secs", 20i64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let admin_token = string_arg(&args, "--admin-token")
        .map(str::to_string)
        .or_else(|| env::var("GUARD_ADMIN_TOKEN").ok());
    let static_risk = string_arg(&args, "--static-risk").and_then(|v| v.parse::<f64>().ok());
    let static_anomaly = string_arg(&args, "--static-anomaly").and_then(|v| v.parse::<f64>().ok());

    if !ipc_mode {
        println!("txguard — guard-runner");
        println!("  seed:          {seed}");
        println!("  transactions:  {transactions}");
        println!("  step:          {step_secs}s");
        println!("  db:            {db}");
        println!();
    }

    let store = Arc::new(GuardStore::open(db)?);
    store.migrate()?;

    let queue = Arc::new(AuditQueue::spawn(store.clone(), DEFAULT_QUEUE_CAPACITY)?);
    let backend: Arc<dyn ConfigBackend> = store.clone();
    let audit: Arc<dyn AuditSink> = queue.clone();
    let config = Arc::new(ConfigStore::load(backend, audit.clone()));

    let mut engine = GuardEngine::new(config, audit);
    match (static_risk, static_anomaly) {
        (None, None) => log::warn!("no risk scorer configured; score-based rules are inactive"),
        (risk, anomaly) => {
            engine = engine.with_scorer(Arc::new(StaticScorer::new(risk.unwrap_or(0.0), anomaly.unwrap_or(0.0))));
        }
    }

    if ipc_mode {
        run_ipc_loop(&engine, &store, admin_token.as_deref())?;
    } else {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine.with_clock(clock.clone());
        run_replay(&engine, &clock, seed, transactions, step_secs)?;
        engine.flush_audit()?;
        print_summary(&engine, &store, queue.as_ref())?;
    }

    queue.shutdown();
    Ok(())
}

fn run_replay(engine: &GuardEngine, clock: &ManualClock, seed: u64, n: u64, step_secs: i64) -> Result<()> {
    let mut traffic = TrafficGenerator::new(seed);
    for _ in 0..n {
        let now: DateTime<Utc> = clock.advance_secs(step_secs);
        let txn = traffic.next_transaction(now.fixed_offset());
        engine.decide(&txn)?;
    }
    Ok(())
}

fn run_ipc_loop(engine: &GuardEngine, store: &GuardStore, admin_token: Option<&str>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let Some(reply) = handle_command(engine, store, admin_token, cmd) else {
            break;
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    engine.flush_audit()?;
    Ok(())
}

/// One IPC command → one reply. `None` means quit. Store and audit
/// failures become `{"error": ...}` replies; they never end the loop.
fn handle_command(
    engine: &GuardEngine,
    store: &GuardStore,
    admin_token: Option<&str>,
    cmd: IpcCommand,
) -> Option<serde_json::Value> {
    let reply = match cmd {
        IpcCommand::Quit => return None,
        IpcCommand::Decide { transaction } => handle_decide(engine, transaction),
        IpcCommand::GetConfig => serde_json::json!({ "config": engine.config().as_ref() }),
        IpcCommand::MergeConfig { token, patch } => handle_merge(engine, admin_token, token.as_deref(), &patch),
        IpcCommand::History { limit } => reply_or_error(|| {
            engine.flush_audit()?;
            let rows = store.recent_decisions(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))?;
            Ok(serde_json::json!({ "count": rows.len(), "decisions": rows }))
        }),
        IpcCommand::Stats => reply_or_error(|| {
            engine.flush_audit()?;
            Ok(serde_json::to_value(store.decision_stats()?)?)
        }),
        IpcCommand::ConfigHistory { limit } => reply_or_error(|| {
            engine.flush_audit()?;
            let rows = store.config_history(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))?;
            Ok(serde_json::json!({ "count": rows.len(), "changes": rows }))
        }),
        IpcCommand::AnomalyPatterns { token, limit } => {
            if !authorized(admin_token, token.as_deref()) {
                return Some(unauthorized());
            }
            reply_or_error(|| {
                engine.flush_audit()?;
                let threshold = engine.config().anomaly_score_threshold;
                let rows = store.anomaly_patterns(threshold, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))?;
                Ok(serde_json::json!({ "count": rows.len(), "patterns": rows }))
            })
        }
        IpcCommand::Dashboard { token, limit } => {
            if !authorized(admin_token, token.as_deref()) {
                return Some(unauthorized());
            }
            reply_or_error(|| {
                engine.flush_audit()?;
                let view = store.dashboard(&engine.config(), limit.unwrap_or(DEFAULT_HISTORY_LIMIT))?;
                Ok(serde_json::to_value(view)?)
            })
        }
    };
    Some(reply)
}

fn reply_or_error(f: impl FnOnce() -> GuardResult<serde_json::Value>) -> serde_json::Value {
    f().unwrap_or_else(|e| {
        log::error!("ipc query failed: {e}");
        serde_json::json!({ "error": e.to_string() })
    })
}

/// Admin commands need a configured token and a matching one presented.
fn authorized(admin_token: Option<&str>, presented: Option<&str>) -> bool {
    matches!((admin_token, presented), (Some(expected), Some(given)) if expected == given)
}

fn unauthorized() -> serde_json::Value {
    serde_json::json!({ "error": GuardError::Unauthorized.to_string() })
}

fn handle_decide(engine: &GuardEngine, raw: serde_json::Value) -> serde_json::Value {
    let txn: Transaction = match serde_json::from_value(raw) {
        Ok(t) => t,
        Err(e) => return serde_json::json!({ "error": format!("malformed transaction: {e}") }),
    };
    match engine.decide(&txn) {
        Ok(decision) => {
            let reply = DecisionReply {
                user_id: &txn.user_id,
                transaction_id: &txn.transaction_id,
                reason: decision.reason_summary(),
                decision: &decision,
            };
            serde_json::to_value(&reply).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
        }
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}

fn handle_merge(
    engine: &GuardEngine,
    admin_token: Option<&str>,
    presented: Option<&str>,
    raw: &serde_json::Value,
) -> serde_json::Value {
    let (patch, mut rejected) = match ConfigPatch::from_json_value(raw) {
        Ok(parsed) => parsed,
        Err(e) => return serde_json::json!({ "error": e.to_string() }),
    };
    match engine.merge_config(&patch, || authorized(admin_token, presented)) {
        Ok(outcome) => {
            rejected.extend(outcome.rejected.iter().cloned());
            serde_json::json!({
                "config": outcome.current,
                "changed": outcome.changed(),
                "persisted": outcome.persisted,
                "rejected": rejected,
            })
        }
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}

fn print_summary(engine: &GuardEngine, store: &GuardStore, queue: &AuditQueue) -> Result<()> {
    let stats = store.decision_stats()?;
    let (windows, geo) = engine.tracked_users();

    println!("=== RUN SUMMARY ===");
    println!("  decisions:      {}", stats.total);
    println!("  allowed:        {}", stats.allowed);
    println!("  flagged:        {}", stats.flagged);
    println!("  blocked:        {}", stats.blocked);
    println!("  live windows:   {windows}");
    println!("  live geo:       {geo}");
    println!("  audit dropped:  {}", queue.dropped());
    println!("  audit failed:   {}", queue.failed());

    println!();
    println!("=== LATEST BLOCKS ===");
    let blocks: Vec<_> = store
        .recent_decisions(DEFAULT_HISTORY_LIMIT)?
        .into_iter()
        .filter(|row| row.action == Action::Block)
        .take(5)
        .collect();
    if blocks.is_empty() {
        println!("  (none)");
    }
    for row in blocks {
        println!(
            "  {} {} {:>9.2} {:<8} {}",
            row.user_id, row.transaction_id, row.amount, row.country, row.reasons
        );
    }
    Ok(())
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    string_arg(args, flag).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use txguard_core::audit::NullAuditSink;
    use txguard_core::config::RuleConfig;
    use txguard_core::config_store::MemoryBackend;

    fn engine() -> GuardEngine {
        let config = Arc::new(ConfigStore::with_config(
            RuleConfig::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(NullAuditSink),
        ));
        GuardEngine::new(config, Arc::new(NullAuditSink))
    }

    fn command(raw: serde_json::Value) -> IpcCommand {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn store_failure_becomes_an_error_reply() {
        let engine = engine();
        let store = GuardStore::in_memory().unwrap(); // never migrated

        for raw in [
            serde_json::json!({ "type": "history" }),
            serde_json::json!({ "type": "stats" }),
            serde_json::json!({ "type": "config_history", "limit": 5 }),
            serde_json::json!({ "type": "dashboard", "token": "s3cret" }),
        ] {
            let reply = handle_command(&engine, &store, Some("s3cret"), command(raw.clone()))
                .expect("loop keeps running");
            assert!(reply.get("error").is_some(), "{raw} -> {reply}");
        }
    }

    #[test]
    fn admin_views_need_the_token() {
        let engine = engine();
        let store = GuardStore::in_memory().unwrap();
        store.migrate().unwrap();

        for kind in ["anomaly_patterns", "dashboard"] {
            let refused = handle_command(&engine, &store, Some("s3cret"), command(serde_json::json!({ "type": kind })))
                .unwrap();
            assert!(refused.get("error").is_some(), "{kind} without token: {refused}");

            let wrong = serde_json::json!({ "type": kind, "token": "guess" });
            let refused = handle_command(&engine, &store, Some("s3cret"), command(wrong)).unwrap();
            assert!(refused.get("error").is_some(), "{kind} with wrong token: {refused}");

            let unset = serde_json::json!({ "type": kind, "token": "s3cret" });
            let refused = handle_command(&engine, &store, None, command(unset)).unwrap();
            assert!(refused.get("error").is_some(), "{kind} with no token configured: {refused}");
        }

        let ok = serde_json::json!({ "type": "anomaly_patterns", "token": "s3cret" });
        let reply = handle_command(&engine, &store, Some("s3cret"), command(ok)).unwrap();
        assert_eq!(reply["count"], 0);

        let ok = serde_json::json!({ "type": "dashboard", "token": "s3cret" });
        let reply = handle_command(&engine, &store, Some("s3cret"), command(ok)).unwrap();
        assert_eq!(reply["stats"]["total"], 0);
        assert_eq!(reply["config"]["velocity_threshold"], 3);
    }

    #[test]
    fn quit_ends_the_loop() {
        let engine = engine();
        let store = GuardStore::in_memory().unwrap();
        assert!(handle_command(&engine, &store, None, command(serde_json::json!({ "type": "quit" }))).is_none());
    }
}
