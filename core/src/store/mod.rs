//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! The rest of the crate sees it through `ConfigBackend` and `AuditSink`.

mod config_kv;
mod decision_log;

use crate::{
    config::{FieldRejection, RuleConfig},
    decision::Action,
    error::GuardResult,
};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

/// How many rows `recent_decisions` returns when asked for "the default".
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub struct GuardStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:
}

impl GuardStore {
    pub fn open(path: &str) -> GuardResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL only takes on real files; shared-memory URIs ignore it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> GuardResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Open a second connection to the same file.
    /// For in-memory databases this is a fresh, isolated database.
    pub fn reopen(&self) -> GuardResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Safe to run on every start.
    pub fn migrate(&self) -> GuardResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(include_str!("../../../migrations/001_rule_config.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_decision_log.sql"))?;
        Ok(())
    }
}

// ── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogRow {
    pub id: i64,
    pub audit_id: String,
    pub recorded_at: String,
    pub user_id: String,
    pub transaction_id: String,
    pub amount: f64,
    pub country: String,
    pub occurred_at: String,
    pub action: Action,
    pub risk_score: f64,
    pub anomaly_score: f64,
    pub velocity_count: u32,
    pub velocity_amount_sum: f64,
    pub reasons: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStats {
    pub total: u64,
    pub allowed: u64,
    pub flagged: u64,
    pub blocked: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigAuditRow {
    pub id: i64,
    pub audit_id: String,
    pub recorded_at: String,
    pub previous: RuleConfig,
    pub current: RuleConfig,
    pub rejected: Vec<FieldRejection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub config: RuleConfig,
    pub stats: DecisionStats,
    pub recent_decisions: Vec<DecisionLogRow>,
    pub anomaly_patterns: Vec<DecisionLogRow>,
}
