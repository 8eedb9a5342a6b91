use super::{DashboardView, DecisionLogRow, DecisionStats, GuardStore};
use crate::{
    audit::AuditSink,
    config::RuleConfig,
    decision::{Action, ANOMALY_REASON},
    error::GuardResult,
    event::AuditRecord,
};
use rusqlite::{params, Row};

impl GuardStore {
    // ── Decision log ──────────────────────────────────────────────

    /// Most recent decisions, newest first.
    pub fn recent_decisions(&self, limit: usize) -> GuardResult<Vec<DecisionLogRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, audit_id, recorded_at, user_id, transaction_id, amount, country, occurred_at,
                    action, risk_score, anomaly_score, velocity_count, velocity_amount_sum, reasons
             FROM decision_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], decision_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Most recent decisions for one user, newest first.
    pub fn decisions_for_user(&self, user_id: &str, limit: usize) -> GuardResult<Vec<DecisionLogRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, audit_id, recorded_at, user_id, transaction_id, amount, country, occurred_at,
                    action, risk_score, anomaly_score, velocity_count, velocity_amount_sum, reasons
             FROM decision_log WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], decision_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Decisions the anomaly model stood out on, newest first: either the
    /// anomaly reason was given or the score beat `anomaly_threshold`.
    /// The score test catches decisions where the check was switched off.
    pub fn anomaly_patterns(&self, anomaly_threshold: f64, limit: usize) -> GuardResult<Vec<DecisionLogRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, audit_id, recorded_at, user_id, transaction_id, amount, country, occurred_at,
                    action, risk_score, anomaly_score, velocity_count, velocity_amount_sum, reasons
             FROM decision_log
             WHERE instr(reasons, ?1) > 0 OR anomaly_score > ?2
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![ANOMALY_REASON, anomaly_threshold, limit as i64], decision_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Admin overview: the live config, totals per action, the latest
    /// decisions and the latest anomaly patterns.
    pub fn dashboard(&self, config: &RuleConfig, limit: usize) -> GuardResult<DashboardView> {
        Ok(DashboardView {
            config: config.clone(),
            stats: self.decision_stats()?,
            recent_decisions: self.recent_decisions(limit)?,
            anomaly_patterns: self.anomaly_patterns(config.anomaly_score_threshold, limit)?,
        })
    }

    pub fn decision_stats(&self) -> GuardResult<DecisionStats> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT action, COUNT(*) FROM decision_log GROUP BY action")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = DecisionStats::default();
        for (action, count) in counts {
            let count = count.max(0) as u64;
            stats.total += count;
            match action.as_str() {
                "ALLOW" => stats.allowed += count,
                "FLAG" => stats.flagged += count,
                "BLOCK" => stats.blocked += count,
                other => log::warn!("decision_log holds unknown action '{other}'"),
            }
        }
        Ok(stats)
    }
}

fn decision_row(row: &Row<'_>) -> rusqlite::Result<DecisionLogRow> {
    let action: String = row.get(8)?;
    let action = parse_action(&action).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown action '{action}'").into(),
        )
    })?;
    Ok(DecisionLogRow {
        id: row.get(0)?,
        audit_id: row.get(1)?,
        recorded_at: row.get(2)?,
        user_id: row.get(3)?,
        transaction_id: row.get(4)?,
        amount: row.get(5)?,
        country: row.get(6)?,
        occurred_at: row.get(7)?,
        action,
        risk_score: row.get(9)?,
        anomaly_score: row.get(10)?,
        velocity_count: row.get(11)?,
        velocity_amount_sum: row.get(12)?,
        reasons: row.get(13)?,
    })
}

fn parse_action(raw: &str) -> Option<Action> {
    match raw {
        "ALLOW" => Some(Action::Allow),
        "FLAG" => Some(Action::Flag),
        "BLOCK" => Some(Action::Block),
        _ => None,
    }
}

impl AuditSink for GuardStore {
    fn append(&self, record: &AuditRecord) -> GuardResult<()> {
        let payload = serde_json::to_string(record)?;
        let conn = self.conn.lock();
        match record {
            AuditRecord::DecisionRecorded {
                audit_id,
                recorded_at,
                transaction,
                decision,
            } => {
                conn.execute(
                    "INSERT INTO decision_log
                        (audit_id, recorded_at, user_id, transaction_id, amount, country, occurred_at,
                         action, risk_score, anomaly_score, velocity_count, velocity_amount_sum, reasons, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    params![
                        audit_id.to_string(),
                        recorded_at.to_rfc3339(),
                        transaction.user_id,
                        transaction.transaction_id,
                        transaction.amount,
                        transaction.country,
                        transaction.occurred_at.to_rfc3339(),
                        decision.action.as_str(),
                        decision.risk_score,
                        decision.anomaly_score,
                        decision.velocity_count,
                        decision.velocity_amount_sum,
                        decision.reason_summary(),
                        payload,
                    ],
                )?;
            }
            AuditRecord::ConfigMerged {
                audit_id,
                recorded_at,
                previous,
                current,
                rejected,
            } => {
                conn.execute(
                    "INSERT INTO config_audit
                        (audit_id, recorded_at, previous_json, current_json, rejected_json)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        audit_id.to_string(),
                        recorded_at.to_rfc3339(),
                        serde_json::to_string(previous)?,
                        serde_json::to_string(current)?,
                        serde_json::to_string(rejected)?,
                    ],
                )?;
            }
        }
        log::debug!("audit record {} written", record.audit_id());
        Ok(())
    }
}
