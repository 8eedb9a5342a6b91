use super::{ConfigAuditRow, GuardStore};
use crate::{config_store::ConfigBackend, error::GuardResult};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

impl GuardStore {
    // ── Config audit ──────────────────────────────────────────────

    /// Most recent config merges, newest first.
    pub fn config_history(&self, limit: usize) -> GuardResult<Vec<ConfigAuditRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, audit_id, recorded_at, previous_json, current_json, rejected_json
             FROM config_audit ORDER BY id DESC LIMIT ?1",
        )?;
        let raw = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, audit_id, recorded_at, previous, current, rejected)| -> GuardResult<ConfigAuditRow> {
                Ok(ConfigAuditRow {
                    id,
                    audit_id,
                    recorded_at,
                    previous: serde_json::from_str(&previous)?,
                    current: serde_json::from_str(&current)?,
                    rejected: serde_json::from_str(&rejected)?,
                })
            })
            .collect()
    }
}

impl ConfigBackend for GuardStore {
    fn get(&self, key: &str) -> GuardResult<Option<String>> {
        let value: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT value FROM config_kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> GuardResult<()> {
        self.conn.lock().execute(
            "INSERT INTO config_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
