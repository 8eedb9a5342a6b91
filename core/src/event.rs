//! Audit records — everything the guard hands to the audit sink.
//!
//! Variants are only ever added, never removed or reordered; the
//! serialized form is what ends up in the durable log.

use crate::{
    config::{FieldRejection, RuleConfig},
    decision::DecisionResult,
    transaction::Transaction,
    types::Timestamp,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    DecisionRecorded {
        audit_id: Uuid,
        recorded_at: Timestamp,
        transaction: Transaction,
        decision: DecisionResult,
    },
    ConfigMerged {
        audit_id: Uuid,
        recorded_at: Timestamp,
        previous: RuleConfig,
        current: RuleConfig,
        rejected: Vec<FieldRejection>,
    },
}

impl AuditRecord {
    pub fn decision(recorded_at: Timestamp, transaction: Transaction, decision: DecisionResult) -> Self {
        Self::DecisionRecorded {
            audit_id: Uuid::new_v4(),
            recorded_at,
            transaction,
            decision,
        }
    }

    pub fn config_merged(
        recorded_at: Timestamp,
        previous: RuleConfig,
        current: RuleConfig,
        rejected: Vec<FieldRejection>,
    ) -> Self {
        Self::ConfigMerged {
            audit_id: Uuid::new_v4(),
            recorded_at,
            previous,
            current,
            rejected,
        }
    }

    /// Stable name for the record type, as it appears in the `type` tag.
    pub fn record_type(&self) -> &'static str {
        match self {
            Self::DecisionRecorded { .. } => "decision_recorded",
            Self::ConfigMerged { .. } => "config_merged",
        }
    }

    pub fn audit_id(&self) -> Uuid {
        match self {
            Self::DecisionRecorded { audit_id, .. } | Self::ConfigMerged { audit_id, .. } => *audit_id,
        }
    }
}
