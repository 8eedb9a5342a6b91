//! Inbound transaction record and its admission checks.

use crate::{
    error::{GuardError, GuardResult},
    types::{TransactionId, UserId},
};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A transaction as received from the caller. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub amount: f64,
    #[serde(alias = "location_country")]
    pub country: String,
    #[serde(alias = "transaction_time", deserialize_with = "deserialize_occurred_at")]
    pub occurred_at: DateTime<FixedOffset>,
    /// Anything else the caller sent along (device, merchant, channel...).
    #[serde(flatten)]
    pub enrichment: serde_json::Map<String, serde_json::Value>,
}

impl Transaction {
    pub fn new(
        user_id: impl Into<UserId>,
        transaction_id: impl Into<TransactionId>,
        amount: f64,
        country: impl Into<String>,
        occurred_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            transaction_id: transaction_id.into(),
            amount,
            country: country.into(),
            occurred_at,
            enrichment: serde_json::Map::new(),
        }
    }

    /// Admission check. Must pass before any tracker sees the transaction.
    pub fn validate(&self) -> GuardResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(invalid("user_id", "must not be empty"));
        }
        if self.transaction_id.trim().is_empty() {
            return Err(invalid("transaction_id", "must not be empty"));
        }
        if self.country.trim().is_empty() {
            return Err(invalid("country", "must not be empty"));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(invalid(
                "amount",
                &format!("must be a positive number, got {}", self.amount),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> GuardError {
    GuardError::InvalidTransaction {
        field,
        reason: reason.to_string(),
    }
}

/// Accepts RFC 3339 or a bare ISO-8601 local timestamp, which is read at
/// UTC offset zero.
fn deserialize_occurred_at<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_occurred_at(&raw).map_err(serde::de::Error::custom)
}

pub fn parse_occurred_at(raw: &str) -> Result<DateTime<FixedOffset>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    Err(format!("unrecognised timestamp '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn sample() -> Transaction {
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:00:00+00:00").unwrap();
        Transaction::new("U1", "T1", 100.0, "India", at)
    }

    #[test]
    fn accepts_original_wire_names() {
        let json = r#"{
            "user_id": "USR_10001",
            "transaction_id": "TXN_55555",
            "amount": 250.5,
            "location_country": "Germany",
            "transaction_time": "2024-03-01T03:15:00",
            "channel": "mobile"
        }"#;
        let txn: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(txn.country, "Germany");
        assert_eq!(txn.occurred_at.hour(), 3);
        assert_eq!(txn.enrichment["channel"], "mobile");
    }

    #[test]
    fn keeps_caller_offset() {
        let ts = parse_occurred_at("2024-03-01T02:00:00+05:30").unwrap();
        assert_eq!(ts.hour(), 2);
    }

    #[test]
    fn rejects_non_positive_amounts() {
        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let mut txn = sample();
            txn.amount = amount;
            assert!(
                matches!(txn.validate(), Err(GuardError::InvalidTransaction { field: "amount", .. })),
                "amount {amount} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_missing_identifiers() {
        let mut txn = sample();
        txn.user_id = "  ".into();
        assert!(matches!(
            txn.validate(),
            Err(GuardError::InvalidTransaction { field: "user_id", .. })
        ));

        let mut txn = sample();
        txn.transaction_id.clear();
        assert!(matches!(
            txn.validate(),
            Err(GuardError::InvalidTransaction { field: "transaction_id", .. })
        ));
    }
}
