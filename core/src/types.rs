//! Shared primitive types used across the guard.

use chrono::{DateTime, Utc};

/// Server-side instant at which a transaction is processed.
/// Velocity and geo expiry are measured against this, never against
/// the caller-supplied `occurred_at`.
pub type Timestamp = DateTime<Utc>;

/// Caller-supplied user key. Velocity and geo state are partitioned by it.
pub type UserId = String;

/// Caller-supplied transaction identifier. Not unique; never a dedup key.
pub type TransactionId = String;
