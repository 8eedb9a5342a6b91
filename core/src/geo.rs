//! Geo tracker — the last country each user transacted from, with a TTL.

use crate::types::{Timestamp, UserId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoState {
    pub last_country: String,
    pub expires_at: Timestamp,
}

#[derive(Debug, Default)]
pub struct GeoTracker {
    states: DashMap<UserId, GeoState>,
}

impl GeoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the country recorded by the previous live observation, then
    /// record `country` with expiry `now + ttl`.
    ///
    /// With no live record the caller's own country comes back, so a cold
    /// user (or one whose record lapsed) never looks like a new country.
    pub fn observe(&self, user_id: &str, country: &str, now: Timestamp, ttl: Duration) -> String {
        let fresh = GeoState {
            last_country: country.to_string(),
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        // The entry guard holds this user's shard until the swap is done.
        let mut entry = self.states.entry(user_id.to_string()).or_insert_with(|| fresh.clone());
        let previous = if entry.expires_at > now {
            entry.last_country.clone()
        } else {
            country.to_string()
        };
        *entry = fresh;
        previous
    }

    /// The live last country for `user_id`, if any.
    pub fn last_country(&self, user_id: &str, now: Timestamp) -> Option<String> {
        self.states
            .get(user_id)
            .filter(|s| s.expires_at > now)
            .map(|s| s.last_country.clone())
    }

    /// Drop every record that has expired by `now`. Returns how many.
    pub fn evict_expired(&self, now: Timestamp) -> usize {
        let before = self.states.len();
        self.states.retain(|_, s| s.expires_at > now);
        before.saturating_sub(self.states.len())
    }

    pub fn tracked_users(&self) -> usize {
        self.states.len()
    }
}
