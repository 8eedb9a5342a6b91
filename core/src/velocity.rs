//! Velocity tracker — per-user trailing window of (timestamp, amount).
//!
//! Expiry is read-time: an entry is only discarded when a call touches
//! that user's window. Whole windows that sit idle for longer than the
//! window length are removed by `evict_idle`, which the engine runs
//! periodically.
//!
//! Locking: the map is a `DashMap` of `Arc<Mutex<VelocityWindow>>`. A
//! caller clones the window handle out of the map, drops the shard guard,
//! and only then locks the window, so two users never wait on each other
//! for longer than a map lookup. The sweeper marks a removed window as
//! retired under its lock; an updater that lands on a retired window
//! goes back to the map for a fresh one.

use crate::types::{Timestamp, UserId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityStats {
    pub count: u32,
    pub amount_sum: f64,
}

#[derive(Debug, Default)]
struct VelocityWindow {
    entries: VecDeque<(Timestamp, f64)>,
    last_seen: Option<Timestamp>,
    retired: bool,
}

impl VelocityWindow {
    fn record(&mut self, at: Timestamp, amount: f64) {
        // Keep timestamp order even if the clock stepped backwards.
        match self.entries.back() {
            Some((last, _)) if *last > at => {
                let idx = self.entries.partition_point(|(ts, _)| *ts <= at);
                self.entries.insert(idx, (at, amount));
            }
            _ => self.entries.push_back((at, amount)),
        }
        self.last_seen = Some(self.last_seen.map_or(at, |seen| seen.max(at)));
    }

    /// Drop everything at or before `now - window`.
    fn prune(&mut self, now: Timestamp, window: Duration) {
        let cutoff = window_start(now, window);
        while matches!(self.entries.front(), Some((ts, _)) if *ts <= cutoff) {
            self.entries.pop_front();
        }
    }

    fn stats(&self) -> VelocityStats {
        VelocityStats {
            count: u32::try_from(self.entries.len()).unwrap_or(u32::MAX),
            amount_sum: self.entries.iter().map(|(_, amount)| amount).sum(),
        }
    }

    fn is_idle(&self, now: Timestamp, idle: Duration) -> bool {
        self.last_seen.map_or(true, |seen| seen <= window_start(now, idle))
    }
}

/// `now - window`, saturating at the earliest representable instant.
fn window_start(now: Timestamp, window: Duration) -> Timestamp {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Default)]
pub struct VelocityTracker {
    windows: DashMap<UserId, Arc<Mutex<VelocityWindow>>>,
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event for `user_id` and return the post-prune count and
    /// sum, including the event just recorded.
    pub fn update(&self, user_id: &str, amount: f64, now: Timestamp, window: Duration) -> VelocityStats {
        loop {
            let handle = self
                .windows
                .entry(user_id.to_string())
                .or_default()
                .value()
                .clone();

            let mut w = handle.lock();
            if w.retired {
                continue;
            }
            w.record(now, amount);
            w.prune(now, window);
            return w.stats();
        }
    }

    /// Current stats for `user_id` without recording anything.
    /// Entries past the window are not counted but are left in place.
    pub fn stats(&self, user_id: &str, now: Timestamp, window: Duration) -> VelocityStats {
        let Some(handle) = self.windows.get(user_id).map(|h| h.value().clone()) else {
            return VelocityStats::default();
        };
        let w = handle.lock();
        let cutoff = window_start(now, window);
        let live = w.entries.iter().filter(|(ts, _)| *ts > cutoff);
        let (count, amount_sum) = live.fold((0u32, 0.0), |(c, s), (_, amount)| (c.saturating_add(1), s + amount));
        VelocityStats { count, amount_sum }
    }

    /// Remove windows whose last event is at least `idle` old.
    /// Returns how many were removed.
    pub fn evict_idle(&self, now: Timestamp, idle: Duration) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, handle| {
            let mut w = handle.lock();
            if w.is_idle(now, idle) {
                w.retired = true;
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of users with a window in memory.
    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn late_event_is_inserted_in_order() {
        let mut w = VelocityWindow::default();
        w.record(t(10), 1.0);
        w.record(t(30), 3.0);
        w.record(t(20), 2.0);
        let order: Vec<f64> = w.entries.iter().map(|(_, a)| *a).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
        assert_eq!(w.last_seen, Some(t(30)));
    }

    #[test]
    fn huge_window_saturates_instead_of_overflowing() {
        let tracker = VelocityTracker::new();
        let window = Duration::days(100_000_000);
        tracker.update("U1", 1.0, t(0), window);
        let stats = tracker.update("U1", 2.0, t(10), window);
        assert_eq!(stats, VelocityStats { count: 2, amount_sum: 3.0 });
        assert_eq!(tracker.evict_idle(t(10), window), 0);
    }

    #[test]
    fn retired_window_is_replaced_on_next_update() {
        let tracker = VelocityTracker::new();
        let window = Duration::seconds(60);
        tracker.update("U1", 10.0, t(0), window);
        assert_eq!(tracker.evict_idle(t(120), window), 1);
        let stats = tracker.update("U1", 5.0, t(121), window);
        assert_eq!(stats, VelocityStats { count: 1, amount_sum: 5.0 });
    }
}
