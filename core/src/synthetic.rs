//! Seeded synthetic traffic for replays and load runs.
//!
//! RULE: Same seed, same stream. The generator owns its own PCG stream
//! and never touches a platform RNG, so a replay can be compared run to run.

use crate::transaction::Transaction;
use chrono::{DateTime, FixedOffset};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub const DEFAULT_USERS: [&str; 4] = ["USR_10001", "USR_10002", "USR_10003", "USR_10004"];
pub const DEFAULT_COUNTRIES: [&str; 4] = ["India", "Germany", "USA", "UK"];
pub const MIN_AMOUNT: u32 = 100;
pub const MAX_AMOUNT: u32 = 50_000;

pub struct TrafficGenerator {
    rng: Pcg64Mcg,
    users: Vec<String>,
    countries: Vec<String>,
}

impl TrafficGenerator {
    /// The four-user, four-country mix used for load runs.
    pub fn new(seed: u64) -> Self {
        Self::with_population(
            seed,
            DEFAULT_USERS.iter().map(|u| u.to_string()).collect(),
            DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect(),
        )
    }

    /// Panics if either list is empty.
    pub fn with_population(seed: u64, users: Vec<String>, countries: Vec<String>) -> Self {
        assert!(!users.is_empty(), "traffic generator needs at least one user");
        assert!(!countries.is_empty(), "traffic generator needs at least one country");
        Self {
            rng: Pcg64Mcg::seed_from_u64(seed),
            users,
            countries,
        }
    }

    /// Draw the next transaction, stamped with `occurred_at`.
    pub fn next_transaction(&mut self, occurred_at: DateTime<FixedOffset>) -> Transaction {
        let user = &self.users[self.rng.gen_range(0..self.users.len())];
        let country = &self.countries[self.rng.gen_range(0..self.countries.len())];
        let amount = self.rng.gen_range(MIN_AMOUNT..=MAX_AMOUNT);
        // Five-digit ids collide on purpose: ids are not unique upstream either.
        let transaction_id = format!("TXN_{}", self.rng.gen_range(10_000..100_000));

        Transaction::new(user.clone(), transaction_id, f64::from(amount), country.clone(), occurred_at)
    }
}
