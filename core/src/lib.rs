//! txguard-core: real-time transaction screening.
//!
//! Per-user velocity and geo tracking feed a fixed feature vector, an
//! external risk scorer adds its scores, and an ordered rule set turns all
//! of it into ALLOW, FLAG or BLOCK. `GuardEngine` wires the pieces;
//! `GuardStore` is the SQLite home for the config and the audit log.

pub mod audit;
pub mod clock;
pub mod config;
pub mod config_store;
pub mod decision;
pub mod engine;
pub mod error;
pub mod event;
pub mod features;
pub mod geo;
pub mod scorer;
pub mod store;
pub mod synthetic;
pub mod transaction;
pub mod types;
pub mod velocity;
