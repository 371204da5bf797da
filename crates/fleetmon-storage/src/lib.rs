//! SQLite-backed persistence for telemetry samples, identities and alerts.
//!
//! A single [`TelemetryStore`] owns one WAL-mode connection behind a mutex.
//! Writes are short single-statement transactions; the alert lifecycle
//! commands are guarded `UPDATE`s whose `WHERE` clause encodes the legal
//! source states, so an illegal transition touches zero rows and is reported
//! as [`StorageError::IllegalTransition`].
//!
//! Timestamps are stored as UTC epoch milliseconds.

pub mod error;
pub mod store;


pub use error::{Result, StorageError};
pub use store::alert::{AlertFilter, AlertStats, ArchivedInclusion, TrendBucket};
pub use store::identity::IdentityUpdate;
pub use store::TelemetryStore;
