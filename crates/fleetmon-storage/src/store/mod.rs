pub mod alert;
pub mod identity;
pub mod sample;

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    key TEXT PRIMARY KEY,
    label TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    power_threshold_percent REAL NOT NULL,
    low_power_alerts INTEGER NOT NULL DEFAULT 1,
    environmental_alerts INTEGER NOT NULL DEFAULT 1,
    last_seen_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS samples (
    id TEXT PRIMARY KEY,
    identity_key TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    lat REAL,
    lng REAL,
    altitude REAL,
    course REAL,
    speed REAL,
    accuracy REAL,
    satellites INTEGER,
    voltage REAL NOT NULL,
    percent REAL,
    channels TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_samples_identity_time
    ON samples(identity_key, timestamp);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    identity_key TEXT NOT NULL,
    rule_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    position TEXT,
    payload TEXT,
    raised_at INTEGER NOT NULL,
    acknowledged_at INTEGER,
    acknowledged_by TEXT,
    resolved_at INTEGER,
    resolved_by TEXT,
    resolution_notes TEXT,
    archived_at INTEGER,
    archived_by TEXT
);
CREATE INDEX IF NOT EXISTS idx_alerts_identity_rule_raised
    ON alerts(identity_key, rule_type, raised_at);
CREATE INDEX IF NOT EXISTS idx_alerts_raised ON alerts(raised_at);
";

pub struct TelemetryStore {
    conn: Mutex<Connection>,
}

impl TelemetryStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        tracing::info!(path = %path.display(), "Opening telemetry database");
        Self::init(Connection::open(path)?)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cheap liveness probe for the health endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
