use crate::error::{Result, StorageError};
use crate::store::{from_millis, TelemetryStore};
use chrono::{DateTime, Utc};
use fleetmon_common::types::{Identity, DEFAULT_POWER_THRESHOLD_PERCENT};
use rusqlite::{params, OptionalExtension, Row};

const IDENTITY_COLUMNS: &str = "key, label, active, power_threshold_percent, \
     low_power_alerts, environmental_alerts, last_seen_at, created_at, updated_at";

/// Partial update of an identity's reporting configuration.
#[derive(Debug, Clone, Default)]
pub struct IdentityUpdate {
    pub label: Option<String>,
    pub active: Option<bool>,
    pub power_threshold_percent: Option<f64>,
    pub low_power_alerts: Option<bool>,
    pub environmental_alerts: Option<bool>,
}

fn row_to_identity(row: &Row) -> rusqlite::Result<Identity> {
    let last_seen_ms: Option<i64> = row.get(6)?;
    Ok(Identity {
        key: row.get(0)?,
        label: row.get(1)?,
        active: row.get(2)?,
        power_threshold_percent: row.get(3)?,
        low_power_alerts: row.get(4)?,
        environmental_alerts: row.get(5)?,
        last_seen_at: last_seen_ms.and_then(DateTime::from_timestamp_millis),
        created_at: from_millis(row.get(7)?),
        updated_at: from_millis(row.get(8)?),
    })
}

impl TelemetryStore {
    /// Registers the identity with default configuration on first sight and
    /// bumps `last_seen_at` on every call. Single atomic upsert, so two
    /// concurrent first reports cannot race a duplicate row.
    pub fn touch_identity(&self, key: &str, seen_at: DateTime<Utc>) -> Result<Identity> {
        let conn = self.lock_conn();
        let ms = seen_at.timestamp_millis();
        let sql = format!(
            "INSERT INTO identities (key, label, active, power_threshold_percent, \
                 low_power_alerts, environmental_alerts, last_seen_at, created_at, updated_at)
             VALUES (?1, ?1, 1, ?2, 1, 1, ?3, ?3, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 last_seen_at = excluded.last_seen_at,
                 updated_at = excluded.updated_at
             RETURNING {IDENTITY_COLUMNS}"
        );
        let identity = conn.query_row(
            &sql,
            params![key, DEFAULT_POWER_THRESHOLD_PERCENT, ms],
            row_to_identity,
        )?;
        Ok(identity)
    }

    pub fn get_identity(&self, key: &str) -> Result<Option<Identity>> {
        let conn = self.lock_conn();
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE key = ?1");
        let identity = conn
            .query_row(&sql, params![key], row_to_identity)
            .optional()?;
        Ok(identity)
    }

    /// Applies the set fields of `update`, leaving the rest untouched.
    pub fn configure_identity(&self, key: &str, update: &IdentityUpdate) -> Result<Identity> {
        let conn = self.lock_conn();
        let ms = Utc::now().timestamp_millis();
        let sql = format!(
            "UPDATE identities SET
                 label = COALESCE(?2, label),
                 active = COALESCE(?3, active),
                 power_threshold_percent = COALESCE(?4, power_threshold_percent),
                 low_power_alerts = COALESCE(?5, low_power_alerts),
                 environmental_alerts = COALESCE(?6, environmental_alerts),
                 updated_at = ?7
             WHERE key = ?1
             RETURNING {IDENTITY_COLUMNS}"
        );
        let identity = conn
            .query_row(
                &sql,
                params![
                    key,
                    update.label,
                    update.active,
                    update.power_threshold_percent,
                    update.low_power_alerts,
                    update.environmental_alerts,
                    ms
                ],
                row_to_identity,
            )
            .optional()?;
        identity.ok_or_else(|| StorageError::NotFound {
            entity: "identity",
            id: key.to_string(),
        })
    }
}
