use crate::error::{Result, StorageError};
use crate::store::{from_millis, TelemetryStore};
use chrono::{DateTime, Utc};
use fleetmon_common::types::{Alert, AlertStatus, ArchiveState, RuleType, Severity};
use fleetmon_rules::AlertHistory;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;

const ALERT_COLUMNS: &str = "id, identity_key, rule_type, severity, title, message, \
     position, payload, raised_at, acknowledged_at, acknowledged_by, resolved_at, \
     resolved_by, resolution_notes, archived_at, archived_by";

/// Which side of the archive boundary a query sees. Queries never mix the
/// two unless explicitly asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchivedInclusion {
    #[default]
    Exclude,
    Include,
    Only,
}

/// Conjunctive filters for alert queries; unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub identity_key: Option<String>,
    pub rule_type: Option<RuleType>,
    pub severity: Option<Severity>,
    pub status: Option<AlertStatus>,
    pub raised_from: Option<DateTime<Utc>>,
    pub raised_to: Option<DateTime<Utc>>,
    pub archived: ArchivedInclusion,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendBucket {
    pub hour_start: DateTime<Utc>,
    pub count: u64,
}

/// Aggregate counters over non-archived alerts.
#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub total: u64,
    pub open: u64,
    pub acknowledged: u64,
    pub resolved: u64,
    pub by_severity: BTreeMap<Severity, u64>,
    /// Mean seconds from raise to resolution, over resolved alerts.
    pub mean_time_to_resolve_secs: Option<f64>,
    /// Alerts raised per hour over the trailing 24 hours, oldest first.
    pub raised_last_24h: Vec<TrendBucket>,
}

fn row_to_alert(row: &Row) -> rusqlite::Result<Alert> {
    let rule_type_str: String = row.get(2)?;
    let severity_str: String = row.get(3)?;
    let position_str: Option<String> = row.get(6)?;
    let payload_str: Option<String> = row.get(7)?;
    let acknowledged_ms: Option<i64> = row.get(9)?;
    let resolved_ms: Option<i64> = row.get(11)?;
    let archived_ms: Option<i64> = row.get(14)?;
    let archive = match archived_ms {
        Some(ms) => ArchiveState::Archived {
            at: from_millis(ms),
            by: row.get(15)?,
        },
        None => ArchiveState::Active,
    };
    Ok(Alert {
        id: row.get(0)?,
        identity_key: row.get(1)?,
        rule_type: rule_type_str.parse().unwrap_or_else(|_| {
            tracing::warn!(value = %rule_type_str, "Unknown rule_type in stored alert, treating as custom");
            RuleType::Custom
        }),
        severity: severity_str.parse().unwrap_or_else(|_| {
            tracing::warn!(value = %severity_str, "Unknown severity in stored alert, treating as low");
            Severity::Low
        }),
        title: row.get(4)?,
        message: row.get(5)?,
        position: position_str.and_then(|s| serde_json::from_str(&s).ok()),
        payload: payload_str.and_then(|s| serde_json::from_str(&s).ok()),
        raised_at: from_millis(row.get(8)?),
        acknowledged_at: acknowledged_ms.and_then(DateTime::from_timestamp_millis),
        acknowledged_by: row.get(10)?,
        resolved_at: resolved_ms.and_then(DateTime::from_timestamp_millis),
        resolved_by: row.get(12)?,
        resolution_notes: row.get(13)?,
        archive,
    })
}

fn push_filters(
    filter: &AlertFilter,
    sql: &mut String,
    sql_params: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
) {
    if let Some(key) = &filter.identity_key {
        sql.push_str(" AND identity_key = ?");
        sql_params.push(Box::new(key.clone()));
    }
    if let Some(rule_type) = filter.rule_type {
        sql.push_str(" AND rule_type = ?");
        sql_params.push(Box::new(rule_type.to_string()));
    }
    if let Some(severity) = filter.severity {
        sql.push_str(" AND severity = ?");
        sql_params.push(Box::new(severity.to_string()));
    }
    if let Some(from) = filter.raised_from {
        sql.push_str(" AND raised_at >= ?");
        sql_params.push(Box::new(from.timestamp_millis()));
    }
    if let Some(to) = filter.raised_to {
        sql.push_str(" AND raised_at <= ?");
        sql_params.push(Box::new(to.timestamp_millis()));
    }
    if let Some(status) = filter.status {
        match status {
            AlertStatus::Open => {
                sql.push_str(" AND acknowledged_at IS NULL AND resolved_at IS NULL")
            }
            AlertStatus::Acknowledged => {
                sql.push_str(" AND acknowledged_at IS NOT NULL AND resolved_at IS NULL")
            }
            AlertStatus::Resolved => sql.push_str(" AND resolved_at IS NOT NULL"),
        }
    }
    match filter.archived {
        ArchivedInclusion::Exclude => sql.push_str(" AND archived_at IS NULL"),
        ArchivedInclusion::Only => sql.push_str(" AND archived_at IS NOT NULL"),
        ArchivedInclusion::Include => {}
    }
}

impl TelemetryStore {
    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.lock_conn();
        let position = alert
            .position
            .map(|p| serde_json::to_string(&p))
            .transpose()?;
        let payload = alert
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let (archived_at, archived_by) = match &alert.archive {
            ArchiveState::Archived { at, by } => (Some(at.timestamp_millis()), by.clone()),
            ArchiveState::Active => (None, None),
        };
        conn.execute(
            "INSERT INTO alerts (id, identity_key, rule_type, severity, title, message, \
                 position, payload, raised_at, acknowledged_at, acknowledged_by, resolved_at, \
                 resolved_by, resolution_notes, archived_at, archived_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                alert.id,
                alert.identity_key,
                alert.rule_type.to_string(),
                alert.severity.to_string(),
                alert.title,
                alert.message,
                position,
                payload,
                alert.raised_at.timestamp_millis(),
                alert.acknowledged_at.map(|t| t.timestamp_millis()),
                alert.acknowledged_by,
                alert.resolved_at.map(|t| t.timestamp_millis()),
                alert.resolved_by,
                alert.resolution_notes,
                archived_at,
                archived_by,
            ],
        )?;
        Ok(())
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let conn = self.lock_conn();
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1");
        let alert = conn.query_row(&sql, params![id], row_to_alert).optional()?;
        Ok(alert)
    }

    /// Dedup probe: whether an unresolved, non-archived alert of
    /// `(identity_key, rule_type)` was raised at or after `since`.
    pub fn unresolved_alert_exists(
        &self,
        identity_key: &str,
        rule_type: RuleType,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock_conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM alerts
                 WHERE identity_key = ?1 AND rule_type = ?2
                   AND resolved_at IS NULL AND archived_at IS NULL
                   AND raised_at >= ?3)",
            params![identity_key, rule_type.to_string(), since.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Legal only from open: a second acknowledge, or one after resolution,
    /// touches zero rows and is rejected.
    pub fn acknowledge_alert(&self, id: &str, by: &str, at: DateTime<Utc>) -> Result<Alert> {
        let updated = {
            let conn = self.lock_conn();
            conn.execute(
                "UPDATE alerts SET acknowledged_at = ?2, acknowledged_by = ?3
                 WHERE id = ?1 AND acknowledged_at IS NULL AND resolved_at IS NULL
                   AND archived_at IS NULL",
                params![id, at.timestamp_millis(), by],
            )?
        };
        self.read_back_transition(id, updated, "acknowledge")
    }

    /// Legal from open or acknowledged.
    pub fn resolve_alert(
        &self,
        id: &str,
        by: &str,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Alert> {
        let updated = {
            let conn = self.lock_conn();
            conn.execute(
                "UPDATE alerts SET resolved_at = ?2, resolved_by = ?3, resolution_notes = ?4
                 WHERE id = ?1 AND resolved_at IS NULL AND archived_at IS NULL",
                params![id, at.timestamp_millis(), by, notes],
            )?
        };
        self.read_back_transition(id, updated, "resolve")
    }

    /// Legal from any lifecycle state, but only once.
    pub fn archive_alert(&self, id: &str, by: Option<&str>, at: DateTime<Utc>) -> Result<Alert> {
        let updated = {
            let conn = self.lock_conn();
            conn.execute(
                "UPDATE alerts SET archived_at = ?2, archived_by = ?3
                 WHERE id = ?1 AND archived_at IS NULL",
                params![id, at.timestamp_millis(), by],
            )?
        };
        self.read_back_transition(id, updated, "archive")
    }

    pub(crate) fn read_back_transition(
        &self,
        id: &str,
        updated: usize,
        action: &'static str,
    ) -> Result<Alert> {
        let alert = self.get_alert(id)?;
        match (updated, alert) {
            (0, None) => Err(StorageError::NotFound {
                entity: "alert",
                id: id.to_string(),
            }),
            // The UPDATE touched a row but it is gone on read-back.
            (_, None) => Err(StorageError::WriteReadback { entity: "alert" }),
            (0, Some(alert)) => {
                let current = if alert.archive.is_archived() {
                    "archived".to_string()
                } else {
                    alert.status().to_string()
                };
                Err(StorageError::IllegalTransition {
                    action,
                    id: id.to_string(),
                    current,
                })
            }
            (_, Some(alert)) => Ok(alert),
        }
    }

    pub fn query_alerts(
        &self,
        filter: &AlertFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Alert>> {
        let conn = self.lock_conn();
        let mut sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE 1=1");
        let mut sql_params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        push_filters(filter, &mut sql, &mut sql_params);
        sql.push_str(" ORDER BY raised_at DESC LIMIT ? OFFSET ?");
        sql_params.push(Box::new(limit as i64));
        sql_params.push(Box::new(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_alert)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn count_alerts(&self, filter: &AlertFilter) -> Result<u64> {
        let conn = self.lock_conn();
        let mut sql = String::from("SELECT COUNT(*) FROM alerts WHERE 1=1");
        let mut sql_params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        push_filters(filter, &mut sql, &mut sql_params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Aggregates over the filtered set (archived excluded by default), with
    /// an hourly raise trend for the 24 hours ending at `now`.
    pub fn alert_stats(&self, filter: &AlertFilter, now: DateTime<Utc>) -> Result<AlertStats> {
        let conn = self.lock_conn();
        let mut where_sql = String::from(" WHERE 1=1");
        let mut sql_params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        push_filters(filter, &mut where_sql, &mut sql_params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();

        let counts_sql = format!(
            "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN acknowledged_at IS NULL AND resolved_at IS NULL
                    THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN acknowledged_at IS NOT NULL AND resolved_at IS NULL
                    THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN resolved_at IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM alerts{where_sql}"
        );
        let (total, open, acknowledged, resolved): (i64, i64, i64, i64) =
            conn.query_row(&counts_sql, param_refs.as_slice(), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;

        let mut by_severity = BTreeMap::new();
        {
            let sql =
                format!("SELECT severity, COUNT(*) FROM alerts{where_sql} GROUP BY severity");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(param_refs.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (severity_str, count) = row?;
                if let Ok(severity) = severity_str.parse::<Severity>() {
                    by_severity.insert(severity, count as u64);
                }
            }
        }

        let mttr_sql = format!(
            "SELECT AVG(resolved_at - raised_at) FROM alerts{where_sql}
             AND resolved_at IS NOT NULL"
        );
        let mean_ms: Option<f64> =
            conn.query_row(&mttr_sql, param_refs.as_slice(), |row| row.get(0))?;

        const HOUR_MS: i64 = 3_600_000;
        let end_hour = now.timestamp_millis() / HOUR_MS;
        let start_hour = end_hour - 23;
        let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
        {
            let sql = format!(
                "SELECT raised_at / 3600000 AS hour, COUNT(*) FROM alerts{where_sql}
                 AND raised_at >= ? GROUP BY hour"
            );
            let mut trend_refs = param_refs.clone();
            let trend_from = start_hour * HOUR_MS;
            trend_refs.push(&trend_from);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(trend_refs.as_slice(), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (hour, count) = row?;
                counts.insert(hour, count as u64);
            }
        }
        let raised_last_24h = (start_hour..=end_hour)
            .map(|hour| TrendBucket {
                hour_start: from_millis(hour * HOUR_MS),
                count: counts.get(&hour).copied().unwrap_or(0),
            })
            .collect();

        Ok(AlertStats {
            total: total as u64,
            open: open as u64,
            acknowledged: acknowledged as u64,
            resolved: resolved as u64,
            by_severity,
            mean_time_to_resolve_secs: mean_ms.map(|ms| ms / 1000.0),
            raised_last_24h,
        })
    }
}

impl AlertHistory for TelemetryStore {
    fn has_unresolved_since(
        &self,
        identity_key: &str,
        rule_type: RuleType,
        since: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.unresolved_alert_exists(identity_key, rule_type, since)?)
    }
}
