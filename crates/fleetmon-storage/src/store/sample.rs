use crate::error::Result;
use crate::store::{from_millis, TelemetryStore};
use chrono::{DateTime, Utc};
use fleetmon_common::types::{ChannelValue, Position, PowerReading, TelemetrySample};
use rusqlite::{params, Row};
use std::collections::HashMap;

fn row_to_sample(row: &Row) -> rusqlite::Result<TelemetrySample> {
    let lat: Option<f64> = row.get(3)?;
    let lng: Option<f64> = row.get(4)?;
    let position = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Position {
            lat,
            lng,
            altitude: row.get(5)?,
            course: row.get(6)?,
            speed: row.get(7)?,
            accuracy: row.get(8)?,
            satellites: row.get(9)?,
        }),
        _ => None,
    };
    let channels_str: String = row.get(12)?;
    let channels: HashMap<String, ChannelValue> =
        serde_json::from_str(&channels_str).unwrap_or_default();
    Ok(TelemetrySample {
        id: row.get(0)?,
        identity_key: row.get(1)?,
        timestamp: from_millis(row.get(2)?),
        position,
        power: PowerReading {
            voltage: row.get(10)?,
            percent: row.get(11)?,
        },
        channels,
        created_at: from_millis(row.get(13)?),
    })
}

impl TelemetryStore {
    pub fn insert_sample(&self, sample: &TelemetrySample) -> Result<()> {
        let conn = self.lock_conn();
        let channels = serde_json::to_string(&sample.channels)?;
        conn.execute(
            "INSERT INTO samples (id, identity_key, timestamp, lat, lng, altitude, course, \
                 speed, accuracy, satellites, voltage, percent, channels, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                sample.id,
                sample.identity_key,
                sample.timestamp.timestamp_millis(),
                sample.position.map(|p| p.lat),
                sample.position.map(|p| p.lng),
                sample.position.and_then(|p| p.altitude),
                sample.position.and_then(|p| p.course),
                sample.position.and_then(|p| p.speed),
                sample.position.and_then(|p| p.accuracy),
                sample.position.and_then(|p| p.satellites),
                sample.power.voltage,
                sample.power.percent,
                channels,
                sample.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Samples for one identity, newest first, optionally bounded to a time
    /// range (inclusive).
    pub fn samples_for_identity(
        &self,
        identity_key: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<TelemetrySample>> {
        let conn = self.lock_conn();
        let mut sql = String::from(
            "SELECT id, identity_key, timestamp, lat, lng, altitude, course, speed, \
                 accuracy, satellites, voltage, percent, channels, created_at
             FROM samples WHERE identity_key = ?",
        );
        let mut sql_params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(identity_key.to_string())];
        if let Some(from) = from {
            sql.push_str(" AND timestamp >= ?");
            sql_params.push(Box::new(from.timestamp_millis()));
        }
        if let Some(to) = to {
            sql.push_str(" AND timestamp <= ?");
            sql_params.push(Box::new(to.timestamp_millis()));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");
        sql_params.push(Box::new(limit as i64));
        sql_params.push(Box::new(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_sample)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn count_samples(
        &self,
        identity_key: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let conn = self.lock_conn();
        let mut sql = String::from("SELECT COUNT(*) FROM samples WHERE identity_key = ?");
        let mut sql_params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(identity_key.to_string())];
        if let Some(from) = from {
            sql.push_str(" AND timestamp >= ?");
            sql_params.push(Box::new(from.timestamp_millis()));
        }
        if let Some(to) = to {
            sql.push_str(" AND timestamp <= ?");
            sql_params.push(Box::new(to.timestamp_millis()));
        }
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }
}
