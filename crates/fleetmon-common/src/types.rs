use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use fleetmon_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "high");
/// assert!(Severity::Critical > Severity::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The kind of condition that raised an alert.
///
/// Deduplication is keyed by `(identity, rule type)`, so each rule type is
/// an independent alert stream per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    LowPower,
    OverTemperature,
    Custom,
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleType::LowPower => write!(f, "low-power"),
            RuleType::OverTemperature => write!(f, "over-temperature"),
            RuleType::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low-power" | "low_power" => Ok(RuleType::LowPower),
            "over-temperature" | "over_temperature" => Ok(RuleType::OverTemperature),
            "custom" => Ok(RuleType::Custom),
            _ => Err(format!("unknown rule type: {s}")),
        }
    }
}

/// A single named reading in a sample's open-ended channel set.
///
/// Channels are a typed map rather than an untyped blob: new device firmware
/// can report channels the server has never seen, and they are carried
/// through verbatim, but the rule engine only ever sees numbers and flags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    Number(f64),
    Flag(bool),
}

impl ChannelValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ChannelValue::Number(v) => Some(*v),
            ChannelValue::Flag(_) => None,
        }
    }
}

/// A geographic fix reported by a device.
///
/// Coordinates are not range-validated at ingestion; out-of-range values are
/// passed through as rule-engine signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    pub altitude: Option<f64>,
    pub course: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub satellites: Option<i64>,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            altitude: None,
            course: None,
            speed: None,
            accuracy: None,
            satellites: None,
        }
    }
}

/// Battery state of the reporting device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    /// Raw battery voltage as reported.
    pub voltage: f64,
    /// Charge percentage; derived from voltage when the device omits it.
    pub percent: Option<f64>,
}

/// One timestamped report from an identity. Immutable and append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub id: String,
    pub identity_key: String,
    pub timestamp: DateTime<Utc>,
    pub position: Option<Position>,
    pub power: PowerReading,
    /// Open-ended named channels (vehicle/environmental readings).
    pub channels: HashMap<String, ChannelValue>,
    pub created_at: DateTime<Utc>,
}

/// A registered field device.
///
/// Created implicitly on first successful ingestion (with defaults below) or
/// explicitly through the external registry. `last_seen_at` is bumped on
/// every accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable unique key, as carried in the device's signed tokens.
    pub key: String,
    pub label: Option<String>,
    pub active: bool,
    /// Charge percentage below which the low-power rule fires.
    pub power_threshold_percent: f64,
    pub low_power_alerts: bool,
    pub environmental_alerts: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_POWER_THRESHOLD_PERCENT: f64 = 20.0;

/// Derived lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Open => write!(f, "open"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AlertStatus::Open),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Archive state of an alert, orthogonal to the lifecycle axis.
///
/// Archived alerts stay in the store but are excluded from normal queries;
/// the tag forces every query site to choose its inclusion policy instead of
/// sprinkling null-checks on a timestamp column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ArchiveState {
    Active,
    Archived {
        at: DateTime<Utc>,
        by: Option<String>,
    },
}

impl ArchiveState {
    pub fn is_archived(&self) -> bool {
        matches!(self, ArchiveState::Archived { .. })
    }
}

/// An operational alert raised by the rule engine or created explicitly.
///
/// `acknowledged_at` / `resolved_at`, once set, are never cleared; an alert
/// cannot be acknowledged after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub identity_key: String,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Position of the sample that raised the alert, when known.
    pub position: Option<Position>,
    /// Free-form diagnostic payload (trigger values, thresholds, etc.).
    pub payload: Option<serde_json::Value>,
    pub raised_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub archive: ArchiveState,
}

impl Alert {
    /// Derived status: resolved wins over acknowledged wins over open.
    pub fn status(&self) -> AlertStatus {
        if self.resolved_at.is_some() {
            AlertStatus::Resolved
        } else if self.acknowledged_at.is_some() {
            AlertStatus::Acknowledged
        } else {
            AlertStatus::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_and_roundtrip() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        for s in ["low", "medium", "high", "critical"] {
            let sev: Severity = s.parse().unwrap();
            assert_eq!(sev.to_string(), s);
        }
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn rule_type_parses_both_separators() {
        assert_eq!("low-power".parse::<RuleType>().unwrap(), RuleType::LowPower);
        assert_eq!("low_power".parse::<RuleType>().unwrap(), RuleType::LowPower);
        assert_eq!(RuleType::OverTemperature.to_string(), "over-temperature");
    }

    #[test]
    fn alert_status_is_derived_from_timestamps() {
        let mut alert = Alert {
            id: "1".into(),
            identity_key: "DEV1".into(),
            rule_type: RuleType::LowPower,
            severity: Severity::High,
            title: "t".into(),
            message: "m".into(),
            position: None,
            payload: None,
            raised_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            archive: ArchiveState::Active,
        };
        assert_eq!(alert.status(), AlertStatus::Open);
        alert.acknowledged_at = Some(Utc::now());
        assert_eq!(alert.status(), AlertStatus::Acknowledged);
        alert.resolved_at = Some(Utc::now());
        assert_eq!(alert.status(), AlertStatus::Resolved);
    }

    #[test]
    fn channel_value_deserializes_untagged() {
        let v: ChannelValue = serde_json::from_str("21.5").unwrap();
        assert_eq!(v, ChannelValue::Number(21.5));
        let v: ChannelValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ChannelValue::Flag(true));
    }
}
