use chrono::{DateTime, Utc};
use fleetmon_common::types::{ChannelValue, Position, PowerReading, TelemetrySample};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use utoipa::ToSchema;

/// Voltage mapped to 0% charge.
const VOLTAGE_EMPTY: f64 = 2.9;
/// Voltage mapped to 100% charge.
const VOLTAGE_FULL: f64 = 4.1;

/// Payload claims of a telemetry report token. Everything beyond the named
/// fields lands in `extra` and becomes a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportClaims {
    #[serde(default)]
    pub identity_key: Option<String>,
    /// Device-side capture time, UNIX seconds. Defaults to server receive
    /// time when omitted.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub course: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub satellites: Option<i64>,
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// One payload-shape problem, attributed to the claim that caused it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Linear voltage-to-percent map, clamped to [0, 100].
pub fn percent_from_voltage(voltage: f64) -> f64 {
    ((voltage - VOLTAGE_EMPTY) / (VOLTAGE_FULL - VOLTAGE_EMPTY) * 100.0).clamp(0.0, 100.0)
}

/// Turns verified report claims into a canonical sample.
///
/// Pure shape-and-derivation: geo and physical values are NOT range-checked
/// here, out-of-range readings pass through as rule-engine signal. An
/// explicit `percent` claim is kept untouched; it is only derived from
/// voltage when absent, so normalizing an already-normal payload changes
/// nothing.
pub fn normalize(
    claims: &ReportClaims,
    now: DateTime<Utc>,
) -> Result<TelemetrySample, Vec<FieldError>> {
    let mut errors = Vec::new();

    let identity_key = match claims.identity_key.as_deref() {
        Some(key) if !key.trim().is_empty() => Some(key.to_string()),
        Some(_) => {
            errors.push(FieldError::new("identityKey", "must not be empty"));
            None
        }
        None => {
            errors.push(FieldError::new("identityKey", "is required"));
            None
        }
    };

    let voltage = match claims.voltage {
        Some(v) => Some(v),
        None => {
            errors.push(FieldError::new("voltage", "is required"));
            None
        }
    };

    let position = match (claims.lat, claims.lng) {
        (Some(lat), Some(lng)) => Some(Position {
            lat,
            lng,
            altitude: claims.altitude,
            course: claims.course,
            speed: claims.speed,
            accuracy: claims.accuracy,
            satellites: claims.satellites,
        }),
        (None, None) => None,
        (Some(_), None) => {
            errors.push(FieldError::new("lng", "is required when lat is present"));
            None
        }
        (None, Some(_)) => {
            errors.push(FieldError::new("lat", "is required when lng is present"));
            None
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    // Both are Some here; the error check above returned otherwise.
    let identity_key = identity_key.unwrap_or_default();
    let voltage = voltage.unwrap_or_default();

    let percent = claims.percent.or_else(|| Some(percent_from_voltage(voltage)));

    let mut channels = HashMap::new();
    for (name, value) in &claims.extra {
        match value {
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    channels.insert(name.clone(), ChannelValue::Number(v));
                }
            }
            Value::Bool(b) => {
                channels.insert(name.clone(), ChannelValue::Flag(*b));
            }
            _ => {
                tracing::debug!(channel = %name, "Dropping non-scalar channel claim");
            }
        }
    }

    let timestamp = claims
        .timestamp
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(now);

    Ok(TelemetrySample {
        id: fleetmon_common::id::next_id(),
        identity_key,
        timestamp,
        position,
        power: PowerReading {
            voltage,
            percent,
        },
        channels,
        created_at: now,
    })
}
