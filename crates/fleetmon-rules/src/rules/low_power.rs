use crate::TelemetryRule;
use chrono::{DateTime, Utc};
use fleetmon_common::types::{Alert, ArchiveState, Identity, RuleType, Severity, TelemetrySample};

/// Fires when the sample's charge percentage drops below the identity's
/// configured threshold. Escalates to critical below a hard floor.
pub struct LowPowerRule {
    /// Below this percentage the alert is critical regardless of the
    /// identity's threshold.
    pub critical_floor_percent: f64,
    pub dedup_window_secs: i64,
}

pub const DEFAULT_CRITICAL_FLOOR_PERCENT: f64 = 10.0;
pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 30 * 60;

impl Default for LowPowerRule {
    fn default() -> Self {
        Self {
            critical_floor_percent: DEFAULT_CRITICAL_FLOOR_PERCENT,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
        }
    }
}

impl TelemetryRule for LowPowerRule {
    fn rule_type(&self) -> RuleType {
        RuleType::LowPower
    }

    fn name(&self) -> &str {
        "low battery"
    }

    fn dedup_window_secs(&self) -> i64 {
        self.dedup_window_secs
    }

    fn enabled_for(&self, identity: &Identity) -> bool {
        identity.low_power_alerts
    }

    fn evaluate(
        &self,
        sample: &TelemetrySample,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let percent = sample.power.percent?;
        if percent >= identity.power_threshold_percent {
            return None;
        }

        let severity = if percent < self.critical_floor_percent {
            Severity::Critical
        } else {
            Severity::High
        };

        Some(Alert {
            id: fleetmon_common::id::next_id(),
            identity_key: identity.key.clone(),
            rule_type: RuleType::LowPower,
            severity,
            title: "Low battery".to_string(),
            message: format!(
                "Battery at {:.0}% ({:.2} V) on {}, below the {:.0}% threshold",
                percent, sample.power.voltage, identity.key, identity.power_threshold_percent,
            ),
            position: sample.position,
            payload: Some(serde_json::json!({
                "percent": percent,
                "voltage": sample.power.voltage,
                "threshold": identity.power_threshold_percent,
            })),
            raised_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            archive: ArchiveState::Active,
        })
    }
}
