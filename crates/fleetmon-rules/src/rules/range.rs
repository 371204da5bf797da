use crate::{overshoot_severity, TelemetryRule};
use chrono::{DateTime, Utc};
use fleetmon_common::types::{Alert, ArchiveState, Identity, RuleType, TelemetrySample};

pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 15 * 60;

/// Fires when a numeric channel reading lands outside `[low, high]`.
///
/// Severity scales with how far the reading overshot: more than
/// `critical_margin` units past the violated bound is critical,
/// anything else is high.
pub struct RangeRule {
    pub rule_type: RuleType,
    pub name: String,
    /// Channel key looked up in the sample's channel map.
    pub channel: String,
    pub low: f64,
    pub high: f64,
    pub critical_margin: f64,
    pub dedup_window_secs: i64,
}

impl TelemetryRule for RangeRule {
    fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dedup_window_secs(&self) -> i64 {
        self.dedup_window_secs
    }

    fn enabled_for(&self, identity: &Identity) -> bool {
        identity.environmental_alerts
    }

    fn evaluate(
        &self,
        sample: &TelemetrySample,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let value = sample.channels.get(&self.channel)?.as_number()?;
        if value >= self.low && value <= self.high {
            return None;
        }

        let violated_bound = if value < self.low { self.low } else { self.high };
        let distance = (value - violated_bound).abs();
        let severity = overshoot_severity(distance, self.critical_margin);

        Some(Alert {
            id: fleetmon_common::id::next_id(),
            identity_key: identity.key.clone(),
            rule_type: self.rule_type,
            severity,
            title: format!("{} out of range", self.channel),
            message: format!(
                "{} reading {:.1} on {} is outside [{:.1}, {:.1}]",
                self.channel, value, identity.key, self.low, self.high,
            ),
            position: sample.position,
            payload: Some(serde_json::json!({
                "channel": self.channel,
                "value": value,
                "low": self.low,
                "high": self.high,
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
