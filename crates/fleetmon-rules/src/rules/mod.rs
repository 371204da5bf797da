pub mod low_power;
pub mod range;

use crate::TelemetryRule;
use fleetmon_common::types::RuleType;

/// The built-in rule set evaluated on every ingested sample.
pub fn builtin_rules() -> Vec<Box<dyn TelemetryRule>> {
    vec![
        Box::new(low_power::LowPowerRule::default()),
        Box::new(range::RangeRule {
            rule_type: RuleType::OverTemperature,
            name: "temperature out of range".to_string(),
            channel: "temperature".to_string(),
            low: -20.0,
            high: 55.0,
            critical_margin: 20.0,
            dedup_window_secs: range::DEFAULT_DEDUP_WINDOW_SECS,
        }),
    ]
}
