use crate::engine::RuleEngine;
use crate::rules::{builtin_rules, low_power::LowPowerRule, range::RangeRule};
use crate::{AlertHistory, TelemetryRule};
use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use fleetmon_common::types::{
    ChannelValue, Identity, PowerReading, RuleType, Severity, TelemetrySample,
    DEFAULT_POWER_THRESHOLD_PERCENT,
};
use std::collections::HashMap;
use std::sync::Mutex;

fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn make_identity(key: &str) -> Identity {
    let now = test_now();
    Identity {
        key: key.to_string(),
        label: None,
        active: true,
        power_threshold_percent: DEFAULT_POWER_THRESHOLD_PERCENT,
        low_power_alerts: true,
        environmental_alerts: true,
        last_seen_at: Some(now),
        created_at: now,
        updated_at: now,
    }
}

fn make_sample(identity_key: &str, percent: Option<f64>) -> TelemetrySample {
    TelemetrySample {
        id: format!("sample-{identity_key}"),
        identity_key: identity_key.to_string(),
        timestamp: test_now(),
        position: None,
        power: PowerReading {
            voltage: 3.7,
            percent,
        },
        channels: HashMap::new(),
        created_at: test_now(),
    }
}

fn sample_with_channel(identity_key: &str, channel: &str, value: f64) -> TelemetrySample {
    let mut sample = make_sample(identity_key, Some(80.0));
    sample
        .channels
        .insert(channel.to_string(), ChannelValue::Number(value));
    sample
}

/// Fake alert history with scripted answers, recording what was asked.
struct FakeHistory {
    unresolved: bool,
    queries: Mutex<Vec<(String, RuleType, DateTime<Utc>)>>,
}

impl FakeHistory {
    fn new(unresolved: bool) -> Self {
        Self {
            unresolved,
            queries: Mutex::new(Vec::new()),
        }
    }
}

impl AlertHistory for FakeHistory {
    fn has_unresolved_since(
        &self,
        identity_key: &str,
        rule_type: RuleType,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        self.queries
            .lock()
            .unwrap()
            .push((identity_key.to_string(), rule_type, since));
        Ok(self.unresolved)
    }
}

#[test]
fn low_power_fires_below_threshold() {
    let rule = LowPowerRule::default();
    let identity = make_identity("dev-1");
    let sample = make_sample("dev-1", Some(15.0));

    let alert = rule.evaluate(&sample, &identity, test_now()).unwrap();
    assert_eq!(alert.rule_type, RuleType::LowPower);
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.identity_key, "dev-1");
}

#[test]
fn low_power_silent_at_threshold() {
    let rule = LowPowerRule::default();
    let identity = make_identity("dev-1");

    // Boundary: exactly at the threshold is not "below".
    let sample = make_sample("dev-1", Some(20.0));
    assert!(rule.evaluate(&sample, &identity, test_now()).is_none());

    let sample = make_sample("dev-1", Some(55.0));
    assert!(rule.evaluate(&sample, &identity, test_now()).is_none());
}

#[test]
fn low_power_critical_below_floor() {
    let rule = LowPowerRule::default();
    let identity = make_identity("dev-1");
    let sample = make_sample("dev-1", Some(4.0));

    let alert = rule.evaluate(&sample, &identity, test_now()).unwrap();
    assert_eq!(alert.severity, Severity::Critical);
}

#[test]
fn low_power_skips_samples_without_percent() {
    let rule = LowPowerRule::default();
    let identity = make_identity("dev-1");
    let sample = make_sample("dev-1", None);

    assert!(rule.evaluate(&sample, &identity, test_now()).is_none());
}

#[test]
fn low_power_honors_custom_threshold() {
    let rule = LowPowerRule::default();
    let mut identity = make_identity("dev-1");
    identity.power_threshold_percent = 40.0;

    let sample = make_sample("dev-1", Some(35.0));
    let alert = rule.evaluate(&sample, &identity, test_now()).unwrap();
    assert_eq!(alert.severity, Severity::High);
}

#[test]
fn temperature_rule_fires_outside_bounds() {
    let rule = RangeRule {
        rule_type: RuleType::OverTemperature,
        name: "temperature out of range".to_string(),
        channel: "temperature".to_string(),
        low: -20.0,
        high: 55.0,
        critical_margin: 20.0,
        dedup_window_secs: 900,
    };
    let identity = make_identity("dev-1");

    let sample = sample_with_channel("dev-1", "temperature", 60.0);
    let alert = rule.evaluate(&sample, &identity, test_now()).unwrap();
    assert_eq!(alert.rule_type, RuleType::OverTemperature);
    assert_eq!(alert.severity, Severity::High);

    // More than 20 units past the bound escalates.
    let sample = sample_with_channel("dev-1", "temperature", 80.0);
    let alert = rule.evaluate(&sample, &identity, test_now()).unwrap();
    assert_eq!(alert.severity, Severity::Critical);

    // Cold side counts too.
    let sample = sample_with_channel("dev-1", "temperature", -45.0);
    let alert = rule.evaluate(&sample, &identity, test_now()).unwrap();
    assert_eq!(alert.severity, Severity::Critical);
}

#[test]
fn temperature_rule_silent_at_bounds() {
    let rule = RangeRule {
        rule_type: RuleType::OverTemperature,
        name: "temperature out of range".to_string(),
        channel: "temperature".to_string(),
        low: -20.0,
        high: 55.0,
        critical_margin: 20.0,
        dedup_window_secs: 900,
    };
    let identity = make_identity("dev-1");

    for value in [-20.0, 0.0, 55.0] {
        let sample = sample_with_channel("dev-1", "temperature", value);
        assert!(
            rule.evaluate(&sample, &identity, test_now()).is_none(),
            "{value} should be in range"
        );
    }
}

#[test]
fn range_rule_ignores_flag_channels() {
    let rule = RangeRule {
        rule_type: RuleType::OverTemperature,
        name: "temperature out of range".to_string(),
        channel: "temperature".to_string(),
        low: -20.0,
        high: 55.0,
        critical_margin: 20.0,
        dedup_window_secs: 900,
    };
    let identity = make_identity("dev-1");

    let mut sample = make_sample("dev-1", Some(80.0));
    sample
        .channels
        .insert("temperature".to_string(), ChannelValue::Flag(true));
    assert!(rule.evaluate(&sample, &identity, test_now()).is_none());
}

#[test]
fn engine_suppresses_within_dedup_window() {
    let engine = RuleEngine::new(builtin_rules());
    let identity = make_identity("dev-1");
    let sample = make_sample("dev-1", Some(15.0));

    let history = FakeHistory::new(true);
    let alerts = engine
        .evaluate(&sample, &identity, &history, test_now())
        .unwrap();
    assert!(alerts.is_empty());

    // The probe asked for the low-power window (30 min), not some other span.
    let queries = history.queries.lock().unwrap();
    assert_eq!(queries.len(), 1);
    let (key, rule_type, since) = &queries[0];
    assert_eq!(key, "dev-1");
    assert_eq!(*rule_type, RuleType::LowPower);
    assert_eq!(*since, test_now() - Duration::seconds(1800));
}

#[test]
fn engine_raises_when_window_clear() {
    let engine = RuleEngine::new(builtin_rules());
    let identity = make_identity("dev-1");
    let sample = make_sample("dev-1", Some(15.0));

    let history = FakeHistory::new(false);
    let alerts = engine
        .evaluate(&sample, &identity, &history, test_now())
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_type, RuleType::LowPower);
}

#[test]
fn rules_evaluate_independently() {
    let engine = RuleEngine::new(builtin_rules());
    let identity = make_identity("dev-1");

    // One sample trips both low power and over temperature.
    let mut sample = make_sample("dev-1", Some(12.0));
    sample
        .channels
        .insert("temperature".to_string(), ChannelValue::Number(70.0));

    let history = FakeHistory::new(false);
    let alerts = engine
        .evaluate(&sample, &identity, &history, test_now())
        .unwrap();

    let mut types: Vec<RuleType> = alerts.iter().map(|a| a.rule_type).collect();
    types.sort_by_key(|t| format!("{t}"));
    assert_eq!(types, vec![RuleType::LowPower, RuleType::OverTemperature]);
}

#[test]
fn disabled_rules_are_skipped() {
    let engine = RuleEngine::new(builtin_rules());
    let mut identity = make_identity("dev-1");
    identity.low_power_alerts = false;

    let sample = make_sample("dev-1", Some(5.0));
    let history = FakeHistory::new(false);
    let alerts = engine
        .evaluate(&sample, &identity, &history, test_now())
        .unwrap();
    assert!(alerts.is_empty());

    // Disabled rules never reach the history probe.
    assert!(history.queries.lock().unwrap().is_empty());
}

#[test]
fn environmental_toggle_gates_range_rules() {
    let engine = RuleEngine::new(builtin_rules());
    let mut identity = make_identity("dev-1");
    identity.environmental_alerts = false;

    let sample = sample_with_channel("dev-1", "temperature", 90.0);
    let history = FakeHistory::new(false);
    let alerts = engine
        .evaluate(&sample, &identity, &history, test_now())
        .unwrap();
    assert!(alerts.is_empty());
}
