use crate::{AlertHistory, TelemetryRule};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use fleetmon_common::types::{Alert, Identity, TelemetrySample};
use tracing;

/// Evaluates a fixed, ordered set of independent rules against each sample.
///
/// The engine itself is stateless: dedup state lives in the alert store,
/// queried through [`AlertHistory`], so the engine can be shared across
/// request tasks without a lock.
pub struct RuleEngine {
    rules: Vec<Box<dyn TelemetryRule>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Box<dyn TelemetryRule>>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Box<dyn TelemetryRule>] {
        &self.rules
    }

    /// Add a rule at runtime.
    pub fn add_rule(&mut self, rule: Box<dyn TelemetryRule>) {
        self.rules.push(rule);
    }

    /// Evaluates every rule against `sample` and returns the alerts to raise.
    ///
    /// Per rule: skip if the identity has it disabled; skip if the condition
    /// does not hold; suppress if an unresolved alert of the same
    /// `(identity, rule type)` exists within the rule's dedup window.
    /// Rules never see each other's output within the same pass.
    pub fn evaluate(
        &self,
        sample: &TelemetrySample,
        identity: &Identity,
        history: &dyn AlertHistory,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let mut raised = Vec::new();

        for rule in &self.rules {
            if !rule.enabled_for(identity) {
                continue;
            }

            let Some(alert) = rule.evaluate(sample, identity, now) else {
                continue;
            };

            let since = now - Duration::seconds(rule.dedup_window_secs());
            let duplicate =
                history.has_unresolved_since(&identity.key, rule.rule_type(), since)?;

            if duplicate {
                tracing::debug!(
                    identity = %identity.key,
                    rule_type = %rule.rule_type(),
                    "Alert suppressed (dedup window)"
                );
                continue;
            }

            raised.push(alert);
        }

        Ok(raised)
    }
}
