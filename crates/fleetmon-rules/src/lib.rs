//! Alert rule engine for evaluating telemetry samples against per-identity
//! thresholds.
//!
//! Rules are independent: each rule's raise/suppress decision is computed on
//! its own, so a single sample may raise several alerts of different types in
//! the same pass. Deduplication is store-backed — before raising, the engine
//! asks an [`AlertHistory`] whether an unresolved alert of the same
//! `(identity, rule type)` was already raised within the rule's dedup window.

pub mod engine;
pub mod rules;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Utc};
use fleetmon_common::types::{Alert, Identity, RuleType, Severity, TelemetrySample};

/// A condition evaluated against each incoming sample.
///
/// Implementations are registered in the [`engine::RuleEngine`]. The engine
/// handles deduplication; `evaluate` only decides whether the condition holds
/// for this sample and, if so, builds the alert to raise.
pub trait TelemetryRule: Send + Sync {
    /// The alert stream this rule feeds. Dedup is keyed by
    /// `(identity, rule_type)`.
    fn rule_type(&self) -> RuleType;

    /// Human-readable rule name (e.g., `"low battery"`).
    fn name(&self) -> &str;

    /// Span during which a second alert of this type for the same identity
    /// is suppressed rather than raised anew.
    fn dedup_window_secs(&self) -> i64;

    /// Whether the reporting identity has this rule enabled.
    fn enabled_for(&self, identity: &Identity) -> bool;

    /// Returns the alert to raise if the condition holds for `sample`,
    /// or `None` otherwise.
    fn evaluate(
        &self,
        sample: &TelemetrySample,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Option<Alert>;
}

/// Recent-alert lookup used for deduplication.
///
/// Implemented by the alert store. The check-then-insert pair around this
/// query is deliberately unsynchronized: a narrow race between two
/// near-simultaneous samples may raise two alerts, and the dedup window
/// bounds the damage.
pub trait AlertHistory {
    /// Whether an unresolved alert of `(identity_key, rule_type)` was raised
    /// at or after `since`. Archived alerts do not count.
    fn has_unresolved_since(
        &self,
        identity_key: &str,
        rule_type: RuleType,
        since: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Convenience: severity for a reading that overshot a bound, scaling with
/// how far past it landed.
pub(crate) fn overshoot_severity(distance: f64, critical_margin: f64) -> Severity {
    if distance > critical_margin {
        Severity::Critical
    } else {
        Severity::High
    }
}
