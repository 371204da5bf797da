use crate::config::RateConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-key counter state after an increment.
#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub count: u64,
    pub window_started_at: DateTime<Utc>,
}

/// Windowed counter backend for the governor.
///
/// Injected rather than global so deployments can swap in a shared store and
/// tests can script counter state. Windows are fixed: a counter resets
/// entirely when its window elapses, so bursts can cluster around a boundary.
pub trait CounterStore: Send + Sync {
    fn increment(&self, key: &str, now: DateTime<Utc>, window_secs: i64) -> CounterSnapshot;
}

/// How often elapsed windows are swept out of the map.
const SWEEP_INTERVAL_SECS: i64 = 60;

struct Window {
    started_at: DateTime<Utc>,
    count: u64,
    window_secs: i64,
}

#[derive(Default)]
struct Windows {
    entries: HashMap<String, Window>,
    swept_at: Option<DateTime<Utc>>,
}

/// Counters live only as long as their window: elapsed entries are evicted
/// on a sweep cadence, so the map is bounded by the keys active within the
/// governance horizon rather than every key ever seen.
#[derive(Default)]
pub struct InMemoryCounterStore {
    windows: Mutex<Windows>,
}

impl CounterStore for InMemoryCounterStore {
    fn increment(&self, key: &str, now: DateTime<Utc>, window_secs: i64) -> CounterSnapshot {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let due = windows
            .swept_at
            .map_or(true, |at| now - at >= Duration::seconds(SWEEP_INTERVAL_SECS));
        if due {
            windows
                .entries
                .retain(|_, w| now - w.started_at < Duration::seconds(w.window_secs));
            windows.swept_at = Some(now);
        }

        let entry = windows.entries.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
            window_secs,
        });
        if now - entry.started_at >= Duration::seconds(window_secs) {
            entry.started_at = now;
            entry.count = 0;
        }
        entry.window_secs = window_secs;
        entry.count += 1;
        CounterSnapshot {
            count: entry.count,
            window_started_at: entry.started_at,
        }
    }
}

/// Governance class of a route; each class has its own limit, window and
/// per-key counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    TelemetryIngest,
    AlertCreate,
    LifecycleMutation,
    General,
}

impl RouteClass {
    fn prefix(&self) -> &'static str {
        match self {
            RouteClass::TelemetryIngest => "ingest",
            RouteClass::AlertCreate => "alert-create",
            RouteClass::LifecycleMutation => "lifecycle",
            RouteClass::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    Rejected { retry_after_secs: i64 },
}

pub struct RateGovernor {
    store: Box<dyn CounterStore>,
    config: RateConfig,
}

impl RateGovernor {
    pub fn new(store: Box<dyn CounterStore>, config: RateConfig) -> Self {
        Self { store, config }
    }

    /// Counts the request against `(class, admission_key)` and admits or
    /// rejects it. The count happens before the decision, so rejected
    /// requests still consume budget.
    pub fn check(&self, class: RouteClass, admission_key: &str, now: DateTime<Utc>) -> Decision {
        let (limit, window_secs) = self.config.class_limit(class);
        let key = format!("{}:{admission_key}", class.prefix());
        let snapshot = self.store.increment(&key, now, window_secs);

        if snapshot.count <= limit {
            return Decision::Admitted;
        }

        let elapsed = (now - snapshot.window_started_at).num_seconds();
        let retry_after_secs = (window_secs - elapsed).max(1);
        Decision::Rejected { retry_after_secs }
    }
}
