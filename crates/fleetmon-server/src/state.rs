use crate::config::ServerConfig;
use crate::governor::RateGovernor;
use crate::token::TokenVerifier;
use chrono::{DateTime, Utc};
use fleetmon_rules::engine::RuleEngine;
use fleetmon_storage::TelemetryStore;
use std::sync::Arc;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TelemetryStore>,
    pub engine: Arc<RuleEngine>,
    pub governor: Arc<RateGovernor>,
    pub verifier: Arc<TokenVerifier>,
    pub config: Arc<ServerConfig>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: TelemetryStore,
        engine: RuleEngine,
        governor: RateGovernor,
        verifier: TokenVerifier,
        config: ServerConfig,
    ) -> Self {
        Self {
            store: Arc::new(store),
            engine: Arc::new(engine),
            governor: Arc::new(governor),
            verifier: Arc::new(verifier),
            config: Arc::new(config),
            start_time: Utc::now(),
        }
    }
}
