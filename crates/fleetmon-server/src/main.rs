use anyhow::Result;
use rand::Rng;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::Path;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use fleetmon_rules::engine::RuleEngine;
use fleetmon_rules::rules::builtin_rules;
use fleetmon_server::app;
use fleetmon_server::config::ServerConfig;
use fleetmon_server::governor::{InMemoryCounterStore, RateGovernor};
use fleetmon_server::state::AppState;
use fleetmon_server::token::TokenVerifier;
use fleetmon_storage::TelemetryStore;

fn random_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    let mut s = String::with_capacity(64);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fleetmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("config/server.toml");
    let config = if Path::new(config_path).exists() {
        ServerConfig::load(config_path)?
    } else {
        tracing::warn!(path = %config_path, "Config file not found, using defaults");
        ServerConfig::default()
    };

    fleetmon_common::id::init(config.machine_id, config.node_id);

    tracing::info!(
        http_port = config.http_port,
        db_path = %config.db_path,
        "fleetmon-server starting"
    );

    let store = TelemetryStore::open(Path::new(&config.db_path))?;
    let engine = RuleEngine::new(builtin_rules());
    let governor = RateGovernor::new(
        Box::new(InMemoryCounterStore::default()),
        config.rate.clone(),
    );

    // Token secret: configured value (env or file) or generated per process.
    let secret = match config.token.resolve_secret() {
        Some(secret) => secret,
        None => {
            tracing::warn!(
                "No token secret configured. A random secret was generated and will change \
                 on restart. Set FLEETMON_TOKEN_SECRET or [token].secret for production use."
            );
            random_secret()
        }
    };
    let verifier = TokenVerifier::new(
        secret,
        config.token.max_lifetime_secs,
        config.token.leeway_secs,
    );

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let state = AppState::new(store, engine, governor, verifier, config);
    let app = app::build_http_app(state);

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "Server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        signal::ctrl_c().await.ok();
        tracing::info!("Shutting down gracefully");
    })
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
