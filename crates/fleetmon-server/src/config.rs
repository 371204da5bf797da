use crate::governor::RouteClass;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Snowflake generator coordinates; distinct per server instance.
    #[serde(default = "default_machine_id")]
    pub machine_id: i32,
    #[serde(default = "default_node_id")]
    pub node_id: i32,

    /// CORS allowed origins; empty allows all (development mode).
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub rate: RateConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            db_path: default_db_path(),
            machine_id: default_machine_id(),
            node_id: default_node_id(),
            cors_allowed_origins: Vec::new(),
            token: TokenConfig::default(),
            rate: RateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Shared HS256 secret. The FLEETMON_TOKEN_SECRET environment variable
    /// takes precedence over this field.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: i64,
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: None,
            max_lifetime_secs: default_max_lifetime_secs(),
            leeway_secs: default_leeway_secs(),
        }
    }
}

impl TokenConfig {
    /// Environment first, then config file. `None` means the caller should
    /// generate a throwaway secret.
    pub fn resolve_secret(&self) -> Option<String> {
        std::env::var("FLEETMON_TOKEN_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.secret.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    #[serde(default = "default_rate_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ingest_limit")]
    pub telemetry_ingest_limit: u64,
    #[serde(default = "default_ingest_window_secs")]
    pub telemetry_ingest_window_secs: i64,
    #[serde(default = "default_alert_create_limit")]
    pub alert_create_limit: u64,
    #[serde(default = "default_alert_create_window_secs")]
    pub alert_create_window_secs: i64,
    #[serde(default = "default_lifecycle_limit")]
    pub lifecycle_limit: u64,
    #[serde(default = "default_lifecycle_window_secs")]
    pub lifecycle_window_secs: i64,
    #[serde(default = "default_general_limit")]
    pub general_limit: u64,
    #[serde(default = "default_general_window_secs")]
    pub general_window_secs: i64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_enabled(),
            telemetry_ingest_limit: default_ingest_limit(),
            telemetry_ingest_window_secs: default_ingest_window_secs(),
            alert_create_limit: default_alert_create_limit(),
            alert_create_window_secs: default_alert_create_window_secs(),
            lifecycle_limit: default_lifecycle_limit(),
            lifecycle_window_secs: default_lifecycle_window_secs(),
            general_limit: default_general_limit(),
            general_window_secs: default_general_window_secs(),
        }
    }
}

impl RateConfig {
    pub fn class_limit(&self, class: RouteClass) -> (u64, i64) {
        match class {
            RouteClass::TelemetryIngest => (
                self.telemetry_ingest_limit,
                self.telemetry_ingest_window_secs,
            ),
            RouteClass::AlertCreate => (self.alert_create_limit, self.alert_create_window_secs),
            RouteClass::LifecycleMutation => (self.lifecycle_limit, self.lifecycle_window_secs),
            RouteClass::General => (self.general_limit, self.general_window_secs),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "data/fleetmon.db".to_string()
}

fn default_machine_id() -> i32 {
    1
}

fn default_node_id() -> i32 {
    1
}

fn default_max_lifetime_secs() -> i64 {
    crate::token::DEFAULT_MAX_LIFETIME_SECS
}

fn default_leeway_secs() -> i64 {
    crate::token::DEFAULT_LEEWAY_SECS
}

fn default_rate_enabled() -> bool {
    true
}

fn default_ingest_limit() -> u64 {
    60
}

fn default_ingest_window_secs() -> i64 {
    60
}

fn default_alert_create_limit() -> u64 {
    10
}

fn default_alert_create_window_secs() -> i64 {
    60
}

fn default_lifecycle_limit() -> u64 {
    5
}

fn default_lifecycle_window_secs() -> i64 {
    60
}

fn default_general_limit() -> u64 {
    100
}

fn default_general_window_secs() -> i64 {
    900
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
