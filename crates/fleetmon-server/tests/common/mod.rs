#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use fleetmon_rules::engine::RuleEngine;
use fleetmon_rules::rules::builtin_rules;
use fleetmon_server::app;
use fleetmon_server::config::{RateConfig, ServerConfig, TokenConfig};
use fleetmon_server::governor::{InMemoryCounterStore, RateGovernor};
use fleetmon_server::state::AppState;
use fleetmon_server::token::TokenVerifier;
use fleetmon_storage::TelemetryStore;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const TEST_SECRET: &str = "test-secret";

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with_rate(RateConfig::default())
}

pub fn build_test_context_with_rate(rate: RateConfig) -> Result<TestContext> {
    build(rate, Vec::new())
}

pub fn build_test_context_with_origins(origins: Vec<String>) -> Result<TestContext> {
    build(RateConfig::default(), origins)
}

fn build(rate: RateConfig, cors_allowed_origins: Vec<String>) -> Result<TestContext> {
    fleetmon_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("fleetmon.db");
    let store = TelemetryStore::open(&db_path)?;
    let engine = RuleEngine::new(builtin_rules());
    let governor = RateGovernor::new(Box::new(InMemoryCounterStore::default()), rate.clone());
    let verifier = TokenVerifier::new(TEST_SECRET.to_string(), 300, 30);

    let config = ServerConfig {
        http_port: 8080,
        db_path: db_path.to_string_lossy().to_string(),
        machine_id: 1,
        node_id: 1,
        cors_allowed_origins,
        token: TokenConfig::default(),
        rate,
    };

    let state = AppState::new(store, engine, governor, verifier, config);
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

/// Mint a device token with the given payload claims.
pub fn issue_token(claims: Value) -> String {
    let verifier = TokenVerifier::new(TEST_SECRET.to_string(), 300, 30);
    verifier
        .issue(&claims, Utc::now(), 120)
        .expect("token should issue")
}

/// A well-formed telemetry token for `identity_key` with the given voltage.
pub fn telemetry_token(identity_key: &str, voltage: f64) -> String {
    issue_token(json!({
        "identityKey": identity_key,
        "voltage": voltage,
    }))
}

pub async fn request_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<String>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    builder = builder.header("Content-Type", "application/json");

    let req = builder
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    request_raw(app, method, uri, body.map(|b| b.to_string())).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    request_raw(app, method, uri, None).await
}

pub fn assert_ok_envelope(json: &Value) {
    assert_eq!(json["success"], true);
    assert!(json.get("data").is_some());
    assert!(json["trace_id"].is_string());
}

pub fn assert_err_envelope(json: &Value, code: &str) {
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], code);
    assert!(json["error"]["message"].is_string());
    assert!(json["trace_id"].is_string());
}

/// Ingest one telemetry report and return the response data.
pub async fn ingest(app: &axum::Router, identity_key: &str, voltage: f64) -> Value {
    let token = telemetry_token(identity_key, voltage);
    let (status, body, _) = request_raw(app, "POST", "/v1/telemetry", Some(token)).await;
    assert_eq!(status, StatusCode::OK, "ingest failed: {body}");
    assert_ok_envelope(&body);
    body["data"].clone()
}
