mod common;

use axum::http::StatusCode;
use common::*;
use fleetmon_server::config::RateConfig;

fn tight_rate() -> RateConfig {
    RateConfig {
        telemetry_ingest_limit: 2,
        telemetry_ingest_window_secs: 60,
        lifecycle_limit: 1,
        lifecycle_window_secs: 60,
        ..RateConfig::default()
    }
}

#[tokio::test]
async fn ingest_over_budget_is_rejected_with_retry_hint() {
    let ctx = build_test_context_with_rate(tight_rate()).expect("context should build");

    for _ in 0..2 {
        let token = telemetry_token("bus-1", 3.9);
        let (status, _, _) = request_raw(&ctx.app, "POST", "/v1/telemetry", Some(token)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let token = telemetry_token("bus-1", 3.9);
    let (status, body, _) = request_raw(&ctx.app, "POST", "/v1/telemetry", Some(token)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_err_envelope(&body, "rate_limited");
    let retry = body["error"]["retry_after_secs"].as_i64().unwrap();
    assert!(retry >= 1 && retry <= 60);

    // The rejected request had no side effect.
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/identities/bus-1/samples").await;
    assert_eq!(body["data"]["total"], 2);
}

#[tokio::test]
async fn budgets_are_per_identity() {
    let ctx = build_test_context_with_rate(tight_rate()).expect("context should build");

    for _ in 0..2 {
        let token = telemetry_token("bus-2", 3.9);
        request_raw(&ctx.app, "POST", "/v1/telemetry", Some(token)).await;
    }

    // A different identity still has a full budget.
    let token = telemetry_token("bus-3", 3.9);
    let (status, _, _) = request_raw(&ctx.app, "POST", "/v1/telemetry", Some(token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn even_rejected_auth_consumes_budget() {
    let ctx = build_test_context_with_rate(tight_rate()).expect("context should build");

    // Unverifiable tokens still count against the caller's bucket.
    for _ in 0..2 {
        let (status, _, _) = request_raw(
            &ctx.app,
            "POST",
            "/v1/telemetry",
            Some("garbage-token".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body, _) = request_raw(
        &ctx.app,
        "POST",
        "/v1/telemetry",
        Some("garbage-token".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_err_envelope(&body, "rate_limited");
}

#[tokio::test]
async fn lifecycle_mutations_are_governed_per_caller() {
    let ctx = build_test_context_with_rate(tight_rate()).expect("context should build");

    // Both hit the same caller bucket regardless of alert ID; the first
    // consumes the whole budget of 1.
    let (status, _, _) = request_no_body(&ctx.app, "POST", "/v1/alerts/1/acknowledge").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body, _) = request_no_body(&ctx.app, "POST", "/v1/alerts/2/acknowledge").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_err_envelope(&body, "rate_limited");
}

#[tokio::test]
async fn disabling_the_governor_admits_everything() {
    let rate = RateConfig {
        enabled: false,
        telemetry_ingest_limit: 1,
        ..RateConfig::default()
    };
    let ctx = build_test_context_with_rate(rate).expect("context should build");

    for _ in 0..5 {
        let token = telemetry_token("bus-4", 3.9);
        let (status, _, _) = request_raw(&ctx.app, "POST", "/v1/telemetry", Some(token)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
