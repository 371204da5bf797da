use crate::api::{error_response_body, ApiErrorBody};
use crate::governor::{Decision, RouteClass};
use crate::logging::TraceId;
use crate::state::AppState;
use crate::token::{extract_body_token, peek_identity_key};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::net::SocketAddr;

/// Maximum body size the governor will buffer while looking for a token.
const MAX_BODY_BYTES: usize = 1024 * 1024;

fn classify(method: &Method, path: &str) -> RouteClass {
    if method == Method::POST {
        if path == "/v1/telemetry" {
            return RouteClass::TelemetryIngest;
        }
        if path == "/v1/alerts" {
            return RouteClass::AlertCreate;
        }
        if path.starts_with("/v1/alerts/")
            && (path.ends_with("/acknowledge")
                || path.ends_with("/resolve")
                || path.ends_with("/archive"))
        {
            return RouteClass::LifecycleMutation;
        }
    }
    RouteClass::General
}

fn caller_ip(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate-governance middleware.
///
/// Token-bearing routes are bucketed per claimed identity, read off the token
/// WITHOUT verifying it (a forged key only burns the forger's own budget;
/// real verification happens in the handler). Everything else is bucketed per
/// caller IP. Rejected requests get a 429 before any handler side effect.
pub async fn rate_governor(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.rate.enabled {
        return next.run(req).await;
    }

    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();

    let class = classify(req.method(), req.uri().path());

    // Token-carrying classes need the body to find the admission key. Buffer
    // it and hand the request back intact.
    let (req, admission_key) = match class {
        RouteClass::TelemetryIngest | RouteClass::AlertCreate => {
            let (parts, body) = req.into_parts();
            let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return error_response_body(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        &trace_id,
                        ApiErrorBody {
                            code: "payload_too_large".to_string(),
                            message: "Request body exceeds the allowed size".to_string(),
                            fields: None,
                            retry_after_secs: None,
                        },
                    );
                }
            };
            let identity = extract_body_token(&body_bytes)
                .and_then(|body_token| peek_identity_key(&body_token.token));
            let req = Request::from_parts(parts, Body::from(body_bytes));
            let key = match identity {
                Some(key) => format!("identity:{key}"),
                None => format!("caller-ip:{}", caller_ip(&req)),
            };
            (req, key)
        }
        _ => {
            let key = format!("caller-ip:{}", caller_ip(&req));
            (req, key)
        }
    };

    match state.governor.check(class, &admission_key, Utc::now()) {
        Decision::Admitted => next.run(req).await,
        Decision::Rejected { retry_after_secs } => {
            tracing::warn!(
                trace_id = %trace_id,
                key = %admission_key,
                path = %req.uri().path(),
                retry_after_secs,
                "Request rejected by rate governor"
            );
            error_response_body(
                StatusCode::TOO_MANY_REQUESTS,
                &trace_id,
                ApiErrorBody {
                    code: "rate_limited".to_string(),
                    message: "Request budget exhausted for this window".to_string(),
                    fields: None,
                    retry_after_secs: Some(retry_after_secs),
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_governed_routes() {
        assert_eq!(
            classify(&Method::POST, "/v1/telemetry"),
            RouteClass::TelemetryIngest
        );
        assert_eq!(classify(&Method::POST, "/v1/alerts"), RouteClass::AlertCreate);
        assert_eq!(
            classify(&Method::POST, "/v1/alerts/42/acknowledge"),
            RouteClass::LifecycleMutation
        );
        assert_eq!(
            classify(&Method::POST, "/v1/alerts/42/resolve"),
            RouteClass::LifecycleMutation
        );
        assert_eq!(
            classify(&Method::POST, "/v1/alerts/42/archive"),
            RouteClass::LifecycleMutation
        );
        assert_eq!(classify(&Method::GET, "/v1/alerts"), RouteClass::General);
        assert_eq!(classify(&Method::GET, "/v1/health"), RouteClass::General);
    }

    #[test]
    fn forwarded_header_wins_over_socket_addr() {
        let mut req = Request::builder()
            .uri("/v1/health")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("10.1.2.3:9999".parse::<SocketAddr>().unwrap()));
        assert_eq!(caller_ip(&req), "203.0.113.9");

        let mut req = Request::builder()
            .uri("/v1/health")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("10.1.2.3:9999".parse::<SocketAddr>().unwrap()));
        assert_eq!(caller_ip(&req), "10.1.2.3");
    }
}
