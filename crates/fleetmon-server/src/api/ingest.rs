use crate::api::{
    error_response, error_response_body, storage_error_response, success_response, ApiError,
    ApiErrorBody,
};
use crate::logging::TraceId;
use crate::normalize::{normalize, ReportClaims};
use crate::state::AppState;
use crate::token::extract_body_token;
use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PowerStatus {
    voltage: f64,
    percent: Option<f64>,
}

#[derive(Serialize, ToSchema)]
struct LocationView {
    lat: f64,
    lng: f64,
}

/// Acknowledgement returned to the reporting device.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    identity_key: String,
    timestamp: DateTime<Utc>,
    power_status: PowerStatus,
    /// Number of alerts raised by this sample.
    alerts_created: usize,
    location: Option<LocationView>,
}

/// Ingest one telemetry report.
///
/// The body is either the signed device token itself, or
/// `{"token": "...", "identityKey": "..."?}`. All telemetry claims ride
/// inside the token; nothing in the body is trusted before the signature
/// checks out.
#[utoipa::path(
    post,
    path = "/v1/telemetry",
    tag = "Telemetry",
    request_body = String,
    responses(
        (status = 200, description = "Sample stored", body = IngestResponse),
        (status = 400, description = "Missing token or malformed claims", body = ApiError),
        (status = 401, description = "Token rejected", body = ApiError),
        (status = 403, description = "Identity mismatch or disabled", body = ApiError),
        (status = 429, description = "Rate budget exhausted", body = ApiError)
    )
)]
async fn ingest_telemetry(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    let now = Utc::now();

    let Some(body_token) = extract_body_token(&body) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "missing_token",
            "Request body must contain a device token",
        );
    };

    let verified = match state.verifier.verify::<ReportClaims>(&body_token.token, now) {
        Ok(v) => v,
        Err(e) => {
            return error_response(StatusCode::UNAUTHORIZED, &trace_id, e.code(), &e.to_string())
        }
    };
    let claims = verified.payload;

    // An explicit body identityKey must agree with the credential.
    if let (Some(stated), Some(claimed)) =
        (body_token.identity_key.as_deref(), claims.identity_key.as_deref())
    {
        if stated != claimed {
            return error_response(
                StatusCode::FORBIDDEN,
                &trace_id,
                "identity_mismatch",
                "Body identityKey does not match the token's identity",
            );
        }
    }

    let sample = match normalize(&claims, now) {
        Ok(sample) => sample,
        Err(fields) => {
            return error_response_body(
                StatusCode::BAD_REQUEST,
                &trace_id,
                ApiErrorBody {
                    code: "invalid_payload".to_string(),
                    message: "Telemetry claims failed validation".to_string(),
                    fields: Some(fields),
                    retry_after_secs: None,
                },
            )
        }
    };

    let identity = match state.store.touch_identity(&sample.identity_key, now) {
        Ok(identity) => identity,
        Err(e) => return storage_error_response(&trace_id, e),
    };

    if !identity.active {
        return error_response(
            StatusCode::FORBIDDEN,
            &trace_id,
            "identity_disabled",
            "Reporting identity is disabled",
        );
    }

    if let Err(e) = state.store.insert_sample(&sample) {
        return storage_error_response(&trace_id, e);
    }

    let alerts = match state
        .engine
        .evaluate(&sample, &identity, state.store.as_ref(), now)
    {
        Ok(alerts) => alerts,
        Err(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Rule evaluation failed");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &trace_id,
                "storage_unavailable",
                "Rule evaluation failed",
            );
        }
    };

    for alert in &alerts {
        tracing::info!(
            trace_id = %trace_id,
            identity = %alert.identity_key,
            rule_type = %alert.rule_type,
            severity = %alert.severity,
            "Alert raised"
        );
        if let Err(e) = state.store.insert_alert(alert) {
            return storage_error_response(&trace_id, e);
        }
    }

    success_response(
        StatusCode::OK,
        &trace_id,
        IngestResponse {
            identity_key: sample.identity_key.clone(),
            timestamp: sample.timestamp,
            power_status: PowerStatus {
                voltage: sample.power.voltage,
                percent: sample.power.percent,
            },
            alerts_created: alerts.len(),
            location: sample.position.map(|p| LocationView {
                lat: p.lat,
                lng: p.lng,
            }),
        },
    )
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(ingest_telemetry))
}
