pub mod alerts;
pub mod identities;
pub mod ingest;
pub mod pagination;

use crate::logging::TraceId;
use crate::normalize::FieldError;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// Machine-readable error body inside the response envelope.
#[derive(Serialize, ToSchema)]
pub struct ApiErrorBody {
    /// Stable error code (e.g. `token_expired`, `illegal_transition`).
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Per-field validation problems, present only for payload errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
    /// Seconds until the caller may retry, present only on rate rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<i64>,
}

/// Error envelope as documented in the OpenAPI spec.
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    pub success: bool,
    pub error: ApiErrorBody,
    /// Request trace ID, also echoed in the X-Trace-Id header.
    pub trace_id: String,
}

/// Uniform response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
    pub trace_id: String,
}

/// Paginated collection wrapper.
#[derive(Serialize, ToSchema)]
pub struct PaginatedData<T>
where
    T: Serialize,
{
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    error_response_body(
        status,
        trace_id,
        ApiErrorBody {
            code: code.to_string(),
            message: msg.to_string(),
            fields: None,
            retry_after_secs: None,
        },
    )
}

pub fn error_response_body(status: StatusCode, trace_id: &str, error: ApiErrorBody) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            success: false,
            data: None,
            error: Some(error),
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

/// Maps a storage failure onto the envelope. Lifecycle legality and missing
/// rows are caller errors; everything else is reported as the store being
/// unavailable.
pub fn storage_error_response(trace_id: &str, err: fleetmon_storage::StorageError) -> Response {
    use fleetmon_storage::StorageError;
    match err {
        StorageError::NotFound { entity, id } => error_response(
            StatusCode::NOT_FOUND,
            trace_id,
            "not_found",
            &format!("{entity} {id} not found"),
        ),
        StorageError::IllegalTransition {
            action,
            id,
            current,
        } => error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "illegal_transition",
            &format!("cannot {action} alert {id} in state {current}"),
        ),
        other => {
            tracing::error!(error = %other, "Storage operation failed");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                trace_id,
                "storage_unavailable",
                "Storage error",
            )
        }
    }
}

/// Service health.
#[derive(Serialize, ToSchema)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    storage_status: String,
}

/// Liveness and storage probe. No token required.
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    let storage_status = match state.store.ping() {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "Storage ping failed");
            "unavailable".to_string()
        }
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            storage_status,
        },
    )
}

pub fn routes() -> utoipa_axum::router::OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new()
        .routes(utoipa_axum::routes!(health))
        .merge(ingest::routes())
        .merge(alerts::routes())
        .merge(identities::routes())
}
