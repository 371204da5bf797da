use crate::api::pagination::PaginationParams;
use crate::api::{
    error_response, error_response_body, storage_error_response, success_response, ApiError,
    ApiErrorBody, PaginatedData,
};
use crate::logging::TraceId;
use crate::normalize::FieldError;
use crate::state::AppState;
use crate::token::extract_body_token;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use fleetmon_common::types::{Alert, AlertStatus, ArchiveState, Position, RuleType, Severity};
use fleetmon_storage::{AlertFilter, AlertStats, ArchivedInclusion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Alert as returned by the API.
#[derive(Serialize, ToSchema)]
pub struct AlertView {
    pub id: String,
    pub identity_key: String,
    pub rule_type: String,
    pub severity: String,
    /// Derived lifecycle status: open / acknowledged / resolved.
    pub status: String,
    pub title: String,
    pub message: String,
    pub position: Option<PositionView>,
    pub payload: Option<serde_json::Value>,
    pub raised_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_by: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct PositionView {
    pub lat: f64,
    pub lng: f64,
    pub altitude: Option<f64>,
    pub course: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub satellites: Option<i64>,
}

impl From<Position> for PositionView {
    fn from(p: Position) -> Self {
        Self {
            lat: p.lat,
            lng: p.lng,
            altitude: p.altitude,
            course: p.course,
            speed: p.speed,
            accuracy: p.accuracy,
            satellites: p.satellites,
        }
    }
}

impl From<Alert> for AlertView {
    fn from(alert: Alert) -> Self {
        let status = alert.status().to_string();
        let (archived, archived_at, archived_by) = match &alert.archive {
            ArchiveState::Active => (false, None, None),
            ArchiveState::Archived { at, by } => (true, Some(*at), by.clone()),
        };
        Self {
            id: alert.id,
            identity_key: alert.identity_key,
            rule_type: alert.rule_type.to_string(),
            severity: alert.severity.to_string(),
            status,
            title: alert.title,
            message: alert.message,
            position: alert.position.map(PositionView::from),
            payload: alert.payload,
            raised_at: alert.raised_at,
            acknowledged_at: alert.acknowledged_at,
            acknowledged_by: alert.acknowledged_by,
            resolved_at: alert.resolved_at,
            resolved_by: alert.resolved_by,
            resolution_notes: alert.resolution_notes,
            archived,
            archived_at,
            archived_by,
        }
    }
}

/// Conjunctive alert filters. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[allow(non_snake_case)]
pub struct AlertQueryParams {
    #[param(required = false)]
    pub identity_key__eq: Option<String>,
    #[param(required = false)]
    pub rule_type__eq: Option<String>,
    #[param(required = false)]
    pub severity__eq: Option<String>,
    #[param(required = false)]
    pub status__eq: Option<String>,
    #[param(required = false)]
    pub raised_at__gte: Option<i64>,
    #[param(required = false)]
    pub raised_at__lte: Option<i64>,
    /// Include archived alerts alongside active ones.
    #[param(required = false)]
    pub include_archived: Option<bool>,
}

impl AlertQueryParams {
    /// Builds the storage filter, reporting the first unparsable value.
    fn to_filter(&self) -> Result<AlertFilter, String> {
        let rule_type = match &self.rule_type__eq {
            Some(s) => Some(s.parse::<RuleType>()?),
            None => None,
        };
        let severity = match &self.severity__eq {
            Some(s) => Some(s.parse::<Severity>()?),
            None => None,
        };
        let status = match &self.status__eq {
            Some(s) => Some(s.parse::<AlertStatus>()?),
            None => None,
        };
        let archived = if self.include_archived.unwrap_or(false) {
            ArchivedInclusion::Include
        } else {
            ArchivedInclusion::Exclude
        };
        Ok(AlertFilter {
            identity_key: self.identity_key__eq.clone(),
            rule_type,
            severity,
            status,
            raised_from: self.raised_at__gte.and_then(DateTime::from_timestamp_millis),
            raised_to: self.raised_at__lte.and_then(DateTime::from_timestamp_millis),
            archived,
        })
    }
}

/// Payload claims of a signed alert-creation token.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertClaims {
    #[serde(default)]
    identity_key: Option<String>,
    #[serde(default)]
    rule_type: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lng: Option<f64>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

const MAX_MESSAGE_CHARS: usize = 500;

fn validate_alert_claims(
    claims: &AlertClaims,
    now: DateTime<Utc>,
) -> Result<Alert, Vec<FieldError>> {
    let mut errors = Vec::new();

    let identity_key = match claims.identity_key.as_deref() {
        Some(key) if !key.trim().is_empty() => Some(key.to_string()),
        _ => {
            errors.push(FieldError {
                field: "identityKey".to_string(),
                message: "is required".to_string(),
            });
            None
        }
    };

    let rule_type = match claims.rule_type.as_deref() {
        Some(s) => match s.parse::<RuleType>() {
            Ok(rt) => Some(rt),
            Err(e) => {
                errors.push(FieldError {
                    field: "ruleType".to_string(),
                    message: e,
                });
                None
            }
        },
        None => {
            errors.push(FieldError {
                field: "ruleType".to_string(),
                message: "is required".to_string(),
            });
            None
        }
    };

    let message = match claims.message.as_deref() {
        Some(m) if !m.is_empty() && m.chars().count() <= MAX_MESSAGE_CHARS => Some(m.to_string()),
        Some(_) => {
            errors.push(FieldError {
                field: "message".to_string(),
                message: format!("must be 1 to {MAX_MESSAGE_CHARS} characters"),
            });
            None
        }
        None => {
            errors.push(FieldError {
                field: "message".to_string(),
                message: "is required".to_string(),
            });
            None
        }
    };

    let severity = match claims.severity.as_deref() {
        Some(s) => match s.parse::<Severity>() {
            Ok(sev) => Some(sev),
            Err(e) => {
                errors.push(FieldError {
                    field: "severity".to_string(),
                    message: e,
                });
                None
            }
        },
        None => Some(Severity::Medium),
    };

    let position = match (claims.lat, claims.lng) {
        (Some(lat), Some(lng)) => Some(Position::new(lat, lng)),
        (None, None) => None,
        _ => {
            errors.push(FieldError {
                field: "lat".to_string(),
                message: "lat and lng must be given together".to_string(),
            });
            None
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    let identity_key = identity_key.unwrap_or_default();
    let rule_type = rule_type.unwrap_or(RuleType::Custom);
    let message = message.unwrap_or_default();
    let severity = severity.unwrap_or(Severity::Medium);

    Ok(Alert {
        id: fleetmon_common::id::next_id(),
        identity_key,
        rule_type,
        severity,
        title: claims
            .title
            .clone()
            .unwrap_or_else(|| rule_type.to_string()),
        message,
        position,
        payload: claims.payload.clone(),
        raised_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolved_by: None,
        resolution_notes: None,
        archive: ArchiveState::Active,
    })
}

/// Create an alert from a signed device token.
///
/// Same body shapes as telemetry ingestion. Bumps the identity's last-seen
/// timestamp like any accepted submission.
#[utoipa::path(
    post,
    path = "/v1/alerts",
    tag = "Alerts",
    request_body = String,
    responses(
        (status = 201, description = "Alert created", body = AlertView),
        (status = 400, description = "Missing token or invalid claims", body = ApiError),
        (status = 401, description = "Token rejected", body = ApiError),
        (status = 403, description = "Identity mismatch or disabled", body = ApiError),
        (status = 429, description = "Rate budget exhausted", body = ApiError)
    )
)]
async fn create_alert(
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

    let verified = match state.verifier.verify::<AlertClaims>(&body_token.token, now) {
        Ok(v) => v,
        Err(e) => {
            return error_response(StatusCode::UNAUTHORIZED, &trace_id, e.code(), &e.to_string())
        }
    };
    let claims = verified.payload;

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

    let alert = match validate_alert_claims(&claims, now) {
        Ok(alert) => alert,
        Err(fields) => {
            return error_response_body(
                StatusCode::BAD_REQUEST,
                &trace_id,
                ApiErrorBody {
                    code: "invalid_payload".to_string(),
                    message: "Alert claims failed validation".to_string(),
                    fields: Some(fields),
                    retry_after_secs: None,
                },
            )
        }
    };

    let identity = match state.store.touch_identity(&alert.identity_key, now) {
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

    if let Err(e) = state.store.insert_alert(&alert) {
        return storage_error_response(&trace_id, e);
    }

    tracing::info!(
        trace_id = %trace_id,
        identity = %alert.identity_key,
        rule_type = %alert.rule_type,
        severity = %alert.severity,
        "Alert created via API"
    );
    success_response(StatusCode::CREATED, &trace_id, AlertView::from(alert))
}

/// Optional attribution for a lifecycle action.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LifecycleRequest {
    /// Operator performing the action.
    pub by: Option<String>,
    /// Resolution notes; only meaningful on resolve.
    pub notes: Option<String>,
}

/// Acknowledge an open alert.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/acknowledge",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert ID")),
    request_body = LifecycleRequest,
    responses(
        (status = 200, description = "Alert acknowledged", body = AlertView),
        (status = 400, description = "Alert is not open", body = ApiError),
        (status = 404, description = "Unknown alert", body = ApiError)
    )
)]
async fn acknowledge_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let by = req.by.as_deref().unwrap_or("system");
    match state.store.acknowledge_alert(&id, by, Utc::now()) {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, AlertView::from(alert)),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Resolve an alert (open or acknowledged).
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/resolve",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert ID")),
    request_body = LifecycleRequest,
    responses(
        (status = 200, description = "Alert resolved", body = AlertView),
        (status = 400, description = "Alert already resolved or archived", body = ApiError),
        (status = 404, description = "Unknown alert", body = ApiError)
    )
)]
async fn resolve_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let by = req.by.as_deref().unwrap_or("system");
    match state
        .store
        .resolve_alert(&id, by, req.notes.as_deref(), Utc::now())
    {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, AlertView::from(alert)),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Archive an alert. Terminal: archived alerts accept no further mutation
/// and disappear from default queries.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/archive",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert ID")),
    request_body = LifecycleRequest,
    responses(
        (status = 200, description = "Alert archived", body = AlertView),
        (status = 400, description = "Alert already archived", body = ApiError),
        (status = 404, description = "Unknown alert", body = ApiError)
    )
)]
async fn archive_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    match state
        .store
        .archive_alert(&id, req.by.as_deref(), Utc::now())
    {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, AlertView::from(alert)),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// List alerts, newest first.
#[utoipa::path(
    get,
    path = "/v1/alerts",
    tag = "Alerts",
    params(AlertQueryParams, PaginationParams),
    responses(
        (status = 200, description = "Filtered alert page", body = Vec<AlertView>),
        (status = 400, description = "Unparsable filter value", body = ApiError)
    )
)]
async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<AlertQueryParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let filter = match params.to_filter() {
        Ok(filter) => filter,
        Err(msg) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg)
        }
    };

    let total = match state.store.count_alerts(&filter) {
        Ok(total) => total,
        Err(e) => return storage_error_response(&trace_id, e),
    };
    let alerts = match state
        .store
        .query_alerts(&filter, pagination.limit(), pagination.offset())
    {
        Ok(alerts) => alerts,
        Err(e) => return storage_error_response(&trace_id, e),
    };

    let items: Vec<AlertView> = alerts.into_iter().map(AlertView::from).collect();
    success_response(
        StatusCode::OK,
        &trace_id,
        PaginatedData {
            items,
            total,
            page: pagination.page(),
            limit: pagination.limit(),
        },
    )
}

#[derive(Serialize, ToSchema)]
pub struct TrendBucketView {
    pub hour_start: DateTime<Utc>,
    pub count: u64,
}

/// Aggregates over the filtered alert set.
#[derive(Serialize, ToSchema)]
pub struct StatsResponse {
    pub total: u64,
    pub open: u64,
    pub acknowledged: u64,
    pub resolved: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub mean_time_to_resolve_secs: Option<f64>,
    pub raised_last_24h: Vec<TrendBucketView>,
}

impl From<AlertStats> for StatsResponse {
    fn from(stats: AlertStats) -> Self {
        Self {
            total: stats.total,
            open: stats.open,
            acknowledged: stats.acknowledged,
            resolved: stats.resolved,
            by_severity: stats
                .by_severity
                .into_iter()
                .map(|(sev, count)| (sev.to_string(), count))
                .collect(),
            mean_time_to_resolve_secs: stats.mean_time_to_resolve_secs,
            raised_last_24h: stats
                .raised_last_24h
                .into_iter()
                .map(|b| TrendBucketView {
                    hour_start: b.hour_start,
                    count: b.count,
                })
                .collect(),
        }
    }
}

/// Alert statistics over the same filters as the list endpoint.
#[utoipa::path(
    get,
    path = "/v1/alerts/stats",
    tag = "Alerts",
    params(AlertQueryParams),
    responses(
        (status = 200, description = "Aggregated alert statistics", body = StatsResponse),
        (status = 400, description = "Unparsable filter value", body = ApiError)
    )
)]
async fn alert_stats(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<AlertQueryParams>,
) -> impl IntoResponse {
    let filter = match params.to_filter() {
        Ok(filter) => filter,
        Err(msg) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg)
        }
    };
    match state.store.alert_stats(&filter, Utc::now()) {
        Ok(stats) => success_response(StatusCode::OK, &trace_id, StatsResponse::from(stats)),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

/// Fetch one alert by ID, archived or not.
#[utoipa::path(
    get,
    path = "/v1/alerts/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert", body = AlertView),
        (status = 404, description = "Unknown alert", body = ApiError)
    )
)]
async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_alert(&id) {
        Ok(Some(alert)) => success_response(StatusCode::OK, &trace_id, AlertView::from(alert)),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("alert {id} not found"),
        ),
        Err(e) => storage_error_response(&trace_id, e),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_alert, list_alerts))
        .routes(routes!(alert_stats))
        .routes(routes!(get_alert))
        .routes(routes!(acknowledge_alert))
        .routes(routes!(resolve_alert))
        .routes(routes!(archive_alert))
}
