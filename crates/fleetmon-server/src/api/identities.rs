use crate::api::alerts::PositionView;
use crate::api::pagination::PaginationParams;
use crate::api::{error_response, storage_error_response, success_response, ApiError, PaginatedData};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use fleetmon_common::types::{ChannelValue, TelemetrySample};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Stored sample as returned by the API.
#[derive(Serialize, ToSchema)]
pub struct SampleView {
    pub id: String,
    pub identity_key: String,
    pub timestamp: DateTime<Utc>,
    pub position: Option<PositionView>,
    pub voltage: f64,
    pub percent: Option<f64>,
    /// Named channels; values are numbers or booleans.
    pub channels: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<TelemetrySample> for SampleView {
    fn from(sample: TelemetrySample) -> Self {
        let channels = sample
            .channels
            .into_iter()
            .map(|(name, value)| {
                let json = match value {
                    ChannelValue::Number(v) => serde_json::json!(v),
                    ChannelValue::Flag(b) => serde_json::json!(b),
                };
                (name, json)
            })
            .collect();
        Self {
            id: sample.id,
            identity_key: sample.identity_key,
            timestamp: sample.timestamp,
            position: sample.position.map(PositionView::from),
            voltage: sample.power.voltage,
            percent: sample.power.percent,
            channels,
            created_at: sample.created_at,
        }
    }
}

/// Inclusive time-range bounds, epoch milliseconds.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TimeRangeParams {
    #[param(required = false)]
    pub from: Option<i64>,
    #[param(required = false)]
    pub to: Option<i64>,
}

/// Samples reported by one identity, newest first.
#[utoipa::path(
    get,
    path = "/v1/identities/{key}/samples",
    tag = "Identities",
    params(
        ("key" = String, Path, description = "Identity key"),
        TimeRangeParams,
        PaginationParams
    ),
    responses(
        (status = 200, description = "Sample page", body = Vec<SampleView>),
        (status = 404, description = "Unknown identity", body = ApiError)
    )
)]
async fn list_samples(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(range): Query<TimeRangeParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    match state.store.get_identity(&key) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                &trace_id,
                "not_found",
                &format!("identity {key} not found"),
            )
        }
        Err(e) => return storage_error_response(&trace_id, e),
    }

    let from = range.from.and_then(DateTime::from_timestamp_millis);
    let to = range.to.and_then(DateTime::from_timestamp_millis);

    let total = match state.store.count_samples(&key, from, to) {
        Ok(total) => total,
        Err(e) => return storage_error_response(&trace_id, e),
    };
    let samples = match state
        .store
        .samples_for_identity(&key, from, to, pagination.limit(), pagination.offset())
    {
        Ok(samples) => samples,
        Err(e) => return storage_error_response(&trace_id, e),
    };

    let items: Vec<SampleView> = samples.into_iter().map(SampleView::from).collect();
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

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(list_samples))
}
