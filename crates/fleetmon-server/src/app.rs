use crate::state::AppState;
use crate::{api, logging, middleware as governor_middleware};
use axum::http::HeaderValue;
use axum::middleware;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "fleetmon API",
        description = "Fleet telemetry ingestion and alerting REST API",
    ),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Telemetry", description = "Token-authenticated telemetry ingestion"),
        (name = "Alerts", description = "Alert creation, querying and lifecycle"),
        (name = "Identities", description = "Per-identity sample history")
    )
)]
struct ApiDoc;

pub fn build_http_app(state: AppState) -> Router {
    let (router, spec) = api::routes().split_for_parts();

    let mut merged_spec = ApiDoc::openapi();
    merged_spec.merge(spec);

    let cors = cors_layer(&state.config.cors_allowed_origins);

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            governor_middleware::rate_governor,
        ))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/v1/openapi.json", merged_spec))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}

/// An empty allow-list means any origin (development mode).
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
