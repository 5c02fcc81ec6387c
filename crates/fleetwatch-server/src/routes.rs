use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use fleetwatch_core::{AppError, DatasetKind, Orchestrator};

use crate::auth::require_admin_token;
use crate::dto::{
    AlarmResponse, DatasetView, GpsResponse, MessageResponse, RefreshQuery, RefreshResponse,
    StatusResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/reset", get(reset))
        .route("/refresh", post(refresh))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    let public = Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/gps", get(gps))
        .route("/alarms", get(alarms))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(admin).with_state(state)
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service is up", body = MessageResponse)),
    tag = "system"
)]
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse::new("API is running!"))
}

#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Current session and scrape status", body = StatusResponse)),
    tag = "system"
)]
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = state.orchestrator.status();
    let retry_at = state.orchestrator.retry_times(&status);
    Json(StatusResponse::new(status, retry_at))
}

#[utoipa::path(
    get,
    path = "/reset",
    responses(
        (status = 200, description = "Attempt counters cleared", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn reset(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.orchestrator.reset();
    Json(MessageResponse::new("Attempt counters reset"))
}

#[utoipa::path(
    post,
    path = "/refresh",
    params(RefreshQuery),
    responses(
        (status = 200, description = "Per-kind refresh outcome", body = RefreshResponse),
        (status = 400, description = "Unknown dataset kind", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let kind = query
        .kind
        .as_deref()
        .map(str::parse::<DatasetKind>)
        .transpose()
        .map_err(AppError::InvalidInput)?;

    let report = state.orchestrator.refresh(kind).await?;
    Ok(Json(report.into()))
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/gps",
    responses((status = 200, description = "Latest GPS records, or the reason they are unavailable", body = GpsResponse)),
    tag = "data"
)]
pub async fn gps(State(state): State<Arc<AppState>>) -> Json<GpsResponse> {
    Json(dataset_view(&state.orchestrator, DatasetKind::Gps).into())
}

#[utoipa::path(
    get,
    path = "/alarms",
    responses((status = 200, description = "Latest alarm records, or the reason they are unavailable", body = AlarmResponse)),
    tag = "data"
)]
pub async fn alarms(State(state): State<Arc<AppState>>) -> Json<AlarmResponse> {
    Json(dataset_view(&state.orchestrator, DatasetKind::Alarm).into())
}

/// Cached records for `kind`. A halted kind still serves its stale snapshot
/// alongside the halt error.
fn dataset_view(orchestrator: &Orchestrator, kind: DatasetKind) -> DatasetView {
    let records = orchestrator.snapshot(kind).map(|s| s.records.clone());

    if orchestrator.scrape_halted(kind) {
        return DatasetView {
            records,
            error: Some(AppError::MaxScrapeAttemptsExceeded(kind).to_string()),
        };
    }

    match records {
        Some(records) => DatasetView {
            records: Some(records),
            error: None,
        },
        None => DatasetView {
            records: None,
            error: Some(format!("No {kind} data available")),
        },
    }
}
