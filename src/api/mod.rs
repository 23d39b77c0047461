use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::cycle::{CycleOutcome, CycleScheduler, RunStatistics};
use crate::error::{DispatchError, Result};
use crate::storage::RunEvent;

const DEFAULT_EVENT_LIMIT: u32 = 50;
const MAX_EVENT_LIMIT: u32 = 500;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<CycleScheduler>,
    pub interval: Duration,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub statistics: RunStatistics,
    pub applications: u64,
    pub running: bool,
    pub scheduled: bool,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    limit: Option<u32>,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/events", get(get_events))
        .route("/cycle", post(run_cycle))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

pub async fn start_api_server(state: ApiState, port: u16) -> Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DispatchError::Config(format!("Cannot bind API server to {}: {}", addr, e)))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| DispatchError::Network(format!("API server failed: {}", e)))?;
    Ok(())
}

async fn get_stats(State(state): State<ApiState>) -> Json<ApiResponse<StatsResponse>> {
    let scheduler = &state.scheduler;
    let applications = match scheduler.store().application_count().await {
        Ok(count) => count,
        Err(e) => return Json(ApiResponse::error(format!("Failed to count applications: {}", e))),
    };

    Json(ApiResponse::success(StatsResponse {
        statistics: scheduler.statistics().await,
        applications,
        running: scheduler.is_running().await,
        scheduled: scheduler.is_scheduled().await,
    }))
}

async fn get_events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> Json<ApiResponse<Vec<RunEvent>>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT).min(MAX_EVENT_LIMIT);
    match state.scheduler.store().recent_events(limit).await {
        Ok(events) => Json(ApiResponse::success(events)),
        Err(e) => Json(ApiResponse::error(format!("Failed to load events: {}", e))),
    }
}

async fn run_cycle(State(state): State<ApiState>) -> Json<ApiResponse<CycleOutcome>> {
    info!("Cycle triggered through the API");
    Json(ApiResponse::success(state.scheduler.trigger().await))
}

async fn start_scheduler(State(state): State<ApiState>) -> Json<ApiResponse<String>> {
    if state.scheduler.start(state.interval).await {
        Json(ApiResponse::success(format!(
            "Scheduler started, interval {}s",
            state.interval.as_secs()
        )))
    } else {
        Json(ApiResponse::error("Scheduler already running".to_string()))
    }
}

async fn stop_scheduler(State(state): State<ApiState>) -> Json<ApiResponse<String>> {
    if state.scheduler.stop().await {
        Json(ApiResponse::success("Scheduler stopped".to_string()))
    } else {
        Json(ApiResponse::error("Scheduler not running".to_string()))
    }
}
