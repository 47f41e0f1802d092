use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::{database::Store, health::HealthChecker},
    error::HubError,
    models::{
        fault::FaultModel,
        health::HealthStatus,
        producer::{StartOutcome, StopOutcome},
        record::StoreStats,
        response::ControlResponse,
    },
    producer::LoadGenerator,
};

pub struct ControlState {
    pub generator: Arc<LoadGenerator>,
    pub health_checker: HealthChecker,
}

pub struct ProcessorState {
    pub store: Arc<dyn Store>,
    pub health_checker: HealthChecker,
}

pub fn control_router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/start", post(start_producer))
        .route("/stop", post(stop_producer))
        .route("/status", get(producer_status))
        .route("/invoke-once", post(invoke_once))
        .route("/health", get(control_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn processor_router(state: Arc<ProcessorState>) -> Router {
    Router::new()
        .route("/stats", get(store_stats))
        .route("/health", get(processor_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(router: Router, port: u16) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, router).await?;

    Ok(())
}

async fn start_producer(
    State(state): State<Arc<ControlState>>,
    body: Result<Json<FaultModel>, JsonRejection>,
) -> impl IntoResponse {
    let model = match body {
        Ok(Json(model)) => model,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ControlResponse::error(rejection.body_text())),
            );
        }
    };

    match state.generator.start(model).await {
        Ok(StartOutcome::Started) => (StatusCode::OK, Json(ControlResponse::status("started"))),
        Ok(StartOutcome::AlreadyRunning) => (
            StatusCode::OK,
            Json(ControlResponse::status("already_running")),
        ),
        Err(e @ HubError::InvalidModel(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ControlResponse::error(e.to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ControlResponse::error(e.to_string())),
        ),
    }
}

async fn stop_producer(State(state): State<Arc<ControlState>>) -> impl IntoResponse {
    let status = match state.generator.stop().await {
        StopOutcome::Stopped => "stopped",
        StopOutcome::NotRunning => "not_running",
    };
    Json(ControlResponse::status(status))
}

async fn producer_status(State(state): State<Arc<ControlState>>) -> impl IntoResponse {
    Json(state.generator.status())
}

async fn invoke_once(State(state): State<Arc<ControlState>>) -> impl IntoResponse {
    match state.generator.publish_once().await {
        Ok(message_id) => (StatusCode::OK, Json(ControlResponse::published(message_id))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ControlResponse::error(e.to_string())),
        ),
    }
}

async fn store_stats(State(state): State<Arc<ProcessorState>>) -> Response {
    match state.store.count_records().await {
        Ok(total) => Json(StoreStats {
            processed_messages_total: total,
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ControlResponse::error(e.to_string())),
        )
            .into_response(),
    }
}

async fn control_health(State(state): State<Arc<ControlState>>) -> Response {
    health_response(&state.health_checker).await
}

async fn processor_health(State(state): State<Arc<ProcessorState>>) -> Response {
    health_response(&state.health_checker).await
}

async fn health_response(checker: &HealthChecker) -> Response {
    let health = checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health)).into_response()
}
