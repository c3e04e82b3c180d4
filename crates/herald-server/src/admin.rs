//! Admin HTTP surface
//!
//! TigerStyle: Thin handlers; all behavior lives in the agent.
//!
//! - `POST /tasks/{name}`: run an admin task (`oor`, `bir`)
//! - `GET /healthcheck`: aggregate health, 503 when unhealthy
//! - `GET /ping`: liveness

use crate::models::{ErrorResponse, StatusResponse, TaskResponse};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use herald_discovery::{AdminTask, DiscoveryAgent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state
#[derive(Clone)]
pub struct AdminState {
    agent: Arc<DiscoveryAgent>,
    tasks: Arc<BTreeMap<String, Arc<dyn AdminTask>>>,
}

impl AdminState {
    pub fn new(agent: Arc<DiscoveryAgent>) -> Self {
        let tasks = agent
            .admin_tasks()
            .into_iter()
            .map(|task| (task.name().to_string(), task))
            .collect();
        Self {
            agent,
            tasks: Arc::new(tasks),
        }
    }
}

/// Create the admin router
pub fn router(agent: Arc<DiscoveryAgent>) -> Router {
    Router::new()
        .route("/tasks/:name", post(run_task))
        .route("/healthcheck", get(healthcheck))
        .route("/ping", get(ping))
        .layer(TraceLayer::new_for_http())
        .with_state(AdminState::new(agent))
}

async fn run_task(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    let Some(task) = state.tasks.get(&name.to_ascii_lowercase()) else {
        return (StatusCode::NOT_FOUND, Json(ErrorResponse::unknown_task(&name))).into_response();
    };
    let outcome = task.execute();
    info!(
        task = %outcome.task,
        in_rotation = outcome.in_rotation,
        changed = outcome.changed,
        "Admin task executed"
    );
    (StatusCode::OK, Json(TaskResponse::from(outcome))).into_response()
}

async fn healthcheck(State(state): State<AdminState>) -> Response {
    let agent = &state.agent;
    let body = StatusResponse {
        service: agent.registration().service_name.clone(),
        healthy: agent.health().is_healthy(),
        in_rotation: agent.rotation().is_in_rotation(),
        server_started: agent.server_status().is_started(),
        state: agent.state().to_string(),
    };
    let status = if body.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn ping() -> &'static str {
    "pong"
}
