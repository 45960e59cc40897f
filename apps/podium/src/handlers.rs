use axum::{extract::State, response::Json};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;

use crate::coordinator::Coordinator;
use crate::registry::SessionSummary;

/// Read-only monitoring surface; consumes registry snapshots and never
/// mutates core state.
#[derive(Clone)]
pub struct MonitorState {
    pub coordinator: Coordinator,
    pub started_at: Instant,
}

impl MonitorState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub clients: usize,
    pub uptime: f64,
}

pub async fn server_info() -> Json<Value> {
    Json(json!({
        "message": "Podium session coordination server",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "status": "/api/status",
            "sessions": "/api/sessions",
        },
    }))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn get_status(State(state): State<MonitorState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        sessions: state.coordinator.session_count().await,
        clients: state.coordinator.connection_count(),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

pub async fn list_sessions(State(state): State<MonitorState>) -> Json<Vec<SessionSummary>> {
    Json(state.coordinator.session_summaries().await)
}
