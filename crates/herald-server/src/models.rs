//! Admin API response bodies

use herald_discovery::TaskOutcome;
use serde::{Deserialize, Serialize};

/// Result of `POST /tasks/{name}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub task: String,
    pub in_rotation: bool,
    pub changed: bool,
}

impl From<TaskOutcome> for TaskResponse {
    fn from(outcome: TaskOutcome) -> Self {
        Self {
            task: outcome.task,
            in_rotation: outcome.in_rotation,
            changed: outcome.changed,
        }
    }
}

/// Body of `GET /healthcheck`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub service: String,
    pub healthy: bool,
    pub in_rotation: bool,
    pub server_started: bool,
    /// Registration state, e.g. `PUBLISHED_IN`
    pub state: String,
}

/// Error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn unknown_task(name: &str) -> Self {
        Self {
            code: "not_found".to_string(),
            message: format!("no task named '{}'", name),
        }
    }
}
