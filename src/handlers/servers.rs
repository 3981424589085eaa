// Read API over the per-server snapshots

use crate::core::error::ApiError;
use crate::core::state::AppState;
use crate::models::patch::{PatchOperation, Savings};
use crate::models::task::Task;
use crate::stores::snapshot_store::ServerSnapshot;
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    /// Zero until the first successful poll
    pub revision: u64,
    pub task_count: usize,
    pub updated_at: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TasksResponse {
    pub server: String,
    pub revision: u64,
    pub updated_at: i64,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PatchesResponse {
    pub server: String,
    pub revision: u64,
    pub patches: Vec<PatchOperation>,
    pub savings: Savings,
}

/// GET /api/servers
pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerSummary>> {
    let summaries = state
        .clients
        .iter()
        .map(|client| {
            let server = client.server();
            let snapshot = state.snapshots.get(&server.name);
            ServerSummary {
                name: server.name.clone(),
                kind: client.kind().to_string(),
                url: server.redacted_url(),
                revision: snapshot.as_ref().map_or(0, |s| s.revision),
                task_count: snapshot.as_ref().map_or(0, |s| s.tasks.len()),
                updated_at: snapshot.as_ref().map(|s| s.updated_at),
                last_error: state.poll_errors.get(&server.name).map(|e| e.value().clone()),
            }
        })
        .collect();

    Json(summaries)
}

/// GET /api/servers/{name}/tasks
pub async fn server_tasks(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TasksResponse>, ApiError> {
    let snapshot = snapshot_for(&state, &name)?;
    Ok(Json(TasksResponse {
        revision: snapshot.revision,
        updated_at: snapshot.updated_at,
        tasks: snapshot.tasks.clone(),
        server: name,
    }))
}

/// GET /api/servers/{name}/patches
///
/// The patches that turned the previous snapshot into the current one.
pub async fn server_patches(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PatchesResponse>, ApiError> {
    let snapshot = snapshot_for(&state, &name)?;
    Ok(Json(PatchesResponse {
        revision: snapshot.revision,
        patches: snapshot.last_patches.clone(),
        savings: snapshot.savings,
        server: name,
    }))
}

fn snapshot_for(state: &AppState, name: &str) -> Result<Arc<ServerSnapshot>, ApiError> {
    if state.client(name).is_none() {
        return Err(ApiError::ServerNotFound(name.to_string()));
    }
    state
        .snapshots
        .get(name)
        .ok_or_else(|| ApiError::NoSnapshot(name.to_string()))
}
