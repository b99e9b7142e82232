//! GET /list_current_tasks — best-effort listing of everything the broker
//! currently knows about, queued or leased (spec.md §4.C `inspect`).

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::http::AppState;
use crate::queue::JobState;

pub async fn list_current_tasks(State(state): State<AppState>) -> Json<Value> {
    let records = state.broker.snapshot().await;
    let tasks: Vec<Value> = records
        .into_iter()
        .map(|r| match r.state {
            JobState::Queued => json!({
                "task_id": r.job_id.to_string(),
                "status": "queued",
                "worker": "queue",
                "details": "job is queued",
            }),
            JobState::Leased { worker } => json!({
                "task_id": r.job_id.to_string(),
                "status": "active",
                "worker": worker,
                "details": "job is still in progress",
            }),
        })
        .collect();

    tracing::info!(count = tasks.len(), "listing current tasks");
    Json(json!(tasks))
}
