//! POST /cancel_task.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::http::extract::ThreeSourceIds;
use crate::http::AppState;
use crate::ids::{JobId, Uid};

pub async fn cancel_task(State(state): State<AppState>, ids: ThreeSourceIds) -> Json<Value> {
    let Some(task_id) = ids.task_id else {
        return Json(json!({
            "task_id": "none",
            "status": "unknown",
            "details": "Task ID is None or Empty.",
            "worker": "unknown",
        }));
    };
    let Some(uid) = ids.uid else {
        return Json(json!({
            "task_id": task_id,
            "uid": "unknown",
            "status": "unknown",
            "details": "Key uid is None or Empty.",
            "worker": "unknown",
        }));
    };

    let (Ok(job_id), Ok(uid)): (Result<JobId, _>, Result<Uid, _>) =
        (task_id.parse(), uid.parse())
    else {
        return Json(json!({
            "task_id": task_id,
            "uid": uid,
            "status": "unknown",
            "details": "Task ID or UID is not a valid identifier.",
            "worker": "unknown",
        }));
    };

    let report = state.lifecycle.cancel(job_id, uid).await;
    tracing::info!(
        task_id = %job_id.log_prefix(),
        status = ?report.status,
        "cancel requested",
    );
    Json(serde_json::to_value(&report).expect("StatusReport always serializes"))
}
