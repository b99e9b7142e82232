//! GET|POST /get_task_status.
//!
//! Missing or unparsable identifiers are reported as an UNKNOWN status
//! body, never as an HTTP error — this is a polling API (spec.md §4.F).

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::http::extract::ThreeSourceIds;
use crate::http::AppState;
use crate::ids::{JobId, Uid};

pub async fn get_task_status(State(state): State<AppState>, ids: ThreeSourceIds) -> Json<Value> {
    let Some(task_id) = ids.task_id else {
        tracing::warn!("get_task_status called without a task_id");
        return Json(json!({
            "task_id": "none",
            "status": "unknown",
            "details": "Task ID is None or Empty.",
            "worker": "unknown",
        }));
    };

    let Some(uid) = ids.uid else {
        tracing::warn!(task_id = %task_id, "get_task_status called without a uid");
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

    let report = state.lifecycle.compute_status(job_id, uid).await;
    tracing::info!(
        task_id = %job_id.log_prefix(),
        status = ?report.status,
        "status polled",
    );
    Json(serde_json::to_value(&report).expect("StatusReport always serializes"))
}
