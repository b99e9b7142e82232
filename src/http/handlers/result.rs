//! GET|POST /get_task_result — retrieves the final result of a task,
//! streaming raw bytes or returning a JSON body per the use-case's
//! configured response shape (spec.md §4.F, §6).

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::BrokerError;
use crate::http::extract::ThreeSourceIds;
use crate::http::AppState;
use crate::ids::{JobId, Uid};
use crate::lifecycle::Delivery;

pub async fn get_task_result(State(state): State<AppState>, ids: ThreeSourceIds) -> Response {
    let Some(task_name) = ids.task_name else {
        return BrokerError::UnknownUseCase("missing `task_name`".to_owned()).into_response();
    };
    let Some(task_id) = ids.task_id else {
        return Json(json!({
            "task_id": "none",
            "status": "unknown",
            "details": "Task ID is None or Empty.",
            "worker": "unknown",
        }))
        .into_response();
    };
    let Some(uid) = ids.uid else {
        return Json(json!({
            "task_id": task_id,
            "uid": "unknown",
            "status": "unknown",
            "details": "Key uid is None or Empty.",
            "worker": "unknown",
        }))
        .into_response();
    };

    let (job_id, uid): (JobId, Uid) = match (task_id.parse(), uid.parse()) {
        (Ok(j), Ok(u)) => (j, u),
        _ => {
            return Json(json!({
                "task_id": task_id,
                "uid": uid,
                "status": "unknown",
                "details": "Task ID or UID is not a valid identifier.",
                "worker": "unknown",
            }))
            .into_response()
        }
    };

    match state.lifecycle.get_result(job_id, uid, &task_name).await {
        Ok(Delivery::Status(report)) => {
            tracing::info!(task_id = %job_id.log_prefix(), status = ?report.status, "result not ready");
            Json(report).into_response()
        }
        Ok(Delivery::Json(body)) => {
            tracing::info!(task_id = %job_id.log_prefix(), "delivering json result");
            Json(body).into_response()
        }
        Ok(Delivery::Stream {
            data,
            filename,
            report,
        }) => {
            tracing::info!(task_id = %job_id.log_prefix(), bytes = data.len(), "streaming result");
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            if let Ok(v) =
                HeaderValue::from_str(&format!("attachment; filename={filename}"))
            {
                headers.insert(header::CONTENT_DISPOSITION, v);
            }
            if let Ok(v) = HeaderValue::from_str(&job_id.to_string()) {
                headers.insert("job_id", v);
            }
            if let Ok(v) = HeaderValue::from_str(&uid.to_string()) {
                headers.insert("uid", v);
            }
            if let Ok(v) = HeaderValue::from_str(&report.worker.clone().unwrap_or_default()) {
                headers.insert("worker", v);
            }
            if let Ok(v) = HeaderValue::from_str(&report.stderr) {
                headers.insert("stderr", v);
            }
            (headers, data).into_response()
        }
        Err(e) => e.into_response(),
    }
}
