//! POST /start_task — saves the encrypted input and enqueues a job.
//!
//! Grounded on the original `start_task` endpoint
//! (`examples/original_source/Server/server.py`): `uid`, `task_name`, and
//! an `encrypted_input` upload, each accepted from query or multipart body
//! per spec.md §4.G's three-source rule.

use std::collections::HashMap;

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::BrokerError;
use crate::http::AppState;
use crate::ids::Uid;
use crate::queue::JobEnvelope;

fn non_empty(v: Option<&String>) -> Option<String> {
    v.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

pub async fn start_task(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, BrokerError> {
    let mut uid = non_empty(query.get("uid"));
    let mut task_name = non_empty(query.get("task_name"));
    let mut input_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BrokerError::Internal(anyhow::anyhow!("reading multipart body: {e}")))?
    {
        match field.name().map(|n| n.to_owned()) {
            Some(name) if name == "uid" => {
                if uid.is_none() {
                    uid = non_empty(field.text().await.ok().as_ref());
                }
            }
            Some(name) if name == "task_name" => {
                if task_name.is_none() {
                    task_name = non_empty(field.text().await.ok().as_ref());
                }
            }
            Some(name) if name == "encrypted_input" => {
                input_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            BrokerError::Internal(anyhow::anyhow!("reading input field: {e}"))
                        })?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let uid = uid.ok_or_else(|| BrokerError::InvalidId("missing `uid`".to_owned()))?;
    let uid: Uid = uid.parse()?;
    let task_name =
        task_name.ok_or_else(|| BrokerError::UnknownUseCase("missing `task_name`".to_owned()))?;

    let spec = state
        .registry
        .get(&task_name)
        .ok_or_else(|| BrokerError::UnknownUseCase(task_name.clone()))?;

    let key_filename = format!("{uid}.serverKey");
    if !state.object_store.resolve_live(&key_filename)?.exists() {
        return Err(BrokerError::MissingKey(uid.to_string()));
    }

    if let Some(bytes) = input_bytes {
        let uid_str = uid.to_string();
        let input_filename = spec.input_filename(&uid_str);
        state.object_store.write_live(&input_filename, &bytes).await?;
    }

    let job_id = state
        .broker
        .enqueue(JobEnvelope {
            uid,
            use_case: task_name.clone(),
            channel: spec.queue_channel,
        })
        .await;

    tracing::info!(
        job_id = %job_id.log_prefix(),
        uid = %uid.log_prefix(),
        task_name = %task_name,
        "task started",
    );

    Ok(Json(json!({ "task_id": job_id.to_string() })))
}
