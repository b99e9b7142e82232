//! POST /add_key — upload an evaluation key, receive a fresh uid.

use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::BrokerError;
use crate::http::AppState;
use crate::ids::Uid;

pub async fn add_key(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, BrokerError> {
    let mut key_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BrokerError::Internal(anyhow::anyhow!("reading multipart body: {e}")))?
    {
        if field.name() == Some("key") {
            key_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| BrokerError::Internal(anyhow::anyhow!("reading key field: {e}")))?
                    .to_vec(),
            );
        }
    }

    let key_bytes =
        key_bytes.ok_or_else(|| BrokerError::InvalidId("missing `key` file field".to_owned()))?;

    let uid = Uid::new();
    let filename = format!("{uid}.serverKey");
    state.object_store.write_live(&filename, &key_bytes).await?;

    tracing::info!(uid = %uid.log_prefix(), size = key_bytes.len(), "received new key upload");

    Ok(Json(json!({ "uid": uid.to_string() })))
}
