//! GET /get_use_cases — lists the use-cases the registry knows about.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::http::AppState;

pub async fn get_use_cases(State(state): State<AppState>) -> Json<Value> {
    let mut names = state.registry.names();
    names.sort();
    tracing::info!(use_cases = ?names, "listing available use-cases");
    Json(json!({ "Use-cases": names }))
}
