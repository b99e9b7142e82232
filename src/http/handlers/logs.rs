//! GET /logs?lines=N — serves the tail of the service's own log file as
//! escaped HTML. Operational tooling only: must never touch job state
//! (spec.md §4.G').

use std::collections::VecDeque;
use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::response::Html;

use crate::http::AppState;

const DEFAULT_LINES: usize = 10;

pub async fn get_logs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    let lines: usize = params
        .get("lines")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LINES);

    let tail = match tokio::fs::read_to_string(&state.config.log_file).await {
        Ok(contents) => {
            let mut buf: VecDeque<&str> = VecDeque::with_capacity(lines);
            for line in contents.lines() {
                if buf.len() == lines {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
            buf.into_iter().collect::<Vec<_>>().join("\n")
        }
        Err(e) => format!("(could not read log file: {e})"),
    };

    let escaped = tail
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    Html(format!(
        "<html><head><title>Server Logs</title></head><body><pre>{escaped}</pre></body></html>"
    ))
}
