//! Error kinds and their HTTP disposition.
//!
//! Mirrors the teacher-adjacent `sem_os_server` pattern: a single
//! `thiserror`-derived enum carries every error kind named in spec.md §7,
//! and `IntoResponse` maps each to the status code that table specifies.
//! Internal plumbing keeps using `anyhow::Result` and only converts into
//! `BrokerError::Internal` at a module boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("path escapes the object store root: {0}")]
    PathEscape(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown use-case: {0}")]
    UnknownUseCase(String),

    #[error("missing key file for uid {0}")]
    MissingKey(String),

    #[error("output artifact missing: {0}")]
    MissingArtifact(String),

    #[error("object store I/O failure: {0}")]
    ObjectStoreIo(#[source] std::io::Error),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BrokerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::PathEscape(_) => StatusCode::BAD_REQUEST,
            Self::InvalidId(_) => StatusCode::BAD_REQUEST,
            Self::UnknownUseCase(_) => StatusCode::BAD_REQUEST,
            Self::MissingKey(_) => StatusCode::NOT_FOUND,
            Self::MissingArtifact(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ObjectStoreIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::QueueUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "detail": self.to_string() });
        tracing::warn!(error = %self, %status, "request failed");
        (status, Json(body)).into_response()
    }
}
