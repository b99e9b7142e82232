//! Multi-source identifier extraction.
//!
//! spec.md §4.G: "All identifier-bearing request parameters must accept
//! the id from query, form, or multipart body (three sources, first
//! non-empty wins)." Grounded on the original's `get_task_id`/`get_uid`/
//! `get_task_name` FastAPI dependencies (`examples/original_source/Server/utils.py`),
//! which do the same three-way fallback. Never fails the request: an
//! unparsable or absent body just means that source contributed nothing,
//! matching spec.md's "missing id/uid returns UNKNOWN, not an error".

use std::collections::HashMap;

use axum::async_trait;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use std::convert::Infallible;

#[derive(Debug, Default, Clone)]
pub struct ThreeSourceIds {
    pub task_id: Option<String>,
    pub uid: Option<String>,
    pub task_name: Option<String>,
}

impl ThreeSourceIds {
    fn fill_from(&mut self, values: &HashMap<String, String>) {
        if self.task_id.is_none() {
            self.task_id = non_empty(values.get("task_id"));
        }
        if self.uid.is_none() {
            self.uid = non_empty(values.get("uid"));
        }
        if self.task_name.is_none() {
            self.task_name = non_empty(values.get("task_name"));
        }
    }
}

fn non_empty(v: Option<&String>) -> Option<String> {
    v.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

fn query_map(uri: &axum::http::Uri) -> HashMap<String, String> {
    uri.query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default()
}

#[async_trait]
impl<S> FromRequest<S> for ThreeSourceIds
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut ids = ThreeSourceIds::default();
        ids.fill_from(&query_map(req.uri()));

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        if content_type.starts_with("application/x-www-form-urlencoded") {
            if let Ok(bytes) = axum::body::to_bytes(req.into_body(), usize::MAX).await {
                if let Ok(form) = serde_urlencoded::from_bytes::<HashMap<String, String>>(&bytes) {
                    ids.fill_from(&form);
                }
            }
        } else if content_type.starts_with("multipart/form-data") {
            if let Ok(mut multipart) = Multipart::from_request(req, state).await {
                let mut values = HashMap::new();
                while let Ok(Some(field)) = multipart.next_field().await {
                    let Some(name) = field.name().map(|n| n.to_owned()) else {
                        continue;
                    };
                    if matches!(name.as_str(), "task_id" | "uid" | "task_name") {
                        if let Ok(text) = field.text().await {
                            values.insert(name, text);
                        }
                    }
                }
                ids.fill_from(&values);
            }
        }

        Ok(ids)
    }
}
