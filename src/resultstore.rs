//! Result Store (spec.md §4.D): a TTL key/value store of terminal job
//! outcomes. Absence of an entry — whether it never existed or has expired
//! — must be treated as "no record", never as an error; the lifecycle
//! engine falls back to the backup area in that case.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::ids::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Success,
    Failure,
    Revoked,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: TerminalStatus,
    pub stdout: String,
    pub stderr: String,
    pub return_code: Option<i32>,
    pub duration: Duration,
    pub worker: Option<String>,
    pub error_detail: Option<String>,
}

struct Entry {
    outcome: Outcome,
    expires_at: Instant,
}

/// In-memory TTL store. A background sweep is unnecessary for correctness —
/// every read checks expiry lazily — but keeping `sweep` lets the map
/// shrink instead of growing without bound for a long-lived process.
#[derive(Clone)]
pub struct ResultStore {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<JobId, Entry>>>,
}

impl ResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn put(&self, job_id: JobId, outcome: Outcome) {
        let mut entries = self.entries.write().await;
        entries.insert(
            job_id,
            Entry {
                outcome,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Returns `None` both for "never recorded" and "TTL expired" — the
    /// store's contract (spec.md §4.D) forbids distinguishing the two.
    pub async fn get(&self, job_id: JobId) -> Option<Outcome> {
        let entries = self.entries.read().await;
        let entry = entries.get(&job_id)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.outcome.clone())
    }

    /// Used by tests (and by out-of-band housekeeping) to simulate TTL
    /// expiry without waiting out the real duration.
    pub async fn expire_now(&self, job_id: JobId) {
        let mut entries = self.entries.write().await;
        entries.remove(&job_id);
    }

    pub async fn sweep(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
    }

    /// Runs the periodic sweep forever; spawn as a background task.
    pub async fn run_sweeper(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outcome() -> Outcome {
        Outcome {
            status: TerminalStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
            return_code: Some(0),
            duration: Duration::from_secs(1),
            worker: Some("worker-1".into()),
            error_detail: None,
        }
    }

    #[tokio::test]
    async fn absence_and_expiry_both_read_as_none() {
        let store = ResultStore::new(Duration::from_secs(60));
        let job = JobId::new();
        assert!(store.get(job).await.is_none());

        store.put(job, sample_outcome()).await;
        assert!(store.get(job).await.is_some());

        store.expire_now(job).await;
        assert!(store.get(job).await.is_none());
    }
}
