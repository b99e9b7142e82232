//! Job Lifecycle Engine (spec.md §4.F) — the heart of the system.
//!
//! Computes a single canonical status from three potentially contradictory
//! sources (the queue, the result store, and the backup area) in a fixed
//! order, so that a job re-queued after worker loss is never reported as
//! terminal from a stale result-store entry, and a result that has
//! expired from the result store is still served from the durable backup
//! copy (spec.md §9, "Three-source truth reconciliation").

use std::time::Duration;

use serde::Serialize;

use crate::config::{Encoding, Registry, ResponseShape, UseCaseSpec};
use crate::error::BrokerError;
use crate::ids::{JobId, Uid};
use crate::objectstore::ObjectStore;
use crate::queue::{Broker, JobState};
use crate::resultstore::{Outcome, ResultStore, TerminalStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Queued,
    Started,
    Success,
    Failure,
    Revoked,
    Completed,
    Unknown,
}

impl StatusKind {
    /// Terminal states refuse cancellation (spec.md §4.F) and, once
    /// observed, are never un-observed again (spec.md §8 property 4).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusKind::Success
                | StatusKind::Failure
                | StatusKind::Revoked
                | StatusKind::Completed
                | StatusKind::Unknown
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(rename = "task_id")]
    pub job_id: JobId,
    pub uid: Uid,
    pub status: StatusKind,
    pub worker: Option<String>,
    pub details: String,
    #[serde(skip)]
    pub stderr: String,
    #[serde(rename = "output_file_path", skip_serializing_if = "Option::is_none")]
    pub output_file_paths: Option<Vec<String>>,
}

pub enum Delivery {
    /// A non-terminal-to-the-client, or non-deliverable, state — returned
    /// as an HTTP 200 status body, never as an error (spec.md §4.F,
    /// "this is a polling API, not an error channel").
    Status(StatusReport),
    Stream {
        data: Vec<u8>,
        filename: String,
        report: StatusReport,
    },
    Json(serde_json::Value),
}

pub struct LifecycleEngine {
    broker: Broker,
    result_store: ResultStore,
    object_store: ObjectStore,
    registry: std::sync::Arc<Registry>,
    cancel_grace: Duration,
}

impl LifecycleEngine {
    pub fn new(
        broker: Broker,
        result_store: ResultStore,
        object_store: ObjectStore,
        registry: std::sync::Arc<Registry>,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            broker,
            result_store,
            object_store,
            registry,
            cancel_grace,
        }
    }

    /// spec.md §4.F: queue inspection, then result store, then worker
    /// inspection, then backup area, then UNKNOWN.
    pub async fn compute_status(&self, job_id: JobId, uid: Uid) -> StatusReport {
        let record = self.broker.record(job_id).await;

        // 1. Queue inspection: a revoked-but-still-queued job must not be
        // reported QUEUED — it is being discarded, not delivered.
        if let Some(r) = &record {
            if r.state == JobState::Queued && !r.revoked {
                let position = self.broker.position(r.envelope.channel, job_id).await;
                let (details, paths) = match &position {
                    Some(p) => (
                        format!(
                            "job is queued, position {} of {} in channel",
                            p.position, p.depth
                        ),
                        None,
                    ),
                    None => ("job is queued".to_owned(), None),
                };
                return StatusReport {
                    job_id,
                    uid,
                    status: StatusKind::Queued,
                    worker: None,
                    details,
                    stderr: String::new(),
                    output_file_paths: paths,
                };
            }
        }

        // 2. Result Store: terminal status wins whenever present.
        if let Some(outcome) = self.result_store.get(job_id).await {
            return status_from_outcome(job_id, uid, outcome);
        }

        // 3. Worker inspection: an active lease, not yet acked.
        if let Some(r) = &record {
            if let JobState::Leased { worker } = &r.state {
                return StatusReport {
                    job_id,
                    uid,
                    status: StatusKind::Started,
                    worker: Some(worker.clone()),
                    details: "job is still in progress".to_owned(),
                    stderr: String::new(),
                    output_file_paths: None,
                };
            }
        }

        // 4. Backup area: a durable record of a past success.
        let backups = self
            .object_store
            .find_backups(&uid.to_string(), &job_id.to_string());
        if !backups.is_empty() {
            let paths: Vec<String> = backups
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            return StatusReport {
                job_id,
                uid,
                status: StatusKind::Completed,
                worker: None,
                details: "job completed; result served from durable backup".to_owned(),
                stderr: String::new(),
                output_file_paths: Some(paths),
            };
        }

        // 5. Nothing anywhere knows about this job.
        StatusReport {
            job_id,
            uid,
            status: StatusKind::Unknown,
            worker: None,
            details: "job may not exist, or its record has expired".to_owned(),
            stderr: String::new(),
            output_file_paths: None,
        }
    }

    /// spec.md §4.F cancellation: refuse on any already-terminal status,
    /// otherwise revoke and report the post-grace status.
    pub async fn cancel(&self, job_id: JobId, uid: Uid) -> StatusReport {
        let current = self.compute_status(job_id, uid).await;
        if current.status.is_terminal() {
            return StatusReport {
                details: format!(
                    "cannot cancel: job already {:?} ({})",
                    current.status, current.details
                ),
                ..current
            };
        }

        let revoked = self.broker.revoke(job_id).await;
        if revoked {
            // spec.md §9 Open Question (b): a job revoked while queued must
            // still produce a terminal backend record.
            self.result_store
                .put(
                    job_id,
                    Outcome {
                        status: TerminalStatus::Revoked,
                        stdout: String::new(),
                        stderr: String::new(),
                        return_code: None,
                        duration: Duration::ZERO,
                        worker: current.worker.clone(),
                        error_detail: None,
                    },
                )
                .await;
        }

        tokio::time::sleep(self.cancel_grace).await;
        self.compute_status(job_id, uid).await
    }

    /// spec.md §4.F result retrieval.
    pub async fn get_result(
        &self,
        job_id: JobId,
        uid: Uid,
        use_case: &str,
    ) -> Result<Delivery, BrokerError> {
        let spec = self
            .registry
            .get(use_case)
            .ok_or_else(|| BrokerError::UnknownUseCase(use_case.to_owned()))?;

        let report = self.compute_status(job_id, uid).await;

        match report.status {
            StatusKind::Queued
            | StatusKind::Started
            | StatusKind::Revoked
            | StatusKind::Failure
            | StatusKind::Unknown => Ok(Delivery::Status(report)),
            StatusKind::Success => self.deliver(spec, uid, job_id, report, false).await,
            StatusKind::Completed => self.deliver(spec, uid, job_id, report, true).await,
        }
    }

    async fn deliver(
        &self,
        spec: &UseCaseSpec,
        uid: Uid,
        job_id: JobId,
        report: StatusReport,
        from_backup: bool,
    ) -> Result<Delivery, BrokerError> {
        let uid_str = uid.to_string();

        match spec.response_shape {
            ResponseShape::Stream => {
                let output = &spec.outputs[0];
                let live_filename = spec.output_filename(output, &uid_str);
                let backup_filename = format!("backup.{uid_str}.{job_id}.{live_filename}");

                let data = if from_backup {
                    self.object_store.read_backup(&backup_filename).await?
                } else {
                    let data = self.object_store.read_live(&live_filename).await?;
                    self.object_store
                        .promote_to_backup(&live_filename, &backup_filename)
                        .await?;
                    data
                };

                Ok(Delivery::Stream {
                    data,
                    filename: live_filename,
                    report,
                })
            }
            ResponseShape::Json => {
                let mut body = serde_json::json!({
                    "task_id": job_id.to_string(),
                    "uid": uid_str,
                    "status": report.status,
                    "worker": report.worker,
                    "stderr": report.stderr,
                });

                for output in &spec.outputs {
                    let live_filename = spec.output_filename(output, &uid_str);
                    let backup_filename = format!("backup.{uid_str}.{job_id}.{live_filename}");

                    let data = if from_backup {
                        self.object_store.read_backup(&backup_filename).await?
                    } else {
                        let data = self.object_store.read_live(&live_filename).await?;
                        self.object_store
                            .promote_to_backup(&live_filename, &backup_filename)
                            .await?;
                        data
                    };

                    let encoded = match output.encoding {
                        Encoding::Base64 => {
                            use base64::Engine;
                            base64::engine::general_purpose::STANDARD.encode(&data)
                        }
                        Encoding::Utf8 => String::from_utf8(data).map_err(|e| {
                            BrokerError::Internal(anyhow::anyhow!(
                                "output `{}` is not valid UTF-8: {e}",
                                output.key
                            ))
                        })?,
                    };

                    body[output.key.as_str()] = serde_json::Value::String(encoded);
                }

                Ok(Delivery::Json(body))
            }
        }
    }
}

fn status_from_outcome(job_id: JobId, uid: Uid, outcome: Outcome) -> StatusReport {
    let status = match outcome.status {
        TerminalStatus::Success => StatusKind::Success,
        TerminalStatus::Failure => StatusKind::Failure,
        TerminalStatus::Revoked => StatusKind::Revoked,
    };
    let details = match &outcome.error_detail {
        Some(detail) => detail.clone(),
        None => match status {
            StatusKind::Success => "task successfully completed".to_owned(),
            StatusKind::Failure => {
                if outcome.stderr.is_empty() {
                    "task failed".to_owned()
                } else {
                    outcome.stderr.clone()
                }
            }
            StatusKind::Revoked => "task was cancelled".to_owned(),
            _ => unreachable!(),
        },
    };

    StatusReport {
        job_id,
        uid,
        status,
        worker: outcome.worker,
        details,
        stderr: outcome.stderr,
        output_file_paths: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Channel;
    use crate::queue::JobEnvelope;

    fn registry_with_stream_example() -> std::sync::Arc<Registry> {
        let yaml = r#"
tasks:
  example:
    executable: example_bin
    response_shape: stream
    outputs:
      - filename_template: "{uid}.example.output.fheencrypted"
        key: output
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        std::fs::write(&path, yaml).unwrap();
        std::sync::Arc::new(Registry::load(&path).unwrap())
    }

    fn engine() -> (tempfile::TempDir, LifecycleEngine, Broker, ResultStore, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let object_store =
            ObjectStore::new(dir.path().join("live"), dir.path().join("backup")).unwrap();
        let broker = Broker::new();
        let result_store = ResultStore::new(Duration::from_secs(60));
        let registry = registry_with_stream_example();
        let engine = LifecycleEngine::new(
            broker.clone(),
            result_store.clone(),
            object_store.clone(),
            registry,
            Duration::from_millis(10),
        );
        (dir, engine, broker, result_store, object_store)
    }

    #[tokio::test]
    async fn unknown_job_is_unknown() {
        let (_dir, engine, _broker, _results, _store) = engine();
        let report = engine.compute_status(JobId::new(), Uid::new()).await;
        assert_eq!(report.status, StatusKind::Unknown);
    }

    #[tokio::test]
    async fn queued_job_reports_position() {
        let (_dir, engine, broker, _results, _store) = engine();
        let uid = Uid::new();
        let job_id = broker
            .enqueue(JobEnvelope {
                uid,
                use_case: "example".into(),
                channel: Channel::UseCases,
            })
            .await;

        let report = engine.compute_status(job_id, uid).await;
        assert_eq!(report.status, StatusKind::Queued);
    }

    #[tokio::test]
    async fn result_store_wins_over_stale_backup() {
        let (_dir, engine, _broker, results, _store) = engine();
        let job_id = JobId::new();
        let uid = Uid::new();
        results
            .put(
                job_id,
                Outcome {
                    status: TerminalStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    return_code: Some(0),
                    duration: Duration::ZERO,
                    worker: Some("worker-0-0".into()),
                    error_detail: None,
                },
            )
            .await;

        let report = engine.compute_status(job_id, uid).await;
        assert_eq!(report.status, StatusKind::Success);
    }

    #[tokio::test]
    async fn completed_after_result_store_expiry() {
        let (_dir, engine, _broker, results, store) = engine();
        let job_id = JobId::new();
        let uid = Uid::new();

        store
            .write_live(&format!("{uid}.example.output.fheencrypted"), b"payload")
            .await
            .unwrap();
        store
            .promote_to_backup(
                &format!("{uid}.example.output.fheencrypted"),
                &format!("backup.{uid}.{job_id}.{uid}.example.output.fheencrypted"),
            )
            .await
            .unwrap();

        results
            .put(
                job_id,
                Outcome {
                    status: TerminalStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    return_code: Some(0),
                    duration: Duration::ZERO,
                    worker: Some("worker-0-0".into()),
                    error_detail: None,
                },
            )
            .await;
        results.expire_now(job_id).await;

        let report = engine.compute_status(job_id, uid).await;
        assert_eq!(report.status, StatusKind::Completed);
    }

    #[tokio::test]
    async fn cancel_refuses_terminal_jobs() {
        let (_dir, engine, _broker, results, _store) = engine();
        let job_id = JobId::new();
        let uid = Uid::new();
        results
            .put(
                job_id,
                Outcome {
                    status: TerminalStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    return_code: Some(0),
                    duration: Duration::ZERO,
                    worker: None,
                    error_detail: None,
                },
            )
            .await;

        let report = engine.cancel(job_id, uid).await;
        assert_eq!(report.status, StatusKind::Success);
    }

    #[tokio::test]
    async fn cancel_revokes_queued_job() {
        let (_dir, engine, broker, _results, _store) = engine();
        let uid = Uid::new();
        let job_id = broker
            .enqueue(JobEnvelope {
                uid,
                use_case: "example".into(),
                channel: Channel::UseCases,
            })
            .await;

        let report = engine.cancel(job_id, uid).await;
        assert_eq!(report.status, StatusKind::Revoked);
    }
}
