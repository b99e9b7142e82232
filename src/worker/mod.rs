//! Worker Pool (spec.md §4.E): a fixed set of consumers that lease jobs,
//! invoke the use-case executable, and publish the outcome.
//!
//! `WORKER_COUNT` models distinct OS-process identities (what the rest of
//! the system sees reported as a "worker"); `WORKER_CONCURRENCY` is the
//! per-identity prefetch depth, i.e. how many jobs that identity runs
//! concurrently (spec.md §4.C, "Per-consumer prefetch... defaults to 1").
//! The real OS-process boundary spec.md §5 cares about is the *subprocess*
//! each lease spawns (see `exec::run_use_case`), not the Tokio task that
//! supervises it.

pub mod exec;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Channel, Config, Registry};
use crate::ids::JobId;
use crate::objectstore::ObjectStore;
use crate::queue::{Broker, JobEnvelope};
use crate::resultstore::{Outcome, ResultStore, TerminalStatus};

const LEASE_WAIT: Duration = Duration::from_secs(5);

/// All channels a worker watches, in priority order. Matches the original
/// two Celery queues (spec.md §9(c)): `usecases` jobs drain before `ads`
/// jobs whenever both are ready.
const WATCHED_CHANNELS: [Channel; 2] = [Channel::UseCases, Channel::Ads];

#[derive(Clone)]
pub struct WorkerPool {
    broker: Broker,
    registry: Arc<Registry>,
    object_store: ObjectStore,
    result_store: ResultStore,
    config: Arc<Config>,
}

impl WorkerPool {
    pub fn new(
        broker: Broker,
        registry: Arc<Registry>,
        object_store: ObjectStore,
        result_store: ResultStore,
        config: Arc<Config>,
    ) -> Self {
        Self {
            broker,
            registry,
            object_store,
            result_store,
            config,
        }
    }

    /// Spawns `worker_count * worker_concurrency` consumer tasks and
    /// returns their join handles.
    pub fn spawn(self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for worker_idx in 0..self.config.worker_count {
            for slot in 0..self.config.worker_concurrency {
                let worker_id = format!("worker-{worker_idx}-{slot}");
                let pool = self.clone();
                handles.push(tokio::spawn(pool.run_loop(worker_id)));
            }
        }
        handles
    }

    async fn run_loop(self, worker_id: String) {
        tracing::info!(worker = %worker_id, "worker started");
        loop {
            let leased = self
                .broker
                .lease(
                    &WATCHED_CHANNELS,
                    &worker_id,
                    self.config.lease_visibility_timeout,
                    LEASE_WAIT,
                )
                .await;

            let Some((job_id, envelope)) = leased else {
                continue;
            };

            self.execute(job_id, envelope, &worker_id).await;
        }
    }

    async fn execute(&self, job_id: JobId, envelope: JobEnvelope, worker_id: &str) {
        let uid = envelope.uid.to_string();
        let span = tracing::info_span!(
            "job",
            job_id = %job_id.log_prefix(),
            uid = %envelope.uid.log_prefix(),
            use_case = %envelope.use_case,
            worker = %worker_id,
        );
        let _enter = span.enter();

        let Some(spec) = self.registry.get(&envelope.use_case) else {
            tracing::error!("unknown use-case leased from queue, this should never happen");
            self.result_store
                .put(
                    job_id,
                    Outcome {
                        status: TerminalStatus::Failure,
                        stdout: String::new(),
                        stderr: String::new(),
                        return_code: None,
                        duration: Duration::ZERO,
                        worker: Some(worker_id.to_owned()),
                        error_detail: Some(format!("unknown use-case `{}`", envelope.use_case)),
                    },
                )
                .await;
            self.broker.ack(job_id).await;
            return;
        };

        let cwd = self.object_store.live_root().to_path_buf();
        let executable = cwd.join(&spec.executable);

        match exec::run_use_case(&executable, &uid, &cwd, &self.broker, job_id).await {
            exec::ExecOutcome::Finished(result) if result.return_code == 0 => {
                tracing::info!(duration = ?result.duration, "use-case completed successfully");
                self.result_store
                    .put(
                        job_id,
                        Outcome {
                            status: TerminalStatus::Success,
                            stdout: result.stdout,
                            stderr: result.stderr,
                            return_code: Some(0),
                            duration: result.duration,
                            worker: Some(worker_id.to_owned()),
                            error_detail: None,
                        },
                    )
                    .await;
                self.broker.ack(job_id).await;
            }
            exec::ExecOutcome::Finished(result) => {
                tracing::warn!(code = result.return_code, stderr = %result.stderr, "use-case exited non-zero");
                self.result_store
                    .put(
                        job_id,
                        Outcome {
                            status: TerminalStatus::Failure,
                            stdout: result.stdout,
                            stderr: result.stderr,
                            return_code: Some(result.return_code),
                            duration: result.duration,
                            worker: Some(worker_id.to_owned()),
                            error_detail: None,
                        },
                    )
                    .await;
                self.broker.ack(job_id).await;
            }
            exec::ExecOutcome::SpawnError(detail) => {
                tracing::error!(%detail, "failed to spawn use-case executable");
                self.result_store
                    .put(
                        job_id,
                        Outcome {
                            status: TerminalStatus::Failure,
                            stdout: String::new(),
                            stderr: String::new(),
                            return_code: None,
                            duration: Duration::ZERO,
                            worker: Some(worker_id.to_owned()),
                            error_detail: Some(detail),
                        },
                    )
                    .await;
                self.broker.ack(job_id).await;
            }
            exec::ExecOutcome::Revoked => {
                // Do not ack: the queue's nack-on-timeout path already
                // knows (via the revoked flag) to drop this job instead of
                // redispatching it. The REVOKED outcome itself was
                // recorded by the cancellation handler, not here.
                tracing::info!("execution aborted due to revoke");
            }
        }
    }
}
