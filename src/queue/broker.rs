//! Job Queue (spec.md §4.C): a FIFO broker with per-channel ready lists,
//! visibility-timeout leases, and late acknowledgement.
//!
//! Grounded on the teacher's `types::tube::{Server, TubeState}` — a
//! `BTreeMap`/`VecDeque`-backed ready list guarded behind a single mutex,
//! with reservation modeled as removing an entry from the ready list and
//! recording a deadline, same shape as the teacher's `take_ready`/`put_ready`.
//! Unlike the teacher this is reached through `async fn`s over a
//! `tokio::sync::Mutex` rather than a synchronous wire protocol, since the
//! queue lives in-process between the HTTP layer and the worker pool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::config::Channel;
use crate::ids::JobId;

use super::job::{JobEnvelope, JobRecord, JobState};

struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    ready: HashMap<Channel, VecDeque<JobId>>,
}

impl Inner {
    fn ready_queue(&mut self, channel: Channel) -> &mut VecDeque<JobId> {
        self.ready.entry(channel).or_default()
    }
}

/// The in-process job broker. Cheap to clone — everything lives behind an
/// `Arc`, matching the teacher's singleton-server pattern (spec.md §9,
/// "Global state").
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

pub struct QueuePosition {
    pub job_id: JobId,
    /// 1-based position within its channel.
    pub position: usize,
    pub depth: usize,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                jobs: HashMap::new(),
                ready: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueues a new job envelope, returning the id assigned to it.
    /// FIFO within a channel; globally unique job ids (spec.md invariant 2).
    pub async fn enqueue(&self, envelope: JobEnvelope) -> JobId {
        let job_id = JobId::new();
        let channel = envelope.channel;
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(
            job_id,
            JobRecord {
                job_id,
                envelope,
                state: JobState::Queued,
                revoked: false,
                lease_deadline: None,
            },
        );
        inner.ready_queue(channel).push_back(job_id);
        drop(inner);
        self.notify.notify_waiters();
        job_id
    }

    /// Leases the head-of-line job from the first channel (in the order
    /// given) that has one ready, skipping — and permanently discarding —
    /// any job that was revoked while still queued (spec.md §4.E step 6).
    /// Blocks until a job is available or `timeout` elapses.
    pub async fn lease(
        &self,
        channels: &[Channel],
        worker: &str,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Option<(JobId, JobEnvelope)> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(leased) = self.try_lease(channels, worker, visibility_timeout).await {
                return Some(leased);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => {},
                _ = tokio::time::sleep(remaining) => return None,
            }
        }
    }

    async fn try_lease(
        &self,
        channels: &[Channel],
        worker: &str,
        visibility_timeout: Duration,
    ) -> Option<(JobId, JobEnvelope)> {
        let mut inner = self.inner.lock().await;
        for &channel in channels {
            loop {
                let Some(job_id) = inner.ready_queue(channel).pop_front() else {
                    break;
                };
                let Some(record) = inner.jobs.get_mut(&job_id) else {
                    continue;
                };
                if record.revoked {
                    // Discarded without executing — the cancel already
                    // recorded a terminal REVOKED outcome.
                    inner.jobs.remove(&job_id);
                    continue;
                }
                record.state = JobState::Leased {
                    worker: worker.to_owned(),
                };
                record.lease_deadline = Some(Instant::now() + visibility_timeout);
                let envelope = record.envelope.clone();
                return Some((job_id, envelope));
            }
        }
        None
    }

    /// Permanently removes a job after its outcome has been published
    /// (late acknowledgement — spec.md §4.C).
    pub async fn ack(&self, job_id: JobId) {
        let mut inner = self.inner.lock().await;
        inner.jobs.remove(&job_id);
    }

    /// Returns a leased job to its channel's ready queue for redelivery —
    /// used on worker crash, host loss, or visibility timeout expiry.
    pub async fn nack(&self, job_id: JobId) {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.jobs.get_mut(&job_id) else {
            return;
        };
        if record.revoked {
            inner.jobs.remove(&job_id);
            return;
        }
        record.state = JobState::Queued;
        record.lease_deadline = None;
        let channel = record.envelope.channel;
        inner.ready_queue(channel).push_back(job_id);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Marks a job as revoked. A worker currently executing it should abort
    /// without acking; a worker that later leases it discards it
    /// (spec.md §4.C revoke, §4.E step 6). Returns whether the job was
    /// known to the broker at all.
    pub async fn revoke(&self, job_id: JobId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&job_id) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    pub async fn is_revoked(&self, job_id: JobId) -> bool {
        let inner = self.inner.lock().await;
        inner.jobs.get(&job_id).map(|r| r.revoked).unwrap_or(false)
    }

    /// True while the job envelope is still sitting in its channel's ready
    /// list (spec.md §4.F step 1, queue inspection).
    pub async fn position(&self, channel: Channel, job_id: JobId) -> Option<QueuePosition> {
        let inner = self.inner.lock().await;
        let queue = inner.ready.get(&channel)?;
        let depth = queue.len();
        queue
            .iter()
            .position(|id| *id == job_id)
            .map(|idx| QueuePosition {
                job_id,
                position: idx + 1,
                depth,
            })
    }

    /// Best-effort listing of everything the broker currently knows about,
    /// queued or leased — used by `/list_current_tasks` and diagnostics
    /// (spec.md §4.C `inspect`).
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        let inner = self.inner.lock().await;
        inner.jobs.values().cloned().collect()
    }

    pub async fn record(&self, job_id: JobId) -> Option<JobRecord> {
        let inner = self.inner.lock().await;
        inner.jobs.get(&job_id).cloned()
    }

    /// Background task: redispatches leases whose visibility timeout has
    /// elapsed. Spawn once at start-up alongside the worker pool.
    pub async fn run_reaper(self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let expired: Vec<JobId> = {
                let inner = self.inner.lock().await;
                let now = Instant::now();
                inner
                    .jobs
                    .values()
                    .filter(|r| matches!(r.state, JobState::Leased { .. }))
                    .filter(|r| r.lease_deadline.map(|d| d <= now).unwrap_or(false))
                    .map(|r| r.job_id)
                    .collect()
            };
            for job_id in expired {
                tracing::warn!(job_id = %job_id, "lease visibility timeout elapsed, redispatching");
                self.nack(job_id).await;
            }
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Uid;

    fn envelope(channel: Channel) -> JobEnvelope {
        JobEnvelope {
            uid: Uid::new(),
            use_case: "example".into(),
            channel,
        }
    }

    #[tokio::test]
    async fn fifo_within_a_channel() {
        let broker = Broker::new();
        let first = broker.enqueue(envelope(Channel::UseCases)).await;
        let second = broker.enqueue(envelope(Channel::UseCases)).await;

        let (leased, _) = broker
            .lease(&[Channel::UseCases], "w1", Duration::from_secs(60), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(leased, first);

        let (leased, _) = broker
            .lease(&[Channel::UseCases], "w1", Duration::from_secs(60), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(leased, second);
    }

    #[tokio::test]
    async fn lease_times_out_when_empty() {
        let broker = Broker::new();
        let leased = broker
            .lease(&[Channel::UseCases], "w1", Duration::from_secs(60), Duration::from_millis(20))
            .await;
        assert!(leased.is_none());
    }

    #[tokio::test]
    async fn nack_redispatches_to_the_back() {
        let broker = Broker::new();
        let first = broker.enqueue(envelope(Channel::UseCases)).await;
        let second = broker.enqueue(envelope(Channel::UseCases)).await;

        let (leased, _) = broker
            .lease(&[Channel::UseCases], "w1", Duration::from_secs(60), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(leased, first);
        broker.nack(first).await;

        let (leased, _) = broker
            .lease(&[Channel::UseCases], "w1", Duration::from_secs(60), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(leased, second);

        let (leased, _) = broker
            .lease(&[Channel::UseCases], "w1", Duration::from_secs(60), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(leased, first);
    }

    #[tokio::test]
    async fn revoke_while_queued_is_discarded_without_execution() {
        let broker = Broker::new();
        let job_id = broker.enqueue(envelope(Channel::UseCases)).await;
        assert!(broker.revoke(job_id).await);

        let leased = broker
            .lease(&[Channel::UseCases], "w1", Duration::from_secs(60), Duration::from_millis(10))
            .await;
        assert!(leased.is_none());
        assert!(broker.record(job_id).await.is_none());
    }

    #[tokio::test]
    async fn revoke_while_leased_does_not_ack() {
        let broker = Broker::new();
        let job_id = broker.enqueue(envelope(Channel::UseCases)).await;
        let (leased, _) = broker
            .lease(&[Channel::UseCases], "w1", Duration::from_secs(60), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(leased, job_id);

        assert!(broker.revoke(job_id).await);
        assert!(broker.is_revoked(job_id).await);
        // Still present (not acked) until the worker reacts.
        assert!(broker.record(job_id).await.is_some());
    }

    #[tokio::test]
    async fn reaper_redispatches_expired_leases() {
        let broker = Broker::new();
        let job_id = broker.enqueue(envelope(Channel::UseCases)).await;
        broker
            .lease(&[Channel::UseCases], "w1", Duration::from_millis(1), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let reaper = broker.clone();
        let handle = tokio::spawn(reaper.run_reaper(Duration::from_millis(5)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();

        let position = broker.position(Channel::UseCases, job_id).await;
        assert!(position.is_some(), "job should be back in the ready queue");
    }
}
