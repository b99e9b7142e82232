//! Job envelope and state, generalized from the teacher's
//! `types::{job, states}` (Ready/Delayed/Reserved/Buried) down to the two
//! states this broker actually needs: a job here is never delayed and
//! never buried for manual intervention, only queued or leased.

use tokio::time::Instant;

use crate::config::Channel;
use crate::ids::{JobId, Uid};

#[derive(Debug, Clone)]
pub struct JobEnvelope {
    pub uid: Uid,
    pub use_case: String,
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Leased { worker: String },
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub envelope: JobEnvelope,
    pub state: JobState,
    pub revoked: bool,
    pub lease_deadline: Option<Instant>,
}
