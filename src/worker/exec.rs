//! Subprocess control for invoking a use-case executable.
//!
//! Spec.md §9: "Modelled as scoped acquisition of an OS process handle with
//! guaranteed release on all exit paths... stderr is always captured,
//! never discarded. Forceful termination for revocation uses a
//! platform-appropriate signal equivalent to SIGKILL." `kill_on_drop(true)`
//! plus an explicit `start_kill()` on the revoke path gives us exactly that:
//! however this function returns, the child is never left running.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::ids::JobId;
use crate::queue::Broker;

/// How often the revoke flag is polled while a use-case executable runs.
const REVOKE_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
    pub duration: Duration,
}

pub enum ExecOutcome {
    Finished(ExecResult),
    /// The subprocess was forcefully terminated because the job was
    /// revoked mid-execution (spec.md §4.E step 6).
    Revoked,
    SpawnError(String),
}

/// Runs `<executable> <uid>` with `cwd` as the working directory (so the
/// executable's well-known relative filenames resolve against the shared
/// object store), capturing stdout/stderr and watching `broker` for a
/// revoke signal on `job_id` for the whole lifetime of the child.
pub async fn run_use_case(
    executable: &Path,
    uid: &str,
    cwd: &Path,
    broker: &Broker,
    job_id: JobId,
) -> ExecOutcome {
    let start = Instant::now();

    let mut child = match Command::new(executable)
        .arg(uid)
        .current_dir(cwd)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return ExecOutcome::SpawnError(e.to_string()),
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    loop {
        tokio::select! {
            status = child.wait() => {
                let mut stdout = String::new();
                let mut stderr = String::new();
                if let Some(mut pipe) = stdout_pipe.take() {
                    let _ = pipe.read_to_string(&mut stdout).await;
                }
                if let Some(mut pipe) = stderr_pipe.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                return match status {
                    Ok(status) => ExecOutcome::Finished(ExecResult {
                        stdout,
                        stderr,
                        return_code: status.code().unwrap_or(-1),
                        duration: start.elapsed(),
                    }),
                    Err(e) => ExecOutcome::SpawnError(e.to_string()),
                };
            }
            _ = tokio::time::sleep(REVOKE_POLL_INTERVAL) => {
                if broker.is_revoked(job_id).await {
                    tracing::info!(job_id = %job_id, "revoke observed mid-execution, terminating subprocess");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return ExecOutcome::Revoked;
                }
            }
        }
    }
}
