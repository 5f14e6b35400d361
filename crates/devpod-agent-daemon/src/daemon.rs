//! Top-level daemon supervisor.
//!
//! The SSH listener, the activity-file watcher, and the credential relay
//! (`devpod-agent-creds`, wired in by `devpod-agent-cli` since this crate
//! has no dependency on it) run as sibling tasks under one
//! `tokio::task::JoinSet`. The first task to finish — success, error, or
//! panic — triggers cancellation of the rest, so the daemon never ends up
//! silently half-alive with one supervised task gone.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::pid_file::{PidFile, PidFileError};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    #[error("a supervised task panicked: {0}")]
    TaskPanicked(String),
    #[error("supervised task failed: {0}")]
    TaskFailed(String),
}

/// A supervised unit of daemon work: the SSH listener, the inactivity
/// monitor, or the credential relay. Each must itself honor `cancel`.
pub type DaemonTask = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Writes the PID marker, runs every task in `tasks` concurrently under a
/// `JoinSet`, and tears everything down (cancel, join, remove the marker)
/// as soon as the first task completes for any reason.
pub async fn run(
    pid_path: PathBuf,
    tasks: Vec<DaemonTask>,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let pid_file = PidFile::new(&pid_path);
    pid_file.write().await?;

    let mut join_set: JoinSet<Result<(), String>> = JoinSet::new();
    for task in tasks {
        join_set.spawn(task);
    }

    let outcome = tokio::select! {
        finished = join_set.join_next() => finished,
        _ = cancel.cancelled() => None,
    };

    cancel.cancel();
    join_set.shutdown().await;
    pid_file.remove().await?;

    match outcome {
        None => Ok(()),
        Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(message))) => Err(DaemonError::TaskFailed(message)),
        Some(Err(join_error)) => Err(DaemonError::TaskPanicked(join_error.to_string())),
    }
}
