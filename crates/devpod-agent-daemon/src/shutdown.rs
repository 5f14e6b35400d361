//! Inactivity monitoring: watches the activity file and invokes the
//! shutdown hook once the configured grace period has elapsed with no
//! observed activity and no busy workspace.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::activity::{ActivityFile, BusyFile};

/// The action taken once the daemon decides it should shut down. A real
/// deployment's hook tears down the devcontainer/VM (out of scope for this
/// crate); tests use a recording double.
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    async fn shutdown(&self);
}

/// A hook that runs an arbitrary shell command, matching
/// `WorkspaceInfo::agent.shutdown_hook_command` (devpod-agent-state).
pub struct CommandShutdownHook {
    pub command: String,
}

#[async_trait]
impl ShutdownHook for CommandShutdownHook {
    async fn shutdown(&self) {
        tracing::info!(command = %self.command, "invoking shutdown hook");
        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .status()
            .await
        {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::warn!(?status, "shutdown hook exited non-zero"),
            Err(error) => tracing::warn!(%error, "failed to run shutdown hook"),
        }
    }
}

/// Polling cadence for the inactivity monitor.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Runs until `cancel` fires, invoking `hook` at most once per daemon
/// lifetime once the activity file has been idle for `grace_period` and no
/// workspace busy-file marker is present.
pub async fn monitor(
    activity: ActivityFile,
    workspace_dir: PathBuf,
    grace_period: Duration,
    hook: std::sync::Arc<dyn ShutdownHook>,
    cancel: tokio_util::sync::CancellationToken,
) {
    let busy = BusyFile::new(&workspace_dir);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = cancel.cancelled() => return,
        }

        let idle_for = match activity.idle_for().await {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(%error, "failed to stat activity file, skipping this tick");
                continue;
            }
        };

        let Some(idle_for) = idle_for else {
            // Never touched yet: treat as freshly active, not idle.
            continue;
        };

        if idle_for < grace_period {
            continue;
        }

        if busy.is_busy().await {
            tracing::debug!("idle past grace period but workspace is busy, deferring shutdown");
            continue;
        }

        hook.shutdown().await;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHook(Arc<AtomicUsize>);

    #[async_trait]
    impl ShutdownHook for CountingHook {
        async fn shutdown(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shuts_down_once_idle_past_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let activity = ActivityFile::new(dir.path().join("devpod.activity"));
        activity.touch().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let hook = Arc::new(CountingHook(count.clone()));
        let cancel = tokio_util::sync::CancellationToken::new();

        let workspace_dir = dir.path().join("ws");
        tokio::fs::create_dir_all(&workspace_dir).await.unwrap();

        let handle = tokio::spawn(monitor(
            activity,
            workspace_dir,
            Duration::from_millis(1),
            hook,
            cancel.clone(),
        ));

        tokio::time::advance(POLL_INTERVAL * 2).await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_workspace_defers_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let activity = ActivityFile::new(dir.path().join("devpod.activity"));
        activity.touch().await.unwrap();

        let workspace_dir = dir.path().join("ws");
        tokio::fs::create_dir_all(&workspace_dir).await.unwrap();
        let _guard = BusyFile::new(&workspace_dir).acquire().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let hook = Arc::new(CountingHook(count.clone()));
        let cancel = tokio_util::sync::CancellationToken::new();

        let handle = tokio::spawn(monitor(
            activity,
            workspace_dir,
            Duration::from_millis(1),
            hook,
            cancel.clone(),
        ));

        tokio::time::advance(POLL_INTERVAL * 2).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
