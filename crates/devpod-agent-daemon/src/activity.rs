//! Activity and busy-file markers.
//!
//! Two distinct zero-byte markers exist: `/tmp/devpod.activity` is the
//! daemon's own heartbeat — touched whenever the remote observes IDE
//! activity (an SSH session opening, an RPC arriving) — and is what the
//! inactivity monitor reads to decide whether the grace period has
//! elapsed. `<workspace>/workspace.lock` is the per-workspace busy marker:
//! present while a bootstrap is in flight, so a concurrent shutdown never
//! interrupts it.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error("failed to touch activity file at {path}: {source}")]
    Touch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to stat activity file at {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub const DEFAULT_ACTIVITY_PATH: &str = "/tmp/devpod.activity";

/// The daemon's own heartbeat marker, consulted by the inactivity monitor.
#[derive(Clone)]
pub struct ActivityFile {
    path: PathBuf,
}

impl ActivityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Updates the marker's mtime to now, recording observed activity.
    pub async fn touch(&self) -> Result<(), ActivityError> {
        fs::write(&self.path, []).await.map_err(|source| ActivityError::Touch {
            path: self.path.clone(),
            source,
        })
    }

    /// Time since the marker was last touched, or `None` if it has never
    /// been created.
    pub async fn idle_for(&self) -> Result<Option<std::time::Duration>, ActivityError> {
        match fs::metadata(&self.path).await {
            Ok(meta) => {
                let modified = meta.modified().map_err(|source| ActivityError::Stat {
                    path: self.path.clone(),
                    source,
                })?;
                Ok(Some(
                    SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or_default(),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ActivityError::Stat {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// A zero-byte marker whose presence means "workspace busy; do not
/// auto-shutdown". Created at the start of a non-platform bootstrap,
/// removed on completion (including on failure, via the `Drop` guard
/// returned by [`BusyFile::acquire`]).
pub struct BusyFile {
    path: PathBuf,
}

impl BusyFile {
    pub fn new(workspace_dir: impl AsRef<Path>) -> Self {
        Self {
            path: workspace_dir.as_ref().join("workspace.lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_busy(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Creates the marker and returns a guard that removes it on drop (best
    /// effort — `Drop` cannot be async, so the removal is spawned).
    pub async fn acquire(self) -> Result<BusyGuard, ActivityError> {
        fs::write(&self.path, []).await.map_err(|source| ActivityError::Touch {
            path: self.path.clone(),
            source,
        })?;
        Ok(BusyGuard { path: self.path })
    }
}

pub struct BusyGuard {
    path: PathBuf,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let path = self.path.clone();
        tokio::spawn(async move {
            let _ = fs::remove_file(&path).await;
        });
    }
}
