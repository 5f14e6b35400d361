//! The daemon PID marker file at `/tmp/devpod-daemon.pid`, read by an
//! external health probe and by [`crate::health::check`].

use std::path::{Path, PathBuf};

use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("failed to write pid file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove pid file at {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub const DEFAULT_PID_PATH: &str = "/tmp/devpod-daemon.pid";

/// A PID-bearing marker file. Writing it is the daemon's way of announcing
/// it's alive; removing it is the only action on shutdown — there is no
/// richer liveness IPC, just file presence.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes the current process id to [`Self::path`].
    pub async fn write(&self) -> Result<(), PidFileError> {
        let pid = std::process::id();
        fs::write(&self.path, pid.to_string())
            .await
            .map_err(|source| PidFileError::Write {
                path: self.path.clone(),
                source,
            })
    }

    pub async fn remove(&self) -> Result<(), PidFileError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PidFileError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Reports liveness from file presence alone: no IPC round-trip to the
/// daemon, just a stat.
pub fn is_alive(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_health_reports_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devpod-daemon.pid");
        let pid_file = PidFile::new(&path);

        assert!(!is_alive(&path));
        pid_file.write().await.unwrap();
        assert!(is_alive(&path));

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.parse::<u32>().unwrap(), std::process::id());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devpod-daemon.pid");
        let pid_file = PidFile::new(&path);

        pid_file.remove().await.unwrap();
        pid_file.write().await.unwrap();
        pid_file.remove().await.unwrap();
        pid_file.remove().await.unwrap();
        assert!(!is_alive(&path));
    }
}
