//! Atomic JSON persistence for `WorkspaceInfo`, plus the gzip envelope used
//! to carry it over the inject channel (spec.md §4.9, SPEC_FULL §4.9
//! "Added by SPEC_FULL — compression").

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::WorkspaceInfo;

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("failed to gzip-compress workspace payload: {0}")]
    Encode(#[source] io::Error),
    #[error("failed to gunzip workspace payload: {0}")]
    Decode(#[source] io::Error),
    #[error("failed to serialize workspace payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Gzip-compresses the JSON encoding of `info`, for the inject channel's
/// encoded payload.
pub fn compress(info: &WorkspaceInfo) -> Result<Vec<u8>, CompressionError> {
    let json = serde_json::to_vec(info)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(CompressionError::Encode)?;
    encoder.finish().map_err(CompressionError::Encode)
}

/// Inverse of [`compress`]. Round-trips to an equal value (spec.md §8:
/// "`WorkspaceInfo` compress→decompress is the identity").
pub fn decompress(payload: &[u8]) -> Result<WorkspaceInfo, CompressionError> {
    let mut decoder = GzDecoder::new(payload);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(CompressionError::Decode)?;
    Ok(serde_json::from_slice(&json)?)
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read workspace record at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse workspace record at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write workspace record at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to delete and recreate workspace directory {path}: {source}")]
    Recreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reconciles and persists `WorkspaceInfo` records under a root data
/// directory, per spec.md §4.9.
pub struct WorkspaceStore {
    data_path: PathBuf,
}

impl WorkspaceStore {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
        }
    }

    fn workspace_dir(&self, context: &str, id: &str) -> PathBuf {
        WorkspaceInfo::workspace_dir(&self.data_path, context, id)
    }

    fn record_path(&self, context: &str, id: &str) -> PathBuf {
        self.workspace_dir(context, id).join("workspace.json")
    }

    /// Loads the existing record for `(context, id)`, if any.
    pub async fn load(&self, context: &str, id: &str) -> Result<Option<WorkspaceInfo>, StateError> {
        let path = self.record_path(context, id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let info = serde_json::from_slice(&bytes).map_err(|source| StateError::Parse {
                    path: path.clone(),
                    source,
                })?;
                Ok(Some(info))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StateError::Read { path, source }),
        }
    }

    /// Reconciles an incoming record against whatever is on disk and
    /// persists the result, implementing spec.md §4.9 steps (b)–(f).
    ///
    /// `delete_workspace` is invoked with the stale workspace directory
    /// when the existing record's `uid` differs from `incoming.uid`; the
    /// caller is responsible for actually removing workspace content (this
    /// store only recreates the directory afterward).
    pub async fn reconcile<F, Fut>(
        &self,
        mut incoming: WorkspaceInfo,
        delete_workspace: F,
    ) -> Result<WorkspaceInfo, StateError>
    where
        F: FnOnce(&Path) -> Fut,
        Fut: std::future::Future<Output = io::Result<()>>,
    {
        let dir = self.workspace_dir(&incoming.context, &incoming.id);
        incoming.origin = dir.clone();

        if let Some(existing) = self.load(&incoming.context, &incoming.id).await? {
            if existing.uid != incoming.uid {
                delete_workspace(&dir)
                    .await
                    .map_err(|source| StateError::Recreate {
                        path: dir.clone(),
                        source,
                    })?;
                fs::create_dir_all(&dir)
                    .await
                    .map_err(|source| StateError::Recreate {
                        path: dir.clone(),
                        source,
                    })?;
            }
        } else {
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| StateError::Write {
                    path: dir.clone(),
                    source,
                })?;
        }

        incoming.reconcile_content_folder();
        incoming.last_injected_at = Some(std::time::SystemTime::now());
        self.write(&incoming).await?;

        let mut returned = incoming;
        returned.strip_cli_options();
        Ok(returned)
    }

    /// Writes `info` atomically (temp file in the same directory, then
    /// rename), with CLI options stripped first so secrets never persist.
    async fn write(&self, info: &WorkspaceInfo) -> Result<(), StateError> {
        let mut to_persist = info.clone();
        to_persist.strip_cli_options();
        let json = serde_json::to_vec_pretty(&to_persist).map_err(|source| StateError::Write {
            path: self.record_path(&info.context, &info.id),
            source: io::Error::other(source),
        })?;

        let dir = self.workspace_dir(&info.context, &info.id);
        let final_path = dir.join("workspace.json");
        let temp_path = dir.join(format!("workspace-{}.json.tmp", std::process::id()));

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|source| StateError::Write {
                path: temp_path.clone(),
                source,
            })?;
        file.write_all(&json)
            .await
            .map_err(|source| StateError::Write {
                path: temp_path.clone(),
                source,
            })?;
        file.sync_all()
            .await
            .map_err(|source| StateError::Write {
                path: temp_path.clone(),
                source,
            })?;
        drop(file);
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|source| StateError::Write {
                path: final_path,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentOptions, CliOptions, RuntimeOptions, WorkspaceSource};

    fn sample(context: &str, id: &str, uid: &str) -> WorkspaceInfo {
        WorkspaceInfo {
            id: id.to_string(),
            uid: uid.to_string(),
            context: context.to_string(),
            source: WorkspaceSource::GitRepo {
                url: "https://example.com/repo.git".into(),
                reference: None,
            },
            agent: AgentOptions::default(),
            runtime: RuntimeOptions::default(),
            cli_options: Some(CliOptions {
                access_key: Some("shh".into()),
                extra_env: Vec::new(),
            }),
            origin: PathBuf::new(),
            content_folder: PathBuf::new(),
            last_injected_at: None,
        }
    }

    #[test]
    fn compress_decompress_round_trip_is_identity() {
        let mut info = sample("default", "ws1", "uid-a");
        info.origin = PathBuf::from("/data/default/ws1");
        info.content_folder = PathBuf::from("/data/default/ws1/content");
        info.cli_options = None;

        let compressed = compress(&info).unwrap();
        let decoded = decompress(&compressed).unwrap();
        assert_eq!(decoded, info);
    }

    #[tokio::test]
    async fn first_injection_creates_record_with_cli_options_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());
        let incoming = sample("default", "ws1", "uid-a");

        let result = store
            .reconcile(incoming, |_| async { Ok(()) })
            .await
            .unwrap();

        assert!(result.cli_options.is_none());
        assert_eq!(result.origin, dir.path().join("default").join("ws1"));

        let on_disk = store.load("default", "ws1").await.unwrap().unwrap();
        assert!(on_disk.cli_options.is_none());
    }

    #[tokio::test]
    async fn uid_mismatch_triggers_delete_and_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());

        store
            .reconcile(sample("default", "ws1", "uid-a"), |_| async { Ok(()) })
            .await
            .unwrap();

        let deleted = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let deleted_clone = deleted.clone();
        store
            .reconcile(sample("default", "ws1", "uid-b"), move |_path| {
                deleted_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert!(deleted.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn matching_uid_does_not_invoke_delete_hook() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());

        store
            .reconcile(sample("default", "ws1", "uid-a"), |_| async { Ok(()) })
            .await
            .unwrap();

        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked_clone = invoked.clone();
        store
            .reconcile(sample("default", "ws1", "uid-a"), move |_path| {
                invoked_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn local_folder_source_tracks_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());
        let mut incoming = sample("default", "ws1", "uid-a");
        incoming.source = WorkspaceSource::LocalFolder {
            path: PathBuf::from("/home/user/project"),
        };

        let result = store
            .reconcile(incoming, |_| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(result.content_folder, PathBuf::from("/home/user/project"));
    }
}
