#![forbid(unsafe_code)]
//! The per-workspace state record and its atomic on-disk persistence
//! (spec.md §3 `WorkspaceInfo`, §4.9 "Workspace state store").
//!
//! This crate owns no network or process knowledge: it is handed an
//! already-decoded payload by the caller (the inject driver, in this repo's
//! case the remote side of `devpod-agent-daemon`) and is responsible only
//! for reconciling it against whatever `workspace.json` already exists on
//! disk.

mod source;
mod store;

pub use source::WorkspaceSource;
pub use store::{compress, decompress, CompressionError, StateError, WorkspaceStore};

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Agent-side knobs carried alongside a workspace, as distinct from the
/// identity/source fields that define the workspace itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentOptions {
    pub driver: String,
    pub docker_path: Option<String>,
    pub docker_env: Vec<(String, String)>,
    pub inject_git_credentials: bool,
    pub inject_docker_credentials: bool,
    pub shutdown_hook_command: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            driver: "docker".to_string(),
            docker_path: None,
            docker_env: Vec::new(),
            inject_git_credentials: false,
            inject_docker_credentials: false,
            shutdown_hook_command: None,
        }
    }
}

/// Runtime knobs: platform-mode flag, daemon interval, recreate/reset
/// switches. Distinct from `AgentOptions` because these are reconsidered on
/// every injection rather than fixed at workspace creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RuntimeOptions {
    pub platform_mode: bool,
    pub disable_daemon: bool,
    pub daemon_interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub recreate: bool,
    pub reset: bool,
}

/// CLI-only one-shot flags; present on the incoming payload but never
/// persisted (spec.md §4.9 step (e): "writes the record with CLI options
/// stripped so secrets and one-shot flags never persist").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CliOptions {
    pub access_key: Option<String>,
    pub extra_env: Vec<(String, String)>,
}

/// The authoritative per-workspace record, keyed by `(context, workspace_id)`.
///
/// `last_injected_at` is a SPEC_FULL addition: wall-clock of the most
/// recent successful reconciliation, used only by `devpod agent workspace
/// status` diagnostics, never consulted by an invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub id: String,
    pub uid: String,
    pub context: String,
    pub source: WorkspaceSource,
    pub agent: AgentOptions,
    pub runtime: RuntimeOptions,
    pub cli_options: Option<CliOptions>,
    /// Workspace directory on the remote: `<data_path>/<context>/<id>`.
    pub origin: PathBuf,
    /// Source tree location: the local folder path when `source` is
    /// `LocalFolder` and platform mode is disabled, else
    /// `<origin>/content`.
    pub content_folder: PathBuf,
    #[serde(with = "option_systemtime_secs")]
    pub last_injected_at: Option<SystemTime>,
}

impl WorkspaceInfo {
    /// Derives the deterministic workspace directory from `(data_path,
    /// context, id)`, per spec.md §4.9 step (b).
    pub fn workspace_dir(data_path: &std::path::Path, context: &str, id: &str) -> PathBuf {
        data_path.join(context).join(id)
    }

    /// Reconciles `content_folder` per spec.md §4.9 step (d): a
    /// `LocalFolder` source with platform mode disabled tracks the local
    /// path; every other combination defaults to `<origin>/content`.
    pub fn reconcile_content_folder(&mut self) {
        self.content_folder = match (&self.source, self.runtime.platform_mode) {
            (WorkspaceSource::LocalFolder { path }, false) => path.clone(),
            _ => self.origin.join("content"),
        };
    }

    /// Strips the fields spec.md §4.9 forbids from ever reaching disk.
    pub fn strip_cli_options(&mut self) {
        self.cli_options = None;
    }
}

mod option_systemtime_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(
        value: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let secs = value.map(|t| {
            t.duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        });
        secs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SystemTime>, D::Error> {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(|s| UNIX_EPOCH + std::time::Duration::from_secs(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkspaceInfo {
        WorkspaceInfo {
            id: "ws1".into(),
            uid: "uid-a".into(),
            context: "default".into(),
            source: WorkspaceSource::GitRepo {
                url: "https://example.com/repo.git".into(),
                reference: Some("main".into()),
            },
            agent: AgentOptions::default(),
            runtime: RuntimeOptions::default(),
            cli_options: Some(CliOptions {
                access_key: Some("secret".into()),
                extra_env: vec![("FOO".into(), "bar".into())],
            }),
            origin: PathBuf::from("/data/default/ws1"),
            content_folder: PathBuf::from("/data/default/ws1/content"),
            last_injected_at: Some(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(100)),
        }
    }

    #[test]
    fn json_round_trip_is_identity() {
        let info = sample();
        let json = serde_json::to_string(&info).unwrap();
        let decoded: WorkspaceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn strip_cli_options_clears_secrets() {
        let mut info = sample();
        info.strip_cli_options();
        assert!(info.cli_options.is_none());
    }

    #[test]
    fn content_folder_tracks_local_folder_when_not_platform_mode() {
        let mut info = sample();
        info.source = WorkspaceSource::LocalFolder {
            path: PathBuf::from("/home/user/project"),
        };
        info.runtime.platform_mode = false;
        info.reconcile_content_folder();
        assert_eq!(info.content_folder, PathBuf::from("/home/user/project"));
    }

    #[test]
    fn content_folder_defaults_under_platform_mode() {
        let mut info = sample();
        info.source = WorkspaceSource::LocalFolder {
            path: PathBuf::from("/home/user/project"),
        };
        info.runtime.platform_mode = true;
        info.reconcile_content_folder();
        assert_eq!(info.content_folder, PathBuf::from("/data/default/ws1/content"));
    }

    #[test]
    fn workspace_dir_is_deterministic() {
        let dir = WorkspaceInfo::workspace_dir(std::path::Path::new("/data"), "default", "ws1");
        assert_eq!(dir, PathBuf::from("/data/default/ws1"));
    }
}
