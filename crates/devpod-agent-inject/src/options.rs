//! `InjectOptions` and `InjectionMetrics` (spec.md §3).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use devpod_agent_core::binary_source::SourceName;

use crate::exec::Exec;

/// Tri-state preference between streaming the binary over the inject
/// channel and having the remote pull it over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPreference {
    ForceDownload,
    PreferLocal,
    Auto,
}

impl DownloadPreference {
    /// Collapses the tri-state into the boolean [`devpod_agent_core::ScriptParams::prefer_download`]
    /// flag: `Auto` defers to the host's own default of preferring the
    /// stream-over-stdin path, matching spec.md's "prefer-download" naming
    /// (the flag only ever *prefers*, it never forbids the other path).
    pub fn prefer_download(self) -> bool {
        matches!(self, DownloadPreference::ForceDownload)
    }
}

/// A post-inject command plus the stdio triplet it should run with.
#[derive(Clone)]
pub struct FollowUpCommand {
    pub command: String,
}

/// The built-in download base URL. Per spec.md §3's invariant, a caller
/// that points `InjectOptions::base_url` somewhere else disables the
/// version check (there's no guarantee a non-default host serves matching
/// version metadata).
pub const DEFAULT_BASE_URL: &str = "https://devpod-agent-releases.example.invalid";

/// A request to bootstrap the remote (spec.md §3 `InjectOptions`).
///
/// Invariants (spec.md): context, exec callback, and logger are mandatory;
/// defaults are applied once, idempotently; if the download URL is
/// non-default or `DEVPOD_AGENT_URL` is set, version checking is disabled.
#[derive(Clone)]
pub struct InjectOptions {
    pub exec: Arc<dyn Exec>,
    pub install_dir: String,
    pub install_filename: String,
    pub base_url: String,
    pub download_preference: DownloadPreference,
    pub overall_timeout: Duration,
    pub follow_up: Option<FollowUpCommand>,
    pub local_version: String,
    pub remote_version_expected: String,
    pub skip_version_check: bool,
    /// SPEC_FULL addition: forwarded to the remote's `RUST_LOG` equivalent.
    pub log_level: Option<tracing::Level>,
}

impl InjectOptions {
    /// `base_url` is non-default when set explicitly away from a build-time
    /// default, or `DEVPOD_AGENT_URL` overrides it in the environment
    /// (spec.md §3 invariant, §6 env vars). Either disables version
    /// checking for this attempt.
    pub fn resolve_skip_version_check(&self, default_base_url: &str) -> bool {
        if self.skip_version_check {
            return true;
        }
        if self.base_url != default_base_url {
            return true;
        }
        std::env::var("DEVPOD_AGENT_URL").is_ok()
    }
}

/// Outcome of the post-install remote version probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheckOutcome {
    Skipped,
    Matched { version: String },
    Mismatched { actual: Option<String>, expected: String },
}

/// One record per bootstrap (spec.md §3 `InjectionMetrics`).
#[derive(Debug, Clone)]
pub struct InjectionMetrics {
    pub start: SystemTime,
    pub end: Option<SystemTime>,
    pub attempts: u32,
    pub binary_source: Option<SourceName>,
    pub detected_remote_version: Option<String>,
    pub version_check: VersionCheckOutcome,
    pub success: bool,
    pub error: Option<String>,
}

impl InjectionMetrics {
    pub fn start_now() -> Self {
        Self {
            start: SystemTime::now(),
            end: None,
            attempts: 0,
            binary_source: None,
            detected_remote_version: None,
            version_check: VersionCheckOutcome::Skipped,
            success: false,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_preference_does_not_force_download() {
        assert!(!DownloadPreference::Auto.prefer_download());
        assert!(!DownloadPreference::PreferLocal.prefer_download());
        assert!(DownloadPreference::ForceDownload.prefer_download());
    }
}
