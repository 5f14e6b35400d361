//! The stage-tagged error taxonomy for a bootstrap attempt (spec.md §7).

use std::time::Duration;

use devpod_agent_core::BinarySourceError;

/// Names the stage a bootstrap attempt was in when it failed, matching the
/// states named in spec.md §4.5: "Terminal failure states are labeled with
/// the stage they originated in."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transport,
    Handshake,
    Classify,
    Stream,
    Done,
    CommandExec,
    VersionCheck,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Transport => "transport",
            Stage::Handshake => "handshake",
            Stage::Classify => "classify",
            Stage::Stream => "stream",
            Stage::Done => "done",
            Stage::CommandExec => "command_exec",
            Stage::VersionCheck => "version_check",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InjectCause {
    #[error("exec callback failed: {0}")]
    Exec(String),
    #[error("exec callback exited with status {status}")]
    NonZeroExit { status: i32 },
    #[error("i/o error on the inject channel: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake timed out waiting {0:?} for a reply")]
    HandshakeTimeout(Duration),
    #[error("expected `ping`, got {line:?}")]
    UnexpectedPing { line: String },
    #[error("expected an `ARM-*` or `done` line, got {line:?}")]
    UnexpectedClassification { line: String },
    #[error("binary source chain exhausted: {0}")]
    BinaryNotFound(#[from] BinarySourceError),
    #[error("remote reported failure after receiving the binary")]
    RemoteInstallFailed,
    #[error("follow-up command failed: {0}")]
    CommandFailed(String),
    #[error("remote reports version {actual:?}, expected {expected:?}")]
    VersionMismatch {
        actual: Option<String>,
        expected: String,
    },
}

/// A single composite error identifying the stage, the attempt count, and
/// the captured stderr tail (spec.md §7, "User-visible failure").
#[derive(Debug, thiserror::Error)]
#[error("devpod inject failed at stage `{stage}` after {attempts} attempt(s): {cause}\n--- remote stderr ---\n{stderr_tail}")]
pub struct InjectError {
    pub stage: Stage,
    pub attempts: u32,
    #[source]
    pub cause: InjectCause,
    pub stderr_tail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Inject(#[from] InjectError),
    #[error("bootstrap exceeded its overall timeout")]
    Timeout,
    #[error("bootstrap was cancelled")]
    Cancelled,
}
