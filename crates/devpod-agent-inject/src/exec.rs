//! The caller-supplied execution capability the driver bootstraps over.
//!
//! spec.md deliberately leaves the transport opaque ("an SSH session, a
//! container `exec`, a plain pipe"); this trait is the seam. Implementors
//! live outside this crate — an SSH client, `docker exec`, or a test
//! double that replays a canned script conversation.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

pub type ExecStdin = Pin<Box<dyn AsyncWrite + Send>>;
pub type ExecStdout = Pin<Box<dyn AsyncRead + Send>>;
pub type ExecStderr = Pin<Box<dyn AsyncRead + Send>>;
pub type ExecWait = Pin<Box<dyn Future<Output = Result<ExecOutcome, ExecError>> + Send>>;

/// The exit status of a completed exec, after the normalization named in
/// spec.md §6 ("Exit codes `129`, `130`, `143`... are normalized to
/// success").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub code: i32,
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn exec session: {0}")]
    Spawn(String),
    #[error("exec session wait failed: {0}")]
    Wait(String),
}

/// A live exec session: independent stdin/stdout/stderr handles plus a
/// future resolving once the remote command exits.
pub struct ExecSession {
    pub stdin: ExecStdin,
    pub stdout: ExecStdout,
    pub stderr: ExecStderr,
    pub wait: ExecWait,
}

/// Spawns `command` as the inject channel's remote process. A single
/// implementation normally wraps a concrete transport (an SSH `russh`
/// client channel, `docker exec -i`, a pair of OS pipes in tests); the
/// driver itself never inspects which.
#[async_trait::async_trait]
pub trait Exec: Send + Sync {
    async fn spawn(&self, command: &str) -> Result<ExecSession, ExecError>;
}

/// Normalizes signal-death exit codes `129`/`130`/`143` (`HUP`/`INT`/`TERM`)
/// to success, per spec.md §6.
pub fn normalize_exit_code(code: i32) -> ExecOutcome {
    match code {
        129 | 130 | 143 => ExecOutcome { code: 0 },
        other => ExecOutcome { code: other },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_death_codes_normalize_to_success() {
        assert!(normalize_exit_code(129).is_success());
        assert!(normalize_exit_code(130).is_success());
        assert!(normalize_exit_code(143).is_success());
    }

    #[test]
    fn other_nonzero_codes_propagate() {
        assert_eq!(normalize_exit_code(2).code, 2);
    }
}
