//! A concrete [`Exec`] transport: runs the remote command through a local
//! child process. Used directly for `--local` bootstraps (exercising the
//! whole protocol against the machine the CLI itself runs on, useful for
//! development) and as the template a real SSH/`docker exec` transport
//! would follow — stdin/stdout/stderr piped, exit status normalized.

use devpod_agent_inject::{Exec, ExecError, ExecOutcome, ExecSession};
use tokio::process::Command;

/// Spawns `argv[0] argv[1..] <command>` as a child process, piping its
/// stdio back to the driver. `argv` carries whatever prefix turns a bare
/// shell command into a remote one, e.g. `["ssh", "target", "sh"]` for an
/// SSH transport or `["sh", "-c"]` to run locally.
pub struct ProcessExec {
    argv: Vec<String>,
}

impl ProcessExec {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// Runs the script through the local shell, for `--local` bootstraps.
    pub fn local() -> Self {
        Self::new(vec!["sh".to_string(), "-c".to_string()])
    }
}

#[async_trait::async_trait]
impl Exec for ProcessExec {
    async fn spawn(&self, command: &str) -> Result<ExecSession, ExecError> {
        let (program, prefix_args) = self
            .argv
            .split_first()
            .ok_or_else(|| ExecError::Spawn("empty argv for process transport".to_string()))?;

        let mut child = Command::new(program)
            .args(prefix_args)
            .arg(command)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Spawn(e.to_string()))?;

        let stdin: devpod_agent_inject::ExecStdin = Box::pin(child.stdin.take().expect("piped stdin"));
        let stdout: devpod_agent_inject::ExecStdout = Box::pin(child.stdout.take().expect("piped stdout"));
        let stderr: devpod_agent_inject::ExecStderr = Box::pin(child.stderr.take().expect("piped stderr"));

        let wait = Box::pin(async move {
            let status = child.wait().await.map_err(|e| ExecError::Wait(e.to_string()))?;
            let code = status.code().unwrap_or_else(|| signal_exit_code(&status));
            Ok(devpod_agent_inject::exec::normalize_exit_code(code))
        });

        Ok(ExecSession {
            stdin,
            stdout,
            stderr,
            wait,
        })
    }
}

#[cfg(unix)]
fn signal_exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| 128 + sig).unwrap_or(1)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &std::process::ExitStatus) -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn runs_a_command_and_reports_success() {
        let exec = ProcessExec::local();
        let session = exec.spawn("echo hello").await.unwrap();
        let ExecOutcome { code } = session.wait.await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn captures_stdout() {
        let exec = ProcessExec::local();
        let mut session = exec.spawn("echo hi-there").await.unwrap();
        drop(session.stdin);
        let mut out = String::new();
        session.stdout.read_to_string(&mut out).await.unwrap();
        session.wait.await.unwrap();
        assert_eq!(out.trim(), "hi-there");
    }

    #[tokio::test]
    async fn writes_reach_the_childs_stdin() {
        let exec = ProcessExec::local();
        let mut session = exec.spawn("cat").await.unwrap();
        session.stdin.write_all(b"echoed\n").await.unwrap();
        drop(session.stdin);
        let mut out = String::new();
        session.stdout.read_to_string(&mut out).await.unwrap();
        session.wait.await.unwrap();
        assert_eq!(out, "echoed\n");
    }
}
