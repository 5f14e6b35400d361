//! The inject protocol driver (spec.md §4.5): owns a single bootstrap
//! attempt, retried by [`devpod_agent_core::retry`].
//!
//! States (driver-internal): `AwaitHandshake → AwaitClassification →
//! (StreamingBinary | AwaitDone) → (AwaitDone | RunCommand) →
//! VerifyVersion → Done`. This module doesn't model those as an explicit
//! enum — they fall out of the control flow of [`run_attempt`] — but every
//! failure is tagged with the [`Stage`] it originated in.

use std::io;
use std::time::Duration;

use devpod_agent_core::binary_source::SourceName;
use devpod_agent_core::{Arch, BinarySourceChain, RetryConfig, ScriptParams};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::error::{BootstrapError, InjectCause, InjectError, Stage};
use crate::exec::{Exec, ExecStdin, ExecStdout};
use crate::options::{InjectOptions, InjectionMetrics, VersionCheckOutcome, DEFAULT_BASE_URL};
use crate::stderr_buffer::DelayedStderr;
use crate::version;

/// How long the driver waits for the remote's opening `ping` line before
/// declaring a handshake timeout.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

struct AttemptOutcome {
    binary_source: Option<SourceName>,
}

/// Runs the full retried bootstrap against `options`, returning metrics on
/// success or the last attempt's composite error on exhaustion.
pub async fn inject(
    options: &InjectOptions,
    binary_chain: &BinarySourceChain,
    retry_config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<InjectionMetrics, BootstrapError> {
    let mut metrics = InjectionMetrics::start_now();

    let mut config = retry_config.clone();
    if config.deadline.is_none() {
        config.deadline = Some(std::time::Instant::now() + options.overall_timeout);
    }

    let result = devpod_agent_core::retry(&config, cancel, |attempt| {
        metrics.attempts = attempt;
        run_attempt(attempt, options, binary_chain)
    })
    .await;

    metrics.end = Some(std::time::SystemTime::now());

    match result {
        Ok(outcome) => {
            metrics.binary_source = outcome.binary_source;
            metrics.success = true;
            if options.resolve_skip_version_check(DEFAULT_BASE_URL) {
                metrics.version_check = VersionCheckOutcome::Skipped;
            } else {
                let install_path = install_path(options);
                let (actual, verdict) =
                    version::validate_remote_agent(&*options.exec, &install_path, &options.remote_version_expected)
                        .await;
                metrics.detected_remote_version = actual.clone();
                metrics.version_check = match verdict {
                    Ok(()) => VersionCheckOutcome::Matched {
                        version: actual.unwrap_or_default(),
                    },
                    Err(_) => VersionCheckOutcome::Mismatched {
                        actual,
                        expected: options.remote_version_expected.clone(),
                    },
                };
            }
            Ok(metrics)
        }
        Err(devpod_agent_core::RetryError::Failed(err)) => {
            metrics.success = false;
            metrics.error = Some(err.to_string());
            Err(BootstrapError::Inject(err))
        }
        Err(devpod_agent_core::RetryError::Timeout) => {
            metrics.success = false;
            metrics.error = Some("overall timeout exceeded".to_string());
            Err(BootstrapError::Timeout)
        }
        Err(devpod_agent_core::RetryError::Cancelled) => {
            metrics.success = false;
            metrics.error = Some("cancelled".to_string());
            Err(BootstrapError::Cancelled)
        }
    }
}

fn install_path(options: &InjectOptions) -> String {
    format!(
        "{}/{}",
        options.install_dir.trim_end_matches('/'),
        options.install_filename
    )
}

async fn run_attempt(
    attempt: u32,
    options: &InjectOptions,
    binary_chain: &BinarySourceChain,
) -> Result<AttemptOutcome, InjectError> {
    let skip_version_check = options.resolve_skip_version_check(DEFAULT_BASE_URL);
    let params = ScriptParams {
        install_dir: options.install_dir.clone(),
        install_filename: options.install_filename.clone(),
        prefer_download: options.download_preference.prefer_download(),
        chmod_exec: true,
        amd64_url: format!("{}/devpod-linux-amd64", options.base_url.trim_end_matches('/')),
        arm64_url: format!("{}/devpod-linux-arm64", options.base_url.trim_end_matches('/')),
        base_url: options.base_url.clone(),
        existence_check: version::existence_check(if skip_version_check {
            None
        } else {
            Some(&options.remote_version_expected)
        }),
        follow_up_command: options
            .follow_up
            .as_ref()
            .map(|f| f.command.clone())
            .unwrap_or_default(),
    };
    let script = devpod_agent_core::render_script(&params);

    let fail = |stage: Stage, cause: InjectCause, stderr_tail: String| InjectError {
        stage,
        attempts: attempt,
        cause,
        stderr_tail,
    };

    let session = options
        .exec
        .spawn(&script)
        .await
        .map_err(|e| fail(Stage::Transport, InjectCause::Exec(e.to_string()), String::new()))?;

    let delayed_stderr = DelayedStderr::spawn(session.stderr);
    let mut stdout = BufReader::new(session.stdout);
    let mut stdin = session.stdin;

    // The injector and the exec's own exit are driven concurrently per
    // spec.md §4.5 step 4 ("Select on the two goroutines"); both are
    // awaited here (rather than racing and cancelling the loser) since the
    // injector's own completion is what makes the exec eventually exit.
    let injector_result = run_injector(&mut stdout, &mut stdin, binary_chain).await;
    if injector_result.is_ok() {
        delayed_stderr.release().await;
    }

    let wait_result = session.wait.await;

    let outcome = match injector_result {
        Ok(outcome) => outcome,
        Err((stage, cause)) => {
            let tail = delayed_stderr.tail().await;
            return Err(fail(stage, cause, tail));
        }
    };

    match wait_result {
        Ok(exit) if exit.is_success() => {}
        Ok(exit) => {
            let tail = delayed_stderr.tail().await;
            return Err(fail(
                Stage::CommandExec,
                InjectCause::CommandFailed(format!("exit status {}", exit.code)),
                tail,
            ));
        }
        Err(e) => {
            let tail = delayed_stderr.tail().await;
            return Err(fail(Stage::Transport, InjectCause::Exec(e.to_string()), tail));
        }
    }

    Ok(AttemptOutcome {
        binary_source: outcome.binary_source,
    })
}

struct InjectorOutcome {
    binary_source: Option<SourceName>,
}

async fn run_injector(
    stdout: &mut BufReader<ExecStdout>,
    stdin: &mut ExecStdin,
    binary_chain: &BinarySourceChain,
) -> Result<InjectorOutcome, (Stage, InjectCause)> {
    let ping = read_line_with_timeout(stdout, HANDSHAKE_TIMEOUT)
        .await
        .map_err(|cause| (Stage::Handshake, cause))?;
    if trim_line(&ping) != "ping" {
        return Err((
            Stage::Handshake,
            InjectCause::UnexpectedPing { line: trim_line(&ping).to_string() },
        ));
    }
    stdin
        .write_all(b"pong\n")
        .await
        .map_err(|e| (Stage::Handshake, InjectCause::Io(e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| (Stage::Handshake, InjectCause::Io(e)))?;

    let classify = read_line(stdout)
        .await
        .map_err(|cause| (Stage::Classify, cause))?;
    let classify_trimmed = trim_line(&classify);

    let binary_source = if classify_trimmed.starts_with("ARM-") {
        let arch = Arch::from_classification_line(classify_trimmed).ok_or_else(|| {
            (
                Stage::Classify,
                InjectCause::UnexpectedClassification {
                    line: classify_trimmed.to_string(),
                },
            )
        })?;

        let (mut stream, source_name) = binary_chain
            .get_binary(arch)
            .await
            .map_err(|e| (Stage::Stream, InjectCause::BinaryNotFound(e)))?;

        tokio::io::copy(&mut stream, stdin)
            .await
            .map_err(|e| (Stage::Stream, InjectCause::Io(e)))?;
        stdin
            .write_all(b"done\n")
            .await
            .map_err(|e| (Stage::Stream, InjectCause::Io(e)))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| (Stage::Stream, InjectCause::Io(e)))?;

        let done = read_line(stdout).await.map_err(|cause| (Stage::Done, cause))?;
        if trim_line(&done) != "done" {
            return Err((Stage::Done, InjectCause::RemoteInstallFailed));
        }
        Some(source_name)
    } else if classify_trimmed == "done" {
        let _ = stdin.shutdown().await;
        None
    } else {
        return Err((
            Stage::Classify,
            InjectCause::UnexpectedClassification {
                line: classify_trimmed.to_string(),
            },
        ));
    };

    Ok(InjectorOutcome { binary_source })
}

async fn read_line_with_timeout(
    reader: &mut BufReader<ExecStdout>,
    timeout: Duration,
) -> Result<String, InjectCause> {
    match tokio::time::timeout(timeout, read_line(reader)).await {
        Ok(result) => result,
        Err(_) => Err(InjectCause::HandshakeTimeout(timeout)),
    }
}

async fn read_line(reader: &mut BufReader<ExecStdout>) -> Result<String, InjectCause> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.map_err(InjectCause::Io)?;
    if n == 0 {
        return Err(InjectCause::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "remote closed stdout before completing the handshake",
        )));
    }
    Ok(line)
}

fn trim_line(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecOutcome, ExecSession};
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    /// A fake [`Exec`] that replays a fixed line-oriented script over a
    /// pair of in-memory duplex pipes, exactly as spec.md's seed scenario 1
    /// describes ("Exec callback echoes a predefined script of lines").
    struct ScriptedExec {
        lines: Vec<&'static str>,
        exit_code: i32,
    }

    #[async_trait::async_trait]
    impl Exec for ScriptedExec {
        async fn spawn(&self, _command: &str) -> Result<ExecSession, crate::exec::ExecError> {
            // Driver writes to `driver_stdin`, readable from `exec_stdin_read`.
            let (driver_stdin, mut exec_stdin_read) = duplex(64 * 1024);
            // This task writes to `exec_stdout_write`, readable from `driver_stdout`.
            let (mut exec_stdout_write, driver_stdout) = duplex(64 * 1024);
            let lines = self.lines.clone();
            let exit_code = self.exit_code;

            let wait = Box::pin(async move {
                for line in lines {
                    exec_stdout_write
                        .write_all(format!("{line}\n").as_bytes())
                        .await
                        .unwrap();
                    if line.starts_with("ARM-") {
                        // Drain the streamed binary and its `done` sentinel
                        // from stdin before continuing the conversation.
                        let mut buf = [0u8; 4096];
                        let mut tail = Vec::new();
                        loop {
                            let n = exec_stdin_read.read(&mut buf).await.unwrap();
                            if n == 0 {
                                break;
                            }
                            tail.extend_from_slice(&buf[..n]);
                            if tail.ends_with(b"done\n") {
                                break;
                            }
                        }
                    }
                }
                Ok(ExecOutcome { code: exit_code })
            });

            Ok(ExecSession {
                stdin: Box::pin(driver_stdin),
                stdout: Box::pin(driver_stdout),
                stderr: Box::pin(tokio::io::empty()),
                wait,
            })
        }
    }

    fn options(exec: Arc<dyn Exec>) -> InjectOptions {
        InjectOptions {
            exec,
            install_dir: "/tmp/devpod".into(),
            install_filename: "devpod".into(),
            base_url: "https://example.com".into(),
            download_preference: crate::options::DownloadPreference::Auto,
            overall_timeout: Duration::from_secs(5),
            follow_up: None,
            local_version: "v1.0.0".into(),
            remote_version_expected: "v1.0.0".into(),
            skip_version_check: true,
            log_level: None,
        }
    }

    #[tokio::test]
    async fn happy_path_binary_present_version_skipped() {
        let exec: Arc<dyn Exec> = Arc::new(ScriptedExec {
            lines: vec!["ping", "done"],
            exit_code: 0,
        });
        let chain = BinarySourceChain::new(vec![]);

        let metrics = inject(
            &options(exec),
            &chain,
            &RetryConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(metrics.success);
        assert!(metrics.binary_source.is_none());
        assert_eq!(metrics.attempts, 1);
    }

    #[tokio::test]
    async fn unexpected_first_line_fails_handshake_stage() {
        let exec: Arc<dyn Exec> = Arc::new(ScriptedExec {
            lines: vec!["surprise", "done"],
            exit_code: 0,
        });
        let chain = BinarySourceChain::new(vec![]);

        let err = inject(
            &options(exec),
            &chain,
            &RetryConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            BootstrapError::Inject(e) => {
                assert_eq!(e.stage, Stage::Handshake);
            }
            other => panic!("expected Inject error, got {other:?}"),
        }
    }
}
