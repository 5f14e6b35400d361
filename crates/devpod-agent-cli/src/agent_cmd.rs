//! The `agent` subcommand: remote side. Wires the SSH listener, the
//! inactivity monitor, and the credential relay into one daemon
//! supervisor, and reconciles the workspace record handed in over stdin.

use std::io::Read;
use std::sync::Arc;

use devpod_agent_creds::{start_preferring_workspace_fallback, RelayTarget, WorkspaceFallbackTunnel};
use devpod_agent_daemon::daemon::DaemonTask;
use devpod_agent_daemon::{
    ActivityFile, AllowAllAuthenticator, CommandShutdownHook, KeyStore, SshServerConfig,
};
use devpod_agent_state::WorkspaceStore;
use tokio_util::sync::CancellationToken;

use crate::cli::AgentArgs;
use crate::config::{AgentConfig, CliOverrides};

#[derive(Debug, thiserror::Error)]
pub enum AgentCommandError {
    #[error(transparent)]
    Daemon(#[from] devpod_agent_daemon::DaemonError),
    #[error("failed to decode workspace record from stdin: {0}")]
    DecodeWorkspaceRecord(#[source] devpod_agent_state::CompressionError),
    #[error(transparent)]
    ReconcileWorkspace(#[from] devpod_agent_state::StateError),
}

pub fn overrides(args: &AgentArgs) -> CliOverrides {
    CliOverrides {
        install_dir: None,
        base_url: None,
        data_path: args.data_path.clone(),
        ssh_bind_addr: args.ssh_bind_addr.clone(),
        inactivity_grace_period_secs: args.inactivity_grace_period_secs,
        shutdown_hook_command: args.shutdown_hook_command.clone(),
    }
}

/// Reconciles whatever `WorkspaceInfo` the host piped to stdin at inject
/// time, if any. A bare `agent` invocation with nothing on stdin is a
/// no-op — there's nothing to reconcile.
async fn reconcile_incoming_workspace(config: &AgentConfig) -> Result<(), AgentCommandError> {
    let read = tokio::task::spawn_blocking(|| {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).map(|_| buf)
    })
    .await
    .expect("stdin reader task panicked");

    let payload = match read {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => return Ok(()),
    };

    let info = devpod_agent_state::decompress(&payload).map_err(AgentCommandError::DecodeWorkspaceRecord)?;

    let store = WorkspaceStore::new(&config.data_path);
    store
        .reconcile(info, |dir| async move {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await?;
    Ok(())
}

pub async fn run(_args: AgentArgs, config: AgentConfig) -> Result<(), AgentCommandError> {
    reconcile_incoming_workspace(&config).await?;

    let cancel = CancellationToken::new();
    let activity = ActivityFile::new(devpod_agent_daemon::activity::DEFAULT_ACTIVITY_PATH);

    let ssh_task: DaemonTask = {
        let activity = activity.clone();
        let bind_addr = config.ssh_bind_addr;
        let keys_dir = KeyStore::default_dir();
        let cancel = cancel.clone();
        Box::pin(async move {
            devpod_agent_daemon::run_ssh_server(
                SshServerConfig {
                    bind_addr,
                    keys_dir,
                    activity,
                    authenticator: Arc::new(AllowAllAuthenticator),
                },
                cancel,
            )
            .await
            .map_err(|e| e.to_string())
        })
    };

    let shutdown_task: DaemonTask = {
        let activity = activity.clone();
        let workspace_dir = config.data_path.clone();
        let grace_period = config.inactivity_grace_period;
        let hook: Arc<dyn devpod_agent_daemon::shutdown::ShutdownHook> =
            match config.shutdown_hook_command.clone() {
                Some(command) => Arc::new(CommandShutdownHook { command }),
                None => Arc::new(NoopShutdownHook),
            };
        let cancel = cancel.clone();
        Box::pin(async move {
            devpod_agent_daemon::monitor_inactivity(activity, workspace_dir, grace_period, hook, cancel).await;
            Ok(())
        })
    };

    let creds_task: DaemonTask = {
        let port_range = devpod_agent_creds::DEFAULT_PORT_RANGE;
        let timeout = devpod_agent_creds::DEFAULT_REQUEST_TIMEOUT;
        let cancel = cancel.clone();
        Box::pin(async move {
            let tunnel: Arc<dyn devpod_agent_creds::CredentialTunnel> =
                match devpod_agent_creds::workspace_fallback::configured_socket_path() {
                    Some(path) => Arc::new(WorkspaceFallbackTunnel::new(path)),
                    None => Arc::new(UnimplementedHostTunnel),
                };

            match start_preferring_workspace_fallback(tunnel, port_range, timeout).await {
                Ok(RelayTarget::WorkspaceSocket(_)) => {
                    cancel.cancelled().await;
                    Ok(())
                }
                Ok(RelayTarget::LoopbackHttp(relay)) => {
                    cancel.cancelled().await;
                    relay.shutdown().await;
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            }
        })
    };

    let pid_path = devpod_agent_daemon::pid_file::DEFAULT_PID_PATH.into();
    devpod_agent_daemon::run_daemon(pid_path, vec![ssh_task, shutdown_task, creds_task], cancel).await?;
    Ok(())
}

/// Used when no shutdown hook command is configured: the daemon simply
/// never decides to shut itself down on inactivity.
struct NoopShutdownHook;

#[async_trait::async_trait]
impl devpod_agent_daemon::shutdown::ShutdownHook for NoopShutdownHook {
    async fn shutdown(&self) {
        tracing::info!("inactivity grace period elapsed with no shutdown hook configured");
    }
}

/// Stand-in tunnel for when no workspace-server fallback is configured and
/// no SSH-forwarded host channel is wired up; surfaces as a transport
/// error on first use rather than silently dropping credential requests.
struct UnimplementedHostTunnel;

#[async_trait::async_trait]
impl devpod_agent_creds::CredentialTunnel for UnimplementedHostTunnel {
    async fn forward(
        &self,
        _route: devpod_agent_creds::Route,
        _body: Vec<u8>,
    ) -> Result<Vec<u8>, devpod_agent_creds::TunnelError> {
        Err(devpod_agent_creds::TunnelError::Transport(
            "no credential tunnel back to the host is configured".to_string(),
        ))
    }
}
