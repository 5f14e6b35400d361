//! The `inject` subcommand: host side. Assembles an [`InjectOptions`],
//! the standard binary source chain, and a retry policy, then drives a
//! single bootstrap attempt sequence against the target.

use std::sync::Arc;
use std::time::Duration;

use devpod_agent_core::{BinaryCache, BinarySourceChain, RetryConfig};
use devpod_agent_inject::{DownloadPreference, FollowUpCommand, InjectOptions};
use tokio_util::sync::CancellationToken;

use crate::cli::InjectArgs;
use crate::config::{AgentConfig, CliOverrides};
use crate::process_exec::ProcessExec;

pub fn overrides(args: &InjectArgs) -> CliOverrides {
    CliOverrides {
        install_dir: args.install_dir.clone(),
        base_url: args.base_url.clone(),
        data_path: None,
        ssh_bind_addr: None,
        inactivity_grace_period_secs: None,
        shutdown_hook_command: None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InjectCommandError {
    #[error(transparent)]
    Bootstrap(#[from] devpod_agent_inject::BootstrapError),
}

pub async fn run(args: InjectArgs, config: &AgentConfig) -> Result<(), InjectCommandError> {
    // `ProcessExec` is the only transport this binary ships; a real SSH or
    // `docker exec` transport would implement `Exec` the same way and plug
    // in here once `--local` is no longer the only supported target.
    let exec: Arc<dyn devpod_agent_inject::Exec> = Arc::new(ProcessExec::local());

    let cache_dir = config.data_path.join("binary-cache");
    let cache = BinaryCache::new(cache_dir);
    let http_client = reqwest::Client::new();
    let binary_chain = BinarySourceChain::standard(cache, config.base_url.clone(), http_client);

    let options = InjectOptions {
        exec,
        install_dir: config.install_dir.clone(),
        install_filename: "devpod-agent".to_string(),
        base_url: config.base_url.clone(),
        download_preference: DownloadPreference::Auto,
        overall_timeout: Duration::from_secs(args.timeout_secs),
        follow_up: args.follow_up_command.map(|command| FollowUpCommand { command }),
        local_version: env!("CARGO_PKG_VERSION").to_string(),
        remote_version_expected: args.remote_version,
        skip_version_check: args.skip_version_check,
        log_level: None,
    };

    let retry_config = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(15),
        deadline: None,
        jitter: 0.1,
    };

    let cancel = CancellationToken::new();
    let metrics = devpod_agent_inject::inject(&options, &binary_chain, &retry_config, &cancel).await?;

    tracing::info!(
        attempts = metrics.attempts,
        success = metrics.success,
        binary_source = ?metrics.binary_source,
        version_check = ?metrics.version_check,
        "bootstrap finished"
    );

    Ok(())
}
