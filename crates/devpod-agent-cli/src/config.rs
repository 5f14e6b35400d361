//! Layered configuration: CLI flags override an optional `--config` TOML
//! file, which overrides environment variables, which override built-in
//! defaults. Each layer only ever fills in what the layer above left unset.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The subset of settings a TOML config file may supply. Every field is
/// optional so a file only needs to mention what it wants to override.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    pub install_dir: Option<String>,
    pub base_url: Option<String>,
    pub data_path: Option<String>,
    pub ssh_bind_addr: Option<String>,
    pub inactivity_grace_period_secs: Option<u64>,
    pub shutdown_hook_command: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings the daemon/inject commands actually run with.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub install_dir: String,
    pub base_url: String,
    pub data_path: PathBuf,
    pub ssh_bind_addr: SocketAddr,
    pub inactivity_grace_period: Duration,
    pub shutdown_hook_command: Option<String>,
}

const DEFAULT_INSTALL_DIR: &str = "/tmp";
const DEFAULT_DATA_PATH: &str = "/var/lib/devpod-agent";
const DEFAULT_SSH_BIND_ADDR: &str = "127.0.0.1:8022";
const DEFAULT_GRACE_PERIOD_SECS: u64 = 300;

impl AgentConfig {
    /// Merges, highest precedence first: explicit CLI flags, the optional
    /// config file, environment variables, then these built-in defaults.
    pub fn resolve(cli: &CliOverrides, file: &FileConfig) -> Self {
        let install_dir = cli
            .install_dir
            .clone()
            .or_else(|| file.install_dir.clone())
            .or_else(|| std::env::var("DEVPOD_INSTALL_DIR").ok())
            .unwrap_or_else(|| DEFAULT_INSTALL_DIR.to_string());

        let base_url = cli
            .base_url
            .clone()
            .or_else(|| file.base_url.clone())
            .or_else(|| std::env::var("DEVPOD_AGENT_URL").ok())
            .unwrap_or_else(|| devpod_agent_inject::DEFAULT_BASE_URL.to_string());

        let data_path = cli
            .data_path
            .clone()
            .or_else(|| file.data_path.clone())
            .or_else(|| std::env::var("DEVPOD_DATA_PATH").ok())
            .unwrap_or_else(|| DEFAULT_DATA_PATH.to_string());

        let ssh_bind_addr = cli
            .ssh_bind_addr
            .clone()
            .or_else(|| file.ssh_bind_addr.clone())
            .or_else(|| std::env::var("DEVPOD_SSH_BIND_ADDR").ok())
            .unwrap_or_else(|| DEFAULT_SSH_BIND_ADDR.to_string())
            .parse()
            .unwrap_or_else(|_| DEFAULT_SSH_BIND_ADDR.parse().expect("default addr parses"));

        let inactivity_grace_period = Duration::from_secs(
            cli.inactivity_grace_period_secs
                .or(file.inactivity_grace_period_secs)
                .or_else(|| {
                    std::env::var("DEVPOD_INACTIVITY_GRACE_PERIOD_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                })
                .unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
        );

        let shutdown_hook_command = cli
            .shutdown_hook_command
            .clone()
            .or_else(|| file.shutdown_hook_command.clone());

        Self {
            install_dir,
            base_url,
            data_path: PathBuf::from(data_path),
            ssh_bind_addr,
            inactivity_grace_period,
            shutdown_hook_command,
        }
    }
}

/// The subset of [`AgentConfig`] fields a subcommand's own flags may
/// override. Kept separate from `clap::Args` so this module has no clap
/// dependency of its own.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub install_dir: Option<String>,
    pub base_url: Option<String>,
    pub data_path: Option<String>,
    pub ssh_bind_addr: Option<String>,
    pub inactivity_grace_period_secs: Option<u64>,
    pub shutdown_hook_command: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_else_is_set() {
        let config = AgentConfig::resolve(&CliOverrides::default(), &FileConfig::default());
        assert_eq!(config.install_dir, DEFAULT_INSTALL_DIR);
        assert_eq!(config.data_path, PathBuf::from(DEFAULT_DATA_PATH));
        assert_eq!(config.inactivity_grace_period, Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS));
    }

    #[test]
    fn file_config_overrides_defaults() {
        let file = FileConfig {
            install_dir: Some("/opt/devpod".into()),
            inactivity_grace_period_secs: Some(60),
            ..Default::default()
        };
        let config = AgentConfig::resolve(&CliOverrides::default(), &file);
        assert_eq!(config.install_dir, "/opt/devpod");
        assert_eq!(config.inactivity_grace_period, Duration::from_secs(60));
    }

    #[test]
    fn cli_override_wins_over_file_config() {
        let file = FileConfig {
            install_dir: Some("/opt/devpod".into()),
            ..Default::default()
        };
        let cli = CliOverrides {
            install_dir: Some("/custom".into()),
            ..Default::default()
        };
        let config = AgentConfig::resolve(&cli, &file);
        assert_eq!(config.install_dir, "/custom");
    }

    #[test]
    fn file_config_parses_kebab_case_toml() {
        let file: FileConfig = toml::from_str(
            r#"
            install-dir = "/opt/devpod"
            inactivity-grace-period-secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(file.install_dir.as_deref(), Some("/opt/devpod"));
        assert_eq!(file.inactivity_grace_period_secs, Some(120));
    }
}
