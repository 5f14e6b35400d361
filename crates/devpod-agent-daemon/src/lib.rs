#![forbid(unsafe_code)]
//! The remote-resident long-lived daemon: SSH server lifecycle,
//! activity/busy-file bookkeeping, inactivity-triggered shutdown, and the
//! `health` sub-command's file-presence check.
//!
//! This crate knows nothing about the credential relay's HTTP surface
//! (`devpod-agent-creds`) or the workspace record format
//! (`devpod-agent-state`) beyond the busy-file path convention; those are
//! wired together by `devpod-agent-cli`.

pub mod activity;
pub mod daemon;
pub mod health;
pub mod keystore;
pub mod pid_file;
pub mod shutdown;
pub mod ssh_server;

pub use activity::{ActivityFile, BusyFile, BusyGuard};
pub use daemon::{run as run_daemon, DaemonError, DaemonTask};
pub use health::{check as health_check, HealthStatus};
pub use keystore::{KeyStore, KeyStoreError};
pub use pid_file::{is_alive, PidFile, PidFileError};
pub use shutdown::{monitor as monitor_inactivity, CommandShutdownHook, ShutdownHook};
pub use ssh_server::{run as run_ssh_server, AllowAllAuthenticator, SshAuthenticator, SshServerConfig, SshServerError};
