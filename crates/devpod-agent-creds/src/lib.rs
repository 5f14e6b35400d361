#![forbid(unsafe_code)]
//! The loopback credential relay: a small HTTP server on the remote that
//! forwards git/docker/SSH-signature/platform/gpg credential lookups back
//! to the host through a pluggable [`tunnel::CredentialTunnel`], or
//! redirects them straight to an already-running workspace server's
//! Unix-domain socket when the environment enables that fallback.

pub mod config;
pub mod route;
pub mod server;
pub mod tunnel;
pub mod workspace_fallback;

pub use route::Route;
pub use server::{
    start, start_preferring_workspace_fallback, CredsError, RelayTarget, RunningRelay,
    DEFAULT_PORT_RANGE, DEFAULT_REQUEST_TIMEOUT, STARTUP_POLL_BUDGET,
};
pub use tunnel::{CredentialTunnel, TunnelError};
pub use workspace_fallback::WorkspaceFallbackTunnel;
