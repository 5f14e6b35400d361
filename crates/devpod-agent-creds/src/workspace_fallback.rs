//! The workspace-server fallback: when the environment names a
//! Unix-domain socket the devpod workspace server is already listening on,
//! credential lookups are forwarded there directly instead of standing up
//! the loopback TCP relay.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::route::Route;
use crate::tunnel::{CredentialTunnel, TunnelError};

/// Name of the environment variable that, when set, names the
/// workspace-server's Unix-domain socket path and enables the fallback.
pub const ENV_WORKSPACE_CREDENTIALS_SOCKET: &str = "DEVPOD_WORKSPACE_CREDENTIALS_PORT";

/// Reads [`ENV_WORKSPACE_CREDENTIALS_SOCKET`] and returns the socket path the
/// fallback should dial, if the environment enables it.
pub fn configured_socket_path() -> Option<PathBuf> {
    std::env::var_os(ENV_WORKSPACE_CREDENTIALS_SOCKET)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[derive(Serialize)]
struct Request<'a> {
    path: &'a str,
    body: serde_json::Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    body: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Forwards credential requests to an already-running workspace server over
/// a Unix-domain socket, one newline-delimited JSON request/response pair
/// per connection.
pub struct WorkspaceFallbackTunnel {
    socket_path: PathBuf,
}

impl WorkspaceFallbackTunnel {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl CredentialTunnel for WorkspaceFallbackTunnel {
    async fn forward(&self, route: Route, body: Vec<u8>) -> Result<Vec<u8>, TunnelError> {
        let body: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|error| TunnelError::Transport(format!("request body was not JSON: {error}")))?;

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|error| TunnelError::Transport(format!("connecting to workspace server: {error}")))?;
        let (read_half, mut write_half) = stream.into_split();

        let request = Request {
            path: route.path(),
            body,
        };
        let mut line = serde_json::to_vec(&request)
            .map_err(|error| TunnelError::Transport(format!("encoding request: {error}")))?;
        line.push(b'\n');
        write_half
            .write_all(&line)
            .await
            .map_err(|error| TunnelError::Transport(format!("writing to workspace server: {error}")))?;

        let mut reader = BufReader::new(read_half);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .await
            .map_err(|error| TunnelError::Transport(format!("reading from workspace server: {error}")))?;

        let response: Response = serde_json::from_str(response_line.trim_end())
            .map_err(|error| TunnelError::Transport(format!("decoding response: {error}")))?;

        if let Some(error) = response.error {
            return Err(TunnelError::Transport(error));
        }
        let body = response.body.unwrap_or(serde_json::Value::Null);
        serde_json::to_vec(&body)
            .map_err(|error| TunnelError::Transport(format!("encoding response: {error}")))
    }
}
