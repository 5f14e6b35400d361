use async_trait::async_trait;

use crate::route::Route;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("{0}")]
    Transport(String),
}

/// The reverse channel back to the host. The relay itself never knows
/// whether the host side is reached over the framed stdio connection, SSH,
/// or something else entirely — it only needs something that can forward
/// an opaque JSON body for a given route and return the host's response.
#[async_trait]
pub trait CredentialTunnel: Send + Sync {
    async fn forward(&self, route: Route, body: Vec<u8>) -> Result<Vec<u8>, TunnelError>;
}
