//! The SSH server the IDE connects to.
//!
//! Concrete authentication and session-handling policy are explicitly out
//! of scope for this component — it does not define the agent's RPC
//! service schema. [`SshAuthenticator`] is the seam a caller plugs a real
//! credential check (or RPC session router) into; this module only owns
//! the `russh` listener lifecycle and forwards every accepted channel's
//! activity to an [`crate::activity::ActivityFile`] touch, since an SSH
//! session opening is itself the "IDE activity" the inactivity monitor
//! needs to see.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;

use crate::activity::ActivityFile;
use crate::keystore::KeyStore;

#[derive(Debug, thiserror::Error)]
pub enum SshServerError {
    #[error("failed to load or generate the host key: {0}")]
    KeyStore(#[from] crate::keystore::KeyStoreError),
    #[error("failed to bind ssh listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("ssh server error: {0}")]
    Russh(#[from] russh::Error),
}

/// Pluggable authentication/session-routing policy. The concrete check (a
/// real credential lookup, a per-workspace authorized-keys list) lives
/// outside this crate; a test double can accept everything.
#[async_trait]
pub trait SshAuthenticator: Send + Sync {
    /// Whether `user` may authenticate with `key`.
    async fn authenticate_publickey(&self, user: &str, key: &PublicKey) -> bool;

    /// What the server echoes back once a channel opens and data arrives.
    /// The RPC schema this data represents is out of scope here; a real
    /// deployment replaces this with its own session router.
    async fn handle_data(&self, channel: ChannelId, data: &[u8], session: &mut Session) {
        let _ = session.data(channel, CryptoVec::from(data.to_vec()));
    }
}

/// Accepts every key — useful for local development and the test suite,
/// never for a production deployment.
pub struct AllowAllAuthenticator;

#[async_trait]
impl SshAuthenticator for AllowAllAuthenticator {
    async fn authenticate_publickey(&self, _user: &str, _key: &PublicKey) -> bool {
        true
    }
}

/// Runtime configuration for [`run`].
pub struct SshServerConfig {
    pub bind_addr: SocketAddr,
    pub keys_dir: std::path::PathBuf,
    pub activity: ActivityFile,
    pub authenticator: Arc<dyn SshAuthenticator>,
}

/// Binds and serves the SSH listener until `cancel` fires.
///
/// Tears down promptly once cancelled: `russh::server::Server::run_on_address`
/// is driven inside a `tokio::select!` against the cancellation token so an
/// in-flight accept loop does not outlive the rest of the daemon.
pub async fn run(
    config: SshServerConfig,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<(), SshServerError> {
    let keystore = KeyStore::new(&config.keys_dir);
    let host_key = keystore.host_key().await?;

    let russh_config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });

    let mut server = DevpodSshServer {
        activity: config.activity,
        authenticator: config.authenticator,
    };

    tokio::select! {
        result = server.run_on_address(russh_config, config.bind_addr) => {
            result.map_err(SshServerError::Russh)
        }
        _ = cancel.cancelled() => {
            tracing::debug!("ssh server cancelled");
            Ok(())
        }
    }
}

#[derive(Clone)]
struct DevpodSshServer {
    activity: ActivityFile,
    authenticator: Arc<dyn SshAuthenticator>,
}

impl russh::server::Server for DevpodSshServer {
    type Handler = DevpodSshHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> DevpodSshHandler {
        tracing::debug!(?peer_addr, "ssh client connected");
        DevpodSshHandler {
            activity: self.activity.clone(),
            authenticator: self.authenticator.clone(),
        }
    }
}

struct DevpodSshHandler {
    activity: ActivityFile,
    authenticator: Arc<dyn SshAuthenticator>,
}

#[async_trait]
impl Handler for DevpodSshHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let _ = self.activity.touch().await;
        if self.authenticator.authenticate_publickey(user, public_key).await {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let _ = self.activity.touch().await;
        let _ = session;
        Ok(true)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = self.activity.touch().await;
        self.authenticator.handle_data(channel, data, session).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_authenticator_accepts_any_key() {
        let auth = AllowAllAuthenticator;
        // `PublicKey` has no cheap test constructor here; exercise the
        // authenticator contract against a generated key instead.
        let key_pair = russh_keys::key::KeyPair::generate_ed25519().unwrap();
        let public = key_pair.clone_public_key().unwrap();
        assert!(auth.authenticate_publickey("dev", &public).await);
    }
}
