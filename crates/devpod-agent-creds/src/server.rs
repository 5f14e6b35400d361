use std::net::{Ipv4Addr, SocketAddr};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Bytes, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::route::Route;
use crate::tunnel::CredentialTunnel;
use crate::workspace_fallback;

/// TCP port range the relay searches for a free port in, per the file
/// layout convention shared with `DEVPOD_CREDENTIALS_SERVER_PORT`.
pub const DEFAULT_PORT_RANGE: Range<u16> = 13000..17000;

/// Per-request forwarding timeout; individual deployments may tune it
/// within the 5-15 second envelope credential backends are expected to
/// respond in.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How long [`start`] waits for the freshly bound listener to answer its
/// own health check before giving up.
pub const STARTUP_POLL_BUDGET: Duration = Duration::from_secs(4);

#[derive(Debug, thiserror::Error)]
pub enum CredsError {
    #[error("no free port available in {start}..{end}")]
    NoFreePort { start: u16, end: u16 },
    #[error("failed to bind relay listener: {0}")]
    Bind(std::io::Error),
    #[error("relay did not become ready within {0:?}")]
    StartupTimeout(Duration),
}

/// A running relay instance. Dropping this without calling [`Self::shutdown`]
/// leaves the server task running until the process exits; callers that
/// need deterministic teardown should always call `shutdown`.
pub struct RunningRelay {
    pub port: u16,
    cancel: CancellationToken,
    join_handle: tokio::task::JoinHandle<()>,
}

impl RunningRelay {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.join_handle.await;
    }
}

#[derive(Clone)]
struct AppState {
    tunnel: Arc<dyn CredentialTunnel>,
    request_timeout: Duration,
}

/// Binds the first free port in `port_range` on `localhost`, serves the
/// five credential routes against `tunnel`, and confirms the listener is
/// answering before returning.
pub async fn start(
    tunnel: Arc<dyn CredentialTunnel>,
    port_range: Range<u16>,
    request_timeout: Duration,
) -> Result<RunningRelay, CredsError> {
    let (listener, port) = bind_first_free_port(port_range.clone()).await?;
    let cancel = CancellationToken::new();
    let state = AppState {
        tunnel,
        request_timeout,
    };
    let router = build_router(state);

    let server_cancel = cancel.clone();
    let join_handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await;
        if let Err(error) = result {
            tracing::warn!(%error, "credential relay server exited with an error");
        }
    });

    wait_until_ready(port, STARTUP_POLL_BUDGET).await?;
    tracing::info!(port, "credential relay listening");

    Ok(RunningRelay {
        port,
        cancel,
        join_handle,
    })
}

/// Narrows `default` down to the single port named by
/// `DEVPOD_CREDENTIALS_SERVER_PORT`, if that override is set.
pub fn resolve_port_range(default: Range<u16>) -> Range<u16> {
    match config::credentials_server_port_override() {
        Some(port) => port..port.saturating_add(1),
        None => default,
    }
}

/// Where credential helpers should send their requests: either a
/// workspace server already listening on a Unix-domain socket (nothing to
/// start), or a freshly bound loopback relay.
pub enum RelayTarget {
    WorkspaceSocket(std::path::PathBuf),
    LoopbackHttp(RunningRelay),
}

/// Prefers an already-running workspace server's Unix-domain socket over
/// starting a new loopback relay, per the environment's fallback
/// configuration; falls back to [`start`] otherwise.
pub async fn start_preferring_workspace_fallback(
    tunnel: Arc<dyn CredentialTunnel>,
    port_range: Range<u16>,
    request_timeout: Duration,
) -> Result<RelayTarget, CredsError> {
    if let Some(socket_path) = workspace_fallback::configured_socket_path() {
        tracing::info!(path = %socket_path.display(), "using workspace-server credential fallback");
        return Ok(RelayTarget::WorkspaceSocket(socket_path));
    }
    start(tunnel, port_range, request_timeout)
        .await
        .map(RelayTarget::LoopbackHttp)
}

async fn bind_first_free_port(range: Range<u16>) -> Result<(TcpListener, u16), CredsError> {
    let start = range.start;
    let end = range.end;
    for port in range {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok((listener, port)),
            Err(error) if error.kind() == std::io::ErrorKind::AddrInUse => continue,
            Err(error) => return Err(CredsError::Bind(error)),
        }
    }
    Err(CredsError::NoFreePort { start, end })
}

async fn wait_until_ready(port: u16, budget: Duration) -> Result<(), CredsError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CredsError::StartupTimeout(budget));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn build_router(state: AppState) -> Router {
    let mut router = Router::new().route("/", get(|| async { StatusCode::OK }));
    for route in Route::ALL {
        router = router.route(
            route.path(),
            post(move |state: State<AppState>, body: Bytes| handle(route, state, body)),
        );
    }
    router.with_state(state)
}

async fn handle(route: Route, State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let forward = state.tunnel.forward(route, body.to_vec());
    match tokio::time::timeout(state.request_timeout, forward).await {
        Ok(Ok(response_body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            response_body,
        )
            .into_response(),
        Ok(Err(error)) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("timed out waiting for host response to {route}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::TunnelError;

    struct EchoTunnel;

    #[async_trait::async_trait]
    impl CredentialTunnel for EchoTunnel {
        async fn forward(&self, route: Route, body: Vec<u8>) -> Result<Vec<u8>, TunnelError> {
            assert_eq!(route, Route::DockerCredentials);
            assert_eq!(body, br#"{"ServerURL":"registry.example.com"}"#);
            Ok(br#"{"Username":"u","Secret":"s"}"#.to_vec())
        }
    }

    struct FailingTunnel;

    #[async_trait::async_trait]
    impl CredentialTunnel for FailingTunnel {
        async fn forward(&self, _route: Route, _body: Vec<u8>) -> Result<Vec<u8>, TunnelError> {
            Err(TunnelError::Transport("host unreachable".into()))
        }
    }

    #[tokio::test]
    async fn forwards_credential_requests_and_reports_ready() {
        let relay = start(Arc::new(EchoTunnel), 13000..13010, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://127.0.0.1:{}/docker-credentials", relay.port))
            .body(r#"{"ServerURL":"registry.example.com"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = response.text().await.unwrap();
        assert_eq!(body, r#"{"Username":"u","Secret":"s"}"#);

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let relay = start(Arc::new(EchoTunnel), 13010..13020, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();
        let response = reqwest::get(format!("http://127.0.0.1:{}/not-a-route", relay.port))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn tunnel_failure_surfaces_as_500() {
        let relay = start(Arc::new(FailingTunnel), 13020..13030, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();
        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://127.0.0.1:{}/git-credentials", relay.port))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        relay.shutdown().await;
    }
}
