use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::http::{HeaderValue, header};
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use parking_lot::Mutex;
use relay_config::HttpRelayConfig;
use tokio::net::TcpSocket;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::constants;
use crate::middlewares::{self, CatchPanicLayer};
use crate::service::{Relay, RelayState};
use crate::services::backend::Backend;
use crate::services::poster::PostError;
use crate::statsd::RelayCounters;

mod acceptor;

/// Idle time of a connection before keep-alive probes are sent.
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Set the number of keep-alive retransmissions to be carried out before declaring that remote end
/// is not available.
const KEEPALIVE_RETRIES: u32 = 5;

/// Set a timeout for reading client request headers. If a client does not transmit the entire
/// header within this time, the connection is closed.
const CLIENT_HEADER_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of pending connections on the listening socket.
const LISTEN_BACKLOG: u32 = 1024;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] std::io::Error),

    /// A TLS certificate was configured.
    #[error("SSL is not supported by the relay, please use a proxy in front")]
    TlsNotSupported,

    /// One of the outputs could not be created.
    #[error("invalid relay output")]
    InvalidOutput(#[from] PostError),
}

/// Build the axum application with all routes and middleware.
pub fn make_app(state: RelayState) -> axum::Router {
    // Service builder order defines layers added first will be called first. This means:
    //  - Requests go from top to bottom
    //  - Responses go from bottom to top
    let middleware = ServiceBuilder::new()
        .layer(axum::middleware::from_fn(middlewares::metrics))
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(constants::SERVER),
        ))
        .layer(middlewares::trace_http_layer());

    crate::endpoints::routes()
        .layer(middleware)
        .with_state(state)
}

fn listen(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?.into_std()?)
}

async fn serve(listener: TcpListener, app: axum::Router, handle: Handle) -> std::io::Result<()> {
    let acceptor = self::acceptor::RelayAcceptor::new(KEEPALIVE_TIMEOUT, KEEPALIVE_RETRIES);

    let mut server = axum_server::from_tcp(listener)
        .acceptor(acceptor)
        .handle(handle);

    server
        .http_builder()
        .http1()
        .timer(TokioTimer::new())
        .half_close(true)
        .keep_alive(true)
        .header_read_timeout(CLIENT_HEADER_TIMEOUT)
        .writev(true);

    server.serve(app.into_make_service()).await
}

/// A relay accepting writes over HTTP and delivering them to its outputs.
///
/// The listener is bound on construction. A failed bind does not fail the construction, it is
/// returned from [`run`](Relay::run) instead, so that other relays of a service keep serving.
/// [`run`](Relay::run) serves requests until [`stop`](Relay::stop) is called. Stopping closes the
/// listener and cancels the background tasks of the relay, while requests that were already
/// accepted run to completion.
pub struct HttpRelay {
    state: RelayState,
    local_addr: Option<SocketAddr>,
    listener: Mutex<Option<Result<TcpListener, ServerError>>>,
    handle: Handle,
    cancel: CancellationToken,
    closing: AtomicBool,
}

impl HttpRelay {
    /// Creates the outputs of the relay and binds its listener.
    ///
    /// Fails only if the configuration of the relay or its outputs is invalid.
    pub fn new(config: HttpRelayConfig) -> Result<Self, ServerError> {
        if config.ssl_combined_pem.is_some() {
            return Err(ServerError::TlsNotSupported);
        }

        let backends = config
            .outputs
            .iter()
            .map(Backend::new)
            .collect::<Result<Vec<_>, _>>()?;

        let listener = listen(config.bind_addr);
        let local_addr = listener.as_ref().ok().and_then(|l| l.local_addr().ok());

        Ok(Self {
            state: RelayState::new(config, backends),
            local_addr,
            listener: Mutex::new(Some(listener)),
            handle: Handle::new(),
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
        })
    }

    /// Returns the address the relay is listening on, or `None` if binding failed.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn spawn_background(&self) {
        for backend in self.state.backends() {
            backend.spawn_retries(&self.cancel);
        }

        let interval = self.state.config().metering_interval();
        if let (Some(metering), Some(interval)) = (self.state.metering(), interval) {
            let metering = metering.clone();
            let relay = self.name().to_owned();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { metering.run(relay, interval, cancel).await });
        }
    }
}

#[async_trait]
impl Relay for HttpRelay {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn run(&self) -> anyhow::Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .with_context(|| format!("relay {:?} is already running", self.name()))?;

        if self.closing.load(Ordering::Relaxed) {
            return Ok(());
        }

        let bind_addr = self.state.config().bind_addr;
        let listener = listener.with_context(|| format!("failed to listen on {bind_addr}"))?;

        self.spawn_background();

        relay_log::info!("spawning http server");
        relay_log::info!("  listening on http://{}/", listener.local_addr()?);
        relay_statsd::metric!(counter(RelayCounters::ServerStarting) += 1);

        let app = make_app(self.state.clone());
        let result = serve(listener, app, self.handle.clone()).await;
        self.cancel.cancel();

        result.with_context(|| format!("relay {:?} failed to serve", self.name()))
    }

    fn stop(&self) {
        if self.closing.swap(true, Ordering::Relaxed) {
            return;
        }

        relay_log::info!("stopping relay {:?}", self.name());
        self.cancel.cancel();
        self.handle.graceful_shutdown(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: serde_json::Value) -> HttpRelayConfig {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_tls_not_supported() {
        let result = HttpRelay::new(config(serde_json::json!({
            "bind_addr": "127.0.0.1:0",
            "ssl_combined_pem": "/etc/relay/cert.pem",
        })));
        assert!(matches!(result, Err(ServerError::TlsNotSupported)));
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap();

        let relay = HttpRelay::new(config(serde_json::json!({ "bind_addr": addr }))).unwrap();
        assert_eq!(relay.local_addr(), None);

        let error = relay.run().await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ServerError>(),
            Some(ServerError::BindFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_before_run() {
        let relay = HttpRelay::new(config(serde_json::json!({
            "name": "r1",
            "bind_addr": "127.0.0.1:0",
        })))
        .unwrap();

        relay.stop();
        relay.run().await.unwrap();
        assert!(relay.run().await.is_err());
    }

    #[tokio::test]
    async fn test_run_and_stop() {
        let relay = std::sync::Arc::new(
            HttpRelay::new(config(serde_json::json!({ "bind_addr": "127.0.0.1:0" }))).unwrap(),
        );
        let addr = relay.local_addr().unwrap();
        assert_eq!(relay.name(), "http://127.0.0.1:0");
        assert_ne!(addr.port(), 0);

        let task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run().await }
        });

        let response = reqwest::get(format!("http://{addr}/ping")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["x-influxdb-version"], "relay");

        relay.stop();
        task.await.unwrap().unwrap();
    }
}
