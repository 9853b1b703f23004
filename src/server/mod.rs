//! Dual-transport lifecycle with signal-driven graceful shutdown.

pub mod health;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router as RpcRouter;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};
use tracing::{error, info, warn};

use crate::error::ChassisError;

/// Paths for mutual TLS on the RPC listener.
#[derive(Debug, Clone)]
pub struct MtlsConfig {
    /// CA bundle client certificates must chain to.
    pub ca_cert: PathBuf,
    /// Server certificate.
    pub server_cert: PathBuf,
    /// Server private key.
    pub server_key: PathBuf,
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind address; `None` disables the HTTP listener.
    pub http_addr: Option<SocketAddr>,
    /// RPC bind address; `None` disables the RPC listener.
    pub rpc_addr: Option<SocketAddr>,
    /// Per-request deadline for the HTTP stack
    /// (see [`middleware::timeout`](crate::middleware::timeout)).
    pub http_request_timeout: Duration,
    /// Window granted to in-flight work during graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Mutual TLS for the RPC listener.
    pub mtls: Option<MtlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: None,
            rpc_addr: None,
            http_request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            mtls: None,
        }
    }
}

/// Coordinates both listeners: either may be absent, both drain gracefully,
/// and a listener failure is fatal for the pair.
pub struct Server {
    config: ServerConfig,
    http: Option<axum::Router>,
    rpc: Option<RpcRouter>,
}

impl Server {
    /// Bundles the configured listeners.
    pub fn new(config: ServerConfig, http: Option<axum::Router>, rpc: Option<RpcRouter>) -> Self {
        Self { config, http, rpc }
    }

    /// A tonic server builder honouring the mTLS configuration; callers add
    /// their services and hand the resulting router to [`Server::new`].
    pub fn rpc_builder(config: &ServerConfig) -> Result<tonic::transport::Server, ChassisError> {
        let mut builder = tonic::transport::Server::builder();
        if let Some(mtls) = &config.mtls {
            info!("enabling mutual TLS on the RPC listener");
            let cert = std::fs::read(&mtls.server_cert)?;
            let key = std::fs::read(&mtls.server_key)?;
            let ca = std::fs::read(&mtls.ca_cert)?;
            let tls = ServerTlsConfig::new()
                .identity(Identity::from_pem(cert, key))
                .client_ca_root(Certificate::from_pem(ca));
            builder = builder
                .tls_config(tls)
                .map_err(|err| ChassisError::Internal(anyhow::anyhow!("tls config: {err}")))?;
        }
        Ok(builder)
    }

    /// Runs until `shutdown` resolves (graceful path) or a listener fails
    /// (fatal path).
    ///
    /// On the graceful path both listeners stop accepting, in-flight HTTP
    /// responses and active RPC streams get the configured drain window, and
    /// stragglers are aborted when the window closes.
    pub async fn start<F>(self, shutdown: F) -> Result<(), ChassisError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { config, http, rpc } = self;
        if http.is_none() && rpc.is_none() {
            return Err(ChassisError::InvalidInput {
                reason: "at least one listener must be configured".to_string(),
            });
        }

        let drain = CancellationToken::new();
        let mut listeners: JoinSet<Result<(), ChassisError>> = JoinSet::new();

        if let Some(router) = http {
            let addr = config.http_addr.ok_or_else(|| ChassisError::InvalidInput {
                reason: "http router supplied but no http address configured".to_string(),
            })?;
            let listener = TcpListener::bind(addr).await?;
            let token = drain.clone();
            info!(addr = %addr, "http listener starting");
            listeners.spawn(async move {
                axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(token.cancelled_owned())
                .await
                .map_err(ChassisError::from)
            });
        }

        if let Some(router) = rpc {
            let addr = config.rpc_addr.ok_or_else(|| ChassisError::InvalidInput {
                reason: "rpc router supplied but no rpc address configured".to_string(),
            })?;
            let token = drain.clone();
            info!(addr = %addr, "rpc listener starting");
            listeners.spawn(async move {
                router
                    .serve_with_shutdown(addr, token.cancelled_owned())
                    .await
                    .map_err(|err| ChassisError::Internal(anyhow::anyhow!("rpc server: {err}")))
            });
        }

        let early_exit = tokio::select! {
            _ = shutdown => None,
            finished = listeners.join_next() => Some(finished),
        };
        drain.cancel();

        match early_exit {
            None => {
                info!("shutdown requested, draining listeners");
                let window = config.shutdown_timeout;
                let drained = tokio::time::timeout(window, async {
                    while let Some(result) = listeners.join_next().await {
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => warn!(error = %err, "listener error during drain"),
                            Err(err) => warn!(error = %err, "listener task failed during drain"),
                        }
                    }
                })
                .await;
                if drained.is_err() {
                    warn!(
                        window_secs = window.as_secs(),
                        "drain window elapsed, aborting stragglers"
                    );
                    listeners.abort_all();
                }
                info!("shutdown complete");
                Ok(())
            }
            Some(finished) => {
                listeners.abort_all();
                match finished {
                    Some(Ok(Ok(()))) | None => {
                        warn!("listener exited unexpectedly without error");
                        Ok(())
                    }
                    Some(Ok(Err(err))) => {
                        error!(error = %err, "listener failed");
                        Err(err)
                    }
                    Some(Err(join_err)) => {
                        error!(error = %join_err, "listener task panicked");
                        Err(ChassisError::Internal(anyhow::anyhow!(
                            "listener task panicked: {join_err}"
                        )))
                    }
                }
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM; the usual argument to [`Server::start`].
pub async fn wait_for_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("interrupt received, initiating shutdown"),
        _ = terminate => info!("SIGTERM received, initiating shutdown"),
    }
}
