use crate::error::{AppError, AppResult};
use crate::models::AppConfig;
use crate::proxy::exchange_log::ExchangeLog;
use crate::proxy::stats::StatusAggregator;
use crate::proxy::token_store::TokenStore;
use crate::proxy::upstream::UpstreamClient;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: TokenStore,
    pub log: Arc<ExchangeLog>,
    pub upstream: Arc<UpstreamClient>,
    pub stats: StatusAggregator,
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: SocketAddr,
}

pub fn build_router(state: AppState) -> Router {
    use crate::proxy::handlers;

    Router::new()
        // Completion endpoints; the configured wire format decides how bodies are read
        .route("/chat/completions", post(handlers::completions::handle_completions))
        .route("/v1/chat/completions", post(handlers::completions::handle_completions))
        .route("/responses", post(handlers::completions::handle_completions))
        .route("/v1/responses", post(handlers::completions::handle_completions))
        // Status surface
        .route("/api/state", get(handlers::status::handle_state))
        .route("/api/exchanges", get(handlers::status::handle_exchanges))
        .route("/healthz", get(handlers::status::health_check_handler))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            crate::proxy::middleware::logging_middleware,
        ))
        .layer(crate::proxy::middleware::cors_layer())
        .with_state(state)
}

/// Serve one accepted connection until it closes, or until a drain is signalled
/// and its in-flight requests have finished
async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    service: TowerToHyperService<Router>,
    mut drain: watch::Receiver<bool>,
) {
    use hyper::server::conn::http1;
    use hyper_util::rt::TokioIo;

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);
    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(err) = res {
                    debug!(%peer, "Connection finished with error: {:?}", err);
                }
                break;
            }
            _ = drain.changed(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

impl AxumServer {
    /// Start Axum server
    ///
    /// Returns once the listener is bound. On shutdown, connections get
    /// `drain_timeout` to finish their in-flight requests before being aborted.
    pub async fn start(
        host: String,
        port: u16,
        state: AppState,
        drain_timeout: Duration,
    ) -> AppResult<(Self, tokio::task::JoinHandle<()>)> {
        let app = build_router(state);

        // Bind address
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::Server(format!("Failed to bind address {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Reverse proxy server started at http://{}", local_addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        // Fanned out to every connection so keep-alive connections close once idle
        let (drain_tx, drain_rx) = watch::channel(false);

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            local_addr,
        };

        // Start server in new task
        let handle = tokio::spawn(async move {
            let mut connections = JoinSet::new();

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, peer)) => {
                                let service = TowerToHyperService::new(app.clone());
                                let drain = drain_rx.clone();
                                connections.spawn(serve_connection(stream, peer, service, drain));
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    // Reap finished connections so the set does not grow without bound
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                    _ = &mut shutdown_rx => {
                        tracing::info!("Reverse proxy server stopped listening");
                        break;
                    }
                }
            }

            drop(listener);
            let _ = drain_tx.send(true);

            let drained = tokio::time::timeout(drain_timeout, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    "{} connection(s) still open after {}s, aborting",
                    connections.len(),
                    drain_timeout.as_secs()
                );
                connections.abort_all();
                while connections.join_next().await.is_some() {}
            }
        });

        Ok((server_instance, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
