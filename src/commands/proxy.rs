use crate::error::{AppError, AppResult};
use crate::models::{AggregateStatus, AppConfig, WireApi};
use crate::modules::clock::{system_clock, SharedClock};
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::{
    AppState, AxumServer, CredentialManager, ExchangeLog, StatusAggregator, TokenStore,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Timeout for the token endpoint; upstream calls are bounded per exchange
const OAUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy service status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub running: bool,
    pub port: u16,
    pub base_url: String,
    pub wire_api: Option<WireApi>,
    pub mock_mode: bool,
    pub credential_ready: bool,
}

impl ProxyStatus {
    fn stopped() -> Self {
        Self {
            running: false,
            port: 0,
            base_url: String::new(),
            wire_api: None,
            mock_mode: false,
            credential_ready: false,
        }
    }
}

/// Knobs that are not part of the persisted configuration
#[derive(Clone)]
pub struct ServiceOptions {
    /// Directory for the per-session exchange file; `None` keeps history in memory only
    pub exchange_log_dir: Option<PathBuf>,
    pub clock: SharedClock,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            exchange_log_dir: None,
            clock: system_clock(),
        }
    }
}

/// Proxy service global state
pub struct ProxyServiceState {
    pub instance: Arc<RwLock<Option<ProxyServiceInstance>>>,
}

/// Proxy service instance
pub struct ProxyServiceInstance {
    pub config: Arc<AppConfig>,
    pub credentials: Arc<CredentialManager>,
    pub log: Arc<ExchangeLog>,
    pub stats: StatusAggregator,
    pub axum_server: AxumServer,
    pub server_handle: tokio::task::JoinHandle<()>,
}

impl ProxyServiceState {
    pub fn new() -> Self {
        Self {
            instance: Arc::new(RwLock::new(None)),
        }
    }
}

impl Default for ProxyServiceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Start proxy service
///
/// Order matters: the first credential is fetched before the listener is
/// bound, so no request is ever accepted without one.
pub async fn start_proxy_service(
    state: &ProxyServiceState,
    config: AppConfig,
    options: ServiceOptions,
) -> AppResult<ProxyStatus> {
    let mut instance_lock = state.instance.write().await;

    // Prevent duplicate start
    if instance_lock.is_some() {
        return Err(AppError::Server("Service is already running".to_string()));
    }

    config.validate().map_err(AppError::Config)?;
    let config = Arc::new(config);

    // 1. Credential lifecycle
    let oauth_http = crate::utils::http::create_client(&config.proxy, Some(OAUTH_TIMEOUT))?;
    let store = TokenStore::new();
    let credentials = Arc::new(CredentialManager::new(
        config.oauth.clone(),
        oauth_http,
        store.clone(),
        options.clock.clone(),
    ));
    credentials
        .start(Duration::from_secs(config.oauth.refresh_interval))
        .await?;

    // 2. Exchange history
    let log = Arc::new(ExchangeLog::open(
        config.proxy.history_capacity,
        options.exchange_log_dir.as_deref(),
        options.clock.clone(),
    ));

    // 3. Listener
    let upstream = match UpstreamClient::new(&config.upstream, &config.proxy) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            credentials.stop().await;
            return Err(e);
        }
    };
    let stats = StatusAggregator::new(log.clone(), credentials.clone());
    let app_state = AppState {
        config: config.clone(),
        store,
        log: log.clone(),
        upstream,
        stats: stats.clone(),
    };

    let (axum_server, server_handle) = match AxumServer::start(
        config.proxy.get_bind_address().to_string(),
        config.proxy.port,
        app_state,
        Duration::from_secs(config.proxy.request_timeout),
    )
    .await
    {
        Ok(started) => started,
        Err(e) => {
            credentials.stop().await;
            return Err(e);
        }
    };

    let port = axum_server.local_addr().port();
    tracing::info!(
        "Proxy service running on port {} -> {} ({})",
        port,
        config.upstream.base_url,
        config.upstream.wire_api
    );

    let instance = ProxyServiceInstance {
        config,
        credentials,
        log,
        stats,
        axum_server,
        server_handle,
    };
    let status = status_of(&instance);
    *instance_lock = Some(instance);

    Ok(status)
}

/// Stop proxy service
///
/// Listener first (in-flight requests drain), then the refresh task, then
/// the exchange file is flushed.
pub async fn stop_proxy_service(state: &ProxyServiceState) -> AppResult<()> {
    let mut instance_lock = state.instance.write().await;

    let Some(instance) = instance_lock.take() else {
        return Err(AppError::Server("Service is not running".to_string()));
    };

    instance.axum_server.stop();
    // Wait for server task to complete
    if let Err(e) = instance.server_handle.await {
        tracing::error!("Server task ended abnormally: {}", e);
    }
    instance.credentials.stop().await;
    instance.log.flush().await;

    tracing::info!("Proxy service stopped");
    Ok(())
}

/// Get proxy service status
pub async fn get_proxy_status(state: &ProxyServiceState) -> ProxyStatus {
    let instance_lock = state.instance.read().await;
    match instance_lock.as_ref() {
        Some(instance) => status_of(instance),
        None => ProxyStatus::stopped(),
    }
}

/// Get proxy service statistics; `None` while stopped
pub async fn get_proxy_stats(state: &ProxyServiceState) -> Option<AggregateStatus> {
    let instance_lock = state.instance.read().await;
    instance_lock.as_ref().map(|instance| instance.stats.snapshot())
}

fn status_of(instance: &ProxyServiceInstance) -> ProxyStatus {
    let addr = instance.axum_server.local_addr();
    ProxyStatus {
        running: true,
        port: addr.port(),
        base_url: format!("http://{}", addr),
        wire_api: Some(instance.config.upstream.wire_api),
        mock_mode: instance.config.oauth.mock_mode,
        credential_ready: instance.credentials.store().is_ready(),
    }
}
