use crate::error::CredentialFetchError;
use crate::models::config::MAX_REFRESH_INTERVAL_SECS;
use crate::models::{Credential, OAuthConfig};
use crate::modules::clock::SharedClock;
use crate::modules::oauth;
use crate::proxy::token_store::TokenStore;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);
const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(MAX_REFRESH_INTERVAL_SECS);

/// Last-fetch bookkeeping read by the status aggregator
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RefreshStatus {
    pub mock_mode: bool,
    pub interval_secs: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub next_refresh_at: Option<DateTime<Utc>>,
    /// Successful fetches, the initial one included
    pub refresh_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

struct Inner {
    config: OAuthConfig,
    http: Client,
    store: TokenStore,
    clock: SharedClock,
    status: RwLock<RefreshStatus>,
}

struct RefreshTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Fetches the upstream credential and keeps it fresh on a fixed cadence.
///
/// Refresh is time-based: the downstream CLI gives no signal about expiry,
/// so a new credential is fetched every `refresh_interval` regardless of TTL.
pub struct CredentialManager {
    inner: Arc<Inner>,
    task: Mutex<Option<RefreshTask>>,
}

impl CredentialManager {
    pub fn new(config: OAuthConfig, http: Client, store: TokenStore, clock: SharedClock) -> Self {
        let status = RefreshStatus {
            mock_mode: config.mock_mode,
            ..RefreshStatus::default()
        };
        Self {
            inner: Arc::new(Inner {
                config,
                http,
                store,
                clock,
                status: RwLock::new(status),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn status(&self) -> RefreshStatus {
        read_lock(&self.inner.status).clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// One token exchange. Does not touch the store.
    pub async fn fetch_once(&self) -> Result<Credential, CredentialFetchError> {
        self.inner.fetch_once().await
    }

    /// Fetch synchronously, publish the credential, then refresh every
    /// `refresh_interval` in the background until [`stop`](Self::stop).
    ///
    /// An initial failure is returned and nothing is spawned: the proxy must
    /// not accept traffic without a credential.
    pub async fn start(
        &self,
        refresh_interval: Duration,
    ) -> Result<Arc<Credential>, CredentialFetchError> {
        self.stop().await;
        let refresh_interval = refresh_interval.clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL);

        {
            let mut status = write_lock(&self.inner.status);
            status.interval_secs = refresh_interval.as_secs();
        }

        self.inner.refresh(refresh_interval).await?;
        let current = self.inner.store.read().ok_or_else(|| {
            CredentialFetchError::InvalidResponse("credential not stored".to_string())
        })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let handle = tokio::spawn(refresh_loop(inner, refresh_interval, stop_rx));

        *self.task.lock().await = Some(RefreshTask { stop_tx, handle });

        tracing::info!(
            "Token refresh task started (interval: {}s, mock: {})",
            refresh_interval.as_secs(),
            self.inner.config.mock_mode
        );
        Ok(current)
    }

    /// Signal the refresh task and wait for it to exit.
    /// An in-flight fetch is allowed to finish first.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        let _ = task.stop_tx.send(true);
        if let Err(e) = task.handle.await {
            tracing::error!("Token refresh task ended abnormally: {}", e);
        }
        write_lock(&self.inner.status).next_refresh_at = None;
        tracing::info!("Token refresh task stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}

impl Inner {
    async fn fetch_once(&self) -> Result<Credential, CredentialFetchError> {
        if self.config.mock_mode {
            tracing::debug!("Mock mode: issuing synthetic credential");
            return Ok(oauth::mock_credential(self.clock.now()));
        }
        let token = oauth::request_client_credentials(&self.http, &self.config).await?;
        Ok(token.into_credential(self.clock.now()))
    }

    /// Fetch and publish. On failure the previous credential stays in place.
    async fn refresh(&self, interval: Duration) -> Result<(), CredentialFetchError> {
        let result = self.fetch_once().await;
        let now = self.clock.now();
        let next = chrono::Duration::from_std(interval)
            .ok()
            .and_then(|d| now.checked_add_signed(d));

        let mut status = write_lock(&self.status);
        status.next_refresh_at = next;
        match result {
            Ok(credential) => {
                self.store.write(credential);
                status.last_refresh_at = Some(now);
                status.refresh_count += 1;
                status.last_error = None;
                Ok(())
            }
            Err(e) => {
                status.failure_count += 1;
                status.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

async fn refresh_loop(inner: Arc<Inner>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    // `interval` is clamped by `start`, so this cannot overflow
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                tracing::info!("Refreshing OAuth token...");
                match inner.refresh(interval).await {
                    Ok(()) => tracing::info!("OAuth token refreshed successfully"),
                    Err(e) => tracing::warn!(
                        "Failed to refresh OAuth token, keeping previous credential: {}",
                        e
                    ),
                }
            }
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
