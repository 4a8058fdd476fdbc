use super::config::{AppConfig, WireApi};
use super::exchange::ExchangeRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Derived view over the exchange history and the credential bookkeeping.
/// Recomputed on every poll, never stored.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggregateStatus {
    pub session_id: String,
    pub session_started_at: DateTime<Utc>,
    pub uptime_secs: u64,

    pub total_requests: u64,
    pub in_flight: u64,
    pub successes: u64,
    pub truncated: u64,
    pub total_errors: u64,
    pub timeouts: u64,
    pub upstream_errors: u64,
    pub transport_errors: u64,
    /// `total_errors / total_requests`; truncated successes do not count
    pub error_rate: f64,
    pub average_latency_ms: f64,

    pub credential_present: bool,
    pub credential_fresh: bool,
    pub credential_mock: bool,
    pub credential_expires_at: Option<DateTime<Utc>>,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub seconds_until_next_refresh: Option<u64>,
    pub refresh_count: u64,
    pub refresh_failures: u64,
    pub last_refresh_error: Option<String>,

    pub log_file: Option<PathBuf>,
    pub log_file_error: Option<String>,
}

/// Configuration as shown on the status surface. Carries no secret.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub upstream_base_url: String,
    pub model: String,
    pub max_tokens: u64,
    pub wire_api: WireApi,
    pub query_params: Option<String>,
    pub refresh_interval_secs: u64,
    pub mock_mode: bool,
    pub oauth_endpoint: String,
    pub oauth_client_id: String,
    pub proxy_port: u16,
    pub request_timeout_secs: u64,
    pub streaming_passthrough: bool,
}

impl From<&AppConfig> for ConfigSummary {
    fn from(config: &AppConfig) -> Self {
        Self {
            upstream_base_url: config.upstream.base_url.clone(),
            model: config.upstream.model.clone(),
            max_tokens: config.upstream.max_tokens,
            wire_api: config.upstream.wire_api,
            query_params: config.upstream.query_params.clone(),
            refresh_interval_secs: config.oauth.refresh_interval,
            mock_mode: config.oauth.mock_mode,
            oauth_endpoint: config.oauth.endpoint.clone(),
            oauth_client_id: config.oauth.client_id.clone(),
            proxy_port: config.proxy.port,
            request_timeout_secs: config.proxy.request_timeout,
            streaming_passthrough: config.proxy.streaming_passthrough,
        }
    }
}

/// Payload of `GET /api/state`
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub status: AggregateStatus,
    pub config: ConfigSummary,
    /// Most recent first
    pub recent: Vec<Arc<ExchangeRecord>>,
}
