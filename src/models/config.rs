use crate::proxy::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest accepted bound on one upstream exchange
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Longest accepted gap between credential refreshes
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Where forwarded completions go and what they default to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the real completion endpoint, e.g. `https://llm.internal/v1`
    #[serde(default)]
    pub base_url: String,
    /// Model used when the caller does not name one
    #[serde(default = "default_model")]
    pub model: String,
    /// Token ceiling inserted when the caller does not set one
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default)]
    pub wire_api: WireApi,
    /// Extra query string some gateways require (without the leading `?`)
    #[serde(default)]
    pub query_params: Option<String>,
}

/// Client-credentials grant settings
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Skip the network entirely and hand out a synthetic credential
    #[serde(default)]
    pub mock_mode: bool,
    /// Seconds between background refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("mock_mode", &self.mock_mode)
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

/// Request/response schema spoken by the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WireApi {
    /// `POST /chat/completions`
    #[default]
    Chat,
    /// `POST /responses`
    Responses,
}

impl WireApi {
    pub fn path(self) -> &'static str {
        match self {
            WireApi::Chat => "chat/completions",
            WireApi::Responses => "responses",
        }
    }
}

impl FromStr for WireApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" | "chat_completions" => Ok(WireApi::Chat),
            "responses" => Ok(WireApi::Responses),
            other => Err(format!("unknown wire api '{}' (expected chat or responses)", other)),
        }
    }
}

impl fmt::Display for WireApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireApi::Chat => f.write_str("chat"),
            WireApi::Responses => f.write_str("responses"),
        }
    }
}

fn default_model() -> String {
    "gpt-4-internal".to_string()
}

fn default_max_tokens() -> u64 {
    4096
}

fn default_refresh_interval() -> u64 {
    900 // 15 minutes
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            wire_api: WireApi::default(),
            query_params: None,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            mock_mode: false,
            refresh_interval: default_refresh_interval(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            oauth: OAuthConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }

    /// Reject combinations that would only fail later, at request time
    pub fn validate(&self) -> Result<(), String> {
        if !self.oauth.mock_mode {
            if self.upstream.base_url.trim().is_empty() {
                return Err("upstream base_url is required unless mock_mode is on".to_string());
            }
            if self.oauth.endpoint.trim().is_empty() || self.oauth.client_id.trim().is_empty() {
                return Err(
                    "oauth endpoint and client_id are required unless mock_mode is on".to_string(),
                );
            }
        }
        if !self.upstream.base_url.trim().is_empty() {
            url::Url::parse(&self.upstream.base_url).map_err(|e| {
                format!("invalid upstream base_url '{}': {}", self.upstream.base_url, e)
            })?;
        }
        if !(1..=MAX_REFRESH_INTERVAL_SECS).contains(&self.oauth.refresh_interval) {
            return Err(format!(
                "refresh_interval must be between 1 and {} seconds",
                MAX_REFRESH_INTERVAL_SECS
            ));
        }
        if !(1..=MAX_REQUEST_TIMEOUT_SECS).contains(&self.proxy.request_timeout) {
            return Err(format!(
                "request_timeout must be between 1 and {} seconds",
                MAX_REQUEST_TIMEOUT_SECS
            ));
        }
        if self.proxy.history_capacity == 0 {
            return Err("history_capacity must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}
