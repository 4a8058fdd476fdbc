use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Local listener and outbound network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Whether other machines on the LAN may connect
    /// - false: bind 127.0.0.1 only (default)
    /// - true: bind 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// Listening port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on one upstream exchange (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Relay `stream: true` requests as SSE instead of forcing a buffered reply
    #[serde(default)]
    pub streaming_passthrough: bool,

    /// How many finished exchanges stay in memory
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// PEM bundle trusted in addition to the system roots
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,

    /// Upstream proxy configuration
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

/// Outbound HTTP proxy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    pub enabled: bool,
    /// Proxy address (http://, https://, socks5://)
    pub url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: default_port(),
            request_timeout: default_request_timeout(),
            streaming_passthrough: false,
            history_capacity: default_history_capacity(),
            ca_bundle: None,
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    8889
}

fn default_request_timeout() -> u64 {
    120
}

fn default_history_capacity() -> usize {
    300
}

impl ProxyConfig {
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}
