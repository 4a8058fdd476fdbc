use crate::error::{AppError, AppResult};
use crate::proxy::config::{ProxyConfig, UpstreamProxyConfig};
use reqwest::{Certificate, Client, Proxy};
use std::path::Path;
use std::time::Duration;

/// Create an HTTP client honoring the outbound proxy and custom CA settings.
///
/// `timeout` is the whole-request ceiling enforced by reqwest; pass `None`
/// when the caller enforces its own bound (the forwarding path does).
pub fn create_client(config: &ProxyConfig, timeout: Option<Duration>) -> AppResult<Client> {
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(15));

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy) = build_proxy(&config.upstream_proxy) {
        builder = builder.proxy(proxy);
    }

    if let Some(path) = &config.ca_bundle {
        for cert in load_ca_bundle(path)? {
            builder = builder.add_root_certificate(cert);
        }
        tracing::info!("Trusting additional CA bundle: {}", path.display());
    }

    builder
        .build()
        .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))
}

fn build_proxy(config: &UpstreamProxyConfig) -> Option<Proxy> {
    if !config.enabled || config.url.is_empty() {
        return None;
    }
    match Proxy::all(&config.url) {
        Ok(proxy) => {
            tracing::info!("HTTP client upstream proxy enabled: {}", config.url);
            Some(proxy)
        }
        Err(e) => {
            tracing::error!("Invalid proxy address: {}, error: {}", config.url, e);
            None
        }
    }
}

fn load_ca_bundle(path: &Path) -> AppResult<Vec<Certificate>> {
    let pem = std::fs::read(path).map_err(|e| {
        AppError::Config(format!("Failed to read CA bundle {}: {}", path.display(), e))
    })?;
    let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
        AppError::Config(format!("Invalid CA bundle {}: {}", path.display(), e))
    })?;
    if certs.is_empty() {
        return Err(AppError::Config(format!(
            "CA bundle {} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_disabled_proxy_is_ignored() {
        let config = UpstreamProxyConfig {
            enabled: false,
            url: "http://127.0.0.1:3128".to_string(),
        };
        assert!(build_proxy(&config).is_none());
    }

    #[test]
    fn test_missing_ca_bundle_is_config_error() {
        let config = ProxyConfig {
            ca_bundle: Some("/nonexistent/bundle.pem".into()),
            ..ProxyConfig::default()
        };
        let err = create_client(&config, None).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_empty_ca_bundle_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let config = ProxyConfig {
            ca_bundle: Some(file.path().to_path_buf()),
            ..ProxyConfig::default()
        };
        assert!(create_client(&config, None).is_err());
    }

    #[test]
    fn test_default_client_builds() {
        assert!(create_client(&ProxyConfig::default(), Some(Duration::from_secs(5))).is_ok());
    }
}
