use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::models::{AppConfig, WireApi};

const DATA_DIR: &str = ".llm_bridge";
const CONFIG_FILE: &str = "config.json";
/// Overrides the data directory, mostly for containers and tests
const DATA_DIR_ENV: &str = "LLM_BRIDGE_HOME";

/// Get data directory path, creating it if needed
pub fn get_data_dir() -> AppResult<PathBuf> {
    let data_dir = match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .ok_or_else(|| AppError::Config("Failed to get user home directory".to_string()))?
            .join(DATA_DIR),
    };

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

pub fn get_log_dir() -> AppResult<PathBuf> {
    let log_dir = get_data_dir()?.join("logs");
    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }
    Ok(log_dir)
}

/// Load application config: `<data dir>/config.json`, then environment overrides
pub fn load_app_config() -> AppResult<AppConfig> {
    let config_path = get_data_dir()?.join(CONFIG_FILE);
    let mut config = load_or_seed_config_file(&config_path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Missing file means defaults
pub fn load_config_file(path: &Path) -> AppResult<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::new());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        AppError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Like [`load_config_file`], but a missing file is seeded with the defaults
/// so there is something to edit. Failing to write the seed is not fatal.
pub fn load_or_seed_config_file(path: &Path) -> AppResult<AppConfig> {
    if path.exists() {
        return load_config_file(path);
    }

    let config = AppConfig::new();
    match save_config_file(path, &config) {
        Ok(()) => tracing::info!("Wrote default config to {}", path.display()),
        Err(e) => tracing::warn!("Could not write default config to {}: {}", path.display(), e),
    }
    Ok(config)
}

pub fn save_config_file(path: &Path, config: &AppConfig) -> AppResult<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Apply the environment variables the launcher scripts set.
/// Empty values are ignored; unparseable ones are an error.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> AppResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = var("LLM_API_BASE_URL") {
        config.upstream.base_url = v;
    }
    if let Some(v) = var("LLM_MODEL_NAME") {
        config.upstream.model = v;
    }
    if let Some(v) = var("MAX_TOKENS") {
        config.upstream.max_tokens = parse("MAX_TOKENS", &v)?;
    }
    if let Some(v) = var("WIRE_API") {
        config.upstream.wire_api = WireApi::from_str(&v).map_err(AppError::Config)?;
    }
    if let Some(v) = var("QUERY_PARAMS") {
        config.upstream.query_params = Some(v);
    }
    if let Some(v) = var("TOKEN_REFRESH_INTERVAL") {
        config.oauth.refresh_interval = parse("TOKEN_REFRESH_INTERVAL", &v)?;
    }
    if let Some(v) = var("MOCK_MODE") {
        config.oauth.mock_mode = parse_flag("MOCK_MODE", &v)?;
    }
    if let Some(v) = var("OAUTH_ENDPOINT") {
        config.oauth.endpoint = v;
    }
    if let Some(v) = var("OAUTH_CLIENT_ID") {
        config.oauth.client_id = v;
    }
    if let Some(v) = var("OAUTH_CLIENT_SECRET") {
        config.oauth.client_secret = v;
    }
    if let Some(v) = var("PROXY_PORT") {
        config.proxy.port = parse("PROXY_PORT", &v)?;
    }
    if let Some(v) = var("REQUEST_TIMEOUT") {
        config.proxy.request_timeout = parse("REQUEST_TIMEOUT", &v)?;
    }
    if let Some(v) = var("CA_BUNDLE") {
        config.proxy.ca_bundle = Some(PathBuf::from(v));
    }
    if let Some(v) = var("STREAMING_PASSTHROUGH") {
        config.proxy.streaming_passthrough = parse_flag("STREAMING_PASSTHROUGH", &v)?;
    }

    Ok(())
}

fn parse<T: FromStr>(name: &str, value: &str) -> AppResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("{}={:?}: {}", name, value, e)))
}

fn parse_flag(name: &str, value: &str) -> AppResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!(
            "{}={:?}: expected true or false",
            name, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_overrides_apply_on_top_of_file() {
        let mut config = AppConfig::new();
        config.upstream.model = "from-file".to_string();

        apply_env_overrides(
            &mut config,
            env(&[
                ("LLM_API_BASE_URL", "https://llm.example.com/v1"),
                ("MAX_TOKENS", "8192"),
                ("WIRE_API", "responses"),
                ("QUERY_PARAMS", "api-version=1"),
                ("TOKEN_REFRESH_INTERVAL", "600"),
                ("MOCK_MODE", "true"),
                ("PROXY_PORT", "9000"),
                ("STREAMING_PASSTHROUGH", "1"),
                ("LLM_MODEL_NAME", ""),
            ]),
        )
        .unwrap();

        assert_eq!(config.upstream.base_url, "https://llm.example.com/v1");
        assert_eq!(config.upstream.model, "from-file");
        assert_eq!(config.upstream.max_tokens, 8192);
        assert_eq!(config.upstream.wire_api, WireApi::Responses);
        assert_eq!(config.upstream.query_params.as_deref(), Some("api-version=1"));
        assert_eq!(config.oauth.refresh_interval, 600);
        assert!(config.oauth.mock_mode);
        assert_eq!(config.proxy.port, 9000);
        assert!(config.proxy.streaming_passthrough);
    }

    #[test]
    fn test_bad_env_values_are_rejected() {
        let mut config = AppConfig::new();
        assert!(apply_env_overrides(&mut config, env(&[("MAX_TOKENS", "lots")])).is_err());
        assert!(apply_env_overrides(&mut config, env(&[("MOCK_MODE", "maybe")])).is_err());
        assert!(apply_env_overrides(&mut config, env(&[("WIRE_API", "grpc")])).is_err());
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let missing = load_config_file(&path).unwrap();
        assert_eq!(missing.proxy.port, 8889);

        let mut config = AppConfig::new();
        config.oauth.client_id = "client".to_string();
        config.proxy.request_timeout = 30;
        save_config_file(&path, &config).unwrap();

        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded.oauth.client_id, "client");
        assert_eq!(loaded.proxy.request_timeout, 30);
    }

    #[test]
    fn test_missing_config_file_is_seeded_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let config = load_or_seed_config_file(&path).unwrap();
        assert_eq!(config.proxy.port, 8889);
        assert!(path.exists());

        let mut edited = load_config_file(&path).unwrap();
        edited.proxy.port = 9100;
        save_config_file(&path, &edited).unwrap();
        assert_eq!(load_or_seed_config_file(&path).unwrap().proxy.port, 9100);
    }

    #[test]
    fn test_unwritable_seed_still_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-subdir").join(CONFIG_FILE);

        let config = load_or_seed_config_file(&path).unwrap();
        assert_eq!(config.proxy.history_capacity, 300);
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"{"upstream": {"base_url": "https://x"}, "oauth": {"mock_mode": true}}"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.upstream.max_tokens, 4096);
        assert_eq!(config.oauth.refresh_interval, 900);
        assert_eq!(config.proxy.history_capacity, 300);
    }
}
