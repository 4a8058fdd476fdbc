use crate::error::CredentialFetchError;
use crate::models::{Credential, OAuthConfig};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Placeholder handed out in mock mode
pub const MOCK_TOKEN: &str =
    "mock_token_for_local_development_xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";

/// Lifetime of a synthetic credential. Outlives the default refresh interval.
pub const MOCK_TTL: Duration = Duration::from_secs(1200);

/// Assumed lifetime when the token endpoint omits `expires_in`
const DEFAULT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    pub token_type: String,
}

impl TokenResponse {
    /// Lenient parse: some gateways send `expires_in` as a string
    pub fn from_json(value: &Value) -> Result<Self, CredentialFetchError> {
        let access_token = value
            .get("access_token")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CredentialFetchError::InvalidResponse("no access_token in response".to_string())
            })?
            .to_string();

        let expires_in = match value.get("expires_in") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(DEFAULT_TTL_SECS);

        let token_type = value
            .get("token_type")
            .and_then(|v| v.as_str())
            .unwrap_or("Bearer")
            .to_string();

        Ok(Self {
            access_token,
            expires_in,
            token_type,
        })
    }

    pub fn into_credential(self, issued_at: DateTime<Utc>) -> Credential {
        Credential::new(
            self.access_token,
            issued_at,
            Duration::from_secs(self.expires_in),
            false,
        )
    }
}

/// Client-credentials grant against the configured token endpoint
pub async fn request_client_credentials(
    client: &Client,
    config: &OAuthConfig,
) -> Result<TokenResponse, CredentialFetchError> {
    let params = [
        ("grant_type", "client_credentials"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
    ];

    tracing::debug!("Requesting OAuth token from {}", config.endpoint);

    let response = client
        .post(&config.endpoint)
        .form(&params)
        .send()
        .await
        .map_err(CredentialFetchError::Network)?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(CredentialFetchError::from_status(status.as_u16(), error_text));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| CredentialFetchError::InvalidResponse(e.to_string()))?;
    let token = TokenResponse::from_json(&body)?;

    tracing::info!(
        "Token obtained: type={}, expires_in={}s",
        token.token_type,
        token.expires_in
    );
    Ok(token)
}

/// Synthetic credential for offline runs
pub fn mock_credential(issued_at: DateTime<Utc>) -> Credential {
    Credential::new(MOCK_TOKEN, issued_at, MOCK_TTL, true)
}
