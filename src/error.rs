use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialFetchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),
}

// Serialized as a plain message so it can be embedded in status payloads
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failure talking to the client-credentials token endpoint.
///
/// The variants keep transport failures, client-side rejections (4xx) and
/// server-side failures apart so the refresh loop can log them distinctly.
#[derive(Error, Debug)]
pub enum CredentialFetchError {
    #[error("token endpoint unreachable: {0}")]
    Network(#[source] reqwest::Error),

    #[error("token endpoint rejected the client credentials (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token endpoint failed (HTTP {status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl CredentialFetchError {
    /// Classify a non-2xx status from the token endpoint.
    pub fn from_status(status: u16, body: String) -> Self {
        if (400..500).contains(&status) {
            Self::Rejected { status, body }
        } else {
            Self::Unavailable { status, body }
        }
    }
}

/// Failure on the forwarding path, rendered to the caller.
///
/// Everything except `Upstream` is synthesized in the OpenAI error shape;
/// upstream errors are relayed with their own status and body.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("upstream credential not ready")]
    NotReady,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("upstream returned HTTP {status}")]
    Upstream {
        status: u16,
        body: Bytes,
        content_type: Option<String>,
    },

    #[error("upstream did not respond within {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("upstream transport failed: {0}")]
    Transport(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::NotReady => "service_unavailable",
            ProxyError::MalformedRequest(_) => "invalid_request_error",
            ProxyError::Upstream { .. } => "upstream_error",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Transport(_) => "transport_error",
        }
    }

    /// Body as text for the exchange record. Synthesized errors use the
    /// `{"error": {...}}` shape; upstream bodies are decoded lossily.
    pub fn body(&self) -> String {
        match self {
            ProxyError::Upstream { body, .. } => String::from_utf8_lossy(body).into_owned(),
            other => json!({
                "error": {
                    "message": other.to_string(),
                    "type": other.error_type(),
                    "code": other.status_code().as_u16(),
                }
            })
            .to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let content_type = match &self {
            ProxyError::Upstream {
                content_type: Some(ct),
                ..
            } => HeaderValue::from_str(ct)
                .unwrap_or_else(|_| HeaderValue::from_static("application/json")),
            _ => HeaderValue::from_static("application/json"),
        };
        let mut response = match self {
            // Relayed byte for byte
            ProxyError::Upstream { body, .. } => (status, body).into_response(),
            other => (status, other.body()).into_response(),
        };
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
        response
    }
}
