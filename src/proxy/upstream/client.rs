// Upstream client implementation
// One reqwest client shared by every handler; the bearer is injected per call

use crate::error::AppResult;
use crate::models::{Credential, UpstreamConfig, WireApi};
use crate::proxy::config::ProxyConfig;
use reqwest::{header, Client, Response};
use serde_json::Value;

const USER_AGENT: &str = concat!("llm-bridge/", env!("CARGO_PKG_VERSION"));

pub struct UpstreamClient {
    http_client: Client,
    url: String,
}

impl UpstreamClient {
    /// No whole-request timeout on the client: the proxy bounds each exchange itself
    pub fn new(upstream: &UpstreamConfig, proxy: &ProxyConfig) -> AppResult<Self> {
        let http_client = crate::utils::http::create_client(proxy, None)?;
        Ok(Self::with_client(http_client, upstream))
    }

    pub fn with_client(http_client: Client, upstream: &UpstreamConfig) -> Self {
        Self {
            http_client,
            url: Self::build_url(
                &upstream.base_url,
                upstream.wire_api,
                upstream.query_params.as_deref(),
            ),
        }
    }

    /// Build the completion endpoint address
    ///
    /// `<base>/<wire path>[?<query>]`, tolerant of a trailing slash on the
    /// base and a leading `?` on the query.
    fn build_url(base_url: &str, wire_api: WireApi, query_params: Option<&str>) -> String {
        let base = base_url.trim_end_matches('/');
        let query = query_params
            .map(|q| q.trim().trim_start_matches('?'))
            .filter(|q| !q.is_empty());
        match query {
            Some(qs) => format!("{}/{}?{}", base, wire_api.path(), qs),
            None => format!("{}/{}", base, wire_api.path()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the body upstream with the credential as bearer.
    /// Only connection-level failures are errors; any HTTP status is returned.
    pub async fn forward(
        &self,
        credential: &Credential,
        body: &Value,
        streaming: bool,
    ) -> Result<Response, reqwest::Error> {
        let accept = if streaming {
            "text/event-stream"
        } else {
            "application/json"
        };

        self.http_client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, accept)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::AUTHORIZATION, credential.bearer())
            .json(body)
            .send()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_url() {
        let url1 = UpstreamClient::build_url("https://llm.example.com/v1", WireApi::Chat, None);
        assert_eq!(url1, "https://llm.example.com/v1/chat/completions");

        let url2 = UpstreamClient::build_url(
            "https://llm.example.com/v1/",
            WireApi::Responses,
            Some("?api-version=2025-01-01"),
        );
        assert_eq!(
            url2,
            "https://llm.example.com/v1/responses?api-version=2025-01-01"
        );

        let url3 = UpstreamClient::build_url("http://h", WireApi::Chat, Some("  "));
        assert_eq!(url3, "http://h/chat/completions");
    }

    #[tokio::test]
    async fn test_forward_injects_bearer_and_query() {
        let server = MockServer::start().await;
        let body = json!({"model": "m", "messages": []});
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(query_param("tenant", "a"))
            .and(header_eq("authorization", "Bearer tok-123"))
            .and(body_json(body.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let upstream = UpstreamConfig {
            base_url: format!("{}/v1", server.uri()),
            query_params: Some("tenant=a".to_string()),
            ..UpstreamConfig::default()
        };
        let client = UpstreamClient::with_client(Client::new(), &upstream);
        let credential = Credential::new("tok-123", Utc::now(), Duration::from_secs(60), false);

        let response = client.forward(&credential, &body, false).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}
