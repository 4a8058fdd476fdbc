// End-to-end: the whole service over loopback HTTP against a stub upstream
use llm_bridge::commands::{
    get_proxy_stats, start_proxy_service, stop_proxy_service, ProxyServiceState, ServiceOptions,
};
use llm_bridge::models::{AppConfig, ExchangeRecord, FinishReason, Outcome, WireApi};
use llm_bridge::modules::oauth::MOCK_TOKEN;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_config(upstream: &MockServer) -> AppConfig {
    let mut config = AppConfig::new();
    config.upstream.base_url = format!("{}/v1", upstream.uri());
    config.upstream.model = "default-model".to_string();
    config.oauth.mock_mode = true;
    config.oauth.client_secret = "never-shown".to_string();
    config.proxy.port = 0;
    config
}

async fn start(config: AppConfig, options: ServiceOptions) -> (ProxyServiceState, String) {
    let state = ProxyServiceState::new();
    let status = start_proxy_service(&state, config, options).await.unwrap();
    (state, status.base_url)
}

async fn records(state: &ProxyServiceState) -> Vec<Arc<ExchangeRecord>> {
    let instance = state.instance.read().await;
    instance.as_ref().unwrap().log.recent(100)
}

fn completion(finish_reason: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "partial answer"},
            "finish_reason": finish_reason
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 10, "total_tokens": 22}
    })
}

#[tokio::test]
async fn truncated_completion_is_a_flagged_success() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", format!("Bearer {}", MOCK_TOKEN).as_str()))
        .and(body_partial_json(json!({"model": "m", "max_tokens": 10, "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("length")))
        .expect(1)
        .mount(&upstream)
        .await;

    let (state, base) = start(mock_config(&upstream), ServiceOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .json(&json!({
            "model": "m",
            "messages": [{"role": "user", "content": "write a long essay"}],
            "max_tokens": 10
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "length");

    let records = records(&state).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.sequence_number, 1);
    assert_eq!(record.request.model, "m");
    assert_eq!(record.request.message_count, 1);
    assert_eq!(record.request.max_tokens, Some(10));
    assert!(record.truncated());
    match &record.outcome {
        Outcome::Success {
            finish_reason,
            usage,
            ..
        } => {
            assert_eq!(*finish_reason, FinishReason::Length);
            assert_eq!(usage.unwrap().total_tokens, 22);
        }
        other => panic!("expected success, got {:?}", other),
    }

    let stats = get_proxy_stats(&state).await.unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.truncated, 1);
    assert_eq!(stats.total_errors, 0);
    assert_eq!(stats.error_rate, 0.0);

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn missing_model_and_ceiling_are_filled_from_config() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "default-model", "max_tokens": 4096})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("stop")))
        .expect(1)
        .mount(&upstream)
        .await;

    let (state, base) = start(mock_config(&upstream), ServiceOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/chat/completions", base))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}], "stream": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn hung_upstream_times_out_without_blocking_other_requests() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "slow"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("stop"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "fast"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("stop")))
        .mount(&upstream)
        .await;

    let mut config = mock_config(&upstream);
    config.proxy.request_timeout = 1;
    let (state, base) = start(config, ServiceOptions::default()).await;
    let client = reqwest::Client::new();

    let slow = {
        let client = client.clone();
        let url = format!("{}/v1/chat/completions", base);
        tokio::spawn(async move {
            client
                .post(url)
                .json(&json!({"model": "slow", "messages": []}))
                .send()
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fast = client
        .post(format!("{}/v1/chat/completions", base))
        .json(&json!({"model": "fast", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(fast.status(), 200);
    assert!(!slow.is_finished());

    let slow = slow.await.unwrap();
    assert_eq!(slow.status(), 504);
    let error: Value = slow.json().await.unwrap();
    assert_eq!(error["error"]["type"], "timeout");

    let records = records(&state).await;
    assert_eq!(records.len(), 2);
    let timed_out: Vec<_> = records
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Timeout { .. }))
        .collect();
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].request.model, "slow");
    // Accepted first, finished last
    assert_eq!(timed_out[0].sequence_number, 1);
    assert_eq!(records.last().unwrap().sequence_number, 1);

    let stats = get_proxy_stats(&state).await.unwrap();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.in_flight, 0);

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn upstream_error_is_relayed_verbatim() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500)
                .insert_header("content-type", "text/plain")
                .set_body_string("upstream exploded"),
        )
        .mount(&upstream)
        .await;

    let (state, base) = start(mock_config(&upstream), ServiceOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .json(&json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "upstream exploded");

    let records = records(&state).await;
    assert_eq!(
        records[0].outcome,
        Outcome::UpstreamError {
            status_code: 500,
            body: "upstream exploded".to_string()
        }
    );

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn malformed_body_is_rejected_without_contacting_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("stop")))
        .expect(0)
        .mount(&upstream)
        .await;

    let (state, base) = start(mock_config(&upstream), ServiceOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .header("content-type", "application/json")
        .body("{\"model\": \"m\", \"messages\": [")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["error"]["type"], "invalid_request_error");

    let records = records(&state).await;
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].outcome, Outcome::TransportError { .. }));
    assert_eq!(records[0].request.raw_body, "{\"model\": \"m\", \"messages\": [");

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn responses_wire_format_with_query_params() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(query_param("api-version", "2025-01-01"))
        .and(body_partial_json(json!({"max_output_tokens": 512})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "resp_1",
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"},
            "usage": {"input_tokens": 3, "output_tokens": 512}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = mock_config(&upstream);
    config.upstream.wire_api = WireApi::Responses;
    config.upstream.max_tokens = 512;
    config.upstream.query_params = Some("api-version=2025-01-01".to_string());
    let (state, base) = start(config, ServiceOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", base))
        .json(&json!({"model": "m", "input": "summarize this"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let records = records(&state).await;
    assert!(records[0].truncated());
    assert_eq!(records[0].request.message_count, 1);

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn streaming_passthrough_relays_and_records() {
    let transcript = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":2,\"total_tokens\":4}}\n\n",
        "data: [DONE]\n\n"
    );

    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(transcript, "text/event-stream"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = mock_config(&upstream);
    config.proxy.streaming_passthrough = true;
    let (state, base) = start(config, ServiceOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .json(&json!({"model": "m", "messages": [], "stream": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(response.text().await.unwrap(), transcript);

    let records = records(&state).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].request.streaming);
    match &records[0].outcome {
        Outcome::Success {
            finish_reason,
            usage,
            raw_body,
        } => {
            assert_eq!(*finish_reason, FinishReason::Stop);
            assert_eq!(usage.unwrap().total_tokens, 4);
            assert_eq!(raw_body, transcript);
        }
        other => panic!("expected success, got {:?}", other),
    }

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn status_surface_reports_state_without_secrets() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("stop")))
        .mount(&upstream)
        .await;

    let (state, base) = start(mock_config(&upstream), ServiceOptions::default()).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        client
            .post(format!("{}/v1/chat/completions", base))
            .json(&json!({"model": "m", "messages": []}))
            .send()
            .await
            .unwrap();
    }

    let health: Value = client
        .get(format!("{}/healthz", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let raw = client
        .get(format!("{}/api/state?limit=2", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!raw.contains("never-shown"));
    let snapshot: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["status"]["total_requests"], 3);
    assert_eq!(snapshot["status"]["credential_mock"], true);
    assert_eq!(snapshot["status"]["credential_fresh"], true);
    assert_eq!(snapshot["config"]["mock_mode"], true);
    let recent = snapshot["recent"].as_array().unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0]["sequence_number"], 3);

    let exchanges: Vec<Value> = client
        .get(format!("{}/api/exchanges?limit=10", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let seqs: Vec<u64> = exchanges
        .iter()
        .map(|r| r["sequence_number"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn session_file_survives_stop() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("stop")))
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let options = ServiceOptions {
        exchange_log_dir: Some(dir.path().to_path_buf()),
        ..ServiceOptions::default()
    };
    let (state, base) = start(mock_config(&upstream), options).await;

    reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .json(&json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();
    stop_proxy_service(&state).await.unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let content = std::fs::read_to_string(&files[0]).unwrap();
    let lines: Vec<Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["kind"], "session");
    assert_eq!(lines[1]["outcome"]["finish_reason"], "stop");
    assert!(lines[1]["outcome"]["raw_body"]
        .as_str()
        .unwrap()
        .contains("partial answer"));
}

/// Reads one request, answers with the head of an event stream and one chunk, then stalls
async fn stalling_stream_upstream() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}\n\n";
        let head = concat!(
            "HTTP/1.1 200 OK\r\n",
            "content-type: text/event-stream\r\n",
            "transfer-encoding: chunked\r\n\r\n"
        );
        let reply = format!("{}{:x}\r\n{}\r\n", head, chunk.len(), chunk);
        socket.write_all(reply.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    addr
}

#[tokio::test]
async fn stream_that_stalls_midway_is_recorded_once_as_timeout() {
    let addr = stalling_stream_upstream().await;

    let mut config = AppConfig::new();
    config.upstream.base_url = format!("http://{}/v1", addr);
    config.oauth.mock_mode = true;
    config.proxy.port = 0;
    config.proxy.streaming_passthrough = true;
    config.proxy.request_timeout = 1;
    let (state, base) = start(config, ServiceOptions::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", base))
        .json(&json!({"model": "m", "messages": [], "stream": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    // The stream is cut short: either an error or a body without the end marker
    if let Ok(body) = response.text().await {
        assert!(!body.contains("[DONE]"));
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while records(&state).await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "no record written");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let records = records(&state).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].request.streaming);
    assert_eq!(records[0].outcome, Outcome::Timeout { after_secs: 1 });

    let stats = get_proxy_stats(&state).await.unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.total_errors, 1);

    stop_proxy_service(&state).await.unwrap();
}

#[tokio::test]
async fn stop_refuses_new_connections_and_drains_in_flight_exchanges() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("stop"))
                .set_delay(Duration::from_secs(1)),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let state = Arc::new(ProxyServiceState::new());
    let status = start_proxy_service(&state, mock_config(&upstream), ServiceOptions::default())
        .await
        .unwrap();
    let base = status.base_url.clone();
    let log = state.instance.read().await.as_ref().unwrap().log.clone();

    let slow = tokio::spawn(async move {
        reqwest::Client::new()
            .post(format!("{}/v1/chat/completions", base))
            .json(&json!({"model": "m", "messages": []}))
            .send()
            .await
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while log.in_flight() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "request never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stopper = {
        let state = state.clone();
        tokio::spawn(async move { stop_proxy_service(&state).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let addr = status.base_url.trim_start_matches("http://").to_string();
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    assert!(!stopper.is_finished());

    let response = slow.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "stop");

    stopper.await.unwrap().unwrap();
    let records = log.recent(10);
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].outcome, Outcome::Success { .. }));
    assert_eq!(log.in_flight(), 0);
}
