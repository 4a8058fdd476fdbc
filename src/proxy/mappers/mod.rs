// Wire-format mappers
// Parse inbound bodies and classify upstream replies for the configured schema

pub mod openai;
pub mod responses;

use crate::models::{FinishReason, RequestSummary, UpstreamConfig, Usage, WireApi};
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;

/// Best-effort summary; works on malformed input too so every record has one
pub fn summarize_request(wire: WireApi, raw: &[u8], parsed: Option<&Value>) -> RequestSummary {
    let raw_body = String::from_utf8_lossy(raw).into_owned();
    let Some(body) = parsed else {
        return RequestSummary {
            model: "unknown".to_string(),
            message_count: 0,
            max_tokens: None,
            streaming: false,
            raw_body,
        };
    };

    let (message_count, max_tokens) = match wire {
        WireApi::Chat => (openai::message_count(body), openai::max_tokens(body)),
        WireApi::Responses => (responses::message_count(body), responses::max_tokens(body)),
    };

    RequestSummary {
        model: body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string(),
        message_count,
        max_tokens,
        streaming: wants_stream(body),
        raw_body,
    }
}

pub fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false)
}

/// Fill in the configured model and token ceiling where the caller left them
/// out, and force a buffered reply unless streaming is passed through.
pub fn prepare_forward_body(
    wire: WireApi,
    body: &mut Value,
    upstream: &UpstreamConfig,
    pass_stream: bool,
) {
    let missing_model = body
        .get("model")
        .and_then(|m| m.as_str())
        .map_or(true, |m| m.trim().is_empty());
    if missing_model {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), Value::String(upstream.model.clone()));
        }
    }

    match wire {
        WireApi::Chat => openai::apply_max_tokens(body, upstream.max_tokens),
        WireApi::Responses => responses::apply_max_tokens(body, upstream.max_tokens),
    }

    if !pass_stream {
        match wire {
            WireApi::Chat => openai::force_non_streaming(body),
            WireApi::Responses => responses::force_non_streaming(body),
        }
    }
}

/// Classify a buffered 2xx body. `Err` means the body is not a completion.
pub fn classify_completion(
    wire: WireApi,
    raw: &[u8],
) -> Result<(FinishReason, Option<Usage>), String> {
    let response: Value = serde_json::from_slice(raw)
        .map_err(|e| format!("upstream returned invalid JSON: {}", e))?;
    if wire == WireApi::Responses {
        if let Some(message) = responses::failure(&response) {
            return Err(message);
        }
    }

    let (finish, usage) = match wire {
        WireApi::Chat => (openai::finish_reason(&response), openai::usage(&response)),
        WireApi::Responses => (responses::finish_reason(&response), responses::usage(&response)),
    };

    finish
        .map(|f| (f, usage))
        .ok_or_else(|| "upstream response carries no finish reason".to_string())
}

/// Classify a complete SSE transcript captured while relaying a stream
pub async fn classify_stream(
    wire: WireApi,
    raw: Bytes,
) -> Result<(FinishReason, Option<Usage>), String> {
    let events: Vec<_> = futures::stream::iter([Ok::<_, std::convert::Infallible>(raw)])
        .eventsource()
        .collect()
        .await;

    let payloads: Vec<Value> = events
        .into_iter()
        .filter_map(|event| event.ok())
        .filter(|event| event.data.trim() != "[DONE]")
        .filter_map(|event| serde_json::from_str(&event.data).ok())
        .collect();

    if wire == WireApi::Responses {
        let terminal = responses::terminal_response(&payloads);
        if let Some(message) = terminal.and_then(responses::failure) {
            return Err(message);
        }
    }

    let (finish, usage) = match wire {
        WireApi::Chat => openai::fold_stream(&payloads),
        WireApi::Responses => responses::fold_stream(&payloads),
    };

    finish
        .map(|f| (f, usage))
        .ok_or_else(|| "stream ended without a finish reason".to_string())
}
