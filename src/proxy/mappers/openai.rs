// Chat Completions wire format (`POST /chat/completions`)
use crate::models::{FinishReason, Usage};
use serde_json::{json, Value};

pub fn message_count(body: &Value) -> usize {
    body.get("messages")
        .and_then(|m| m.as_array())
        .map(|m| m.len())
        .unwrap_or(0)
}

pub fn max_tokens(body: &Value) -> Option<u64> {
    body.get("max_tokens")
        .or_else(|| body.get("max_completion_tokens"))
        .and_then(|v| v.as_u64())
}

/// Insert the configured ceiling when the caller set none
pub fn apply_max_tokens(body: &mut Value, ceiling: u64) {
    let has_limit = body.get("max_tokens").is_some_and(|v| !v.is_null())
        || body.get("max_completion_tokens").is_some_and(|v| !v.is_null());
    if !has_limit {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("max_tokens".to_string(), json!(ceiling));
        }
    }
}

pub fn force_non_streaming(body: &mut Value) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("stream".to_string(), Value::Bool(false));
        obj.remove("stream_options");
    }
}

/// `choices[0].finish_reason` of a buffered completion
pub fn finish_reason(response: &Value) -> Option<FinishReason> {
    response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("finish_reason"))
        .and_then(|f| f.as_str())
        .map(FinishReason::parse)
}

pub fn usage(response: &Value) -> Option<Usage> {
    let usage = response.get("usage").filter(|u| u.is_object())?;
    let prompt_tokens = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let completion_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(prompt_tokens.saturating_add(completion_tokens));
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

/// Fold the data payloads of a `chat.completion.chunk` stream.
/// The finish reason arrives on the last content chunk, usage (if
/// requested) on a trailing chunk with empty `choices`.
pub fn fold_stream(payloads: &[Value]) -> (Option<FinishReason>, Option<Usage>) {
    let mut finish = None;
    let mut last_usage = None;
    for chunk in payloads {
        if let Some(reason) = finish_reason(chunk) {
            finish = Some(reason);
        }
        if let Some(u) = usage(chunk) {
            last_usage = Some(u);
        }
    }
    (finish, last_usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_fields() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "yo"}],
            "max_completion_tokens": 64
        });
        assert_eq!(message_count(&body), 2);
        assert_eq!(max_tokens(&body), Some(64));
    }

    #[test]
    fn test_apply_max_tokens_respects_caller() {
        let mut explicit = json!({"max_tokens": 10});
        apply_max_tokens(&mut explicit, 4096);
        assert_eq!(explicit["max_tokens"], 10);

        let mut missing = json!({"messages": []});
        apply_max_tokens(&mut missing, 4096);
        assert_eq!(missing["max_tokens"], 4096);
    }

    #[test]
    fn test_force_non_streaming() {
        let mut body = json!({"stream": true, "stream_options": {"include_usage": true}});
        force_non_streaming(&mut body);
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn test_completion_metadata() {
        let response = json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "cut"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 10, "total_tokens": 22}
        });
        assert_eq!(finish_reason(&response), Some(FinishReason::Length));
        assert_eq!(
            usage(&response),
            Some(Usage {
                prompt_tokens: 12,
                completion_tokens: 10,
                total_tokens: 22
            })
        );

        assert_eq!(finish_reason(&json!({"choices": []})), None);
        assert_eq!(finish_reason(&json!({"choices": [{"finish_reason": null}]})), None);
    }

    #[test]
    fn test_fold_stream() {
        let chunks = vec![
            json!({"choices": [{"delta": {"content": "a"}, "finish_reason": null}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 3, "completion_tokens": 1}}),
        ];
        let (finish, usage) = fold_stream(&chunks);
        assert_eq!(finish, Some(FinishReason::Stop));
        assert_eq!(usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn test_usage_total_saturates() {
        let response = json!({
            "choices": [{"finish_reason": "stop"}],
            "usage": {"prompt_tokens": u64::MAX, "completion_tokens": 1}
        });
        assert_eq!(usage(&response).unwrap().total_tokens, u64::MAX);
    }
}
