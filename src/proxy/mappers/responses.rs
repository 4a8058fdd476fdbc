// Responses wire format (`POST /responses`)
use crate::models::{FinishReason, Usage};
use serde_json::{json, Value};

/// `input` is either a plain string or a list of items
pub fn message_count(body: &Value) -> usize {
    match body.get("input") {
        Some(Value::Array(items)) => items.len(),
        Some(Value::String(_)) => 1,
        _ => 0,
    }
}

pub fn max_tokens(body: &Value) -> Option<u64> {
    body.get("max_output_tokens").and_then(|v| v.as_u64())
}

pub fn apply_max_tokens(body: &mut Value, ceiling: u64) {
    let has_limit = body.get("max_output_tokens").is_some_and(|v| !v.is_null());
    if !has_limit {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("max_output_tokens".to_string(), json!(ceiling));
        }
    }
}

pub fn force_non_streaming(body: &mut Value) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("stream".to_string(), Value::Bool(false));
    }
}

/// Derived from `status` (and `incomplete_details.reason`) of a finished
/// response object. `None` for anything that has not finished.
pub fn finish_reason(response: &Value) -> Option<FinishReason> {
    let status = response.get("status").and_then(|s| s.as_str())?;
    match status {
        "completed" => {
            let called_tool = response
                .get("output")
                .and_then(|o| o.as_array())
                .is_some_and(|items| {
                    items.iter().any(|item| {
                        item.get("type").and_then(|t| t.as_str()) == Some("function_call")
                    })
                });
            if called_tool {
                Some(FinishReason::ToolCalls)
            } else {
                Some(FinishReason::Stop)
            }
        }
        "incomplete" => Some(
            response
                .get("incomplete_details")
                .and_then(|d| d.get("reason"))
                .and_then(|r| r.as_str())
                .map(FinishReason::parse)
                .unwrap_or_else(|| FinishReason::Other("incomplete".to_string())),
        ),
        _ => None,
    }
}

/// Message for a response the upstream reports as `failed` or `cancelled`
pub fn failure(response: &Value) -> Option<String> {
    let status = response.get("status").and_then(|s| s.as_str())?;
    if status != "failed" && status != "cancelled" {
        return None;
    }
    let detail = response
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("no error detail");
    Some(format!("upstream response {}: {}", status, detail))
}

pub fn usage(response: &Value) -> Option<Usage> {
    let usage = response.get("usage").filter(|u| u.is_object())?;
    let prompt_tokens = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let completion_tokens = usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
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

/// The final response object, carried by the terminal `response.completed`,
/// `response.incomplete` or `response.failed` event
pub fn terminal_response(payloads: &[Value]) -> Option<&Value> {
    payloads
        .iter()
        .rev()
        .filter(|event| {
            matches!(
                event.get("type").and_then(|t| t.as_str()),
                Some("response.completed" | "response.incomplete" | "response.failed")
            )
        })
        .find_map(|event| event.get("response"))
}

pub fn fold_stream(payloads: &[Value]) -> (Option<FinishReason>, Option<Usage>) {
    terminal_response(payloads)
        .map(|response| (finish_reason(response), usage(response)))
        .unwrap_or((None, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_fields() {
        assert_eq!(message_count(&json!({"input": "hello"})), 1);
        assert_eq!(message_count(&json!({"input": [{}, {}, {}]})), 3);
        assert_eq!(max_tokens(&json!({"max_output_tokens": 256})), Some(256));

        let mut body = json!({"input": "hello"});
        apply_max_tokens(&mut body, 1024);
        assert_eq!(body["max_output_tokens"], 1024);
    }

    #[test]
    fn test_incomplete_by_token_ceiling_is_length() {
        let response = json!({
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"},
            "usage": {"input_tokens": 5, "output_tokens": 9}
        });
        assert_eq!(finish_reason(&response), Some(FinishReason::Length));
        assert_eq!(usage(&response).unwrap().total_tokens, 14);
    }

    #[test]
    fn test_completed_with_function_call() {
        let response = json!({
            "status": "completed",
            "output": [{"type": "function_call", "name": "shell"}]
        });
        assert_eq!(finish_reason(&response), Some(FinishReason::ToolCalls));
        assert_eq!(finish_reason(&json!({"output": []})), None);
    }

    #[test]
    fn test_unfinished_statuses_have_no_finish_reason() {
        for status in ["failed", "cancelled", "queued", "in_progress"] {
            assert_eq!(finish_reason(&json!({"status": status})), None, "{}", status);
        }
    }

    #[test]
    fn test_failure_carries_error_message() {
        let failed = json!({
            "status": "failed",
            "error": {"code": "server_error", "message": "model crashed"}
        });
        assert_eq!(
            failure(&failed).as_deref(),
            Some("upstream response failed: model crashed")
        );
        assert!(failure(&json!({"status": "cancelled"})).is_some());
        assert!(failure(&json!({"status": "completed"})).is_none());
        assert!(failure(&json!({"status": "in_progress"})).is_none());
    }

    #[test]
    fn test_saturating_usage_total() {
        let response = json!({"usage": {"input_tokens": u64::MAX, "output_tokens": 1}});
        assert_eq!(usage(&response).unwrap().total_tokens, u64::MAX);
    }

    #[test]
    fn test_fold_stream_uses_terminal_event() {
        let events = vec![
            json!({"type": "response.created", "response": {"status": "in_progress"}}),
            json!({"type": "response.output_text.delta", "delta": "hi"}),
            json!({"type": "response.completed", "response": {"status": "completed", "usage": {"input_tokens": 1, "output_tokens": 2, "total_tokens": 3}}}),
        ];
        let (finish, usage) = fold_stream(&events);
        assert_eq!(finish, Some(FinishReason::Stop));
        assert_eq!(usage.unwrap().total_tokens, 3);
    }
}
