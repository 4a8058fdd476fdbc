use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the caller asked for, extracted once when the exchange is accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub model: String,
    pub message_count: usize,
    pub max_tokens: Option<u64>,
    pub streaming: bool,
    pub raw_body: String,
}

/// Why the upstream stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    /// Cut short by the token ceiling
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "completed" => FinishReason::Stop,
            "length" | "max_tokens" | "max_output_tokens" => FinishReason::Length,
            "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The classified result of one exchange, decided once by the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        raw_body: String,
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
    Timeout {
        after_secs: u64,
    },
    UpstreamError {
        status_code: u16,
        body: String,
    },
    TransportError {
        message: String,
    },
}

impl Outcome {
    /// Successful but length-limited. A warning, never an error.
    pub fn is_truncated(&self) -> bool {
        matches!(
            self,
            Outcome::Success {
                finish_reason: FinishReason::Length,
                ..
            }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } if self.is_truncated() => "truncated",
            Outcome::Success { .. } => "success",
            Outcome::Timeout { .. } => "timeout",
            Outcome::UpstreamError { .. } => "upstream_error",
            Outcome::TransportError { .. } => "transport_error",
        }
    }
}

/// One finished exchange. Shared as `Arc<ExchangeRecord>` and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub sequence_number: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub request: RequestSummary,
    pub outcome: Outcome,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl ExchangeRecord {
    pub fn truncated(&self) -> bool {
        self.outcome.is_truncated()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
