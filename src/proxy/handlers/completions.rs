// Completion handler
// Forward one exchange upstream, classify it, record it, relay the reply
use crate::error::ProxyError;
use crate::models::config::MAX_REQUEST_TIMEOUT_SECS;
use crate::models::{Credential, FinishReason, Outcome, RequestSummary};
use crate::proxy::exchange_log::PendingExchange;
use crate::proxy::mappers;
use crate::proxy::server::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

const RELAY_BUFFER: usize = 32;

type RelaySender = mpsc::Sender<Result<Bytes, io::Error>>;

pub async fn handle_completions(State(state): State<AppState>, body: Bytes) -> Response {
    // Own task: a caller that hangs up must not cancel the exchange before it is recorded.
    // If the task dies anyway, its pending exchange records itself on drop.
    match tokio::spawn(forward_exchange(state, body)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Exchange task failed: {}", e);
            ProxyError::Transport(format!("exchange task failed: {}", e)).into_response()
        }
    }
}

async fn forward_exchange(state: AppState, raw: Bytes) -> Response {
    let pending = state.log.begin();
    let wire = state.config.upstream.wire_api;
    let timeout = Duration::from_secs(
        state
            .config
            .proxy
            .request_timeout
            .min(MAX_REQUEST_TIMEOUT_SECS),
    );
    let deadline = Instant::now() + timeout;

    let parsed = match serde_json::from_slice::<Value>(&raw) {
        Ok(body) if body.is_object() => Ok(body),
        Ok(_) => Err("request body must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON body: {}", e)),
    };
    let summary = mappers::summarize_request(wire, &raw, parsed.as_ref().ok());

    let Some(credential) = state.store.read() else {
        return reject(&state, pending, summary, ProxyError::NotReady);
    };
    let mut body = match parsed {
        Ok(body) => body,
        Err(message) => {
            return reject(&state, pending, summary, ProxyError::MalformedRequest(message))
        }
    };

    let pass_stream = state.config.proxy.streaming_passthrough && summary.streaming;
    mappers::prepare_forward_body(wire, &mut body, &state.config.upstream, pass_stream);

    tracing::debug!(
        seq = pending.sequence_number,
        model = %summary.model,
        messages = summary.message_count,
        streaming = pass_stream,
        "Forwarding to {}",
        state.upstream.url()
    );

    let exchange = Exchange {
        state,
        pending,
        summary,
        deadline,
        after_secs: timeout.as_secs(),
    };
    if pass_stream {
        exchange.stream(credential, body).await
    } else {
        exchange.buffered(credential, body).await
    }
}

/// An accepted exchange past validation, owning its pending record
struct Exchange {
    state: AppState,
    pending: PendingExchange,
    summary: RequestSummary,
    deadline: Instant,
    after_secs: u64,
}

impl Exchange {
    async fn buffered(self, credential: Arc<Credential>, body: Value) -> Response {
        let upstream = self.state.upstream.clone();
        let call = async {
            let response = upstream.forward(&credential, &body, false).await?;
            let status = response.status();
            let content_type = content_type_of(&response);
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, content_type, bytes))
        };

        let result = tokio::time::timeout_at(self.deadline, call).await;
        let (status, content_type, bytes) = match result {
            Err(_) => {
                let err = ProxyError::Timeout {
                    after_secs: self.after_secs,
                };
                return self.fail(err);
            }
            Ok(Err(e)) => return self.fail(ProxyError::Transport(e.to_string())),
            Ok(Ok(parts)) => parts,
        };

        if !status.is_success() {
            return self.fail(ProxyError::Upstream {
                status: status.as_u16(),
                body: bytes,
                content_type,
            });
        }

        match mappers::classify_completion(self.state.config.upstream.wire_api, &bytes) {
            Ok((finish_reason, usage)) => {
                let outcome = Outcome::Success {
                    raw_body: lossy(&bytes),
                    finish_reason,
                    usage,
                };
                record(&self.state, self.pending, self.summary, outcome);
                let content_type = content_type.unwrap_or_else(|| "application/json".to_string());
                (status, [(header::CONTENT_TYPE, content_type)], bytes).into_response()
            }
            Err(message) => self.fail(ProxyError::Transport(message)),
        }
    }

    async fn stream(self, credential: Arc<Credential>, body: Value) -> Response {
        let upstream = self.state.upstream.clone();
        let call = upstream.forward(&credential, &body, true);
        let result = tokio::time::timeout_at(self.deadline, call).await;
        let response = match result {
            Err(_) => {
                let err = ProxyError::Timeout {
                    after_secs: self.after_secs,
                };
                return self.fail(err);
            }
            Ok(Err(e)) => return self.fail(ProxyError::Transport(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let content_type = content_type_of(&response);
        if !status.is_success() {
            let body = match tokio::time::timeout_at(self.deadline, response.bytes()).await {
                Ok(Ok(bytes)) => bytes,
                _ => Bytes::new(),
            };
            return self.fail(ProxyError::Upstream {
                status: status.as_u16(),
                body,
                content_type,
            });
        }

        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        tokio::spawn(self.relay(response, tx));

        let content_type = content_type.unwrap_or_else(|| "text/event-stream".to_string());
        (
            status,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            Body::from_stream(ReceiverStream::new(rx)),
        )
            .into_response()
    }

    /// Pump upstream chunks to the caller while keeping a transcript.
    /// The record is appended before the caller's stream is closed.
    async fn relay(self, response: reqwest::Response, tx: RelaySender) {
        let seq = self.pending.sequence_number;
        let mut upstream = Box::pin(response.bytes_stream());
        let mut transcript = BytesMut::new();
        let mut caller_gone = false;

        let outcome = loop {
            let chunk = match tokio::time::timeout_at(self.deadline, upstream.next()).await {
                Err(_) => break self.stream_timeout(&tx),
                Ok(None) => {
                    let transcript = std::mem::take(&mut transcript).freeze();
                    let wire = self.state.config.upstream.wire_api;
                    break match mappers::classify_stream(wire, transcript.clone()).await {
                        Ok((finish_reason, usage)) => Outcome::Success {
                            raw_body: lossy(&transcript),
                            finish_reason,
                            usage,
                        },
                        Err(message) => Outcome::TransportError { message },
                    };
                }
                Ok(Some(Err(e))) => {
                    let _ = tx.try_send(Err(io::Error::other(e.to_string())));
                    break Outcome::TransportError {
                        message: e.to_string(),
                    };
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            transcript.extend_from_slice(&chunk);
            if caller_gone {
                continue;
            }
            match tokio::time::timeout_at(self.deadline, tx.send(Ok(chunk))).await {
                Err(_) => break self.stream_timeout(&tx),
                Ok(Err(_)) => {
                    caller_gone = true;
                    tracing::debug!(seq, "Caller disconnected mid-stream, draining upstream");
                }
                Ok(Ok(())) => {}
            }
        };

        record(&self.state, self.pending, self.summary, outcome);
        drop(tx);
    }

    fn stream_timeout(&self, tx: &RelaySender) -> Outcome {
        let _ = tx.try_send(Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("upstream stream exceeded {}s", self.after_secs),
        )));
        Outcome::Timeout {
            after_secs: self.after_secs,
        }
    }

    fn fail(self, err: ProxyError) -> Response {
        reject(&self.state, self.pending, self.summary, err)
    }
}

/// Record a failed exchange, then render the error for the caller
fn reject(
    state: &AppState,
    pending: PendingExchange,
    summary: RequestSummary,
    err: ProxyError,
) -> Response {
    record(state, pending, summary, outcome_of(&err));
    err.into_response()
}

fn outcome_of(err: &ProxyError) -> Outcome {
    match err {
        ProxyError::NotReady => Outcome::UpstreamError {
            status_code: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            body: err.body(),
        },
        ProxyError::MalformedRequest(message) | ProxyError::Transport(message) => {
            Outcome::TransportError {
                message: message.clone(),
            }
        }
        ProxyError::Upstream { status, .. } => Outcome::UpstreamError {
            status_code: *status,
            body: err.body(),
        },
        ProxyError::Timeout { after_secs } => Outcome::Timeout {
            after_secs: *after_secs,
        },
    }
}

fn record(state: &AppState, pending: PendingExchange, summary: RequestSummary, outcome: Outcome) {
    let seq = pending.sequence_number;
    let record = state.log.finish(pending, summary, outcome);
    let elapsed_ms = record.duration.as_millis() as u64;
    let outcome = record.outcome.label();

    match &record.outcome {
        Outcome::Success {
            finish_reason: FinishReason::Length,
            ..
        } => tracing::warn!(
            seq,
            elapsed_ms,
            outcome,
            "Response truncated by the token ceiling (finish_reason=length)"
        ),
        Outcome::Success { finish_reason, .. } => tracing::info!(
            seq,
            elapsed_ms,
            outcome,
            finish_reason = finish_reason.as_str(),
            "Exchange completed"
        ),
        Outcome::Timeout { after_secs } => {
            tracing::warn!(seq, outcome, after_secs, "Upstream timed out")
        }
        Outcome::UpstreamError { status_code, .. } => tracing::warn!(
            seq,
            outcome,
            status = *status_code,
            elapsed_ms,
            "Upstream returned an error"
        ),
        Outcome::TransportError { message } => {
            tracing::warn!(seq, outcome, elapsed_ms, "Exchange failed: {}", message)
        }
    }
}

fn content_type_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
