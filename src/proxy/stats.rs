use crate::models::AggregateStatus;
use crate::proxy::exchange_log::ExchangeLog;
use crate::proxy::token_manager::CredentialManager;
use std::sync::Arc;

/// Read-side view over the exchange history and the credential bookkeeping.
///
/// Holds no state of its own. Sources are read in a fixed order, records
/// first and credential status second; both only move forward, so a poll
/// never sees a total go backwards.
#[derive(Clone)]
pub struct StatusAggregator {
    log: Arc<ExchangeLog>,
    credentials: Arc<CredentialManager>,
}

impl StatusAggregator {
    pub fn new(log: Arc<ExchangeLog>, credentials: Arc<CredentialManager>) -> Self {
        Self { log, credentials }
    }

    pub fn snapshot(&self) -> AggregateStatus {
        let counts = self.log.counts();
        let in_flight = self.log.in_flight();

        let refresh = self.credentials.status();
        let current = self.credentials.store().read();
        let now = self.credentials.now();

        let total_errors = counts.errors();
        let (error_rate, average_latency_ms) = if counts.total == 0 {
            (0.0, 0.0)
        } else {
            (
                total_errors as f64 / counts.total as f64,
                counts.total_latency_ms as f64 / counts.total as f64,
            )
        };

        let seconds_until_next_refresh = refresh
            .next_refresh_at
            .map(|next| (next - now).num_seconds().max(0) as u64);

        AggregateStatus {
            session_id: self.log.session_id().to_string(),
            session_started_at: self.log.session_started_at(),
            uptime_secs: (now - self.log.session_started_at()).num_seconds().max(0) as u64,

            total_requests: counts.total,
            in_flight,
            successes: counts.successes,
            truncated: counts.truncated,
            total_errors,
            timeouts: counts.timeouts,
            upstream_errors: counts.upstream_errors,
            transport_errors: counts.transport_errors,
            error_rate,
            average_latency_ms,

            credential_present: current.is_some(),
            credential_fresh: current.as_ref().is_some_and(|c| c.is_fresh_at(now)),
            credential_mock: current.as_ref().is_some_and(|c| c.mock),
            credential_expires_at: current.as_ref().map(|c| c.expires_at()),
            last_refresh_at: refresh.last_refresh_at,
            seconds_until_next_refresh,
            refresh_count: refresh.refresh_count,
            refresh_failures: refresh.failure_count,
            last_refresh_error: refresh.last_error,

            log_file: self.log.log_path().map(|p| p.to_path_buf()),
            log_file_error: self.log.log_error(),
        }
    }
}
