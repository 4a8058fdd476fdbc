//! Bounded in-memory history of finished exchanges plus an append-only
//! JSON Lines file per session.
//!
//! The memory window evicts oldest-first past `capacity`; the file keeps
//! everything. File writes happen on a dedicated writer thread so a slow or
//! failing disk never stalls a request handler. The first write failure is
//! reported once and kept for the status surface; the memory path carries on.

use crate::error::AppResult;
use crate::models::{ExchangeRecord, Outcome, RequestSummary};
use crate::modules::clock::{Clock, SharedClock};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Lifetime tallies, updated under the same lock as the window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutcomeCounts {
    pub total: u64,
    pub successes: u64,
    pub truncated: u64,
    pub timeouts: u64,
    pub upstream_errors: u64,
    pub transport_errors: u64,
    pub total_latency_ms: u64,
}

impl OutcomeCounts {
    fn record(&mut self, record: &ExchangeRecord) {
        self.total += 1;
        self.total_latency_ms += record.duration.as_millis() as u64;
        match &record.outcome {
            Outcome::Success { .. } => {
                self.successes += 1;
                if record.truncated() {
                    self.truncated += 1;
                }
            }
            Outcome::Timeout { .. } => self.timeouts += 1,
            Outcome::UpstreamError { .. } => self.upstream_errors += 1,
            Outcome::TransportError { .. } => self.transport_errors += 1,
        }
    }

    pub fn errors(&self) -> u64 {
        self.timeouts + self.upstream_errors + self.transport_errors
    }
}

/// An accepted exchange awaiting its outcome.
///
/// Dropping it unfinished (a panicking or cancelled handler) appends a
/// `TransportError` record, so every accepted sequence number is logged.
pub struct PendingExchange {
    pub sequence_number: u64,
    pub started_at: DateTime<Utc>,
    started: Instant,
    shared: Arc<Shared>,
    sealed: bool,
}

impl PendingExchange {
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    fn seal(&mut self, request: RequestSummary, outcome: Outcome) -> Arc<ExchangeRecord> {
        self.sealed = true;
        Arc::new(ExchangeRecord {
            sequence_number: self.sequence_number,
            started_at: self.started_at,
            finished_at: self.shared.clock.now(),
            request,
            outcome,
            duration: self.elapsed(),
        })
    }
}

impl fmt::Debug for PendingExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExchange")
            .field("sequence_number", &self.sequence_number)
            .field("started_at", &self.started_at)
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

impl Drop for PendingExchange {
    fn drop(&mut self) {
        if !self.sealed {
            tracing::error!(
                seq = self.sequence_number,
                "Exchange ended without an outcome, recording it as a transport error"
            );
            let request = RequestSummary {
                model: "unknown".to_string(),
                message_count: 0,
                max_tokens: None,
                streaming: false,
                raw_body: String::new(),
            };
            let outcome = Outcome::TransportError {
                message: "exchange aborted before an outcome was recorded".to_string(),
            };
            let record = self.seal(request, outcome);
            self.shared.append(record);
        }
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Window {
    records: VecDeque<Arc<ExchangeRecord>>,
    counts: OutcomeCounts,
}

enum WriterMessage {
    Record(Arc<ExchangeRecord>),
    Flush(oneshot::Sender<()>),
}

struct LogWriter {
    tx: mpsc::UnboundedSender<WriterMessage>,
    path: PathBuf,
}

struct Session {
    id: String,
    started_at: DateTime<Utc>,
}

impl Session {
    fn start(clock: &dyn Clock) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: clock.now(),
        }
    }
}

/// State reachable from both the log and its pending exchanges
struct Shared {
    capacity: usize,
    clock: SharedClock,
    in_flight: AtomicU64,
    window: Mutex<Window>,
    writer: Option<LogWriter>,
    write_error: Arc<OnceLock<String>>,
}

impl Shared {
    fn append(&self, record: Arc<ExchangeRecord>) {
        {
            let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
            window.counts.record(&record);
            window.records.push_back(record.clone());
            while window.records.len() > self.capacity {
                window.records.pop_front();
            }
        }

        if let Some(writer) = &self.writer {
            if writer.tx.send(WriterMessage::Record(record)).is_err() {
                report_once(&self.write_error, "exchange log writer is gone".to_string());
            }
        }
    }
}

pub struct ExchangeLog {
    session_id: String,
    session_started_at: DateTime<Utc>,
    next_sequence: AtomicU64,
    shared: Arc<Shared>,
}

impl ExchangeLog {
    fn with_session(
        capacity: usize,
        session: Session,
        clock: SharedClock,
        writer: Option<LogWriter>,
        write_error: Arc<OnceLock<String>>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            session_id: session.id,
            session_started_at: session.started_at,
            next_sequence: AtomicU64::new(0),
            shared: Arc::new(Shared {
                capacity,
                clock,
                in_flight: AtomicU64::new(0),
                window: Mutex::new(Window {
                    records: VecDeque::with_capacity(capacity),
                    counts: OutcomeCounts::default(),
                }),
                writer,
                write_error,
            }),
        }
    }

    /// History kept in memory only
    pub fn in_memory(capacity: usize, clock: SharedClock) -> Self {
        let session = Session::start(clock.as_ref());
        Self::with_session(capacity, session, clock, None, Arc::new(OnceLock::new()))
    }

    /// History in memory plus `<log_dir>/exchanges_<session start>.jsonl`
    pub fn persistent(capacity: usize, log_dir: &Path, clock: SharedClock) -> AppResult<Self> {
        fs::create_dir_all(log_dir)?;

        let session = Session::start(clock.as_ref());
        let path = log_dir.join(session_file_name(session.started_at));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let header = json!({
            "kind": "session",
            "session_id": session.id,
            "session_started_at": session.started_at,
        });
        writeln!(file, "{}", header)?;

        let write_error = Arc::new(OnceLock::new());
        let writer = spawn_writer(Box::new(file), path.clone(), write_error.clone())?;
        tracing::info!("Exchange log file: {}", path.display());
        Ok(Self::with_session(
            capacity,
            session,
            clock,
            Some(writer),
            write_error,
        ))
    }

    /// Persistent when a directory is given; if the file cannot be opened the
    /// log runs in memory and the failure shows up in [`log_error`](Self::log_error).
    pub fn open(capacity: usize, log_dir: Option<&Path>, clock: SharedClock) -> Self {
        let Some(dir) = log_dir else {
            return Self::in_memory(capacity, clock);
        };
        match Self::persistent(capacity, dir, clock.clone()) {
            Ok(log) => log,
            Err(e) => {
                let log = Self::in_memory(capacity, clock);
                report_once(
                    &log.shared.write_error,
                    format!("cannot open log in {}: {}", dir.display(), e),
                );
                log
            }
        }
    }

    #[cfg(test)]
    fn with_writer(capacity: usize, clock: SharedClock, sink: Box<dyn Write + Send>) -> Self {
        let write_error = Arc::new(OnceLock::new());
        let writer = spawn_writer(sink, PathBuf::from("test-sink"), write_error.clone()).ok();
        let session = Session::start(clock.as_ref());
        Self::with_session(capacity, session, clock, writer, write_error)
    }

    /// Accept an exchange: assigns the next sequence number and start time
    pub fn begin(&self) -> PendingExchange {
        let sequence_number = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        PendingExchange {
            sequence_number,
            started_at: self.shared.clock.now(),
            started: Instant::now(),
            shared: self.shared.clone(),
            sealed: false,
        }
    }

    /// Seal an exchange with its outcome and append it
    pub fn finish(
        &self,
        mut pending: PendingExchange,
        request: RequestSummary,
        outcome: Outcome,
    ) -> Arc<ExchangeRecord> {
        let record = pending.seal(request, outcome);
        self.append(record.clone());
        drop(pending);
        record
    }

    pub fn append(&self, record: Arc<ExchangeRecord>) {
        self.shared.append(record);
    }

    /// The `n` most recent records, oldest first
    pub fn recent(&self, n: usize) -> Vec<Arc<ExchangeRecord>> {
        let window = self.window();
        let skip = window.records.len().saturating_sub(n);
        window.records.iter().skip(skip).cloned().collect()
    }

    /// Everything currently in the window, oldest first.
    /// Iterates a snapshot, so it never holds the lock.
    pub fn all(&self) -> impl Iterator<Item = Arc<ExchangeRecord>> {
        let snapshot: Vec<_> = self.window().records.iter().cloned().collect();
        snapshot.into_iter()
    }

    pub fn counts(&self) -> OutcomeCounts {
        self.window().counts
    }

    pub fn len(&self) -> usize {
        self.window().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> u64 {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_started_at(&self) -> DateTime<Utc> {
        self.session_started_at
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.shared.writer.as_ref().map(|w| w.path.as_path())
    }

    /// First persistent-write failure of this session, if any
    pub fn log_error(&self) -> Option<String> {
        self.shared.write_error.get().cloned()
    }

    /// Wait until everything appended so far has been handed to the OS
    pub async fn flush(&self) {
        let Some(writer) = &self.shared.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.tx.send(WriterMessage::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn window(&self) -> MutexGuard<'_, Window> {
        self.shared.window.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn session_file_name(started_at: DateTime<Utc>) -> String {
    format!("exchanges_{}.jsonl", started_at.format("%Y%m%d_%H%M%S"))
}

fn report_once(slot: &OnceLock<String>, message: String) {
    if slot.set(message.clone()).is_ok() {
        tracing::error!(
            "Exchange log file write failed, continuing in memory only: {}",
            message
        );
    }
}

fn spawn_writer(
    mut sink: Box<dyn Write + Send>,
    path: PathBuf,
    write_error: Arc<OnceLock<String>>,
) -> AppResult<LogWriter> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriterMessage>();

    std::thread::Builder::new()
        .name("exchange-log-writer".to_string())
        .spawn(move || {
            while let Some(message) = rx.blocking_recv() {
                match message {
                    WriterMessage::Record(record) => {
                        let result = serde_json::to_string(&*record)
                            .map_err(std::io::Error::from)
                            .and_then(|line| {
                                sink.write_all(line.as_bytes())?;
                                sink.write_all(b"\n")?;
                                sink.flush()
                            });
                        if let Err(e) = result {
                            report_once(&write_error, e.to_string());
                        }
                    }
                    WriterMessage::Flush(done) => {
                        if let Err(e) = sink.flush() {
                            report_once(&write_error, e.to_string());
                        }
                        let _ = done.send(());
                    }
                }
            }
        })?;

    Ok(LogWriter { tx, path })
}
