//! Wall-clock abstraction so credential timestamps can be driven from tests.
//!
//! - `SystemClock`: delegates to `chrono::Utc::now`
//! - `TokioClock`: anchored wall time advanced by `tokio::time`, so a paused
//!   runtime (`#[tokio::test(start_paused = true)]`) moves it deterministically

use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time = `anchor` + tokio time elapsed since construction
#[derive(Clone, Copy)]
pub struct TokioClock {
    anchor: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap_or_default();
        self.anchor + elapsed
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
