// src/utils/clock.rs
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Time source for the billing engine.
///
/// `now` is monotonic and drives elapsed-time arithmetic; `wall_clock` is only
/// used for timestamps and the time-of-day fare rule. Both follow tokio's
/// paused clock in tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn wall_clock(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<(Instant, DateTime<Utc>)>>,
}

impl ManualClock {
    pub fn new(wall_clock: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new((Instant::now(), wall_clock))),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.0 += by;
        guard.1 += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).0
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).1
    }
}

/// Whole seconds between two instants, zero if `later` is not after `earlier`.
pub fn elapsed_secs(earlier: Instant, later: Instant) -> u64 {
    later.saturating_duration_since(earlier).as_secs()
}
