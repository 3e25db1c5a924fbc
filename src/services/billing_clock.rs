// src/services/billing_clock.rs
use tokio::time::Instant;

use crate::models::ride::BillingSnapshot;
use crate::utils::clock::elapsed_secs;

/// Billable time counter. Every method takes the instant captured by the
/// caller for the current tick or command, so one cycle sees one `now`.
#[derive(Debug, Clone, Default)]
pub struct BillingClock {
    is_running: bool,
    accumulated_seconds: u64,
    last_resume_instant: Option<Instant>,
}

impl BillingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted state. A clock that was running resumes from
    /// `now`; time the app spent closed is not billed.
    pub fn restore(snapshot: BillingSnapshot, now: Instant) -> Self {
        Self {
            is_running: snapshot.was_running,
            accumulated_seconds: snapshot.accumulated_seconds,
            last_resume_instant: snapshot.was_running.then_some(now),
        }
    }

    pub fn snapshot(&self, now: Instant) -> BillingSnapshot {
        BillingSnapshot {
            accumulated_seconds: self.elapsed_seconds(now),
            was_running: self.is_running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn accumulated_seconds(&self) -> u64 {
        self.accumulated_seconds
    }

    pub fn start(&mut self, now: Instant) {
        if self.is_running {
            return;
        }
        self.is_running = true;
        self.last_resume_instant = Some(now);
    }

    pub fn resume(&mut self, now: Instant) {
        self.start(now);
    }

    pub fn pause(&mut self, now: Instant) {
        if !self.is_running {
            return;
        }
        if let Some(resumed_at) = self.last_resume_instant.take() {
            self.accumulated_seconds = self.accumulated_seconds.saturating_add(elapsed_secs(resumed_at, now));
        }
        self.is_running = false;
    }

    /// Read-only; calling it repeatedly with the same `now` gives the same value.
    pub fn elapsed_seconds(&self, now: Instant) -> u64 {
        let running = match (self.is_running, self.last_resume_instant) {
            (true, Some(resumed_at)) => elapsed_secs(resumed_at, now),
            _ => 0,
        };
        self.accumulated_seconds.saturating_add(running)
    }

    pub fn reset(&mut self) {
        self.is_running = false;
        self.accumulated_seconds = 0;
        self.last_resume_instant = None;
    }
}
