// src/services/waiting_clock.rs
use crate::errors::{BillingError, BillingResult};
use crate::models::ride::WaitingState;

/// Free waiting granted to every ride, in seconds.
pub const FREE_WAITING_SECONDS: u32 = 600;

/// Result of a waiting tick, as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingTick {
    Counting,
    /// The free period ran out on this tick.
    Expired,
    Frozen,
}

/// Tick-driven free waiting counter.
#[derive(Debug, Clone)]
pub struct WaitingClock {
    state: WaitingState,
    limit_seconds: u32,
}

impl Default for WaitingClock {
    fn default() -> Self {
        Self::new(FREE_WAITING_SECONDS)
    }
}

impl WaitingClock {
    pub fn new(limit_seconds: u32) -> Self {
        Self {
            state: WaitingState::default(),
            limit_seconds,
        }
    }

    pub fn restore(state: WaitingState, limit_seconds: u32) -> Self {
        let mut clock = Self { state, limit_seconds };
        // A snapshot taken mid-expiry is still expired.
        if clock.state.frozen_at.is_none() && clock.state.elapsed_seconds >= limit_seconds {
            clock.freeze();
        }
        clock
    }

    pub fn state(&self) -> WaitingState {
        self.state
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.state.elapsed_seconds
    }

    pub fn remaining_free_seconds(&self) -> u32 {
        self.limit_seconds.saturating_sub(self.state.elapsed_seconds)
    }

    pub fn is_frozen(&self) -> bool {
        self.state.frozen_at.is_some()
    }

    /// Frozen because the free period ran out rather than by the driver.
    pub fn is_expired(&self) -> bool {
        self.is_frozen() && !self.state.disabled_by_driver
    }

    pub fn tick(&mut self) -> WaitingTick {
        if self.is_frozen() {
            return WaitingTick::Frozen;
        }

        self.state.elapsed_seconds = self.state.elapsed_seconds.saturating_add(1).min(self.limit_seconds);

        if self.state.elapsed_seconds >= self.limit_seconds {
            self.freeze();
            WaitingTick::Expired
        } else {
            WaitingTick::Counting
        }
    }

    /// Driver switches free waiting off. Returns false if already frozen.
    pub fn disable(&mut self) -> bool {
        if self.is_frozen() {
            return false;
        }
        self.state.disabled_by_driver = true;
        self.freeze();
        true
    }

    /// Driver switches free waiting back on.
    pub fn reenable(&mut self) -> BillingResult<()> {
        if !self.state.disabled_by_driver {
            return Err(BillingError::ReenableRejected(if self.is_expired() {
                "free waiting period has expired".to_string()
            } else {
                "free waiting was not disabled".to_string()
            }));
        }
        if self.state.elapsed_seconds >= self.limit_seconds {
            return Err(BillingError::ReenableRejected(
                "free waiting period has expired".to_string(),
            ));
        }

        self.state.disabled_by_driver = false;
        self.state.frozen_at = None;
        Ok(())
    }

    fn freeze(&mut self) {
        self.state.frozen_at = Some(self.state.elapsed_seconds);
    }
}
