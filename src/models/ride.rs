// src/models/ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::fare::{FareQuote, Money, VehicleCategory};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

/// Sub-states while the driver is at or past the pickup point.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum BillingPhase {
    Waiting,  // Free waiting countdown running
    Metering, // Billable time accruing
    Paused,   // Suspended by mutual agreement
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RidePhase {
    Pickup,                // Driver heading to the passenger
    Billing(BillingPhase), // At pickup or on the way to destination
    Completing,            // Completion submitted, awaiting backend
    Completed,             // Backend acknowledged completion
    Abandoned,             // Ride ended without billing
}

impl RidePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RidePhase::Completed | RidePhase::Abandoned)
    }
}

impl fmt::Display for RidePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RidePhase::Pickup => write!(f, "Pickup"),
            RidePhase::Billing(sub) => write!(f, "Billing/{:?}", sub),
            RidePhase::Completing => write!(f, "Completing"),
            RidePhase::Completed => write!(f, "Completed"),
            RidePhase::Abandoned => write!(f, "Abandoned"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideSession {
    pub ride_id: String,
    pub driver_id: String,
    pub passenger_id: String,
    pub vehicle_category: VehicleCategory,
    pub pickup: Location,
    pub destination: Location,
    pub distance_km: f64,
    pub started_at: DateTime<Utc>,
    pub backend_estimated_price: Option<Money>,
}

/// Free-waiting counter state.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitingState {
    pub elapsed_seconds: u32,
    pub frozen_at: Option<u32>,
    pub disabled_by_driver: bool,
}

/// Committed billing time, as persisted. Instants do not survive a relaunch.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct BillingSnapshot {
    pub accumulated_seconds: u64,
    pub was_running: bool,
}

/// Everything needed to rebuild a ride after the app is closed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideSnapshot {
    pub session: RideSession,
    pub phase: RidePhase,
    pub payment_confirmed: bool,
    pub billing_start_reported: bool,
    pub waiting: WaitingState,
    pub billing: BillingSnapshot,
    /// Billing sub-state to return to if a completion was in flight.
    pub resume_phase: Option<BillingPhase>,
    /// Idempotency key shared by every completion attempt of this ride.
    #[serde(default)]
    pub completion_id: Option<String>,
    /// Record submitted to the backend and not yet answered.
    #[serde(default)]
    pub pending_completion: Option<CompletionRecord>,
    /// Set once the backend acknowledged completion.
    #[serde(default)]
    pub completion: Option<CompletionRecord>,
    pub saved_at: DateTime<Utc>,
}

impl RideSnapshot {
    /// A finished ride is kept as a tombstone so it cannot be reopened.
    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CompletionRecord {
    pub completion_id: String,
    pub ride_id: String,
    pub final_price_local: Money,
    pub billed_seconds: u64,
    pub completed_at: DateTime<Utc>,
}

/// Failure to credit the driver after the ride itself was completed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReconciliationError {
    pub ride_id: String,
    pub driver_id: String,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    pub record: CompletionRecord,
    /// New driver balance, or the reconciliation problem to report.
    pub balance: Result<Money, ReconciliationError>,
}

/// UI projection of a ride. A pure function of controller state.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideView {
    pub ride_id: String,
    pub phase: RidePhase,
    pub waiting_seconds: u32,
    pub remaining_free_seconds: u32,
    pub billed_seconds: u64,
    pub quote: Option<FareQuote>,
    pub quote_error: Option<String>,
    pub payment_confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(RidePhase::Billing(BillingPhase::Paused).to_string(), "Billing/Paused");
        assert_eq!(RidePhase::Completing.to_string(), "Completing");
    }

    #[test]
    fn test_terminal_phases() {
        assert!(RidePhase::Completed.is_terminal());
        assert!(RidePhase::Abandoned.is_terminal());
        assert!(!RidePhase::Completing.is_terminal());
        assert!(!RidePhase::Billing(BillingPhase::Metering).is_terminal());
    }
}
