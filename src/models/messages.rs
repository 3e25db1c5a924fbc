// src/models/messages.rs
use serde::{Deserialize, Serialize};

use crate::models::ride::{CompletionRecord, ReconciliationError, RidePhase, RideView};

/// State changes broadcast to UI subscribers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RideEvent {
    PhaseChanged { ride_id: String, from: RidePhase, to: RidePhase },
    Updated(RideView),
    WaitingExpired { ride_id: String, waiting_seconds: u32 },
    CompletionFailed { ride_id: String, message: String, retriable: bool },
    Completed(CompletionRecord),
    ReconciliationFailed(ReconciliationError),
}
