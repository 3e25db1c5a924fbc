// src/models/backend.rs
// Request/response shapes of the ride backend.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::fare::{Money, VehicleCategory};
use crate::models::ride::Location;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideStatus {
    pub vehicle_category: VehicleCategory,
    #[serde(default)]
    pub estimated_price: Option<f64>,
    pub pickup: Location,
    pub destination: Location,
    #[serde(default)]
    pub distance_km: f64,
}

impl RideStatus {
    /// The backend estimate, if it is usable as an authoritative price.
    pub fn normalized_estimate(&self) -> Option<Money> {
        self.estimated_price.and_then(Money::from_backend_amount)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PauseStateUpdate {
    pub paused: bool,
    pub elapsed_seconds_at_change: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StartBillingRequest {
    pub waiting_seconds_frozen: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StartBillingResponse {
    pub billing_start_timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CompleteRideRequest {
    pub driver_id: String,
    pub passenger_id: String,
    pub final_price: Money,
    pub billed_duration_seconds: u64,
    pub pickup: Location,
    pub destination: Location,
    pub distance_km: f64,
    pub vehicle_type: VehicleCategory,
    /// Lets the backend drop duplicate submissions of one attempt.
    pub completion_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CompleteRideResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CreditBalanceRequest {
    pub amount: Money,
    /// Same key as the completion, so a repeated credit is applied once.
    pub completion_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct CreditBalanceResponse {
    pub new_balance: Money,
}
