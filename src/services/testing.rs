// src/services/testing.rs
// Scripted backend shared by the service tests.
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::Mutex;

use crate::{
    errors::{BillingError, BillingResult},
    models::{
        backend::{
            CompleteRideRequest, CompleteRideResponse, CreditBalanceRequest, CreditBalanceResponse, PauseStateUpdate,
            RideStatus, StartBillingRequest, StartBillingResponse,
        },
        fare::{Money, VehicleCategory},
        ride::Location,
    },
    services::backend_service::RideBackend,
};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    GetRideStatus { ride_id: String },
    ConfirmArrival { ride_id: String },
    SetPauseState { ride_id: String, update: PauseStateUpdate },
    StartBilling { ride_id: String, request: StartBillingRequest },
    CompleteRide { ride_id: String, request: CompleteRideRequest },
    CreditDriverBalance { driver_id: String, request: CreditBalanceRequest },
}

#[derive(Default)]
struct Script {
    status: Option<RideStatus>,
    pause_failures: u32,
    pause_rejections: u32,
    completion_failures: u32,
    completion_rejection: Option<String>,
    credit_fails: bool,
    balance: u64,
    calls: Vec<BackendCall>,
}

pub struct ScriptedBackend {
    script: Mutex<Script>,
}

pub fn sample_status(category: &str, estimated_price: Option<f64>) -> RideStatus {
    RideStatus {
        vehicle_category: VehicleCategory::new(category),
        estimated_price,
        pickup: Location {
            latitude: 5.5600,
            longitude: -0.2050,
            address: "Kwame Nkrumah Circle".to_string(),
        },
        destination: Location {
            latitude: 5.6052,
            longitude: -0.1668,
            address: "Kotoka Airport".to_string(),
        },
        distance_km: 9.4,
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_status(sample_status("economy", None))
    }

    pub fn with_status(status: RideStatus) -> Self {
        Self {
            script: Mutex::new(Script {
                status: Some(status),
                ..Default::default()
            }),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn set_status(&self, status: RideStatus) {
        self.script().status = Some(status);
    }

    pub fn fail_next_pause_syncs(&self, n: u32) {
        self.script().pause_failures = n;
    }

    pub fn reject_next_pause_syncs(&self, n: u32) {
        self.script().pause_rejections = n;
    }

    pub fn fail_next_completions(&self, n: u32) {
        self.script().completion_failures = n;
    }

    pub fn reject_next_completion(&self, reason: &str) {
        self.script().completion_rejection = Some(reason.to_string());
    }

    pub fn fail_balance_credit(&self, fail: bool) {
        self.script().credit_fails = fail;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.script().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.script().calls.iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl RideBackend for ScriptedBackend {
    async fn get_ride_status(&self, ride_id: &str) -> BillingResult<RideStatus> {
        let mut script = self.script();
        script.calls.push(BackendCall::GetRideStatus {
            ride_id: ride_id.to_string(),
        });
        script
            .status
            .clone()
            .ok_or_else(|| BillingError::backend_rejected("get_ride_status", "ride not found"))
    }

    async fn confirm_arrival(&self, ride_id: &str) -> BillingResult<()> {
        self.script().calls.push(BackendCall::ConfirmArrival {
            ride_id: ride_id.to_string(),
        });
        Ok(())
    }

    async fn set_pause_state(&self, ride_id: &str, update: PauseStateUpdate) -> BillingResult<()> {
        let mut script = self.script();
        script.calls.push(BackendCall::SetPauseState {
            ride_id: ride_id.to_string(),
            update,
        });
        if script.pause_failures > 0 {
            script.pause_failures -= 1;
            return Err(BillingError::NetworkTimeout);
        }
        if script.pause_rejections > 0 {
            script.pause_rejections -= 1;
            return Err(BillingError::backend_rejected("set_pause_state", "HTTP 409: ride not in progress"));
        }
        Ok(())
    }

    async fn start_billing(&self, ride_id: &str, request: StartBillingRequest) -> BillingResult<StartBillingResponse> {
        self.script().calls.push(BackendCall::StartBilling {
            ride_id: ride_id.to_string(),
            request,
        });
        Ok(StartBillingResponse {
            billing_start_timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        })
    }

    async fn complete_ride(&self, ride_id: &str, request: CompleteRideRequest) -> BillingResult<CompleteRideResponse> {
        let mut script = self.script();
        script.calls.push(BackendCall::CompleteRide {
            ride_id: ride_id.to_string(),
            request,
        });
        if script.completion_failures > 0 {
            script.completion_failures -= 1;
            return Err(BillingError::NetworkConnection("connection reset".to_string()));
        }
        if let Some(reason) = script.completion_rejection.take() {
            return Ok(CompleteRideResponse {
                success: false,
                error: Some(reason),
            });
        }
        Ok(CompleteRideResponse {
            success: true,
            error: None,
        })
    }

    async fn credit_driver_balance(
        &self,
        driver_id: &str,
        request: CreditBalanceRequest,
    ) -> BillingResult<CreditBalanceResponse> {
        let mut script = self.script();
        let amount = request.amount;
        script.calls.push(BackendCall::CreditDriverBalance {
            driver_id: driver_id.to_string(),
            request,
        });
        if script.credit_fails {
            return Err(BillingError::backend_rejected("credit_driver_balance", "wallet locked"));
        }
        script.balance += amount.amount();
        Ok(CreditBalanceResponse {
            new_balance: Money(script.balance),
        })
    }
}
