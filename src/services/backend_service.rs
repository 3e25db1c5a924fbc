// src/services/backend_service.rs
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::{
    errors::{BillingError, BillingResult},
    models::backend::{
        CompleteRideRequest, CompleteRideResponse, CreditBalanceRequest, CreditBalanceResponse, PauseStateUpdate,
        RideStatus, StartBillingRequest, StartBillingResponse,
    },
};

/// Calls the billing engine makes to the hosted ride backend.
#[async_trait]
pub trait RideBackend: Send + Sync {
    async fn get_ride_status(&self, ride_id: &str) -> BillingResult<RideStatus>;
    async fn confirm_arrival(&self, ride_id: &str) -> BillingResult<()>;
    async fn set_pause_state(&self, ride_id: &str, update: PauseStateUpdate) -> BillingResult<()>;
    async fn start_billing(&self, ride_id: &str, request: StartBillingRequest) -> BillingResult<StartBillingResponse>;
    async fn complete_ride(&self, ride_id: &str, request: CompleteRideRequest) -> BillingResult<CompleteRideResponse>;
    async fn credit_driver_balance(
        &self,
        driver_id: &str,
        request: CreditBalanceRequest,
    ) -> BillingResult<CreditBalanceResponse>;
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// JSON-over-HTTP backend client.
pub struct HttpRideBackend {
    config: BackendConfig,
    client: Client,
}

impl HttpRideBackend {
    pub fn new(config: BackendConfig) -> BillingResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BillingError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, path: &str) -> BillingResult<T> {
        tracing::debug!("GET {} ({})", path, operation);
        let response = self.client.get(self.url(path)).send().await?;
        Self::read_json(operation, response).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> BillingResult<T> {
        tracing::debug!("POST {} ({})", path, operation);
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::read_json(operation, response).await
    }

    async fn post_ack<B: Serialize + Sync>(&self, operation: &str, path: &str, body: &B) -> BillingResult<()> {
        tracing::debug!("POST {} ({})", path, operation);
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::check_status(operation, response).await.map(|_| ())
    }

    async fn check_status(operation: &str, response: Response) -> BillingResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(operation, status, &body))
    }

    async fn read_json<T: DeserializeOwned>(operation: &str, response: Response) -> BillingResult<T> {
        let response = Self::check_status(operation, response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl RideBackend for HttpRideBackend {
    async fn get_ride_status(&self, ride_id: &str) -> BillingResult<RideStatus> {
        self.get_json("get_ride_status", &format!("rides/{}", ride_id)).await
    }

    async fn confirm_arrival(&self, ride_id: &str) -> BillingResult<()> {
        self.post_ack("confirm_arrival", &format!("rides/{}/arrival", ride_id), &serde_json::json!({}))
            .await
    }

    async fn set_pause_state(&self, ride_id: &str, update: PauseStateUpdate) -> BillingResult<()> {
        self.post_ack("set_pause_state", &format!("rides/{}/pause", ride_id), &update).await
    }

    async fn start_billing(&self, ride_id: &str, request: StartBillingRequest) -> BillingResult<StartBillingResponse> {
        self.post_json("start_billing", &format!("rides/{}/billing/start", ride_id), &request)
            .await
    }

    async fn complete_ride(&self, ride_id: &str, request: CompleteRideRequest) -> BillingResult<CompleteRideResponse> {
        self.post_json("complete_ride", &format!("rides/{}/complete", ride_id), &request)
            .await
    }

    async fn credit_driver_balance(
        &self,
        driver_id: &str,
        request: CreditBalanceRequest,
    ) -> BillingResult<CreditBalanceResponse> {
        self.post_json(
            "credit_driver_balance",
            &format!("drivers/{}/balance/credit", driver_id),
            &request,
        )
        .await
    }
}

/// 5xx means the backend could not answer right now; anything else is its
/// considered answer.
fn status_error(operation: &str, status: StatusCode, body: &str) -> BillingError {
    let reason = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if status.is_server_error() {
        BillingError::backend_unavailable(operation, reason)
    } else {
        BillingError::backend_rejected(operation, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let backend = HttpRideBackend::new(BackendConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(backend.url("rides/r1/pause"), "https://api.example.com/v1/rides/r1/pause");
    }

    #[test]
    fn test_only_server_errors_are_retriable() {
        let err = status_error("set_pause_state", StatusCode::SERVICE_UNAVAILABLE, "try later");
        assert!(matches!(err, BillingError::BackendUnavailable { .. }));
        assert!(err.is_retriable());

        let err = status_error("set_pause_state", StatusCode::NOT_FOUND, " no such ride \n");
        match &err {
            BillingError::BackendRejected { reason, .. } => assert_eq!(reason, "HTTP 404: no such ride"),
            other => panic!("Expected BackendRejected, got {:?}", other),
        }
        assert!(!err.is_retriable());
        assert!(!status_error("complete_ride", StatusCode::CONFLICT, "").is_retriable());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_retriable() {
        let backend = HttpRideBackend::new(BackendConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
        })
        .unwrap();

        let err = backend.get_ride_status("ride-1").await.unwrap_err();
        assert!(err.is_retriable(), "unexpected error: {:?}", err);
    }
}
