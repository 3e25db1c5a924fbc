// src/services/sync_service.rs
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    errors::BillingResult,
    models::backend::{PauseStateUpdate, StartBillingRequest},
    services::backend_service::RideBackend,
};

/// Backend calls whose outcome the local timers never wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    ConfirmArrival { ride_id: String },
    SetPauseState { ride_id: String, update: PauseStateUpdate },
    StartBilling { ride_id: String, request: StartBillingRequest },
}

impl SyncRequest {
    pub fn ride_id(&self) -> &str {
        match self {
            SyncRequest::ConfirmArrival { ride_id }
            | SyncRequest::SetPauseState { ride_id, .. }
            | SyncRequest::StartBilling { ride_id, .. } => ride_id,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            SyncRequest::ConfirmArrival { .. } => "confirm_arrival",
            SyncRequest::SetPauseState { .. } => "set_pause_state",
            SyncRequest::StartBilling { .. } => "start_billing",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given failed attempt (1-based), plus up to
    /// 25% random jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.base_backoff.saturating_mul(1u32 << exponent).min(self.max_backoff);
        let jitter_cap = (base.as_millis() / 4) as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Handle to a ride's sync worker. Sending never blocks the caller.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncRequest>,
}

impl SyncHandle {
    pub fn send(&self, request: SyncRequest) {
        let operation = request.operation();
        if self.tx.send(request).is_err() {
            tracing::warn!("Sync worker stopped, dropping {}", operation);
        }
    }
}

/// Runs sync requests for one ride in the order they were issued.
pub struct SyncWorker;

impl SyncWorker {
    pub fn spawn(backend: Arc<dyn RideBackend>, policy: RetryPolicy) -> (SyncHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncRequest>();

        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                deliver_with_retry(backend.as_ref(), &request, policy).await;
            }
            tracing::debug!("Sync worker finished");
        });

        (SyncHandle { tx }, task)
    }
}

/// Returns whether the request eventually went through.
pub async fn deliver_with_retry(backend: &dyn RideBackend, request: &SyncRequest, policy: RetryPolicy) -> bool {
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match deliver(backend, request).await {
            Ok(()) => {
                tracing::debug!("{} synced for ride {} (attempt {})", request.operation(), request.ride_id(), attempt);
                return true;
            }
            Err(e) if attempt < attempts && e.is_retriable() => {
                let wait = policy.backoff(attempt);
                tracing::warn!(
                    "{} failed for ride {} (attempt {}/{}): {}; retrying in {:?}",
                    request.operation(),
                    request.ride_id(),
                    attempt,
                    attempts,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                tracing::warn!(
                    "{} for ride {} abandoned after {} attempt(s): {}; local timers remain authoritative",
                    request.operation(),
                    request.ride_id(),
                    attempt,
                    e
                );
                return false;
            }
        }
    }
    false
}

async fn deliver(backend: &dyn RideBackend, request: &SyncRequest) -> BillingResult<()> {
    match request {
        SyncRequest::ConfirmArrival { ride_id } => backend.confirm_arrival(ride_id).await,
        SyncRequest::SetPauseState { ride_id, update } => backend.set_pause_state(ride_id, *update).await,
        SyncRequest::StartBilling { ride_id, request } => {
            let response = backend.start_billing(ride_id, *request).await?;
            tracing::info!(
                "Backend started billing for ride {} at {}",
                ride_id,
                response.billing_start_timestamp
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{BackendCall, ScriptedBackend};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
        }
    }

    fn pause(ride_id: &str, paused: bool, secs: u64) -> SyncRequest {
        SyncRequest::SetPauseState {
            ride_id: ride_id.to_string(),
            update: PauseStateUpdate {
                paused,
                elapsed_seconds_at_change: secs,
            },
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let third = policy.backoff(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
        let capped = policy.backoff(12);
        assert!(capped >= Duration::from_millis(1000) && capped <= Duration::from_millis(1250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let backend = ScriptedBackend::new();
        backend.fail_next_pause_syncs(2);

        let delivered = deliver_with_retry(&backend, &pause("ride-1", true, 40), fast_policy(5)).await;
        assert!(delivered);
        assert_eq!(backend.count(|c| matches!(c, BackendCall::SetPauseState { .. })), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let backend = ScriptedBackend::new();
        backend.fail_next_pause_syncs(10);

        let delivered = deliver_with_retry(&backend, &pause("ride-1", true, 40), fast_policy(3)).await;
        assert!(!delivered);
        assert_eq!(backend.count(|c| matches!(c, BackendCall::SetPauseState { .. })), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let backend = ScriptedBackend::new();
        backend.reject_next_pause_syncs(1);

        let delivered = deliver_with_retry(&backend, &pause("ride-1", true, 40), fast_policy(5)).await;
        assert!(!delivered);
        assert_eq!(backend.count(|c| matches!(c, BackendCall::SetPauseState { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_preserves_order() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_next_pause_syncs(1);
        let (handle, task) = SyncWorker::spawn(backend.clone(), fast_policy(3));

        handle.send(pause("ride-1", true, 10));
        handle.send(pause("ride-1", false, 10));
        drop(handle);
        task.await.unwrap();

        let pauses: Vec<bool> = backend
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::SetPauseState { update, .. } => Some(update.paused),
                _ => None,
            })
            .collect();
        // The failed first attempt, its retry, then the resume.
        assert_eq!(pauses, vec![true, true, false]);
    }
}
