// src/services/ride_billing_service.rs
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    errors::{BillingError, BillingResult, ValidationError},
    models::{
        backend::{
            CompleteRideRequest, CompleteRideResponse, CreditBalanceRequest, PauseStateUpdate, RideStatus,
            StartBillingRequest,
        },
        fare::{FareQuote, Money},
        messages::RideEvent,
        ride::{
            BillingPhase, CompletionOutcome, CompletionRecord, ReconciliationError, RidePhase, RideSession,
            RideSnapshot, RideView,
        },
    },
    services::{
        backend_service::RideBackend,
        billing_clock::BillingClock,
        fare_calculator::FareCalculator,
        sync_service::SyncRequest,
        waiting_clock::{WaitingClock, WaitingTick},
    },
    utils::clock::Clock,
};

const EVENT_CAPACITY: usize = 256;

/// Identity of a ride as accepted by the driver.
#[derive(Debug, Clone)]
pub struct RideAssignment {
    pub ride_id: String,
    pub driver_id: String,
    pub passenger_id: String,
}

impl RideAssignment {
    pub fn validate(&self) -> BillingResult<()> {
        let errors: Vec<ValidationError> = [
            ("ride_id", &self.ride_id),
            ("driver_id", &self.driver_id),
            ("passenger_id", &self.passenger_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| ValidationError {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        })
        .collect();

        if errors.is_empty() { Ok(()) } else { Err(BillingError::ValidationFailed(errors)) }
    }
}

/// Owns one ride's billing state and every transition of it.
///
/// Commands take the instant captured for the current cycle. Best-effort
/// backend syncs are queued in an outbox for the runtime to deliver; only
/// completion talks to the backend directly, because its outcome gates the
/// phase change.
pub struct RideBillingController {
    session: RideSession,
    phase: RidePhase,
    waiting: WaitingClock,
    billing: BillingClock,
    fares: FareCalculator,
    payment_confirmed: bool,
    billing_start_reported: bool,
    resume_phase: Option<BillingPhase>,
    completion_id: Option<String>,
    pending: Option<CompletionRecord>,
    completion: Option<CompletionRecord>,
    outbox: Vec<SyncRequest>,
    events: broadcast::Sender<RideEvent>,
}

impl RideBillingController {
    pub fn new(session: RideSession, fares: FareCalculator, free_waiting_seconds: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session,
            phase: RidePhase::Pickup,
            waiting: WaitingClock::new(free_waiting_seconds),
            billing: BillingClock::new(),
            fares,
            payment_confirmed: false,
            billing_start_reported: false,
            resume_phase: None,
            completion_id: None,
            pending: None,
            completion: None,
            outbox: Vec::new(),
            events,
        }
    }

    /// Build a session from the backend's view of the ride.
    pub async fn open(
        assignment: RideAssignment,
        backend: &dyn RideBackend,
        fares: FareCalculator,
        free_waiting_seconds: u32,
        started_at: DateTime<Utc>,
    ) -> BillingResult<Self> {
        assignment.validate()?;
        tracing::info!("Opening billing session for ride: {}", assignment.ride_id);

        let status = backend.get_ride_status(&assignment.ride_id).await?;
        let session = RideSession {
            backend_estimated_price: status.normalized_estimate(),
            ride_id: assignment.ride_id,
            driver_id: assignment.driver_id,
            passenger_id: assignment.passenger_id,
            vehicle_category: status.vehicle_category,
            pickup: status.pickup,
            destination: status.destination,
            distance_km: status.distance_km,
            started_at,
        };

        Ok(Self::new(session, fares, free_waiting_seconds))
    }

    /// Rebuild a ride from its last snapshot. A completion whose record was
    /// saved stays in `Completing` so the next attempt resubmits that record.
    pub fn restore(snapshot: RideSnapshot, fares: FareCalculator, free_waiting_seconds: u32, now: Instant) -> Self {
        let mut controller = Self::new(snapshot.session, fares, free_waiting_seconds);
        controller.waiting = WaitingClock::restore(snapshot.waiting, free_waiting_seconds);
        controller.billing = BillingClock::restore(snapshot.billing, now);
        controller.payment_confirmed = snapshot.payment_confirmed;
        controller.billing_start_reported = snapshot.billing_start_reported;
        controller.resume_phase = snapshot.resume_phase;
        controller.completion_id = snapshot.completion_id;
        controller.pending = snapshot.pending_completion;
        controller.completion = snapshot.completion;
        controller.phase = snapshot.phase;

        if snapshot.phase == RidePhase::Completing && controller.pending.is_none() {
            let back_to = snapshot.resume_phase.unwrap_or(BillingPhase::Metering);
            controller.phase = RidePhase::Billing(back_to);
            controller.resume_phase = None;
            if back_to == BillingPhase::Metering {
                controller.billing.resume(now);
            }
        }

        tracing::info!(
            "Restored ride {} in {} with {} billed seconds",
            controller.session.ride_id,
            controller.phase,
            controller.billing.elapsed_seconds(now)
        );
        controller
    }

    pub fn session(&self) -> &RideSession {
        &self.session
    }

    pub fn ride_id(&self) -> &str {
        &self.session.ride_id
    }

    pub fn phase(&self) -> RidePhase {
        self.phase
    }

    pub fn waiting(&self) -> &WaitingClock {
        &self.waiting
    }

    pub fn billing(&self) -> &BillingClock {
        &self.billing
    }

    pub fn payment_confirmed(&self) -> bool {
        self.payment_confirmed
    }

    pub fn completion(&self) -> Option<&CompletionRecord> {
        self.completion.as_ref()
    }

    /// Record submitted to the backend whose answer has not been applied.
    pub fn pending_completion(&self) -> Option<&CompletionRecord> {
        self.pending.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RideEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<RideEvent> {
        self.events.clone()
    }

    /// Drain the syncs queued by the commands applied so far.
    pub fn take_sync_requests(&mut self) -> Vec<SyncRequest> {
        std::mem::take(&mut self.outbox)
    }

    pub fn arrive_at_pickup(&mut self, _now: Instant) -> BillingResult<()> {
        if self.phase != RidePhase::Pickup {
            return Err(self.rejected("arrive_at_pickup"));
        }

        self.set_phase(RidePhase::Billing(BillingPhase::Waiting));
        self.outbox.push(SyncRequest::ConfirmArrival {
            ride_id: self.session.ride_id.clone(),
        });
        Ok(())
    }

    /// One scheduler tick. Only the waiting countdown is tick-driven; billed
    /// time is derived from instants.
    pub fn tick(&mut self, now: Instant) {
        if self.phase != RidePhase::Billing(BillingPhase::Waiting) {
            return;
        }

        if self.waiting.tick() == WaitingTick::Expired {
            tracing::info!(
                "Free waiting expired for ride {} after {} seconds",
                self.session.ride_id,
                self.waiting.elapsed_seconds()
            );
            self.emit(RideEvent::WaitingExpired {
                ride_id: self.session.ride_id.clone(),
                waiting_seconds: self.waiting.elapsed_seconds(),
            });
            self.start_metering(now);
        }
    }

    pub fn disable_waiting(&mut self, now: Instant) -> BillingResult<()> {
        match self.phase {
            RidePhase::Billing(BillingPhase::Waiting) => {
                if self.waiting.disable() {
                    tracing::info!(
                        "Driver disabled free waiting for ride {} at {} seconds",
                        self.session.ride_id,
                        self.waiting.elapsed_seconds()
                    );
                }
                self.start_metering(now);
                Ok(())
            }
            // Waiting is already frozen.
            RidePhase::Billing(_) => Ok(()),
            _ => Err(self.rejected("disable_waiting")),
        }
    }

    /// Switch free waiting back on. Discards billed time accrued since it was
    /// switched off.
    pub fn reenable_waiting(&mut self, now: Instant) -> BillingResult<()> {
        if self.phase != RidePhase::Billing(BillingPhase::Metering) {
            return Err(self.rejected("reenable_waiting"));
        }

        self.waiting.reenable()?;
        let discarded = self.billing.elapsed_seconds(now);
        self.billing.reset();
        tracing::warn!(
            "Free waiting re-enabled for ride {}; discarding {} billed seconds",
            self.session.ride_id,
            discarded
        );
        self.set_phase(RidePhase::Billing(BillingPhase::Waiting));
        Ok(())
    }

    pub fn pause(&mut self, now: Instant) -> BillingResult<()> {
        match self.phase {
            RidePhase::Billing(BillingPhase::Metering) => {
                self.billing.pause(now);
                self.set_phase(RidePhase::Billing(BillingPhase::Paused));
                self.queue_pause_sync(true, now);
                Ok(())
            }
            RidePhase::Billing(BillingPhase::Paused) => Ok(()),
            _ => Err(self.rejected("pause")),
        }
    }

    pub fn resume(&mut self, now: Instant) -> BillingResult<()> {
        match self.phase {
            RidePhase::Billing(BillingPhase::Paused) => {
                self.billing.resume(now);
                self.set_phase(RidePhase::Billing(BillingPhase::Metering));
                self.queue_pause_sync(false, now);
                Ok(())
            }
            RidePhase::Billing(BillingPhase::Metering) => Ok(()),
            _ => Err(self.rejected("resume")),
        }
    }

    /// Driver acknowledges the passenger has paid.
    pub fn confirm_payment(&mut self) -> BillingResult<()> {
        if !matches!(self.phase, RidePhase::Billing(_)) {
            return Err(self.rejected("confirm_payment"));
        }
        self.payment_confirmed = true;
        tracing::info!("Payment confirmed for ride {}", self.session.ride_id);
        Ok(())
    }

    /// Fold a fresh `GetRideStatus` into the session. A known backend price is
    /// never dropped because a later poll omitted it.
    pub fn apply_ride_status(&mut self, status: RideStatus) {
        if self.phase.is_terminal() || self.phase == RidePhase::Completing {
            return;
        }

        if let Some(price) = status.normalized_estimate() {
            if self.session.backend_estimated_price != Some(price) {
                tracing::info!("Backend priced ride {} at {}", self.session.ride_id, price);
                self.session.backend_estimated_price = Some(price);
            }
        }
        self.session.vehicle_category = status.vehicle_category;
        self.session.distance_km = status.distance_km;
    }

    pub fn abandon(&mut self, now: Instant) -> BillingResult<()> {
        match self.phase {
            RidePhase::Completing | RidePhase::Completed | RidePhase::Abandoned => Err(self.rejected("abandon")),
            _ => {
                self.billing.pause(now);
                tracing::warn!("Ride {} abandoned", self.session.ride_id);
                self.set_phase(RidePhase::Abandoned);
                Ok(())
            }
        }
    }

    pub fn quote(&self, now: Instant, at: DateTime<Utc>) -> BillingResult<FareQuote> {
        self.fares.quote(
            self.session.backend_estimated_price,
            &self.session.vehicle_category,
            self.billing.elapsed_seconds(now),
            at,
        )
    }

    pub fn view(&self, now: Instant, at: DateTime<Utc>) -> RideView {
        let (quote, quote_error) = match self.phase {
            RidePhase::Pickup => (None, None),
            _ => match self.quote(now, at) {
                Ok(quote) => (Some(quote), None),
                Err(e) => (None, Some(e.to_string())),
            },
        };

        RideView {
            ride_id: self.session.ride_id.clone(),
            phase: self.phase,
            waiting_seconds: self.waiting.elapsed_seconds(),
            remaining_free_seconds: self.waiting.remaining_free_seconds(),
            billed_seconds: self.billing.elapsed_seconds(now),
            quote,
            quote_error,
            payment_confirmed: self.payment_confirmed,
        }
    }

    pub fn snapshot(&self, now: Instant, at: DateTime<Utc>) -> RideSnapshot {
        RideSnapshot {
            session: self.session.clone(),
            phase: self.phase,
            payment_confirmed: self.payment_confirmed,
            billing_start_reported: self.billing_start_reported,
            waiting: self.waiting.state(),
            billing: self.billing.snapshot(now),
            resume_phase: self.resume_phase,
            completion_id: self.completion_id.clone(),
            pending_completion: self.pending.clone(),
            completion: self.completion.clone(),
            saved_at: at,
        }
    }

    /// Freeze billing and build the record to submit. Moves to `Completing`.
    ///
    /// Every attempt of a ride shares one `completion_id`. A record restored
    /// in `Completing` is returned unchanged so it is resubmitted as is.
    pub fn begin_completion(&mut self, now: Instant, at: DateTime<Utc>) -> BillingResult<CompletionRecord> {
        let current = match (self.phase, &self.pending) {
            (RidePhase::Completed, _) => return Err(BillingError::RideAlreadyCompleted(self.session.ride_id.clone())),
            (RidePhase::Completing, Some(pending)) => {
                tracing::info!(
                    "Resubmitting completion {} for ride {}",
                    pending.completion_id,
                    self.session.ride_id
                );
                return Ok(pending.clone());
            }
            (RidePhase::Billing(sub), _) => sub,
            _ => return Err(self.rejected("complete")),
        };
        if !self.payment_confirmed {
            return Err(BillingError::PaymentNotConfirmed(self.session.ride_id.clone()));
        }

        let billed_seconds = self.billing.elapsed_seconds(now);
        let quote = self.quote(now, at).inspect_err(|e| {
            tracing::error!("Cannot price ride {} for completion: {}", self.session.ride_id, e);
        })?;

        self.billing.pause(now);
        self.resume_phase = Some(current);
        self.set_phase(RidePhase::Completing);

        let completion_id = self
            .completion_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let record = CompletionRecord {
            completion_id,
            ride_id: self.session.ride_id.clone(),
            final_price_local: quote.amount_local,
            billed_seconds,
            completed_at: at,
        };
        tracing::info!(
            "Completing ride {}: {} {} ({:?}) for {} billed seconds",
            record.ride_id,
            record.final_price_local,
            quote.currency,
            quote.computed_from,
            record.billed_seconds
        );
        self.pending = Some(record.clone());
        Ok(record)
    }

    pub fn completion_request(&self, record: &CompletionRecord) -> CompleteRideRequest {
        CompleteRideRequest {
            driver_id: self.session.driver_id.clone(),
            passenger_id: self.session.passenger_id.clone(),
            final_price: record.final_price_local,
            billed_duration_seconds: record.billed_seconds,
            pickup: self.session.pickup.clone(),
            destination: self.session.destination.clone(),
            distance_km: self.session.distance_km,
            vehicle_type: self.session.vehicle_category.clone(),
            completion_id: record.completion_id.clone(),
        }
    }

    /// Apply the backend's answer to a completion submitted with
    /// `begin_completion`. Anything but a successful response rolls back.
    pub fn finish_completion(
        &mut self,
        record: CompletionRecord,
        response: BillingResult<CompleteRideResponse>,
        now: Instant,
    ) -> BillingResult<()> {
        if self.phase != RidePhase::Completing {
            return Err(self.rejected("finish_completion"));
        }

        self.pending = None;
        let failure = match response {
            Ok(CompleteRideResponse { success: true, .. }) => {
                self.resume_phase = None;
                self.set_phase(RidePhase::Completed);
                self.emit(RideEvent::Completed(record.clone()));
                self.completion = Some(record);
                return Ok(());
            }
            Ok(CompleteRideResponse { success: false, error }) => BillingError::backend_rejected(
                "complete_ride",
                error.unwrap_or_else(|| "no reason given".to_string()),
            ),
            Err(e) => e,
        };

        let back_to = self.resume_phase.take().unwrap_or(BillingPhase::Metering);
        if back_to == BillingPhase::Metering {
            self.billing.resume(now);
        }
        self.set_phase(RidePhase::Billing(back_to));

        tracing::warn!("Completion of ride {} failed: {}", self.session.ride_id, failure);
        self.emit(RideEvent::CompletionFailed {
            ride_id: self.session.ride_id.clone(),
            message: failure.to_string(),
            retriable: failure.is_retriable(),
        });
        Err(BillingError::CompletionFailed(Box::new(failure)))
    }

    /// Send a record from `begin_completion` to the backend and apply the answer.
    pub async fn submit_completion(
        &mut self,
        record: CompletionRecord,
        backend: &dyn RideBackend,
        clock: &dyn Clock,
    ) -> BillingResult<CompletionRecord> {
        let request = self.completion_request(&record);
        let response = backend.complete_ride(&self.session.ride_id, request).await;
        self.finish_completion(record.clone(), response, clock.now())?;
        Ok(record)
    }

    /// Pay the driver for a completed ride. The completion id lets the
    /// backend apply a repeated credit once.
    pub async fn credit_driver(
        &self,
        record: &CompletionRecord,
        backend: &dyn RideBackend,
    ) -> Result<Money, ReconciliationError> {
        let request = CreditBalanceRequest {
            amount: record.final_price_local,
            completion_id: record.completion_id.clone(),
        };

        match backend.credit_driver_balance(&self.session.driver_id, request).await {
            Ok(credited) => {
                tracing::info!(
                    "Credited driver {} with {}; new balance {}",
                    self.session.driver_id,
                    record.final_price_local,
                    credited.new_balance
                );
                Ok(credited.new_balance)
            }
            Err(e) => {
                let problem = ReconciliationError {
                    ride_id: self.session.ride_id.clone(),
                    driver_id: self.session.driver_id.clone(),
                    amount: record.final_price_local,
                    reason: e.to_string(),
                };
                tracing::error!(
                    "Ride {} completed but crediting driver {} failed: {}",
                    problem.ride_id,
                    problem.driver_id,
                    problem.reason
                );
                self.emit(RideEvent::ReconciliationFailed(problem.clone()));
                Err(problem)
            }
        }
    }

    /// Submit the ride to the backend and, once it is accepted, credit the
    /// driver. Local state only changes to `Completed` after the backend agrees.
    pub async fn complete(&mut self, backend: &dyn RideBackend, clock: &dyn Clock) -> BillingResult<CompletionOutcome> {
        let record = self.begin_completion(clock.now(), clock.wall_clock())?;
        let record = self.submit_completion(record, backend, clock).await?;
        let balance = self.credit_driver(&record, backend).await;
        Ok(CompletionOutcome { record, balance })
    }

    fn start_metering(&mut self, now: Instant) {
        self.billing.start(now);
        self.set_phase(RidePhase::Billing(BillingPhase::Metering));

        if !self.billing_start_reported {
            self.billing_start_reported = true;
            self.outbox.push(SyncRequest::StartBilling {
                ride_id: self.session.ride_id.clone(),
                request: StartBillingRequest {
                    waiting_seconds_frozen: self.waiting.elapsed_seconds(),
                },
            });
        }
    }

    fn queue_pause_sync(&mut self, paused: bool, now: Instant) {
        self.outbox.push(SyncRequest::SetPauseState {
            ride_id: self.session.ride_id.clone(),
            update: PauseStateUpdate {
                paused,
                elapsed_seconds_at_change: self.billing.elapsed_seconds(now),
            },
        });
    }

    fn set_phase(&mut self, to: RidePhase) {
        let from = self.phase;
        if from == to {
            return;
        }
        self.phase = to;
        tracing::info!("Ride {}: {} -> {}", self.session.ride_id, from, to);
        self.emit(RideEvent::PhaseChanged {
            ride_id: self.session.ride_id.clone(),
            from,
            to,
        });
    }

    fn emit(&self, event: RideEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn rejected(&self, command: &str) -> BillingError {
        tracing::warn!("Rejected {} for ride {} in {}", command, self.session.ride_id, self.phase);
        BillingError::invalid_transition(command, self.phase)
    }
}
