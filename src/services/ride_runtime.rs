// src/services/ride_runtime.rs
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::{
    errors::{BillingError, BillingResult},
    models::{
        messages::RideEvent,
        ride::{CompletionOutcome, RidePhase, RideView},
    },
    services::{
        backend_service::RideBackend,
        ride_billing_service::RideBillingController,
        session_store::SessionStore,
        sync_service::{RetryPolicy, SyncHandle, SyncWorker},
    },
    utils::clock::Clock,
};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub tick_interval: Duration,
    /// Persist a snapshot every this many ticks. Zero disables tick saves.
    pub snapshot_every_ticks: u32,
    pub status_poll_interval: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            snapshot_every_ticks: 10,
            status_poll_interval: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Shared collaborators a ride runtime talks to.
#[derive(Clone)]
pub struct RideServices {
    pub backend: Arc<dyn RideBackend>,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
}

/// Driver actions that only touch local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverCommand {
    ArriveAtPickup,
    DisableWaiting,
    ReenableWaiting,
    Pause,
    Resume,
    ConfirmPayment,
    Abandon,
}

enum RideCommand {
    Apply {
        command: DriverCommand,
        reply: oneshot::Sender<BillingResult<()>>,
    },
    Complete {
        reply: oneshot::Sender<BillingResult<CompletionOutcome>>,
    },
    View {
        reply: oneshot::Sender<RideView>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running ride. All calls are answered by the ride's
/// own task, in the order they were sent.
#[derive(Clone)]
pub struct RideHandle {
    ride_id: String,
    commands: mpsc::Sender<RideCommand>,
    events: broadcast::Sender<RideEvent>,
}

impl RideHandle {
    pub fn ride_id(&self) -> &str {
        &self.ride_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RideEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    pub async fn arrive_at_pickup(&self) -> BillingResult<()> {
        self.apply(DriverCommand::ArriveAtPickup).await
    }

    pub async fn disable_waiting(&self) -> BillingResult<()> {
        self.apply(DriverCommand::DisableWaiting).await
    }

    pub async fn reenable_waiting(&self) -> BillingResult<()> {
        self.apply(DriverCommand::ReenableWaiting).await
    }

    pub async fn pause(&self) -> BillingResult<()> {
        self.apply(DriverCommand::Pause).await
    }

    pub async fn resume(&self) -> BillingResult<()> {
        self.apply(DriverCommand::Resume).await
    }

    pub async fn confirm_payment(&self) -> BillingResult<()> {
        self.apply(DriverCommand::ConfirmPayment).await
    }

    pub async fn abandon(&self) -> BillingResult<()> {
        self.apply(DriverCommand::Abandon).await
    }

    pub async fn apply(&self, command: DriverCommand) -> BillingResult<()> {
        self.request(|reply| RideCommand::Apply { command, reply }).await?
    }

    pub async fn complete(&self) -> BillingResult<CompletionOutcome> {
        self.request(|reply| RideCommand::Complete { reply }).await?
    }

    pub async fn view(&self) -> BillingResult<RideView> {
        self.request(|reply| RideCommand::View { reply }).await
    }

    /// Save a final snapshot and stop the ride's task.
    pub async fn shutdown(&self) -> BillingResult<()> {
        self.request(|reply| RideCommand::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> RideCommand) -> BillingResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| BillingError::RuntimeStopped(self.ride_id.clone()))?;
        rx.await.map_err(|_| BillingError::RuntimeStopped(self.ride_id.clone()))
    }
}

/// The task that owns one ride's controller.
pub struct RideRuntime {
    controller: RideBillingController,
    services: RideServices,
    settings: RuntimeSettings,
    sync: SyncHandle,
    commands: mpsc::Receiver<RideCommand>,
    events: broadcast::Sender<RideEvent>,
    ticks_since_save: u32,
}

impl RideRuntime {
    pub fn spawn(
        controller: RideBillingController,
        services: RideServices,
        settings: RuntimeSettings,
    ) -> (RideHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let events = controller.event_sender();
        let ride_id = controller.ride_id().to_string();
        let (sync, _) = SyncWorker::spawn(services.backend.clone(), settings.retry);

        let runtime = RideRuntime {
            controller,
            services,
            settings,
            sync,
            commands: rx,
            events: events.clone(),
            ticks_since_save: 0,
        };
        let task = tokio::spawn(runtime.run());

        (
            RideHandle {
                ride_id,
                commands: tx,
                events,
            },
            task,
        )
    }

    async fn run(mut self) {
        tracing::info!("Ride runtime started: {}", self.controller.ride_id());

        let period = self.settings.tick_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut poller = self.settings.status_poll_interval.map(|every| {
            let mut poll = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
            poll
        });

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RideCommand::Shutdown { reply }) => {
                        self.persist().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => {
                        self.handle(command).await;
                        // The terminal snapshot is saved and the caller answered.
                        if self.controller.phase().is_terminal() {
                            break;
                        }
                    }
                    None => {
                        self.persist().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.on_tick().await,
                _ = next_poll(&mut poller) => self.refresh_status().await,
            }
        }

        tracing::info!("Ride runtime stopped: {}", self.controller.ride_id());
    }

    async fn handle(&mut self, command: RideCommand) {
        let clock = self.services.clock.clone();
        match command {
            RideCommand::Apply { command, reply } => {
                let now = clock.now();
                let result = match command {
                    DriverCommand::ArriveAtPickup => self.controller.arrive_at_pickup(now),
                    DriverCommand::DisableWaiting => self.controller.disable_waiting(now),
                    DriverCommand::ReenableWaiting => self.controller.reenable_waiting(now),
                    DriverCommand::Pause => self.controller.pause(now),
                    DriverCommand::Resume => self.controller.resume(now),
                    DriverCommand::ConfirmPayment => self.controller.confirm_payment(),
                    DriverCommand::Abandon => self.controller.abandon(now),
                };
                self.after_change().await;
                let _ = reply.send(result);
            }
            RideCommand::Complete { reply } => {
                let result = self.complete().await;
                self.after_change().await;
                let _ = reply.send(result);
            }
            RideCommand::View { reply } => {
                let _ = reply.send(self.controller.view(clock.now(), clock.wall_clock()));
            }
            RideCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// The pending record is saved before the backend sees it and the
    /// terminal snapshot right after it answers, so a relaunch either
    /// resubmits the same completion id or finds the ride finished.
    async fn complete(&mut self) -> BillingResult<CompletionOutcome> {
        let clock = self.services.clock.clone();
        let backend = self.services.backend.clone();

        let record = self.controller.begin_completion(clock.now(), clock.wall_clock())?;
        self.persist().await;
        let record = self
            .controller
            .submit_completion(record, backend.as_ref(), clock.as_ref())
            .await?;
        self.persist().await;

        let balance = self.controller.credit_driver(&record, backend.as_ref()).await;
        Ok(CompletionOutcome { record, balance })
    }

    async fn on_tick(&mut self) {
        if self.controller.phase().is_terminal() {
            return;
        }
        let now = self.services.clock.now();
        self.controller.tick(now);
        self.dispatch_syncs();
        self.publish_view();

        self.ticks_since_save += 1;
        if self.settings.snapshot_every_ticks > 0 && self.ticks_since_save >= self.settings.snapshot_every_ticks {
            self.persist().await;
        }
    }

    async fn refresh_status(&mut self) {
        let phase = self.controller.phase();
        if phase.is_terminal() || phase == RidePhase::Completing {
            return;
        }
        match self.services.backend.get_ride_status(self.controller.ride_id()).await {
            Ok(status) => {
                self.controller.apply_ride_status(status);
                self.publish_view();
            }
            Err(e) => {
                tracing::warn!("Ride status poll failed for {}: {}", self.controller.ride_id(), e);
            }
        }
    }

    async fn after_change(&mut self) {
        self.dispatch_syncs();
        self.publish_view();
        self.persist().await;
    }

    fn dispatch_syncs(&mut self) {
        for request in self.controller.take_sync_requests() {
            self.sync.send(request);
        }
    }

    fn publish_view(&self) {
        if self.events.receiver_count() == 0 {
            return;
        }
        let clock = &self.services.clock;
        let view = self.controller.view(clock.now(), clock.wall_clock());
        let _ = self.events.send(RideEvent::Updated(view));
    }

    /// Save the current snapshot. A finished ride is saved too, as the marker
    /// that keeps it from being reopened. Store failures are logged; the
    /// in-memory state stays authoritative.
    async fn persist(&mut self) {
        self.ticks_since_save = 0;
        let clock = &self.services.clock;
        let snapshot = self.controller.snapshot(clock.now(), clock.wall_clock());
        if let Err(e) = self.services.store.save(&snapshot).await {
            tracing::warn!("Failed to save snapshot for ride {}: {}", self.controller.ride_id(), e);
        }
    }
}

async fn next_poll(poller: &mut Option<Interval>) {
    match poller {
        Some(poll) => {
            poll.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
