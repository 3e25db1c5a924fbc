// src/state.rs
use chrono::FixedOffset;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::Level;

use crate::{
    errors::{BillingError, BillingResult},
    models::{fare::FareTable, ride::RidePhase},
    services::{
        backend_service::{BackendConfig, HttpRideBackend, RideBackend},
        fare_calculator::FareCalculator,
        ride_billing_service::{RideAssignment, RideBillingController},
        ride_runtime::{RideHandle, RideRuntime, RideServices, RuntimeSettings},
        session_store::{MemorySessionStore, RedisSessionStore, SessionStore},
        sync_service::RetryPolicy,
        waiting_clock::FREE_WAITING_SECONDS,
    },
    utils::{clock::{Clock, SystemClock}, telemetry},
};

const ENV_PREFIX: &str = "SPARROW_BILLING_";

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub free_waiting_seconds: u32,
    pub tick_interval: Duration,
    pub snapshot_every_ticks: u32,
    pub status_poll_interval: Option<Duration>,
    pub sync_retry_attempts: u32,
    pub sync_base_backoff: Duration,
    /// Offset of the market's local time from UTC, for the day/night rate.
    pub utc_offset_hours: i32,
    pub backend_url: String,
    pub backend_timeout: Duration,
    pub redis_url: Option<String>,
    pub snapshot_ttl_seconds: u64,
    pub fare_table_path: Option<PathBuf>,
    pub log_level: Level,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            free_waiting_seconds: FREE_WAITING_SECONDS,
            tick_interval: Duration::from_secs(1),
            snapshot_every_ticks: 10,
            status_poll_interval: None,
            sync_retry_attempts: 5,
            sync_base_backoff: Duration::from_millis(500),
            utc_offset_hours: 0,
            backend_url: BackendConfig::default().base_url,
            backend_timeout: Duration::from_secs(15),
            redis_url: None,
            snapshot_ttl_seconds: 24 * 60 * 60,
            fare_table_path: None,
            log_level: Level::INFO,
        }
    }
}

impl BillingConfig {
    /// Defaults overridden by `SPARROW_BILLING_*` environment variables.
    pub fn from_env() -> BillingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BillingResult<Self> {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            free_waiting_seconds: parse_or(var("FREE_WAITING_SECONDS"), "FREE_WAITING_SECONDS", defaults.free_waiting_seconds)?,
            tick_interval: var("TICK_MS")
                .map(|v| parse::<u64>(&v, "TICK_MS").map(Duration::from_millis))
                .transpose()?
                .unwrap_or(defaults.tick_interval),
            snapshot_every_ticks: parse_or(var("SNAPSHOT_EVERY_TICKS"), "SNAPSHOT_EVERY_TICKS", defaults.snapshot_every_ticks)?,
            status_poll_interval: var("STATUS_POLL_SECS")
                .map(|v| parse::<u64>(&v, "STATUS_POLL_SECS"))
                .transpose()?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            sync_retry_attempts: parse_or(var("SYNC_RETRY_ATTEMPTS"), "SYNC_RETRY_ATTEMPTS", defaults.sync_retry_attempts)?,
            sync_base_backoff: var("SYNC_BACKOFF_MS")
                .map(|v| parse::<u64>(&v, "SYNC_BACKOFF_MS").map(Duration::from_millis))
                .transpose()?
                .unwrap_or(defaults.sync_base_backoff),
            utc_offset_hours: parse_or(var("UTC_OFFSET_HOURS"), "UTC_OFFSET_HOURS", defaults.utc_offset_hours)?,
            backend_url: var("BACKEND_URL").unwrap_or(defaults.backend_url),
            backend_timeout: var("BACKEND_TIMEOUT_SECS")
                .map(|v| parse::<u64>(&v, "BACKEND_TIMEOUT_SECS").map(Duration::from_secs))
                .transpose()?
                .unwrap_or(defaults.backend_timeout),
            redis_url: var("REDIS_URL"),
            snapshot_ttl_seconds: parse_or(var("SNAPSHOT_TTL_SECS"), "SNAPSHOT_TTL_SECS", defaults.snapshot_ttl_seconds)?,
            fare_table_path: var("FARE_TABLE").map(PathBuf::from),
            log_level: var("LOG").map(|v| telemetry::level_from_str(&v)).unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BillingResult<()> {
        if self.free_waiting_seconds == 0 {
            return Err(BillingError::InvalidConfiguration(
                "free waiting must be at least one second".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(BillingError::InvalidConfiguration("tick interval must be positive".to_string()));
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> BillingResult<FixedOffset> {
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(BillingError::InvalidConfiguration(format!(
                "UTC offset {}h is out of range",
                self.utc_offset_hours
            )));
        }
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            BillingError::InvalidConfiguration(format!("UTC offset {}h is out of range", self.utc_offset_hours))
        })
    }

    pub fn fare_table(&self) -> BillingResult<FareTable> {
        match &self.fare_table_path {
            Some(path) => {
                tracing::info!("Loading fare table from {}", path.display());
                FareTable::load(path)
            }
            None => Ok(FareTable::default()),
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.backend_url.clone(),
            request_timeout: self.backend_timeout,
            ..Default::default()
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            tick_interval: self.tick_interval,
            snapshot_every_ticks: self.snapshot_every_ticks,
            status_poll_interval: self.status_poll_interval,
            retry: RetryPolicy {
                max_attempts: self.sync_retry_attempts,
                base_backoff: self.sync_base_backoff,
                ..Default::default()
            },
        }
    }
}

fn parse<T: FromStr>(value: &str, name: &str) -> BillingResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| BillingError::InvalidConfiguration(format!("{}{} = '{}': {}", ENV_PREFIX, name, value, e)))
}

fn parse_or<T: FromStr>(value: Option<String>, name: &str, default: T) -> BillingResult<T>
where
    T::Err: std::fmt::Display,
{
    value.map(|v| parse(&v, name)).transpose().map(|v| v.unwrap_or(default))
}

/// Process-wide billing engine: shared fare table, backend, store and clock,
/// plus the runtimes of the rides opened on this device.
pub struct EngineState {
    pub config: BillingConfig,
    pub fares: FareCalculator,
    pub backend: Arc<dyn RideBackend>,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
    rides: RwLock<HashMap<String, RideHandle>>,
}

impl EngineState {
    pub async fn new(config: BillingConfig) -> BillingResult<Self> {
        config.validate()?;
        let table = config.fare_table()?;
        let backend: Arc<dyn RideBackend> = Arc::new(HttpRideBackend::new(config.backend_config())?);

        let store: Arc<dyn SessionStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisSessionStore::new(url, config.snapshot_ttl_seconds)?),
            None => {
                tracing::warn!("{}REDIS_URL not set, ride snapshots are kept in memory only", ENV_PREFIX);
                Arc::new(MemorySessionStore::new())
            }
        };

        Self::with_parts(config, table, backend, store, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: BillingConfig,
        table: FareTable,
        backend: Arc<dyn RideBackend>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> BillingResult<Self> {
        table.validate()?;
        let fares = FareCalculator::new(Arc::new(table), config.utc_offset()?);

        Ok(Self {
            config,
            fares,
            backend,
            store,
            clock,
            rides: RwLock::new(HashMap::new()),
        })
    }

    fn services(&self) -> RideServices {
        RideServices {
            backend: self.backend.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Open a ride, resuming it from its snapshot if the app was closed
    /// mid-ride. Opening a ride that is already running returns its handle; a
    /// ride that already finished cannot be opened again.
    pub async fn open_ride(&self, assignment: RideAssignment) -> BillingResult<RideHandle> {
        assignment.validate()?;

        let mut rides = self.rides.write().await;
        // Runtimes stop on their own once a ride finishes.
        rides.retain(|_, handle| handle.is_running());
        if let Some(handle) = rides.get(&assignment.ride_id) {
            return Ok(handle.clone());
        }

        let controller = match self.store.load(&assignment.ride_id).await? {
            Some(snapshot) if snapshot.is_finished() => {
                tracing::warn!("Refusing to reopen ride {}: already {}", assignment.ride_id, snapshot.phase);
                return Err(match snapshot.phase {
                    RidePhase::Completed => BillingError::RideAlreadyCompleted(assignment.ride_id),
                    phase => BillingError::invalid_transition("open_ride", phase),
                });
            }
            Some(snapshot) => {
                tracing::info!("Resuming ride {} from snapshot saved at {}", assignment.ride_id, snapshot.saved_at);
                RideBillingController::restore(
                    snapshot,
                    self.fares.clone(),
                    self.config.free_waiting_seconds,
                    self.clock.now(),
                )
            }
            None => {
                RideBillingController::open(
                    assignment.clone(),
                    self.backend.as_ref(),
                    self.fares.clone(),
                    self.config.free_waiting_seconds,
                    self.clock.wall_clock(),
                )
                .await?
            }
        };

        let (handle, _task) = RideRuntime::spawn(controller, self.services(), self.config.runtime_settings());
        rides.insert(assignment.ride_id, handle.clone());
        Ok(handle)
    }

    pub async fn ride(&self, ride_id: &str) -> Option<RideHandle> {
        self.rides.read().await.get(ride_id).filter(|h| h.is_running()).cloned()
    }

    /// Drop the saved marker of a finished ride once the app no longer needs
    /// to guard against reopening it. Rides still in progress are kept.
    pub async fn forget_ride(&self, ride_id: &str) -> BillingResult<()> {
        if let Some(snapshot) = self.store.load(ride_id).await? {
            if !snapshot.is_finished() {
                return Err(BillingError::invalid_transition("forget_ride", snapshot.phase));
            }
        }
        self.store.clear(ride_id).await?;
        tracing::info!("Forgot finished ride {}", ride_id);
        Ok(())
    }

    /// Persist and stop every open ride.
    pub async fn shutdown(&self) {
        let handles: Vec<RideHandle> = self.rides.write().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = handle.shutdown().await {
                tracing::debug!("Ride {} already stopped: {}", handle.ride_id(), e);
            }
        }
    }
}
