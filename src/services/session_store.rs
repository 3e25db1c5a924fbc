// src/services/session_store.rs
use async_trait::async_trait;
use redis::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{
    errors::{BillingError, BillingResult},
    models::ride::RideSnapshot,
};

/// Persists ride snapshots so billed time survives an app restart.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, snapshot: &RideSnapshot) -> BillingResult<()>;
    async fn load(&self, ride_id: &str) -> BillingResult<Option<RideSnapshot>>;
    async fn clear(&self, ride_id: &str) -> BillingResult<()>;
}

pub struct StoreKeys;

impl StoreKeys {
    pub fn ride_snapshot(ride_id: &str) -> String {
        format!("sparrow:billing:ride:{}", ride_id)
    }
}

// In-process store, for tests and hosts without Redis
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, snapshot: &RideSnapshot) -> BillingResult<()> {
        let json = serde_json::to_string(snapshot)?;
        self.entries
            .write()
            .await
            .insert(StoreKeys::ride_snapshot(&snapshot.session.ride_id), json);
        Ok(())
    }

    async fn load(&self, ride_id: &str) -> BillingResult<Option<RideSnapshot>> {
        let entries = self.entries.read().await;
        match entries.get(&StoreKeys::ride_snapshot(ride_id)) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn clear(&self, ride_id: &str) -> BillingResult<()> {
        self.entries.write().await.remove(&StoreKeys::ride_snapshot(ride_id));
        Ok(())
    }
}

// Redis-backed store
pub struct RedisSessionStore {
    client: Client,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    pub fn new(redis_url: &str, ttl_seconds: u64) -> BillingResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| BillingError::InvalidConfiguration(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self { client, ttl_seconds })
    }

    async fn get_connection(&self) -> BillingResult<redis::aio::Connection> {
        Ok(self.client.get_async_connection().await?)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, snapshot: &RideSnapshot) -> BillingResult<()> {
        let key = StoreKeys::ride_snapshot(&snapshot.session.ride_id);
        let json = serde_json::to_string(snapshot)?;
        let mut conn = self.get_connection().await?;

        if self.ttl_seconds > 0 {
            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg(json)
                .arg("EX")
                .arg(self.ttl_seconds)
                .query_async(&mut conn)
                .await?;
        } else {
            let _: () = redis::cmd("SET").arg(&key).arg(json).query_async(&mut conn).await?;
        }

        tracing::debug!("Saved ride snapshot: {}", key);
        Ok(())
    }

    async fn load(&self, ride_id: &str) -> BillingResult<Option<RideSnapshot>> {
        let mut conn = self.get_connection().await?;
        let data: Option<String> = redis::cmd("GET")
            .arg(StoreKeys::ride_snapshot(ride_id))
            .query_async(&mut conn)
            .await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn clear(&self, ride_id: &str) -> BillingResult<()> {
        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("DEL")
            .arg(StoreKeys::ride_snapshot(ride_id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        fare::VehicleCategory,
        ride::{BillingPhase, BillingSnapshot, Location, RidePhase, RideSession, WaitingState},
    };
    use chrono::Utc;

    fn snapshot(ride_id: &str) -> RideSnapshot {
        let here = Location {
            latitude: 5.6,
            longitude: -0.19,
            address: "Ring Road".to_string(),
        };
        RideSnapshot {
            session: RideSession {
                ride_id: ride_id.to_string(),
                driver_id: "drv-1".to_string(),
                passenger_id: "usr-1".to_string(),
                vehicle_category: VehicleCategory::new("economy"),
                pickup: here.clone(),
                destination: here,
                distance_km: 3.2,
                started_at: Utc::now(),
                backend_estimated_price: None,
            },
            phase: RidePhase::Billing(BillingPhase::Metering),
            payment_confirmed: false,
            billing_start_reported: true,
            waiting: WaitingState {
                elapsed_seconds: 600,
                frozen_at: Some(600),
                disabled_by_driver: false,
            },
            billing: BillingSnapshot {
                accumulated_seconds: 125,
                was_running: true,
            },
            resume_phase: None,
            completion_id: None,
            pending_completion: None,
            completion: None,
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_and_clear() {
        let store = MemorySessionStore::new();
        assert!(store.load("ride-1").await.unwrap().is_none());

        let snap = snapshot("ride-1");
        store.save(&snap).await.unwrap();
        assert_eq!(store.load("ride-1").await.unwrap(), Some(snap));
        assert_eq!(store.len().await, 1);

        store.clear("ride-1").await.unwrap();
        assert!(store.load("ride-1").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_overwrites_latest() {
        let store = MemorySessionStore::new();
        let mut snap = snapshot("ride-2");
        store.save(&snap).await.unwrap();
        snap.billing.accumulated_seconds = 900;
        store.save(&snap).await.unwrap();

        let loaded = store.load("ride-2").await.unwrap().unwrap();
        assert_eq!(loaded.billing.accumulated_seconds, 900);
    }

    #[test]
    fn test_invalid_redis_url_is_config_error() {
        assert!(matches!(
            RedisSessionStore::new("not a url", 60),
            Err(BillingError::InvalidConfiguration(_))
        ));
    }
}
