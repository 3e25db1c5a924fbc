// src/services/mod.rs
pub mod backend_service;
pub mod billing_clock;
pub mod fare_calculator;
pub mod ride_billing_service;
pub mod ride_runtime;
pub mod session_store;
pub mod sync_service;
pub mod waiting_clock;

#[cfg(test)]
pub(crate) mod testing;
