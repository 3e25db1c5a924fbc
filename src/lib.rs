pub mod errors;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use errors::{BillingError, BillingResult, ValidationError};
pub use models::{CompletionOutcome, FareQuote, FareTable, Money, RideEvent, RidePhase, RideView};
pub use services::ride_billing_service::{RideAssignment, RideBillingController};
pub use services::ride_runtime::{DriverCommand, RideHandle};
pub use state::{BillingConfig, EngineState};
