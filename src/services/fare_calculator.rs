// src/services/fare_calculator.rs
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use std::sync::Arc;

use crate::errors::{BillingError, BillingResult};
use crate::models::fare::{FareQuote, FareTable, Money, QuoteSource, VehicleCategory};

const SECONDS_PER_HOUR: u64 = 3600;

/// Every started hour is billed in full, with a one hour minimum.
pub fn billed_hours(billed_seconds: u64) -> u64 {
    billed_seconds.div_ceil(SECONDS_PER_HOUR).max(1)
}

/// Turns billable time into a displayed fare.
///
/// A positive backend price always wins; the local estimate only fills the gap
/// until the backend has priced the ride.
#[derive(Debug, Clone)]
pub struct FareCalculator {
    table: Arc<FareTable>,
    utc_offset: FixedOffset,
}

impl FareCalculator {
    pub fn new(table: Arc<FareTable>, utc_offset: FixedOffset) -> Self {
        Self { table, utc_offset }
    }

    pub fn table(&self) -> &FareTable {
        &self.table
    }

    pub fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        at.with_timezone(&self.utc_offset).hour()
    }

    pub fn quote(
        &self,
        backend_price: Option<Money>,
        category: &VehicleCategory,
        billed_seconds: u64,
        at: DateTime<Utc>,
    ) -> BillingResult<FareQuote> {
        if let Some(price) = backend_price.filter(Money::is_positive) {
            return Ok(FareQuote {
                amount_local: price,
                currency: self.table.currency.clone(),
                computed_from: QuoteSource::Backend,
                billed_hours: None,
            });
        }

        self.local_estimate(category, billed_seconds, self.local_hour(at))
    }

    pub fn local_estimate(&self, category: &VehicleCategory, billed_seconds: u64, hour: u32) -> BillingResult<FareQuote> {
        let rate = self.table.rate_for(category)?;
        let hours = billed_hours(billed_seconds);
        let is_daytime = self.table.is_daytime(hour);

        let price_usd = rate.for_daytime(is_daytime) * hours as f64;
        let amount = (price_usd * self.table.exchange_rate).round();

        // A local fare never rounds down to nothing.
        if !amount.is_finite() || amount < 1.0 || amount > u64::MAX as f64 {
            return Err(BillingError::FareComputation(format!(
                "fare for {} over {} hours is not a valid amount ({})",
                category, hours, amount
            )));
        }

        tracing::debug!(
            "Local estimate for {}: {} h at {} USD/h ({}) -> {} {}",
            category,
            hours,
            rate.for_daytime(is_daytime),
            if is_daytime { "day" } else { "night" },
            amount,
            self.table.currency
        );

        Ok(FareQuote {
            amount_local: Money(amount as u64),
            currency: self.table.currency.clone(),
            computed_from: QuoteSource::LocalEstimate,
            billed_hours: Some(hours),
        })
    }
}
