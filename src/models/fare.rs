// src/models/fare.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::errors::{BillingError, BillingResult};

/// An amount in whole units of the local currency.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct Money(pub u64);

impl Money {
    pub fn amount(&self) -> u64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Converts a backend-supplied amount, discarding anything that is not a
    /// finite positive number.
    pub fn from_backend_amount(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount <= 0.0 {
            return None;
        }
        let rounded = amount.round();
        if rounded < 1.0 || rounded > u64::MAX as f64 {
            return None;
        }
        Some(Money(rounded as u64))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vehicle category key, e.g. "economy" or "comfort". Always lowercase.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub struct VehicleCategory(String);

impl VehicleCategory {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for VehicleCategory {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for VehicleCategory {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<VehicleCategory> for String {
    fn from(value: VehicleCategory) -> Self {
        value.0
    }
}

impl fmt::Display for VehicleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hourly rates in USD for one vehicle category.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct HourlyRate {
    pub day_usd: f64,
    pub night_usd: f64,
}

impl HourlyRate {
    pub fn for_daytime(&self, is_daytime: bool) -> f64 {
        if is_daytime { self.day_usd } else { self.night_usd }
    }
}

fn default_day_start_hour() -> u32 {
    6
}

fn default_day_end_hour() -> u32 {
    20
}

/// Read-only fare configuration, loaded once per process.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FareTable {
    pub currency: String,
    /// Local currency units per USD.
    pub exchange_rate: f64,
    /// First daytime hour, inclusive.
    #[serde(default = "default_day_start_hour")]
    pub day_start_hour: u32,
    /// Last daytime hour, inclusive.
    #[serde(default = "default_day_end_hour")]
    pub day_end_hour: u32,
    pub rates: HashMap<VehicleCategory, HourlyRate>,
}

impl Default for FareTable {
    fn default() -> Self {
        let rates = [
            ("economy", 4.0, 5.0),
            ("comfort", 6.0, 7.5),
            ("business", 9.0, 11.0),
            ("minivan", 8.0, 10.0),
        ]
        .into_iter()
        .map(|(name, day_usd, night_usd)| (VehicleCategory::new(name), HourlyRate { day_usd, night_usd }))
        .collect();

        Self {
            currency: "GHS".to_string(),
            exchange_rate: 15.0,
            day_start_hour: default_day_start_hour(),
            day_end_hour: default_day_end_hour(),
            rates,
        }
    }
}

impl FareTable {
    /// Load a fare table from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> BillingResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BillingError::InvalidConfiguration(format!("Failed to read fare table {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> BillingResult<Self> {
        let table: FareTable = serde_json::from_str(json)
            .map_err(|e| BillingError::InvalidConfiguration(format!("Failed to parse fare table: {}", e)))?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> BillingResult<()> {
        if !self.exchange_rate.is_finite() || self.exchange_rate <= 0.0 {
            return Err(BillingError::InvalidConfiguration(format!(
                "exchange_rate must be a positive number, got {}",
                self.exchange_rate
            )));
        }
        if self.day_start_hour > 23 || self.day_end_hour > 23 || self.day_start_hour > self.day_end_hour {
            return Err(BillingError::InvalidConfiguration(format!(
                "invalid daytime window {}..={}",
                self.day_start_hour, self.day_end_hour
            )));
        }
        for (category, rate) in &self.rates {
            let valid = |v: f64| v.is_finite() && v > 0.0;
            if !valid(rate.day_usd) || !valid(rate.night_usd) {
                return Err(BillingError::InvalidConfiguration(format!(
                    "rates for '{}' must be positive numbers",
                    category
                )));
            }
        }
        Ok(())
    }

    pub fn rate_for(&self, category: &VehicleCategory) -> BillingResult<&HourlyRate> {
        self.rates
            .get(category)
            .ok_or_else(|| BillingError::MissingFareRate(category.to_string()))
    }

    pub fn is_daytime(&self, hour: u32) -> bool {
        (self.day_start_hour..=self.day_end_hour).contains(&hour)
    }
}

/// Where a displayed fare came from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum QuoteSource {
    Backend,
    LocalEstimate,
}

/// A displayed fare. Always derived from current state, never stored on its own.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FareQuote {
    pub amount_local: Money,
    pub currency: String,
    pub computed_from: QuoteSource,
    /// Hours charged by the local estimate; `None` for backend prices.
    pub billed_hours: Option<u64>,
}
