// Engine settings
//
// Passed explicitly into every component at construction time. Values read
// from the environment are defaults; the persisted `pricing_settings` table
// can override the cache policy at warm-up.

use std::time::Duration;

use crate::error::{PricingError, PricingResult};

/// Default cache time-to-live (60 seconds)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

const DEFAULT_CURRENCY: &str = "TRX";
const DEFAULT_TREND_LOOKBACK_DAYS: i64 = 7;
/// Ten years of history is the widest trend window accepted
pub const MAX_TREND_LOOKBACK_DAYS: i64 = 3650;
const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_SLOW_OPERATION_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub default_currency: String,
    /// History window used for the trend baseline
    pub trend_lookback_days: i64,
    /// Pending audit writes allowed before new ones are dropped
    pub audit_queue_capacity: usize,
    pub slow_operation_threshold: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            default_currency: DEFAULT_CURRENCY.to_string(),
            trend_lookback_days: DEFAULT_TREND_LOOKBACK_DAYS,
            audit_queue_capacity: DEFAULT_AUDIT_QUEUE_CAPACITY,
            slow_operation_threshold: Duration::from_millis(DEFAULT_SLOW_OPERATION_MS),
        }
    }
}

impl EngineSettings {
    /// Load settings from `PRICING_*` environment variables, falling back to defaults
    pub fn from_env() -> PricingResult<Self> {
        let defaults = Self::default();

        let cache_enabled = match std::env::var("PRICING_CACHE_ENABLED") {
            Ok(value) => parse_bool(&value).ok_or_else(|| {
                PricingError::Configuration(format!("PRICING_CACHE_ENABLED is not a boolean: {}", value))
            })?,
            Err(_) => defaults.cache_enabled,
        };

        let cache_ttl = read_number("PRICING_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_ttl);

        let default_currency = std::env::var("PRICING_DEFAULT_CURRENCY")
            .unwrap_or_else(|_| defaults.default_currency.clone());

        let trend_lookback_days = read_number("PRICING_TREND_LOOKBACK_DAYS")?
            .map(|days| i64::try_from(days).unwrap_or(i64::MAX))
            .unwrap_or(defaults.trend_lookback_days);

        let audit_queue_capacity = read_number("PRICING_AUDIT_QUEUE_CAPACITY")?
            .map(|capacity| capacity as usize)
            .unwrap_or(defaults.audit_queue_capacity);

        let slow_operation_threshold = read_number("PRICING_SLOW_OPERATION_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.slow_operation_threshold);

        let settings = Self {
            cache_enabled,
            cache_ttl,
            default_currency,
            trend_lookback_days,
            audit_queue_capacity,
            slow_operation_threshold,
        };
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> PricingResult<()> {
        if self.audit_queue_capacity == 0 {
            return Err(PricingError::Configuration(
                "audit queue capacity must be greater than 0".to_string(),
            ));
        }
        if self.trend_lookback_days <= 0 {
            return Err(PricingError::Configuration(
                "trend lookback must be at least one day".to_string(),
            ));
        }
        if self.trend_lookback_days > MAX_TREND_LOOKBACK_DAYS {
            return Err(PricingError::Configuration(format!(
                "trend lookback cannot exceed {} days",
                MAX_TREND_LOOKBACK_DAYS
            )));
        }
        if self.default_currency.trim().is_empty() {
            return Err(PricingError::Configuration("default currency is empty".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_number(key: &str) -> PricingResult<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| PricingError::Configuration(format!("{} is not a number: {}", key, value))),
        Err(_) => Ok(None),
    }
}
