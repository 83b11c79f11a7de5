// Trend Estimator
//
// Naive hourly price forecast: a per-unit baseline from recent calculations
// shaped by a daily sine curve plus a small random jitter.

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audit::HistoryRecorder;
use crate::config_provider::ConfigProvider;
use crate::error::PricingError;
use crate::metrics::PerformanceMetrics;
use crate::models::{CalculationHistoryRecord, CalculationInput, PackageInfo};
use crate::pricing::priced_units;
use crate::query::CalculationQuery;

/// Longest forecast we produce (one week)
pub const MAX_HORIZON_HOURS: u32 = 168;

const DAILY_AMPLITUDE: f64 = 0.05;
const JITTER: f64 = 0.02;
const INITIAL_CONFIDENCE: f64 = 0.95;
const CONFIDENCE_DECAY: f64 = 0.02;
const MIN_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub hour: DateTime<Utc>,
    pub predicted_price: Decimal,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendForecast {
    pub package_id: Option<i32>,
    pub currency: String,
    /// Mean unit price over recent calculations quoted in `currency`
    pub baseline: Decimal,
    /// No history in the lookback window; the baseline is a fallback
    pub degraded: bool,
    pub points: Vec<TrendPoint>,
}

pub struct TrendEstimator {
    config: Arc<ConfigProvider>,
    recorder: Arc<HistoryRecorder>,
    lookback_days: i64,
    default_currency: String,
    metrics: PerformanceMetrics,
}

impl TrendEstimator {
    pub fn new(
        config: Arc<ConfigProvider>,
        recorder: Arc<HistoryRecorder>,
        lookback_days: i64,
        default_currency: String,
        metrics: PerformanceMetrics,
    ) -> Self {
        Self {
            config,
            recorder,
            lookback_days,
            default_currency,
            metrics,
        }
    }

    pub async fn predict(&self, package_id: Option<i32>, horizon_hours: u32) -> TrendForecast {
        self.predict_at(package_id, horizon_hours, Utc::now()).await
    }

    /// Forecast `horizon_hours` hours past `now`
    ///
    /// Never fails: missing history or a missing package degrade the
    /// baseline instead.
    pub async fn predict_at(
        &self,
        package_id: Option<i32>,
        horizon_hours: u32,
        now: DateTime<Utc>,
    ) -> TrendForecast {
        let _timer = self.metrics.start_forecast();

        let package = match package_id {
            Some(id) => self.load_package(id).await,
            None => None,
        };
        let currency = package
            .as_ref()
            .map(|p| p.currency.clone())
            .unwrap_or_else(|| self.default_currency.clone());

        let query = CalculationQuery {
            package_id,
            ..CalculationQuery::last_days(now, self.lookback_days)
        };
        let history_mean = match self.recorder.query_calculations(&query).await {
            Ok(records) => self.unit_price_mean(&records, &currency).await,
            Err(e) => {
                warn!(error = %e, "Failed to load calculation history for trend");
                None
            }
        };

        let (baseline, degraded) = match history_mean {
            Some(mean) => (mean, false),
            None => {
                let fallback = package.as_ref().map_or(Decimal::ZERO, |p| p.base_price);
                debug!(?package_id, %fallback, "No recent calculations, forecast degraded");
                (fallback, true)
            }
        };

        let points = forecast_points(baseline, horizon_hours, now, &mut rand::thread_rng());

        TrendForecast {
            package_id,
            currency,
            baseline,
            degraded,
            points,
        }
    }

    async fn load_package(&self, id: i32) -> Option<PackageInfo> {
        match self.config.get_package(id).await {
            Ok(package) => Some(package),
            Err(PricingError::NotFound { .. }) => None,
            Err(e) => {
                warn!(error = %e, package_id = id, "Failed to load package for trend");
                None
            }
        }
    }

    /// Mean unit price of the records quoted in `currency`
    ///
    /// Records quoted in another currency, or whose package or input
    /// snapshot can no longer be read, are left out.
    async fn unit_price_mean(&self, records: &[CalculationHistoryRecord], currency: &str) -> Option<Decimal> {
        let mut packages: HashMap<i32, Option<PackageInfo>> = HashMap::new();
        let mut prices = Vec::with_capacity(records.len());

        for record in records {
            if !packages.contains_key(&record.package_id) {
                let package = self.load_package(record.package_id).await;
                packages.insert(record.package_id, package);
            }
            if let Some(Some(package)) = packages.get(&record.package_id) {
                if let Some(price) = unit_price(record, package, currency) {
                    prices.push(price);
                }
            }
        }

        if prices.len() < records.len() {
            debug!(
                used = prices.len(),
                skipped = records.len() - prices.len(),
                currency,
                "Left calculations out of the trend baseline"
            );
        }
        mean(&prices)
    }
}

/// Final price per priced unit, when the record was quoted in `currency`
pub fn unit_price(record: &CalculationHistoryRecord, package: &PackageInfo, currency: &str) -> Option<Decimal> {
    let input: CalculationInput = serde_json::from_value(record.input.clone()).ok()?;
    let quoted = input.options.currency.as_deref().unwrap_or(&package.currency);
    if quoted != currency {
        return None;
    }

    let units = priced_units(package, input.quantity, input.amount).ok()?;
    if units <= Decimal::ZERO {
        return None;
    }
    record.final_price.checked_div(units)
}

fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    // Divide before summing so the total stays in range
    let count = Decimal::from(values.len() as u64);
    Some(values.iter().fold(Decimal::ZERO, |sum, v| sum.saturating_add(*v / count)))
}

/// Confidence for the `step`-th hour ahead (1-based)
pub fn confidence_at(step: u32) -> f64 {
    let decayed = INITIAL_CONFIDENCE - CONFIDENCE_DECAY * f64::from(step.saturating_sub(1));
    decayed.max(MIN_CONFIDENCE)
}

/// Daily shape for a given hour of day, in `[0.95, 1.05]`
pub fn daily_factor(hour_of_day: u32) -> f64 {
    1.0 + DAILY_AMPLITUDE * (2.0 * PI * f64::from(hour_of_day) / 24.0).sin()
}

pub fn forecast_points<R: Rng + ?Sized>(
    baseline: Decimal,
    horizon_hours: u32,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<TrendPoint> {
    let horizon = horizon_hours.min(MAX_HORIZON_HOURS);
    let base = baseline.to_f64().unwrap_or(0.0);

    (1..=horizon)
        .map(|step| {
            let hour = now + Duration::hours(i64::from(step));
            let jitter = rng.gen_range(-JITTER..=JITTER);
            let predicted = base * daily_factor(hour.hour()) * (1.0 + jitter);
            let predicted_price = Decimal::from_f64(predicted)
                .unwrap_or(Decimal::ZERO)
                .max(Decimal::ZERO)
                .round_dp(6);

            TrendPoint {
                hour,
                predicted_price,
                confidence: confidence_at(step),
            }
        })
        .collect()
}
