// Energy Pricing Engine
//
// Tiered pricing and discount rules for blockchain energy and bandwidth
// packages. `PricingEngine` ties the pieces together: catalog lookups,
// rule evaluation, price composition, history and reporting.

pub mod audit;
pub mod catalog;
pub mod config_provider;
pub mod error;
pub mod evaluator;
pub mod format;
pub mod metrics;
pub mod models;
pub mod pricing;
pub mod query;
pub mod settings;
pub mod statistics;
pub mod store;
pub mod trend;
pub mod types;
pub mod validation;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub use error::{PricingError, PricingResult};
pub use metrics::{MetricsSummary, PerformanceMetrics};
pub use models::{
    CalculationInput, CalculationOptions, DiscountRule, Fee, PackageInfo, PriceCalculationResult,
    PriceChange, PriceHistoryRecord, PriceWarning,
};
pub use query::HistoryQuery;
pub use settings::EngineSettings;
pub use statistics::{CalculationStatistics, PriceStatistics};
pub use trend::TrendForecast;
pub use types::{Channel, EntityType, ResourceType, RoundingMode};

use audit::HistoryRecorder;
use catalog::RuleCatalog;
use config_provider::ConfigProvider;
use evaluator::{EvaluationContext, RuleEvaluator};
use pricing::{ComposeOptions, PriceComposer};
use statistics::StatisticsAggregator;
use store::{AuditStore, CatalogStore, PgStore};
use trend::TrendEstimator;

pub struct PricingEngine {
    settings: EngineSettings,
    config: Arc<ConfigProvider>,
    catalog: RuleCatalog,
    recorder: Arc<HistoryRecorder>,
    trend: TrendEstimator,
    statistics: StatisticsAggregator,
    metrics: PerformanceMetrics,
}

impl PricingEngine {
    /// Connect to Postgres and build an engine on it
    pub async fn connect(database_url: &str, settings: EngineSettings) -> PricingResult<Self> {
        let pool = store::create_pool(database_url).await?;
        Self::new(pool, settings)
    }

    pub fn new(pool: PgPool, settings: EngineSettings) -> PricingResult<Self> {
        let store = Arc::new(PgStore::new(pool));
        Self::with_stores(store.clone(), store, settings)
    }

    /// Build an engine on arbitrary stores
    ///
    /// Starts the audit writer, so this must run inside a tokio runtime.
    pub fn with_stores(
        catalog_store: Arc<dyn CatalogStore>,
        audit_store: Arc<dyn AuditStore>,
        settings: EngineSettings,
    ) -> PricingResult<Self> {
        settings.validate()?;

        let metrics = PerformanceMetrics::new(settings.slow_operation_threshold);
        let config = Arc::new(ConfigProvider::new(catalog_store, &settings, metrics.clone()));
        let recorder = Arc::new(HistoryRecorder::spawn(
            audit_store,
            settings.audit_queue_capacity,
            metrics.clone(),
        ));
        let trend = TrendEstimator::new(
            config.clone(),
            recorder.clone(),
            settings.trend_lookback_days,
            settings.default_currency.clone(),
            metrics.clone(),
        );

        Ok(Self {
            catalog: RuleCatalog::new(config.clone()),
            statistics: StatisticsAggregator::new(recorder.clone()),
            settings,
            config,
            recorder,
            trend,
            metrics,
        })
    }

    pub async fn calculate(&self, input: CalculationInput) -> PricingResult<PriceCalculationResult> {
        self.calculate_at(input, Utc::now()).await
    }

    /// Price a request as of `now`
    ///
    /// Validation and lookup failures are returned before anything is
    /// recorded. History is written in the background and a failed write
    /// never fails the calculation.
    pub async fn calculate_at(
        &self,
        input: CalculationInput,
        now: DateTime<Utc>,
    ) -> PricingResult<PriceCalculationResult> {
        let _timer = self.metrics.start_calculation();

        validation::validate_input(&input)?;

        let package = self.config.get_package(input.package_id).await?;
        validation::validate_against_package(&input, &package)?;

        let channel = input.channel();
        let channel_price = self.config.get_channel_price(package.id, channel).await?;
        let fees = self.config.get_fees().await?;

        let currency = input
            .options
            .currency
            .clone()
            .unwrap_or_else(|| package.currency.clone());
        let exchange_rate = self.config.find_exchange_rate(&package.currency, &currency).await?;

        let candidates = match &input.custom_rules {
            Some(rules) => {
                if input.options.validate_input {
                    for rule in rules {
                        validation::validate_rule(rule)?;
                    }
                }
                rules.clone()
            }
            None => {
                self.catalog
                    .candidates(channel, input.options.apply_promotions)
                    .await?
            }
        };

        let context = EvaluationContext::from_input(&input, now);
        let rules = RuleEvaluator::select_rules(&context, &candidates)?;

        let options = ComposeOptions {
            base_price: channel_price.unwrap_or(package.base_price),
            price_override: channel_price.is_some(),
            amount: input.amount,
            is_emergency: input.is_emergency,
            channel,
            currency,
            exchange_rate,
            rounding_mode: input.options.rounding_mode,
            precision: input.options.precision,
            calculated_at: now,
        };
        let result = PriceComposer::compose(&package, input.quantity, &rules, &fees, &options)?;

        for warning in &result.warnings {
            if matches!(warning, PriceWarning::FlooredToZero { .. }) {
                self.metrics.record_floor_anomaly();
            }
        }

        if input.options.include_history {
            self.recorder.record_calculation(&input, &result);
        }

        info!(
            package_id = package.id,
            channel = %channel,
            quantity = input.quantity,
            final_price = %result.final_price,
            currency = %result.calculation_details.currency,
            rules = result.applied_rules.len(),
            "Price calculated"
        );
        Ok(result)
    }

    /// Queue a price change for the audit log
    pub fn record_price_change(&self, change: PriceChange) -> Uuid {
        self.recorder.record_price_change(change)
    }

    pub async fn query_history(&self, query: &HistoryQuery) -> Vec<PriceHistoryRecord> {
        self.recorder.query_history(query).await
    }

    pub async fn predict_trend(&self, package_id: Option<i32>, horizon_hours: u32) -> TrendForecast {
        self.trend.predict(package_id, horizon_hours).await
    }

    pub async fn get_price_statistics(
        &self,
        entity_type: Option<EntityType>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> PriceStatistics {
        self.statistics.price_statistics(entity_type, start, end).await
    }

    /// Calculation summary over the last `days` days
    pub async fn get_calculation_statistics(
        &self,
        entity_type: Option<EntityType>,
        days: u32,
    ) -> CalculationStatistics {
        self.statistics
            .calculation_statistics(entity_type, days, Utc::now())
            .await
    }

    pub async fn warm_cache(&self) -> PricingResult<()> {
        self.config.warm().await
    }

    pub async fn invalidate_cache(&self) {
        self.config.invalidate().await
    }

    /// Wait for queued history writes to be handled
    pub async fn flush_audit(&self) {
        self.recorder.flush().await
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
