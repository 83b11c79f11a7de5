// Storage seams
//
// The engine reads catalog data and writes audit data only through these
// traits. `PgStore` backs them with Postgres; `MemoryStore` keeps everything
// in process for embedding and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::PricingResult;
use crate::models::{CalculationHistoryRecord, DiscountRule, Fee, PackageInfo, PriceHistoryRecord};
use crate::query::{CalculationQuery, HistoryQuery};
use crate::types::{Channel, EntityType, RuleScope};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_pool, PgStore};

/// Read-only pricing configuration
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Package by id, active or not; `None` when it does not exist
    async fn fetch_package(&self, package_id: i32) -> PricingResult<Option<PackageInfo>>;

    /// Active rules owned by exactly this scope
    async fn fetch_rules(&self, scope: &RuleScope) -> PricingResult<Vec<DiscountRule>>;

    /// Active fees
    async fn fetch_fees(&self) -> PricingResult<Vec<Fee>>;

    async fn fetch_exchange_rate(&self, from: &str, to: &str) -> PricingResult<Option<Decimal>>;

    /// Raw value from the settings table
    async fn fetch_setting(&self, key: &str) -> PricingResult<Option<String>>;

    /// Channel-specific base price for a package
    async fn fetch_channel_price(
        &self,
        package_id: i32,
        channel: Channel,
    ) -> PricingResult<Option<Decimal>>;
}

/// Append-only history
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_calculation(&self, record: &CalculationHistoryRecord) -> PricingResult<()>;

    async fn insert_price_change(&self, record: &PriceHistoryRecord) -> PricingResult<()>;

    async fn query_price_history(&self, query: &HistoryQuery) -> PricingResult<Vec<PriceHistoryRecord>>;

    /// Every price change matching the filter, unpaginated
    async fn list_price_changes(
        &self,
        entity_type: Option<EntityType>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> PricingResult<Vec<PriceHistoryRecord>>;

    async fn query_calculations(
        &self,
        query: &CalculationQuery,
    ) -> PricingResult<Vec<CalculationHistoryRecord>>;
}
