// In-process store
//
// Holds catalog and audit data behind tokio locks. Used by embedders that
// have no database and by the engine's own tests, which can also make
// audit writes fail on demand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::error::{PricingError, PricingResult};
use crate::models::{CalculationHistoryRecord, DiscountRule, Fee, PackageInfo, PriceHistoryRecord};
use crate::query::{CalculationQuery, HistoryQuery};
use crate::store::{AuditStore, CatalogStore};
use crate::types::{Channel, EntityType, RuleScope};

#[derive(Debug, Default)]
struct Catalog {
    packages: HashMap<i32, PackageInfo>,
    rules: Vec<DiscountRule>,
    fees: Vec<Fee>,
    exchange_rates: HashMap<(String, String), Decimal>,
    channel_prices: HashMap<(i32, Channel), Decimal>,
    settings: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct History {
    calculations: Vec<CalculationHistoryRecord>,
    price_changes: Vec<PriceHistoryRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
    history: RwLock<History>,
    package_reads: AtomicU64,
    fail_audit_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_package(&self, package: PackageInfo) {
        self.catalog.write().await.packages.insert(package.id, package);
    }

    /// Adds a rule, replacing any rule with the same id
    pub async fn insert_rule(&self, rule: DiscountRule) {
        let mut catalog = self.catalog.write().await;
        catalog.rules.retain(|r| r.id != rule.id);
        catalog.rules.push(rule);
    }

    pub async fn insert_fee(&self, fee: Fee) {
        let mut catalog = self.catalog.write().await;
        catalog.fees.retain(|f| f.id != fee.id);
        catalog.fees.push(fee);
    }

    pub async fn set_exchange_rate(&self, from: &str, to: &str, rate: Decimal) {
        self.catalog
            .write()
            .await
            .exchange_rates
            .insert((from.to_string(), to.to_string()), rate);
    }

    pub async fn set_channel_price(&self, package_id: i32, channel: Channel, price: Decimal) {
        self.catalog
            .write()
            .await
            .channel_prices
            .insert((package_id, channel), price);
    }

    pub async fn set_setting(&self, key: &str, value: &str) {
        self.catalog
            .write()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
    }

    /// Number of package lookups that reached this store
    pub fn package_reads(&self) -> u64 {
        self.package_reads.load(Ordering::Relaxed)
    }

    /// Make every subsequent audit insert fail
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::Relaxed);
    }

    pub async fn calculation_records(&self) -> Vec<CalculationHistoryRecord> {
        self.history.read().await.calculations.clone()
    }

    pub async fn price_change_records(&self) -> Vec<PriceHistoryRecord> {
        self.history.read().await.price_changes.clone()
    }

    fn check_writable(&self) -> PricingResult<()> {
        if self.fail_audit_writes.load(Ordering::Relaxed) {
            return Err(PricingError::AuditWrite("history store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn fetch_package(&self, package_id: i32) -> PricingResult<Option<PackageInfo>> {
        self.package_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.catalog.read().await.packages.get(&package_id).cloned())
    }

    async fn fetch_rules(&self, scope: &RuleScope) -> PricingResult<Vec<DiscountRule>> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .rules
            .iter()
            .filter(|r| r.is_active && r.scope == *scope)
            .cloned()
            .collect())
    }

    async fn fetch_fees(&self) -> PricingResult<Vec<Fee>> {
        let catalog = self.catalog.read().await;
        Ok(catalog.fees.iter().filter(|f| f.is_active).cloned().collect())
    }

    async fn fetch_exchange_rate(&self, from: &str, to: &str) -> PricingResult<Option<Decimal>> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .exchange_rates
            .get(&(from.to_string(), to.to_string()))
            .copied())
    }

    async fn fetch_setting(&self, key: &str) -> PricingResult<Option<String>> {
        Ok(self.catalog.read().await.settings.get(key).cloned())
    }

    async fn fetch_channel_price(
        &self,
        package_id: i32,
        channel: Channel,
    ) -> PricingResult<Option<Decimal>> {
        let catalog = self.catalog.read().await;
        Ok(catalog.channel_prices.get(&(package_id, channel)).copied())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_calculation(&self, record: &CalculationHistoryRecord) -> PricingResult<()> {
        self.check_writable()?;
        self.history.write().await.calculations.push(record.clone());
        Ok(())
    }

    async fn insert_price_change(&self, record: &PriceHistoryRecord) -> PricingResult<()> {
        self.check_writable()?;
        self.history.write().await.price_changes.push(record.clone());
        Ok(())
    }

    async fn query_price_history(&self, query: &HistoryQuery) -> PricingResult<Vec<PriceHistoryRecord>> {
        let history = self.history.read().await;
        Ok(query.apply(&history.price_changes))
    }

    async fn list_price_changes(
        &self,
        entity_type: Option<EntityType>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> PricingResult<Vec<PriceHistoryRecord>> {
        let history = self.history.read().await;
        let mut records: Vec<PriceHistoryRecord> = history
            .price_changes
            .iter()
            .filter(|r| entity_type.map_or(true, |t| r.entity_type == t))
            .filter(|r| start.map_or(true, |s| r.changed_at >= s))
            .filter(|r| end.map_or(true, |e| r.changed_at <= e))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.changed_at.cmp(&b.changed_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn query_calculations(
        &self,
        query: &CalculationQuery,
    ) -> PricingResult<Vec<CalculationHistoryRecord>> {
        let history = self.history.read().await;
        let mut records: Vec<CalculationHistoryRecord> = history
            .calculations
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            records.truncate(limit as usize);
        }
        Ok(records)
    }
}
