// Config Provider
//
// Read-through cache over the catalog store for packages, rules, fees,
// exchange rates and channel prices. Entries carry the `Instant` they were
// loaded and are replaced whole on refresh. The cache policy can be
// overridden at warm-up from the `pricing_settings` table.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{PricingError, PricingResult};
use crate::metrics::PerformanceMetrics;
use crate::models::{DiscountRule, Fee, PackageInfo};
use crate::settings::{parse_bool, EngineSettings};
use crate::store::CatalogStore;
use crate::types::{Channel, RuleScope};
use crate::validation::validate_rule;

pub const CACHE_ENABLED_KEY: &str = "cache_enabled";
pub const CACHE_TTL_KEY: &str = "cache_ttl_seconds";

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    loaded_at: Instant,
}

impl<T> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            loaded_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() <= ttl
    }
}

#[derive(Debug)]
struct CacheSlot<K, V> {
    entries: HashMap<K, Cached<V>>,
}

impl<K: Eq + Hash, V: Clone> CacheSlot<K, V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn get_fresh(&self, key: &K, ttl: Duration) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(ttl))
            .map(|entry| entry.value.clone())
    }

    fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, Cached::new(value));
    }
}

#[derive(Debug)]
struct ConfigCache {
    packages: CacheSlot<i32, Option<PackageInfo>>,
    rules: CacheSlot<RuleScope, Arc<Vec<DiscountRule>>>,
    fees: CacheSlot<(), Arc<Vec<Fee>>>,
    exchange_rates: CacheSlot<(String, String), Option<Decimal>>,
    channel_prices: CacheSlot<(i32, Channel), Option<Decimal>>,
}

impl ConfigCache {
    fn new() -> Self {
        Self {
            packages: CacheSlot::new(),
            rules: CacheSlot::new(),
            fees: CacheSlot::new(),
            exchange_rates: CacheSlot::new(),
            channel_prices: CacheSlot::new(),
        }
    }
}

type SlotRef<K, V> = fn(&ConfigCache) -> &CacheSlot<K, V>;
type SlotMut<K, V> = fn(&mut ConfigCache) -> &mut CacheSlot<K, V>;

/// Cached, read-only view of pricing configuration
pub struct ConfigProvider {
    store: Arc<dyn CatalogStore>,
    cache: RwLock<ConfigCache>,
    cache_enabled: AtomicBool,
    cache_ttl_ms: AtomicU64,
    metrics: PerformanceMetrics,
}

impl ConfigProvider {
    pub fn new(store: Arc<dyn CatalogStore>, settings: &EngineSettings, metrics: PerformanceMetrics) -> Self {
        Self {
            store,
            cache: RwLock::new(ConfigCache::new()),
            cache_enabled: AtomicBool::new(settings.cache_enabled),
            cache_ttl_ms: AtomicU64::new(settings.cache_ttl.as_millis() as u64),
            metrics,
        }
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    pub fn get_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms.load(Ordering::Relaxed))
    }

    /// Read-through lookup with a double-checked refresh
    async fn cached<K, V, F, Fut>(
        &self,
        slot: SlotRef<K, V>,
        slot_mut: SlotMut<K, V>,
        key: K,
        load: F,
    ) -> PricingResult<V>
    where
        K: Eq + Hash,
        V: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = PricingResult<V>>,
    {
        if !self.is_cache_enabled() {
            return load().await;
        }

        let ttl = self.get_cache_ttl();
        {
            let cache = self.cache.read().await;
            if let Some(value) = slot(&*cache).get_fresh(&key, ttl) {
                self.metrics.record_cache_hit();
                return Ok(value);
            }
        }

        self.metrics.record_cache_miss();

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited for the write lock
        if let Some(value) = slot(&*cache).get_fresh(&key, ttl) {
            return Ok(value);
        }

        let value = load().await?;
        slot_mut(&mut *cache).insert(key, value.clone());
        Ok(value)
    }

    /// Active package by id
    ///
    /// Missing and inactive packages are both `NotFound`.
    pub async fn get_package(&self, package_id: i32) -> PricingResult<PackageInfo> {
        let package = self
            .cached(
                |c| &c.packages,
                |c| &mut c.packages,
                package_id,
                || self.store.fetch_package(package_id),
            )
            .await?;

        match package {
            Some(package) if package.is_active => Ok(package),
            Some(_) => {
                debug!(package_id, "Package is inactive");
                Err(PricingError::package_not_found(package_id))
            }
            None => Err(PricingError::package_not_found(package_id)),
        }
    }

    /// Active rules owned by `scope`, validated on load
    pub async fn get_rules(&self, scope: RuleScope) -> PricingResult<Arc<Vec<DiscountRule>>> {
        self.cached(|c| &c.rules, |c| &mut c.rules, scope, || async move {
            let rules = self.store.fetch_rules(&scope).await?;
            for rule in &rules {
                validate_rule(rule)?;
            }
            debug!(scope = ?scope, count = rules.len(), "Loaded discount rules");
            Ok::<_, PricingError>(Arc::new(rules))
        })
        .await
    }

    pub async fn get_fees(&self) -> PricingResult<Arc<Vec<Fee>>> {
        self.cached(|c| &c.fees, |c| &mut c.fees, (), || async move {
            let fees = self.store.fetch_fees().await?;
            Ok::<_, PricingError>(Arc::new(fees))
        })
        .await
    }

    /// Active fee by name; `None` when there is no such fee
    pub async fn get_fee_config(&self, name: &str) -> PricingResult<Option<Fee>> {
        let fees = self.get_fees().await?;
        Ok(fees.iter().find(|fee| fee.name == name).cloned())
    }

    /// Conversion rate, or `None` when none is configured
    pub async fn find_exchange_rate(&self, from: &str, to: &str) -> PricingResult<Option<Decimal>> {
        if from == to {
            return Ok(Some(Decimal::ONE));
        }

        let key = (from.to_string(), to.to_string());
        self.cached(
            |c| &c.exchange_rates,
            |c| &mut c.exchange_rates,
            key,
            || self.store.fetch_exchange_rate(from, to),
        )
        .await
    }

    /// Conversion rate, defaulting to 1 when none is configured
    pub async fn get_exchange_rate(&self, from: &str, to: &str) -> PricingResult<Decimal> {
        Ok(self.find_exchange_rate(from, to).await?.unwrap_or(Decimal::ONE))
    }

    /// Channel override of a package's base price
    pub async fn get_channel_price(
        &self,
        package_id: i32,
        channel: Channel,
    ) -> PricingResult<Option<Decimal>> {
        if channel == Channel::Direct {
            return Ok(None);
        }

        self.cached(
            |c| &c.channel_prices,
            |c| &mut c.channel_prices,
            (package_id, channel),
            || self.store.fetch_channel_price(package_id, channel),
        )
        .await
    }

    /// Apply the cache flags stored in the settings table
    ///
    /// Unparseable values are logged and ignored.
    pub async fn load_cache_policy(&self) -> PricingResult<()> {
        if let Some(value) = self.store.fetch_setting(CACHE_ENABLED_KEY).await? {
            match parse_bool(&value) {
                Some(enabled) => self.cache_enabled.store(enabled, Ordering::Relaxed),
                None => warn!(key = CACHE_ENABLED_KEY, value = %value, "Ignoring invalid cache setting"),
            }
        }

        if let Some(value) = self.store.fetch_setting(CACHE_TTL_KEY).await? {
            match value.trim().parse::<u64>() {
                Ok(seconds) => self
                    .cache_ttl_ms
                    .store(seconds.saturating_mul(1000), Ordering::Relaxed),
                Err(_) => warn!(key = CACHE_TTL_KEY, value = %value, "Ignoring invalid cache setting"),
            }
        }

        info!(
            cache_enabled = self.is_cache_enabled(),
            cache_ttl_secs = self.get_cache_ttl().as_secs(),
            "Cache policy loaded"
        );
        Ok(())
    }

    /// Drop every cached entry; the next lookup of each kind goes to the store
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = ConfigCache::new();
        debug!("Configuration cache invalidated");
    }

    /// Load the cache policy, then prefetch fees and global rules
    pub async fn warm(&self) -> PricingResult<()> {
        self.load_cache_policy().await?;
        let fees = self.get_fees().await?;
        let rules = self.get_rules(RuleScope::Global).await?;
        info!(fees = fees.len(), global_rules = rules.len(), "Configuration cache warmed");
        Ok(())
    }
}
