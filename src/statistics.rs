// Statistics Aggregator
//
// Summaries over the history tables. Every failure degrades to a zeroed
// result so reporting never breaks a caller.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::audit::HistoryRecorder;
use crate::models::{CalculationHistoryRecord, PriceHistoryRecord};
use crate::query::CalculationQuery;
use crate::types::EntityType;

const TOP_RULES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStatistics {
    pub total_changes: u64,
    pub price_increases: u64,
    pub price_decreases: u64,
    pub avg_price_change: Decimal,
    pub max_price_change: Decimal,
    pub min_price_change: Decimal,
}

impl PriceStatistics {
    pub fn from_records(records: &[PriceHistoryRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let changes: Vec<Decimal> = records.iter().map(PriceHistoryRecord::price_change).collect();
        let total = changes.iter().fold(Decimal::ZERO, |sum, c| sum.saturating_add(*c));

        Self {
            total_changes: changes.len() as u64,
            price_increases: changes.iter().filter(|c| c.is_sign_positive() && !c.is_zero()).count() as u64,
            price_decreases: changes.iter().filter(|c| c.is_sign_negative() && !c.is_zero()).count() as u64,
            avg_price_change: total / Decimal::from(changes.len() as u64),
            max_price_change: changes.iter().copied().max().unwrap_or_default(),
            min_price_change: changes.iter().copied().min().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleUsage {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationStatistics {
    pub total_calculations: u64,
    pub avg_base_price: Decimal,
    pub avg_final_price: Decimal,
    pub avg_discount: Decimal,
    /// Most applied rules, highest count first
    pub top_rules: Vec<RuleUsage>,
}

impl CalculationStatistics {
    pub fn from_records(records: &[CalculationHistoryRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let count = Decimal::from(records.len() as u64);
        let mut base = Decimal::ZERO;
        let mut final_price = Decimal::ZERO;
        let mut discount = Decimal::ZERO;
        let mut usage: HashMap<&str, u64> = HashMap::new();

        for record in records {
            base = base.saturating_add(record.base_price);
            final_price = final_price.saturating_add(record.final_price);
            discount = discount.saturating_add(record.discount);
            for rule in &record.applied_rules {
                *usage.entry(rule.as_str()).or_insert(0) += 1;
            }
        }

        let mut top_rules: Vec<RuleUsage> = usage
            .into_iter()
            .map(|(name, count)| RuleUsage {
                name: name.to_string(),
                count,
            })
            .collect();
        top_rules.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        top_rules.truncate(TOP_RULES);

        Self {
            total_calculations: records.len() as u64,
            avg_base_price: base / count,
            avg_final_price: final_price / count,
            avg_discount: discount / count,
            top_rules,
        }
    }
}

pub struct StatisticsAggregator {
    recorder: Arc<HistoryRecorder>,
}

impl StatisticsAggregator {
    pub fn new(recorder: Arc<HistoryRecorder>) -> Self {
        Self { recorder }
    }

    pub async fn price_statistics(
        &self,
        entity_type: Option<EntityType>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> PriceStatistics {
        match self.recorder.list_price_changes(entity_type, start, end).await {
            Ok(records) => PriceStatistics::from_records(&records),
            Err(e) => {
                error!(error = %e, "Failed to load price history for statistics");
                PriceStatistics::default()
            }
        }
    }

    /// Calculations over the last `days` days
    pub async fn calculation_statistics(
        &self,
        entity_type: Option<EntityType>,
        days: u32,
        now: DateTime<Utc>,
    ) -> CalculationStatistics {
        let query = CalculationQuery {
            entity_type,
            ..CalculationQuery::last_days(now, i64::from(days))
        };

        match self.recorder.query_calculations(&query).await {
            Ok(records) => CalculationStatistics::from_records(&records),
            Err(e) => {
                error!(error = %e, "Failed to load calculations for statistics");
                CalculationStatistics::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PerformanceMetrics;
    use crate::models::PriceChange;
    use crate::store::{AuditStore, MemoryStore};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn change(entity_type: EntityType, old: Decimal, new: Decimal) -> PriceHistoryRecord {
        PriceChange {
            entity_type,
            entity_id: 1,
            old_price: old,
            new_price: new,
            reason: "adjustment".to_string(),
            actor: "ops".to_string(),
            metadata: None,
        }
        .into_record(Utc::now())
    }

    fn calculation(rules: &[&str], base: Decimal, final_price: Decimal) -> CalculationHistoryRecord {
        CalculationHistoryRecord {
            id: Uuid::new_v4(),
            entity_type: EntityType::Bot,
            entity_id: 4,
            package_id: 1,
            input: serde_json::json!({}),
            base_price: base,
            final_price,
            discount: base - final_price,
            applied_rules: rules.iter().map(|r| r.to_string()).collect(),
            applied_rule_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_price_statistics() {
        let records = vec![
            change(EntityType::Bot, dec!(10), dec!(12)),
            change(EntityType::Bot, dec!(12), dec!(9)),
            change(EntityType::Bot, dec!(9), dec!(9)),
        ];

        let stats = PriceStatistics::from_records(&records);
        assert_eq!(stats.total_changes, 3);
        assert_eq!(stats.price_increases, 1);
        assert_eq!(stats.price_decreases, 1);
        assert_eq!(stats.max_price_change, dec!(2));
        assert_eq!(stats.min_price_change, dec!(-3));
        assert_eq!(stats.avg_price_change.round_dp(4), dec!(-0.3333));
    }

    #[test]
    fn test_empty_statistics_are_zeroed() {
        assert_eq!(PriceStatistics::from_records(&[]), PriceStatistics::default());
        assert_eq!(CalculationStatistics::from_records(&[]).total_calculations, 0);
    }

    #[test]
    fn test_top_rules_ranked_with_name_ties() {
        let records = vec![
            calculation(&["bulk", "vip"], dec!(100), dec!(80)),
            calculation(&["bulk"], dec!(100), dec!(90)),
            calculation(&["zeta", "alpha", "night", "promo", "vip"], dec!(100), dec!(70)),
        ];

        let stats = CalculationStatistics::from_records(&records);
        assert_eq!(stats.total_calculations, 3);
        assert_eq!(stats.avg_final_price, dec!(80));
        assert_eq!(stats.avg_discount, dec!(20));

        let names: Vec<&str> = stats.top_rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["bulk", "vip", "alpha", "night", "promo"]);
        assert_eq!(stats.top_rules[0].count, 2);
    }

    #[tokio::test]
    async fn test_calculation_window_beyond_calendar() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_calculation(&calculation(&["bulk"], dec!(100), dec!(90)))
            .await
            .unwrap();

        let metrics = PerformanceMetrics::new(std::time::Duration::from_millis(100));
        let recorder = Arc::new(HistoryRecorder::spawn(store, 4, metrics));
        let aggregator = StatisticsAggregator::new(recorder);

        let stats = aggregator.calculation_statistics(None, u32::MAX, Utc::now()).await;
        assert_eq!(stats.total_calculations, 1);
        assert_eq!(stats.avg_final_price, dec!(90));
    }

    #[tokio::test]
    async fn test_aggregator_filters_by_entity_type() {
        let store = Arc::new(MemoryStore::new());
        store.insert_price_change(&change(EntityType::Bot, dec!(1), dec!(2))).await.unwrap();
        store.insert_price_change(&change(EntityType::Agent, dec!(5), dec!(1))).await.unwrap();

        let metrics = PerformanceMetrics::new(std::time::Duration::from_millis(100));
        let recorder = Arc::new(HistoryRecorder::spawn(store, 4, metrics));
        let aggregator = StatisticsAggregator::new(recorder);

        let bots = aggregator.price_statistics(Some(EntityType::Bot), None, None).await;
        assert_eq!(bots.total_changes, 1);
        assert_eq!(bots.price_increases, 1);

        let all = aggregator.price_statistics(None, None, None).await;
        assert_eq!(all.total_changes, 2);
    }
}
