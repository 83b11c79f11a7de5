// Rule Catalog
//
// Assembles the candidate rule set for a calculation: the global rules plus
// the rules scoped to the request's channel, deduplicated by id.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config_provider::ConfigProvider;
use crate::error::PricingResult;
use crate::models::DiscountRule;
use crate::types::{Channel, RuleScope, RuleType};

pub struct RuleCatalog {
    config: Arc<ConfigProvider>,
}

impl RuleCatalog {
    pub fn new(config: Arc<ConfigProvider>) -> Self {
        Self { config }
    }

    /// Candidate rules for a channel
    ///
    /// Promotional rules are left out when `include_promotions` is false.
    /// The result is unordered; ordering belongs to the evaluator.
    pub async fn candidates(
        &self,
        channel: Channel,
        include_promotions: bool,
    ) -> PricingResult<Vec<DiscountRule>> {
        let global = self.config.get_rules(RuleScope::Global).await?;
        let scoped = match channel.rule_scope() {
            Some(scope) => self.config.get_rules(scope).await?,
            None => Arc::new(Vec::new()),
        };

        let mut rules = merge_candidates(&global, &scoped);
        if !include_promotions {
            rules.retain(|rule| rule.rule_type != RuleType::Promotional);
        }

        tracing::debug!(
            channel = %channel,
            global = global.len(),
            scoped = scoped.len(),
            candidates = rules.len(),
            "Assembled candidate rules"
        );
        Ok(rules)
    }
}

/// Union of global and channel-scoped rules
///
/// When both sets hold the same id, the channel-scoped copy wins.
pub fn merge_candidates(global: &[DiscountRule], scoped: &[DiscountRule]) -> Vec<DiscountRule> {
    let mut by_id: HashMap<Uuid, DiscountRule> = HashMap::with_capacity(global.len() + scoped.len());

    for rule in global {
        by_id.insert(rule.id, rule.clone());
    }
    for rule in scoped {
        by_id.insert(rule.id, rule.clone());
    }

    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PerformanceMetrics;
    use crate::models::{ConditionValue, RuleCondition, RuleDiscount, Scalar};
    use crate::settings::EngineSettings;
    use crate::store::MemoryStore;
    use crate::types::{ConditionOperator, DiscountKind};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn rule(id: u128, name: &str, scope: RuleScope, rule_type: RuleType) -> DiscountRule {
        DiscountRule {
            id: Uuid::from_u128(id),
            name: name.to_string(),
            rule_type,
            scope,
            condition: RuleCondition::new(
                "quantity",
                ConditionOperator::Gte,
                ConditionValue::Single(Scalar::from(1u32)),
            ),
            discount: RuleDiscount {
                kind: DiscountKind::Percentage,
                value: dec!(5),
                max_amount: None,
            },
            priority: 0,
            is_active: true,
            valid_from: None,
            valid_until: None,
        }
    }

    #[test]
    fn test_merge_deduplicates_by_id() {
        let global = vec![rule(1, "global", RuleScope::Global, RuleType::Volume)];
        let scoped = vec![
            rule(1, "bot copy", RuleScope::Bot(2), RuleType::Volume),
            rule(2, "bot only", RuleScope::Bot(2), RuleType::Volume),
        ];

        let merged = merge_candidates(&global, &scoped);
        assert_eq!(merged.len(), 2);

        let shared = merged.iter().find(|r| r.id == Uuid::from_u128(1)).unwrap();
        assert_eq!(shared.name, "bot copy");
    }

    #[tokio::test]
    async fn test_candidates_for_channels() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(rule(1, "global", RuleScope::Global, RuleType::Volume)).await;
        store.insert_rule(rule(2, "bot 7", RuleScope::Bot(7), RuleType::Volume)).await;
        store.insert_rule(rule(3, "agent 7", RuleScope::Agent(7), RuleType::Volume)).await;
        store.insert_rule(rule(4, "promo", RuleScope::Global, RuleType::Promotional)).await;

        let config = Arc::new(ConfigProvider::new(
            store,
            &EngineSettings::default(),
            PerformanceMetrics::new(Duration::from_millis(100)),
        ));
        let catalog = RuleCatalog::new(config);

        let direct = catalog.candidates(Channel::Direct, true).await.unwrap();
        assert_eq!(direct.len(), 2);

        let bot = catalog.candidates(Channel::Bot(7), true).await.unwrap();
        assert_eq!(bot.len(), 3);
        assert!(bot.iter().all(|r| r.scope != RuleScope::Agent(7)));

        let no_promotions = catalog.candidates(Channel::Bot(7), false).await.unwrap();
        assert_eq!(no_promotions.len(), 2);
        assert!(no_promotions.iter().all(|r| r.rule_type != RuleType::Promotional));
    }
}
