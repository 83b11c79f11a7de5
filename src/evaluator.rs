// Rule Evaluator
//
// Decides which candidate rules apply to a request and in what order.
// Evaluation is pure: the clock is part of the context.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::PricingResult;
use crate::models::{CalculationInput, ConditionValue, DiscountRule, RuleCondition, Scalar};
use crate::types::{Channel, ConditionOperator};
use crate::validation::validate_condition_shape;

/// Field names compare without case or underscores: `userLevel` == `user_level`
pub fn normalize_field(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Flattened view of a request that rule conditions are tested against
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub now: DateTime<Utc>,
    fields: BTreeMap<String, Scalar>,
}

impl EvaluationContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            fields: BTreeMap::new(),
        }
    }

    /// Context for a calculation request
    ///
    /// Built-in fields shadow custom fields of the same name.
    pub fn from_input(input: &CalculationInput, now: DateTime<Utc>) -> Self {
        let mut context = Self::new(now);

        for (name, value) in &input.custom_fields {
            context.set(name, value.clone());
        }

        context.set("quantity", Scalar::from(input.quantity));
        context.set("is_emergency", Scalar::from(input.is_emergency));
        context.set("hour", Scalar::from(now.hour()));
        context.set("weekday", Scalar::from(now.weekday().number_from_monday()));

        let channel = input.channel();
        context.set("channel", Scalar::from(channel.kind()));
        match channel {
            Channel::Bot(id) => context.set("bot_id", Scalar::from(id)),
            Channel::Agent(id) => context.set("agent_id", Scalar::from(id)),
            Channel::Direct => {}
        }

        if let Some(level) = input.user_level {
            context.set("user_level", Scalar::from(level));
        }
        if let Some(amount) = input.amount {
            context.set("amount", Scalar::Number(amount));
        }

        context
    }

    pub fn set(&mut self, field: &str, value: Scalar) {
        self.fields.insert(normalize_field(field), value);
    }

    pub fn get(&self, field: &str) -> Option<&Scalar> {
        self.fields.get(&normalize_field(field))
    }
}

/// Evaluates a condition against the context
///
/// A field missing from the context is a no-match. A type mismatch between
/// the field and the condition value is also a no-match.
pub fn evaluate_condition(condition: &RuleCondition, context: &EvaluationContext) -> bool {
    let Some(actual) = context.get(&condition.field) else {
        return false;
    };

    match (condition.operator, &condition.value) {
        (ConditionOperator::Gt, ConditionValue::Single(expected)) => {
            actual.compare(expected) == Some(Ordering::Greater)
        }
        (ConditionOperator::Gte, ConditionValue::Single(expected)) => matches!(
            actual.compare(expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        (ConditionOperator::Lt, ConditionValue::Single(expected)) => {
            actual.compare(expected) == Some(Ordering::Less)
        }
        (ConditionOperator::Lte, ConditionValue::Single(expected)) => matches!(
            actual.compare(expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        (ConditionOperator::Eq, ConditionValue::Single(expected)) => {
            actual.compare(expected) == Some(Ordering::Equal)
        }
        (ConditionOperator::In, ConditionValue::List(options)) => options
            .iter()
            .any(|option| actual.compare(option) == Some(Ordering::Equal)),
        (ConditionOperator::Between, ConditionValue::List(bounds)) => match bounds.as_slice() {
            [low, high] => {
                matches!(actual.compare(low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(actual.compare(high), Some(Ordering::Less | Ordering::Equal))
            }
            _ => false,
        },
        // Shape is checked before evaluation; anything else cannot match
        _ => false,
    }
}

/// Application order: priority descending, channel rules before global
/// ones at equal priority, then id ascending
pub fn rule_order(a: &DiscountRule, b: &DiscountRule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| {
            b.scope
                .is_channel_specific()
                .cmp(&a.scope.is_channel_specific())
        })
        .then_with(|| a.id.cmp(&b.id))
}

pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Whether a single rule applies
    ///
    /// A rule that is inactive or outside its window never applies and its
    /// condition is not looked at. A malformed condition is a validation error.
    pub fn rule_applies(rule: &DiscountRule, context: &EvaluationContext) -> PricingResult<bool> {
        if !rule.is_active || !rule.is_within_window(context.now) {
            return Ok(false);
        }

        validate_condition_shape(rule)?;
        Ok(evaluate_condition(&rule.condition, context))
    }

    /// Matching rules in application order
    pub fn select_rules(
        context: &EvaluationContext,
        candidates: &[DiscountRule],
    ) -> PricingResult<Vec<DiscountRule>> {
        let mut selected = Vec::new();
        for rule in candidates {
            if Self::rule_applies(rule, context)? {
                selected.push(rule.clone());
            }
        }

        selected.sort_by(rule_order);

        tracing::debug!(
            candidates = candidates.len(),
            selected = selected.len(),
            "Selected discount rules"
        );
        Ok(selected)
    }
}
