// Validation utilities
// Input shape checks beyond what the derive covers, and structural checks for discount rules

use rust_decimal::Decimal;
use validator::{Validate, ValidationError};

use crate::error::{PricingError, PricingResult};
use crate::models::{CalculationInput, ConditionValue, DiscountRule, PackageInfo};
use crate::types::{ConditionOperator, DiscountKind};

/// Validates that a currency code is 3-10 uppercase ASCII letters (e.g. "TRX", "USDT")
pub fn validate_currency_code(code: &str) -> Result<(), ValidationError> {
    let valid_length = (3..=10).contains(&code.len());
    if valid_length && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_currency_code"))
    }
}

/// Validates a calculation request before any lookup happens
pub fn validate_input(input: &CalculationInput) -> PricingResult<()> {
    input.validate()?;

    if input.bot_id.is_some() && input.agent_id.is_some() {
        return Err(PricingError::validation(
            "A calculation can target a bot or an agent, not both",
        ));
    }

    if let Some(amount) = input.amount {
        if amount <= Decimal::ZERO {
            return Err(PricingError::validation("amount must be positive"));
        }
    }

    if input.custom_fields.keys().any(|k| k.trim().is_empty()) {
        return Err(PricingError::validation("custom field names cannot be empty"));
    }

    Ok(())
}

/// Validates a request against the resolved package
pub fn validate_against_package(input: &CalculationInput, package: &PackageInfo) -> PricingResult<()> {
    if input.resource_type != package.resource_type {
        return Err(PricingError::validation(format!(
            "Package {} sells {}, not {}",
            package.id, package.resource_type, input.resource_type
        )));
    }

    if input.quantity < package.min_quantity {
        return Err(PricingError::validation(format!(
            "quantity {} is below the minimum of {} for package {}",
            input.quantity, package.min_quantity, package.id
        )));
    }

    if let Some(max_quantity) = package.max_quantity {
        if input.quantity > max_quantity {
            return Err(PricingError::validation(format!(
                "quantity {} exceeds the maximum of {} for package {}",
                input.quantity, max_quantity, package.id
            )));
        }
    }

    if input.amount.is_some() && package.unit_amount <= 0 {
        return Err(PricingError::validation(format!(
            "Package {} has no unit amount; amount-based pricing is unavailable",
            package.id
        )));
    }

    Ok(())
}

/// Validates the structure of a discount rule
///
/// Applied to catalog rules on load and to caller-supplied rules unless the
/// caller opts out.
pub fn validate_rule(rule: &DiscountRule) -> PricingResult<()> {
    if rule.name.trim().is_empty() {
        return Err(PricingError::validation(format!("Rule {} has an empty name", rule.id)));
    }

    validate_discount_value(rule)?;
    validate_condition_shape(rule)?;

    if let (Some(from), Some(until)) = (rule.valid_from, rule.valid_until) {
        if from > until {
            return Err(PricingError::validation(format!(
                "Rule '{}' has a validity window that ends before it starts",
                rule.name
            )));
        }
    }

    Ok(())
}

fn validate_discount_value(rule: &DiscountRule) -> PricingResult<()> {
    let discount = &rule.discount;

    if discount.value < Decimal::ZERO {
        return Err(PricingError::validation(format!(
            "Rule '{}': discount value must be non-negative",
            rule.name
        )));
    }

    if let Some(max_amount) = discount.max_amount {
        if max_amount < Decimal::ZERO {
            return Err(PricingError::validation(format!(
                "Rule '{}': max_amount must be non-negative",
                rule.name
            )));
        }
    }

    match discount.kind {
        DiscountKind::Percentage => {
            if discount.value > Decimal::ONE_HUNDRED {
                return Err(PricingError::validation(format!(
                    "Rule '{}': percentage discount cannot exceed 100%",
                    rule.name
                )));
            }
        }
        DiscountKind::Multiplier => {
            if discount.value > Decimal::ONE {
                return Err(PricingError::validation(format!(
                    "Rule '{}': multiplier must be between 0 and 1",
                    rule.name
                )));
            }
        }
        DiscountKind::Fixed => {}
    }

    Ok(())
}

/// Checks that the operator and value agree
pub fn validate_condition_shape(rule: &DiscountRule) -> PricingResult<()> {
    let condition = &rule.condition;

    if condition.field.trim().is_empty() {
        return Err(PricingError::validation(format!(
            "Rule '{}': condition field is empty",
            rule.name
        )));
    }

    match (condition.operator, &condition.value) {
        (ConditionOperator::In, ConditionValue::List(values)) if !values.is_empty() => Ok(()),
        (ConditionOperator::In, _) => Err(PricingError::validation(format!(
            "Rule '{}': 'in' requires a non-empty list",
            rule.name
        ))),
        (ConditionOperator::Between, ConditionValue::List(bounds)) if bounds.len() == 2 => Ok(()),
        (ConditionOperator::Between, _) => Err(PricingError::validation(format!(
            "Rule '{}': 'between' requires exactly two bounds",
            rule.name
        ))),
        (_, ConditionValue::List(_)) => Err(PricingError::validation(format!(
            "Rule '{}': '{}' requires a single value",
            rule.name, condition.operator
        ))),
        (_, ConditionValue::Single(_)) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RuleCondition, RuleDiscount, Scalar};
    use crate::types::{ResourceType, RuleScope, RuleType};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn rule(operator: ConditionOperator, value: ConditionValue, kind: DiscountKind, amount: Decimal) -> DiscountRule {
        DiscountRule {
            id: Uuid::from_u128(1),
            name: "test rule".to_string(),
            rule_type: RuleType::Volume,
            scope: RuleScope::Global,
            condition: RuleCondition::new("quantity", operator, value),
            discount: RuleDiscount {
                kind,
                value: amount,
                max_amount: None,
            },
            priority: 0,
            is_active: true,
            valid_from: None,
            valid_until: None,
        }
    }

    fn package() -> PackageInfo {
        PackageInfo {
            id: 1,
            name: "Energy 32k".to_string(),
            resource_type: ResourceType::Energy,
            unit_amount: 32_000,
            base_price: dec!(100),
            currency: "TRX".to_string(),
            min_quantity: 1,
            max_quantity: Some(10),
            min_price: None,
            max_price: None,
            is_active: true,
        }
    }

    #[test]
    fn test_currency_code() {
        assert!(validate_currency_code("TRX").is_ok());
        assert!(validate_currency_code("USDT").is_ok());
        assert!(validate_currency_code("trx").is_err());
        assert!(validate_currency_code("T").is_err());
    }

    #[test]
    fn test_bot_and_agent_conflict() {
        let input = CalculationInput::new(1, 1, ResourceType::Energy).with_bot(1).with_agent(2);
        assert!(matches!(validate_input(&input), Err(PricingError::Validation(_))));
    }

    #[test]
    fn test_non_positive_amount() {
        let input = CalculationInput::new(1, 1, ResourceType::Energy).with_amount(dec!(0));
        assert!(validate_input(&input).is_err());
    }

    #[test]
    fn test_resource_mismatch() {
        let input = CalculationInput::new(1, 1, ResourceType::Bandwidth);
        assert!(validate_against_package(&input, &package()).is_err());
    }

    #[test]
    fn test_quantity_bounds() {
        let input = CalculationInput::new(1, 11, ResourceType::Energy);
        assert!(validate_against_package(&input, &package()).is_err());

        let input = CalculationInput::new(1, 10, ResourceType::Energy);
        assert!(validate_against_package(&input, &package()).is_ok());
    }

    #[test]
    fn test_percentage_over_hundred() {
        let r = rule(
            ConditionOperator::Gte,
            ConditionValue::Single(Scalar::from(1u32)),
            DiscountKind::Percentage,
            dec!(120),
        );
        assert!(validate_rule(&r).is_err());
    }

    #[test]
    fn test_fixed_discount_above_hundred_is_allowed() {
        let r = rule(
            ConditionOperator::Gte,
            ConditionValue::Single(Scalar::from(1u32)),
            DiscountKind::Fixed,
            dec!(250),
        );
        assert!(validate_rule(&r).is_ok());
    }

    #[test]
    fn test_multiplier_range() {
        let single = ConditionValue::Single(Scalar::from(1u32));
        let r = rule(ConditionOperator::Gte, single.clone(), DiscountKind::Multiplier, dec!(3));
        assert!(matches!(validate_rule(&r), Err(PricingError::Validation(_))));

        let r = rule(ConditionOperator::Gte, single.clone(), DiscountKind::Multiplier, dec!(1.0001));
        assert!(validate_rule(&r).is_err());

        for value in [dec!(0), dec!(0.5), dec!(1)] {
            let r = rule(ConditionOperator::Gte, single.clone(), DiscountKind::Multiplier, value);
            assert!(validate_rule(&r).is_ok());
        }
    }

    #[test]
    fn test_between_requires_two_bounds() {
        let r = rule(
            ConditionOperator::Between,
            ConditionValue::List(vec![Scalar::from(1u32)]),
            DiscountKind::Fixed,
            dec!(1),
        );
        assert!(validate_rule(&r).is_err());

        let r = rule(
            ConditionOperator::Between,
            ConditionValue::List(vec![Scalar::from(1u32), Scalar::from(5u32)]),
            DiscountKind::Fixed,
            dec!(1),
        );
        assert!(validate_rule(&r).is_ok());
    }

    #[test]
    fn test_in_requires_list() {
        let r = rule(
            ConditionOperator::In,
            ConditionValue::Single(Scalar::from(1u32)),
            DiscountKind::Fixed,
            dec!(1),
        );
        assert!(validate_rule(&r).is_err());
    }

    #[test]
    fn test_inverted_window() {
        let mut r = rule(
            ConditionOperator::Gte,
            ConditionValue::Single(Scalar::from(1u32)),
            DiscountKind::Fixed,
            dec!(1),
        );
        let now = chrono::Utc::now();
        r.valid_from = Some(now);
        r.valid_until = Some(now - chrono::Duration::days(1));
        assert!(validate_rule(&r).is_err());
    }
}
