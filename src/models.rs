use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

use crate::types::{
    Channel, ConditionOperator, DiscountKind, EntityType, FeeType, ResourceType, RoundingMode,
    RuleScope, RuleType,
};

/// A purchasable unit of resource capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub id: i32,
    pub name: String,
    pub resource_type: ResourceType,
    /// Resource units delivered per package (e.g. 32000 energy)
    pub unit_amount: i64,
    pub base_price: Decimal,
    pub currency: String,
    pub min_quantity: u32,
    pub max_quantity: Option<u32>,
    /// Per-unit clamp bounds applied after discounts
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub is_active: bool,
}

/// Scalar value appearing in rule conditions and the evaluation context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Decimal),
    Text(String),
}

impl Scalar {
    /// Ordering between two scalars of the same type; `None` on a type mismatch
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => Some(a.cmp(b)),
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<Decimal> for Scalar {
    fn from(value: Decimal) -> Self {
        Scalar::Number(value)
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Number(Decimal::from(value))
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Number(Decimal::from(value))
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

/// Right-hand side of a condition: a single scalar, or a list for `in`/`between`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    List(Vec<Scalar>),
    Single(Scalar),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
}

impl RuleCondition {
    pub fn new(field: &str, operator: ConditionOperator, value: ConditionValue) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDiscount {
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    pub value: Decimal,
    /// Cap on the amount a percentage discount may subtract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
}

/// Conditional price modifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub scope: RuleScope,
    pub condition: RuleCondition,
    pub discount: RuleDiscount,
    /// Higher values are applied first
    pub priority: i32,
    pub is_active: bool,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl DiscountRule {
    /// Whether `now` falls inside the rule's validity window (inclusive)
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        if let Some(valid_from) = self.valid_from {
            if now < valid_from {
                return false;
            }
        }
        if let Some(valid_until) = self.valid_until {
            if now > valid_until {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub id: i32,
    pub name: String,
    pub fee_type: FeeType,
    pub amount: Decimal,
    pub is_percentage: bool,
    pub is_active: bool,
}

/// Per-call options for a price calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CalculationOptions {
    pub rounding_mode: RoundingMode,
    /// Decimal digits kept in the final price; defaults by currency
    #[validate(range(max = 18))]
    pub precision: Option<u32>,
    /// Currency to quote in; defaults to the package currency
    #[validate(custom = "crate::validation::validate_currency_code")]
    pub currency: Option<String>,
    /// Persist the calculation to the history table
    pub include_history: bool,
    /// Structurally validate caller-supplied custom rules
    pub validate_input: bool,
    /// Include promotional rules from the catalog
    pub apply_promotions: bool,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            rounding_mode: RoundingMode::Nearest,
            precision: None,
            currency: None,
            include_history: true,
            validate_input: true,
            apply_promotions: true,
        }
    }
}

/// A purchase request to be priced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CalculationInput {
    pub package_id: i32,
    #[serde(default)]
    pub bot_id: Option<i32>,
    #[serde(default)]
    pub agent_id: Option<i32>,
    #[validate(range(min = 1))]
    pub quantity: u32,
    pub resource_type: ResourceType,
    /// Raw resource amount; scales the priced units by `amount / unit_amount`
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub user_level: Option<u32>,
    #[serde(default)]
    pub is_emergency: bool,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, Scalar>,
    /// Replaces the rule catalog for this one calculation when present
    #[serde(default)]
    pub custom_rules: Option<Vec<DiscountRule>>,
    #[serde(default)]
    #[validate]
    pub options: CalculationOptions,
}

impl CalculationInput {
    pub fn new(package_id: i32, quantity: u32, resource_type: ResourceType) -> Self {
        Self {
            package_id,
            bot_id: None,
            agent_id: None,
            quantity,
            resource_type,
            amount: None,
            user_level: None,
            is_emergency: false,
            custom_fields: BTreeMap::new(),
            custom_rules: None,
            options: CalculationOptions::default(),
        }
    }

    pub fn with_bot(mut self, bot_id: i32) -> Self {
        self.bot_id = Some(bot_id);
        self
    }

    pub fn with_agent(mut self, agent_id: i32) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_user_level(mut self, level: u32) -> Self {
        self.user_level = Some(level);
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn emergency(mut self) -> Self {
        self.is_emergency = true;
        self
    }

    pub fn with_custom_field(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.custom_fields.insert(name.to_string(), value.into());
        self
    }

    pub fn with_custom_rules(mut self, rules: Vec<DiscountRule>) -> Self {
        self.custom_rules = Some(rules);
        self
    }

    pub fn with_options(mut self, options: CalculationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn channel(&self) -> Channel {
        Channel::from_ids(self.bot_id, self.agent_id)
    }
}

/// Structured decomposition of a final price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub base_amount: Decimal,
    pub quantity: u32,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub fee_amount: Decimal,
    /// Reserved; always zero
    pub tax_amount: Decimal,
    pub total: Decimal,
}

impl PriceBreakdown {
    /// `subtotal - discount + fee + tax`
    pub fn expected_total(&self) -> Decimal {
        self.subtotal - self.discount_amount + self.fee_amount + self.tax_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationDetails {
    pub breakdown: PriceBreakdown,
    pub package_id: i32,
    pub package_name: String,
    pub resource_type: ResourceType,
    pub channel: Channel,
    /// Priced multiple: quantity, or quantity scaled by amount / unit_amount
    pub units: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub precision: u32,
    pub rounding_mode: RoundingMode,
    pub price_override: bool,
    pub applied_rule_ids: Vec<Uuid>,
}

/// Anomalies noticed while composing a price; the result is still valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceWarning {
    FlooredToZero { stage: String, value: Decimal },
    MissingExchangeRate { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCalculationResult {
    pub base_price: Decimal,
    pub final_price: Decimal,
    /// Absolute discount in the quoted currency
    pub discount: Decimal,
    /// Kind of the first rule applied
    pub discount_type: Option<DiscountKind>,
    /// Rule names in the order they were applied
    pub applied_rules: Vec<String>,
    pub calculation_details: CalculationDetails,
    pub warnings: Vec<PriceWarning>,
    pub calculated_at: DateTime<Utc>,
}

/// Discrete change of a stored price, kept in the append-only audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryRecord {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: i32,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub change_reason: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl PriceHistoryRecord {
    pub fn price_change(&self) -> Decimal {
        self.new_price - self.old_price
    }
}

/// Request to record a price change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub entity_type: EntityType,
    pub entity_id: i32,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub reason: String,
    pub actor: String,
    pub metadata: Option<serde_json::Value>,
}

impl PriceChange {
    pub fn into_record(self, changed_at: DateTime<Utc>) -> PriceHistoryRecord {
        PriceHistoryRecord {
            id: Uuid::new_v4(),
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            old_price: self.old_price,
            new_price: self.new_price,
            change_reason: self.reason,
            changed_by: self.actor,
            changed_at,
            metadata: self.metadata,
        }
    }
}

/// Persisted snapshot of one calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationHistoryRecord {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: i32,
    pub package_id: i32,
    pub input: serde_json::Value,
    pub base_price: Decimal,
    pub final_price: Decimal,
    pub discount: Decimal,
    pub applied_rules: Vec<String>,
    pub applied_rule_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CalculationHistoryRecord {
    /// Build the record for a finished calculation
    ///
    /// The entity is the channel when there is one, otherwise the package.
    pub fn from_calculation(
        input: &CalculationInput,
        result: &PriceCalculationResult,
    ) -> Result<Self, serde_json::Error> {
        let (entity_type, entity_id) = match input.channel() {
            Channel::Bot(id) => (EntityType::Bot, id),
            Channel::Agent(id) => (EntityType::Agent, id),
            Channel::Direct => (EntityType::Package, input.package_id),
        };

        Ok(Self {
            id: Uuid::new_v4(),
            entity_type,
            entity_id,
            package_id: input.package_id,
            input: serde_json::to_value(input)?,
            base_price: result.base_price,
            final_price: result.final_price,
            discount: result.discount,
            applied_rules: result.applied_rules.clone(),
            applied_rule_ids: result.calculation_details.applied_rule_ids.clone(),
            created_at: result.calculated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_condition_value_deserialization() {
        let value: ConditionValue = serde_json::from_str("5").unwrap();
        assert_eq!(value, ConditionValue::Single(Scalar::Number(dec!(5))));

        let value: ConditionValue = serde_json::from_str("[1, 10]").unwrap();
        assert_eq!(
            value,
            ConditionValue::List(vec![Scalar::Number(dec!(1)), Scalar::Number(dec!(10))])
        );

        let value: ConditionValue = serde_json::from_str("\"vip\"").unwrap();
        assert_eq!(value, ConditionValue::Single(Scalar::Text("vip".to_string())));

        let value: ConditionValue = serde_json::from_str("true").unwrap();
        assert_eq!(value, ConditionValue::Single(Scalar::Bool(true)));
    }

    #[test]
    fn test_rule_deserialization_from_catalog_json() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000001",
            "name": "Bulk 10%",
            "rule_type": "volume",
            "condition": {"field": "quantity", "operator": "gte", "value": 5},
            "discount": {"type": "percentage", "value": 10, "max_amount": 50},
            "priority": 10,
            "is_active": true
        }"#;

        let rule: DiscountRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.scope, RuleScope::Global);
        assert_eq!(rule.condition.operator, ConditionOperator::Gte);
        assert_eq!(rule.discount.kind, DiscountKind::Percentage);
        assert_eq!(rule.discount.max_amount, Some(dec!(50)));
        assert!(rule.valid_from.is_none());
    }

    #[test]
    fn test_scalar_compare_type_mismatch() {
        assert_eq!(
            Scalar::Number(dec!(3)).compare(&Scalar::Number(dec!(5))),
            Some(Ordering::Less)
        );
        assert_eq!(Scalar::Number(dec!(3)).compare(&Scalar::Text("3".to_string())), None);
    }

    #[test]
    fn test_options_defaults() {
        let options: CalculationOptions = serde_json::from_str("{}").unwrap();
        assert!(options.include_history);
        assert!(options.validate_input);
        assert!(options.apply_promotions);
        assert_eq!(options.rounding_mode, RoundingMode::Nearest);
    }

    #[test]
    fn test_input_validation_rejects_zero_quantity() {
        let input = CalculationInput::new(1, 0, ResourceType::Energy);
        assert!(input.validate().is_err());

        let input = CalculationInput::new(1, 1, ResourceType::Energy);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_input_validation_rejects_excessive_precision() {
        let options = CalculationOptions {
            precision: Some(30),
            ..CalculationOptions::default()
        };
        let input = CalculationInput::new(1, 1, ResourceType::Energy).with_options(options);
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_breakdown_expected_total() {
        let breakdown = PriceBreakdown {
            base_amount: dec!(100),
            quantity: 5,
            subtotal: dec!(500),
            discount_amount: dec!(50),
            fee_amount: dec!(5),
            tax_amount: Decimal::ZERO,
            total: dec!(455),
        };
        assert_eq!(breakdown.expected_total(), breakdown.total);
    }

    #[test]
    fn test_rule_window() {
        let now = Utc::now();
        let rule = DiscountRule {
            id: Uuid::nil(),
            name: "window".to_string(),
            rule_type: RuleType::Promotional,
            scope: RuleScope::Global,
            condition: RuleCondition::new(
                "quantity",
                ConditionOperator::Gte,
                ConditionValue::Single(Scalar::from(1u32)),
            ),
            discount: RuleDiscount {
                kind: DiscountKind::Fixed,
                value: dec!(1),
                max_amount: None,
            },
            priority: 0,
            is_active: true,
            valid_from: Some(now - chrono::Duration::hours(1)),
            valid_until: Some(now + chrono::Duration::hours(1)),
        };

        assert!(rule.is_within_window(now));
        assert!(!rule.is_within_window(now + chrono::Duration::hours(2)));
        assert!(!rule.is_within_window(now - chrono::Duration::hours(2)));
    }
}
