// Domain type definitions for the pricing engine
// Closed enums shared by the catalog, evaluator, composer and history layers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PricingError;

/// Blockchain resource being sold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Energy,
    Bandwidth,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Energy => write!(f, "energy"),
            ResourceType::Bandwidth => write!(f, "bandwidth"),
        }
    }
}

impl FromStr for ResourceType {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "energy" => Ok(ResourceType::Energy),
            "bandwidth" => Ok(ResourceType::Bandwidth),
            _ => Err(PricingError::validation(format!("Unknown resource type: {}", s))),
        }
    }
}

/// Category of a discount rule
///
/// Informational only: matching is driven by the rule's condition, except
/// that promotional rules can be switched off per calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Volume,
    UserLevel,
    TimeBased,
    Promotional,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Volume => write!(f, "volume"),
            RuleType::UserLevel => write!(f, "user_level"),
            RuleType::TimeBased => write!(f, "time_based"),
            RuleType::Promotional => write!(f, "promotional"),
        }
    }
}

impl FromStr for RuleType {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "volume" => Ok(RuleType::Volume),
            "user_level" => Ok(RuleType::UserLevel),
            "time_based" => Ok(RuleType::TimeBased),
            "promotional" => Ok(RuleType::Promotional),
            _ => Err(PricingError::validation(format!("Unknown rule type: {}", s))),
        }
    }
}

/// Comparison operator of a rule condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    In,
    Between,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionOperator::Gt => "gt",
            ConditionOperator::Gte => "gte",
            ConditionOperator::Lt => "lt",
            ConditionOperator::Lte => "lte",
            ConditionOperator::Eq => "eq",
            ConditionOperator::In => "in",
            ConditionOperator::Between => "between",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ConditionOperator {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(ConditionOperator::Gt),
            "gte" => Ok(ConditionOperator::Gte),
            "lt" => Ok(ConditionOperator::Lt),
            "lte" => Ok(ConditionOperator::Lte),
            "eq" => Ok(ConditionOperator::Eq),
            "in" => Ok(ConditionOperator::In),
            "between" => Ok(ConditionOperator::Between),
            _ => Err(PricingError::validation(format!("Unknown condition operator: {}", s))),
        }
    }
}

/// How a rule's discount value is applied to the running price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// Subtract `price * value / 100`, optionally capped
    Percentage,

    /// Subtract `value` outright
    Fixed,

    /// Replace the price with `price * value`
    Multiplier,
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountKind::Percentage => write!(f, "percentage"),
            DiscountKind::Fixed => write!(f, "fixed"),
            DiscountKind::Multiplier => write!(f, "multiplier"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    Processing,
    Service,
    Emergency,
    Platform,
}

impl fmt::Display for FeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeType::Processing => write!(f, "processing"),
            FeeType::Service => write!(f, "service"),
            FeeType::Emergency => write!(f, "emergency"),
            FeeType::Platform => write!(f, "platform"),
        }
    }
}

impl FromStr for FeeType {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(FeeType::Processing),
            "service" => Ok(FeeType::Service),
            "emergency" => Ok(FeeType::Emergency),
            "platform" => Ok(FeeType::Platform),
            _ => Err(PricingError::validation(format!("Unknown fee type: {}", s))),
        }
    }
}

/// Kind of entity a history record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Bot,
    Agent,
    Package,
    Template,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Bot => write!(f, "bot"),
            EntityType::Agent => write!(f, "agent"),
            EntityType::Package => write!(f, "package"),
            EntityType::Template => write!(f, "template"),
        }
    }
}

impl FromStr for EntityType {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot" => Ok(EntityType::Bot),
            "agent" => Ok(EntityType::Agent),
            "package" => Ok(EntityType::Package),
            "template" => Ok(EntityType::Template),
            _ => Err(PricingError::validation(format!("Unknown entity type: {}", s))),
        }
    }
}

/// Rounding applied to the final price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    Up,
    Down,
    #[default]
    Nearest,
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundingMode::Up => write!(f, "up"),
            RoundingMode::Down => write!(f, "down"),
            RoundingMode::Nearest => write!(f, "nearest"),
        }
    }
}

/// Sales channel a purchase request arrives through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Direct,
    Bot(i32),
    Agent(i32),
}

impl Channel {
    pub fn from_ids(bot_id: Option<i32>, agent_id: Option<i32>) -> Self {
        match (bot_id, agent_id) {
            (Some(id), _) => Channel::Bot(id),
            (None, Some(id)) => Channel::Agent(id),
            (None, None) => Channel::Direct,
        }
    }

    /// Rule scope holding this channel's own rules, if it has one
    pub fn rule_scope(&self) -> Option<RuleScope> {
        match self {
            Channel::Direct => None,
            Channel::Bot(id) => Some(RuleScope::Bot(*id)),
            Channel::Agent(id) => Some(RuleScope::Agent(*id)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Channel::Direct => "direct",
            Channel::Bot(_) => "bot",
            Channel::Agent(_) => "agent",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Direct => write!(f, "direct"),
            Channel::Bot(id) => write!(f, "bot:{}", id),
            Channel::Agent(id) => write!(f, "agent:{}", id),
        }
    }
}

/// Entity a discount rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RuleScope {
    #[default]
    Global,
    Bot(i32),
    Agent(i32),
}

impl RuleScope {
    pub fn is_channel_specific(&self) -> bool {
        !matches!(self, RuleScope::Global)
    }

    /// Storage representation: (scope_type, scope_id)
    pub fn to_parts(&self) -> (&'static str, Option<i32>) {
        match self {
            RuleScope::Global => ("global", None),
            RuleScope::Bot(id) => ("bot", Some(*id)),
            RuleScope::Agent(id) => ("agent", Some(*id)),
        }
    }

    pub fn from_parts(scope_type: &str, scope_id: Option<i32>) -> Result<Self, PricingError> {
        match (scope_type, scope_id) {
            ("global", _) => Ok(RuleScope::Global),
            ("bot", Some(id)) => Ok(RuleScope::Bot(id)),
            ("agent", Some(id)) => Ok(RuleScope::Agent(id)),
            _ => Err(PricingError::validation(format!(
                "Invalid rule scope: {} ({:?})",
                scope_type, scope_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_round_trip_names() {
        assert_eq!(ResourceType::Energy.to_string(), "energy");
        assert_eq!("bandwidth".parse::<ResourceType>().unwrap(), ResourceType::Bandwidth);
        assert!("storage".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_unknown_operator_is_validation_error() {
        let err = "approx".parse::<ConditionOperator>().unwrap_err();
        assert!(matches!(err, PricingError::Validation(_)));
        assert_eq!("between".parse::<ConditionOperator>().unwrap(), ConditionOperator::Between);
    }

    #[test]
    fn test_operator_serde_names() {
        let json = serde_json::to_string(&ConditionOperator::Gte).unwrap();
        assert_eq!(json, "\"gte\"");
        let op: ConditionOperator = serde_json::from_str("\"in\"").unwrap();
        assert_eq!(op, ConditionOperator::In);
        assert!(serde_json::from_str::<ConditionOperator>("\"like\"").is_err());
    }

    #[test]
    fn test_rounding_mode_default() {
        assert_eq!(RoundingMode::default(), RoundingMode::Nearest);
    }

    #[test]
    fn test_channel_from_ids() {
        assert_eq!(Channel::from_ids(None, None), Channel::Direct);
        assert_eq!(Channel::from_ids(Some(3), None), Channel::Bot(3));
        assert_eq!(Channel::from_ids(None, Some(9)), Channel::Agent(9));
        assert_eq!(Channel::Bot(3).rule_scope(), Some(RuleScope::Bot(3)));
        assert_eq!(Channel::Direct.rule_scope(), None);
    }

    #[test]
    fn test_rule_scope_parts() {
        assert_eq!(RuleScope::Agent(4).to_parts(), ("agent", Some(4)));
        assert_eq!(RuleScope::from_parts("bot", Some(2)).unwrap(), RuleScope::Bot(2));
        assert_eq!(RuleScope::from_parts("global", None).unwrap(), RuleScope::Global);
        assert!(RuleScope::from_parts("bot", None).is_err());
        assert!(RuleScope::from_parts("reseller", Some(1)).is_err());
    }

    #[test]
    fn test_entity_type_serialization() {
        let json = serde_json::to_string(&EntityType::Template).unwrap();
        assert_eq!(json, "\"template\"");
        assert_eq!("agent".parse::<EntityType>().unwrap(), EntityType::Agent);
    }
}
