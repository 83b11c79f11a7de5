// Price Composer
//
// Turns a resolved package, the selected rules and the active fees into a
// final price with a full breakdown. Composition is a pure function of its
// inputs; every lookup happens before it is called.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;
use uuid::Uuid;

use crate::error::{PricingError, PricingResult};
use crate::models::{
    CalculationDetails, DiscountRule, Fee, PackageInfo, PriceBreakdown, PriceCalculationResult,
    PriceWarning,
};
use crate::types::{Channel, DiscountKind, FeeType, RoundingMode};

/// Everything about a calculation that is not the package, rules or fees
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeOptions {
    /// Unit price to start from; the channel override when there is one
    pub base_price: Decimal,
    pub price_override: bool,
    pub amount: Option<Decimal>,
    pub is_emergency: bool,
    pub channel: Channel,
    pub currency: String,
    /// `None` when converting to `currency` has no configured rate
    pub exchange_rate: Option<Decimal>,
    pub rounding_mode: RoundingMode,
    pub precision: Option<u32>,
    pub calculated_at: DateTime<Utc>,
}

impl ComposeOptions {
    /// Options for pricing a package as-is in its own currency
    pub fn for_package(package: &PackageInfo, calculated_at: DateTime<Utc>) -> Self {
        Self {
            base_price: package.base_price,
            price_override: false,
            amount: None,
            is_emergency: false,
            channel: Channel::Direct,
            currency: package.currency.clone(),
            exchange_rate: Some(Decimal::ONE),
            rounding_mode: RoundingMode::Nearest,
            precision: None,
            calculated_at,
        }
    }
}

/// Digits kept for a currency when the caller does not choose
pub fn default_precision(currency: &str) -> u32 {
    match currency {
        "TRX" => 6,
        "USDT" | "USD" | "CNY" => 2,
        _ => 6,
    }
}

pub fn round_amount(value: Decimal, precision: u32, mode: RoundingMode) -> Decimal {
    let strategy = match mode {
        RoundingMode::Up => RoundingStrategy::ToPositiveInfinity,
        RoundingMode::Down => RoundingStrategy::ToNegativeInfinity,
        RoundingMode::Nearest => RoundingStrategy::MidpointAwayFromZero,
    };
    value.round_dp_with_strategy(precision, strategy)
}

/// Validation error for arithmetic that left the `Decimal` range
fn out_of_range(stage: &str) -> PricingError {
    PricingError::validation(format!("{} is too large to price", stage))
}

fn mul(a: Decimal, b: Decimal, stage: &str) -> PricingResult<Decimal> {
    a.checked_mul(b).ok_or_else(|| out_of_range(stage))
}

fn add(a: Decimal, b: Decimal, stage: &str) -> PricingResult<Decimal> {
    a.checked_add(b).ok_or_else(|| out_of_range(stage))
}

/// Priced multiple of the package
///
/// With an explicit resource amount the quantity is scaled by how many
/// packages that amount represents.
pub fn priced_units(package: &PackageInfo, quantity: u32, amount: Option<Decimal>) -> PricingResult<Decimal> {
    let quantity = Decimal::from(quantity);
    match amount {
        Some(amount) if package.unit_amount > 0 => mul(quantity, amount, "amount")?
            .checked_div(Decimal::from(package.unit_amount))
            .ok_or_else(|| out_of_range("amount")),
        _ => Ok(quantity),
    }
}

/// Discount one rule takes off the running price
///
/// Never negative: a rule can only narrow the price.
pub fn rule_discount(rule: &DiscountRule, price: Decimal) -> PricingResult<Decimal> {
    let discount = &rule.discount;
    let amount = match discount.kind {
        DiscountKind::Percentage => {
            let amount = mul(price, discount.value, "discount")? / Decimal::ONE_HUNDRED;
            match discount.max_amount {
                Some(cap) => amount.min(cap),
                None => amount,
            }
        }
        DiscountKind::Fixed => discount.value,
        DiscountKind::Multiplier => price - mul(price, discount.value, "discount")?,
    };
    Ok(amount.max(Decimal::ZERO))
}

/// Amount a fee adds on top of `price`; negative fees add nothing
pub fn fee_charge(fee: &Fee, price: Decimal) -> PricingResult<Decimal> {
    let charge = if fee.is_percentage {
        mul(price, fee.amount, "fee")? / Decimal::ONE_HUNDRED
    } else {
        fee.amount
    };
    Ok(charge.max(Decimal::ZERO))
}

pub struct PriceComposer;

impl PriceComposer {
    /// Runs the pricing pipeline
    ///
    /// `rules` must already be filtered and in application order. Inputs
    /// whose price falls outside the `Decimal` range are a validation error.
    pub fn compose(
        package: &PackageInfo,
        quantity: u32,
        rules: &[DiscountRule],
        fees: &[Fee],
        options: &ComposeOptions,
    ) -> PricingResult<PriceCalculationResult> {
        let mut warnings = Vec::new();

        let units = priced_units(package, quantity, options.amount)?;
        let subtotal = mul(options.base_price, units, "subtotal")?;

        // Discounts cascade: each rule sees the price left by the previous one
        let mut running = subtotal;
        let mut applied_rules = Vec::with_capacity(rules.len());
        let mut applied_rule_ids: Vec<Uuid> = Vec::with_capacity(rules.len());
        for rule in rules {
            running -= rule_discount(rule, running)?;
            if running < Decimal::ZERO {
                warn!(rule = %rule.name, value = %running, "Discount drove price below zero; flooring");
                warnings.push(PriceWarning::FlooredToZero {
                    stage: format!("rule:{}", rule.name),
                    value: running,
                });
                running = Decimal::ZERO;
            }
            applied_rules.push(rule.name.clone());
            applied_rule_ids.push(rule.id);
        }

        if let Some(min_price) = package.min_price {
            let floor = mul(min_price, units, "minimum price")?.min(subtotal);
            running = running.max(floor);
        }
        if let Some(max_price) = package.max_price {
            running = running.min(mul(max_price, units, "maximum price")?);
        }

        let mut fee_total = Decimal::ZERO;
        for fee in fees
            .iter()
            .filter(|fee| fee.is_active)
            .filter(|fee| fee.fee_type != FeeType::Emergency || options.is_emergency)
        {
            fee_total = add(fee_total, fee_charge(fee, running)?, "fee total")?;
        }

        let rate = match options.exchange_rate {
            Some(rate) => rate,
            None => {
                if options.currency != package.currency {
                    warnings.push(PriceWarning::MissingExchangeRate {
                        from: package.currency.clone(),
                        to: options.currency.clone(),
                    });
                }
                Decimal::ONE
            }
        };

        let precision = options
            .precision
            .unwrap_or_else(|| default_precision(&options.currency));
        let mode = options.rounding_mode;

        let subtotal_converted = mul(subtotal, rate, "converted subtotal")?;
        let discounted_converted = mul(running, rate, "converted price")?;
        let fee_converted = mul(fee_total, rate, "converted fees")?;

        let mut total = round_amount(
            add(discounted_converted, fee_converted, "total")?,
            precision,
            mode,
        );
        if total < Decimal::ZERO {
            warn!(total = %total, package_id = package.id, "Negative total; flooring to zero");
            warnings.push(PriceWarning::FlooredToZero {
                stage: "total".to_string(),
                value: total,
            });
            total = Decimal::ZERO;
        }

        let subtotal_rounded = round_amount(subtotal_converted, precision, mode);
        let discount_rounded = round_amount(subtotal_converted - discounted_converted, precision, mode);
        // The fee line takes the rounding remainder so the breakdown adds up exactly
        let fee_amount = total - subtotal_rounded + discount_rounded;

        let breakdown = PriceBreakdown {
            base_amount: round_amount(mul(options.base_price, rate, "converted unit price")?, precision, mode),
            quantity,
            subtotal: subtotal_rounded,
            discount_amount: discount_rounded,
            fee_amount,
            tax_amount: Decimal::ZERO,
            total,
        };

        let discount_type = rules.first().map(|rule| rule.discount.kind);

        Ok(PriceCalculationResult {
            base_price: subtotal_rounded,
            final_price: total,
            discount: discount_rounded,
            discount_type,
            applied_rules,
            calculation_details: CalculationDetails {
                breakdown,
                package_id: package.id,
                package_name: package.name.clone(),
                resource_type: package.resource_type,
                channel: options.channel,
                units,
                currency: options.currency.clone(),
                exchange_rate: rate,
                precision,
                rounding_mode: mode,
                price_override: options.price_override,
                applied_rule_ids,
            },
            warnings,
            calculated_at: options.calculated_at,
        })
    }
}


#[cfg(test)]
mod property_tests {
    use super::tests::{fee, package, rule};
    use super::*;
    use proptest::prelude::*;

    fn kind_strategy() -> impl Strategy<Value = DiscountKind> {
        prop_oneof![
            Just(DiscountKind::Percentage),
            Just(DiscountKind::Fixed),
            Just(DiscountKind::Multiplier),
        ]
    }

    fn rules_strategy() -> impl Strategy<Value = Vec<DiscountRule>> {
        prop::collection::vec((kind_strategy(), 0u32..20_000), 0..6).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (kind, cents))| {
                    let value = match kind {
                        DiscountKind::Percentage => Decimal::new(i64::from(cents % 10_001), 2),
                        DiscountKind::Fixed => Decimal::new(i64::from(cents), 2),
                        DiscountKind::Multiplier => Decimal::new(i64::from(cents % 101), 2),
                    };
                    rule(i as u128 + 1, kind, value)
                })
                .collect()
        })
    }

    fn mode_strategy() -> impl Strategy<Value = RoundingMode> {
        prop_oneof![
            Just(RoundingMode::Up),
            Just(RoundingMode::Down),
            Just(RoundingMode::Nearest),
        ]
    }

    fn options(mode: RoundingMode, precision: u32, base: u32, is_emergency: bool) -> ComposeOptions {
        ComposeOptions {
            base_price: Decimal::new(i64::from(base), 3),
            rounding_mode: mode,
            precision: Some(precision),
            is_emergency,
            ..ComposeOptions::for_package(&package(), Utc::now())
        }
    }

    /// Final price and breakdown total are never negative
    #[test]
    fn prop_final_price_non_negative() {
        proptest!(|(
            rules in rules_strategy(),
            quantity in 1u32..1000,
            base in 0u32..1_000_000,
            fee_cents in 0u32..10_000,
            mode in mode_strategy(),
            precision in 0u32..8
        )| {
            let fees = [
                fee(FeeType::Service, Decimal::new(i64::from(fee_cents), 2), false),
                fee(FeeType::Emergency, Decimal::new(i64::from(fee_cents), 3), true),
            ];
            let opts = options(mode, precision, base, fee_cents % 2 == 0);
            let result = PriceComposer::compose(&package(), quantity, &rules, &fees, &opts).unwrap();

            prop_assert!(result.final_price >= Decimal::ZERO);
            prop_assert!(result.calculation_details.breakdown.total >= Decimal::ZERO);
        });
    }

    /// total == subtotal - discount + fee + tax; the fee line drifts from the
    /// configured fee only by rounding remainders
    #[test]
    fn prop_breakdown_identity() {
        proptest!(|(
            rules in rules_strategy(),
            quantity in 1u32..1000,
            base in 0u32..1_000_000,
            fee_cents in 0u32..10_000,
            mode in mode_strategy(),
            precision in 0u32..8
        )| {
            let fees = [fee(FeeType::Service, Decimal::new(i64::from(fee_cents), 2), false)];
            let opts = options(mode, precision, base, false);
            let result = PriceComposer::compose(&package(), quantity, &rules, &fees, &opts).unwrap();
            let breakdown = &result.calculation_details.breakdown;

            prop_assert_eq!(breakdown.total, breakdown.expected_total());

            let unit = Decimal::new(1, precision);
            let raw_fee = round_amount(Decimal::new(i64::from(fee_cents), 2), precision, mode);
            prop_assert!((breakdown.fee_amount - raw_fee).abs() < unit * Decimal::from(2));
        });
    }

    /// Identical inputs give identical results
    #[test]
    fn prop_composition_deterministic() {
        proptest!(|(rules in rules_strategy(), quantity in 1u32..100)| {
            let opts = ComposeOptions::for_package(&package(), Utc::now());
            let first = PriceComposer::compose(&package(), quantity, &rules, &[], &opts).unwrap();
            let second = PriceComposer::compose(&package(), quantity, &rules, &[], &opts).unwrap();
            prop_assert_eq!(first, second);
        });
    }
}
