// Display helpers
//
// Plain-text renderings of prices, resource amounts and reports, used by
// the reporting binary and by embedders that log or show results.

use rust_decimal::Decimal;
use std::fmt::Write;

use crate::models::PriceCalculationResult;
use crate::pricing::{default_precision, round_amount};
use crate::statistics::{CalculationStatistics, PriceStatistics};
use crate::trend::TrendForecast;
use crate::types::{ResourceType, RoundingMode};

/// `12.5` USDT becomes `"12.50 USDT"`
pub fn format_price(amount: Decimal, currency: &str) -> String {
    let precision = default_precision(currency);
    let rounded = round_amount(amount, precision, RoundingMode::Nearest);
    format!("{:.prec$} {}", rounded, currency, prec = precision as usize)
}

/// `32000` energy becomes `"32,000 energy"`
pub fn format_resource_amount(amount: i64, resource_type: ResourceType) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    if amount < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{} {}", grouped, resource_type)
}

/// Ratio as a percentage with two decimals; `0.125` becomes `"12.50%"`
pub fn format_percentage(ratio: Decimal) -> String {
    let percent = round_amount(ratio * Decimal::ONE_HUNDRED, 2, RoundingMode::Nearest);
    format!("{:.2}%", percent)
}

/// Signed delta with the relative change, e.g. `"+2.00 USDT (+20.00%)"`
pub fn format_price_change(old_price: Decimal, new_price: Decimal, currency: &str) -> String {
    let delta = new_price - old_price;
    let sign = if delta.is_sign_negative() && !delta.is_zero() { "-" } else { "+" };
    let amount = format_price(delta.abs(), currency);

    if old_price.is_zero() {
        return format!("{}{}", sign, amount);
    }

    let ratio = (delta / old_price).abs();
    format!("{}{} ({}{})", sign, amount, sign, format_percentage(ratio))
}

/// One-line summary of a calculation
pub fn summarize_result(result: &PriceCalculationResult) -> String {
    let details = &result.calculation_details;
    let mut line = format!(
        "{} x{} via {}: {}",
        details.package_name,
        details.breakdown.quantity,
        details.channel,
        format_price(result.final_price, &details.currency)
    );

    if !result.discount.is_zero() {
        let _ = write!(line, ", saved {}", format_price(result.discount, &details.currency));
    }
    if !result.applied_rules.is_empty() {
        let _ = write!(line, " [{}]", result.applied_rules.join(", "));
    }
    line
}

pub fn render_breakdown(result: &PriceCalculationResult) -> String {
    let details = &result.calculation_details;
    let breakdown = &details.breakdown;
    let currency = details.currency.as_str();

    let mut out = String::new();
    let _ = writeln!(out, "Package:   {} (#{})", details.package_name, details.package_id);
    let _ = writeln!(
        out,
        "Unit:      {}{}",
        format_price(breakdown.base_amount, currency),
        if details.price_override { " (channel price)" } else { "" }
    );
    let _ = writeln!(out, "Quantity:  {} ({} units)", breakdown.quantity, details.units.normalize());
    let _ = writeln!(out, "Subtotal:  {}", format_price(breakdown.subtotal, currency));
    let _ = writeln!(out, "Discount: -{}", format_price(breakdown.discount_amount, currency));
    for rule in &result.applied_rules {
        let _ = writeln!(out, "  - {}", rule);
    }
    let _ = writeln!(out, "Fees:     +{}", format_price(breakdown.fee_amount, currency));
    let _ = write!(out, "Total:     {}", format_price(breakdown.total, currency));
    if details.exchange_rate != Decimal::ONE {
        let _ = write!(out, " (rate {})", details.exchange_rate.normalize());
    }
    out
}

pub fn render_trend(forecast: &TrendForecast) -> String {
    let mut out = format!(
        "Baseline {}{}",
        format_price(forecast.baseline, &forecast.currency),
        if forecast.degraded { " (no recent history)" } else { "" }
    );

    for point in &forecast.points {
        let _ = write!(
            out,
            "\n  {}  {}  confidence {:.0}%",
            point.hour.format("%Y-%m-%d %H:00"),
            format_price(point.predicted_price, &forecast.currency),
            point.confidence * 100.0
        );
    }
    out
}

pub fn render_price_statistics(stats: &PriceStatistics, currency: &str) -> String {
    format!(
        "{} price changes ({} up, {} down); avg {}, max {}, min {}",
        stats.total_changes,
        stats.price_increases,
        stats.price_decreases,
        format_price(stats.avg_price_change, currency),
        format_price(stats.max_price_change, currency),
        format_price(stats.min_price_change, currency)
    )
}

pub fn render_calculation_statistics(stats: &CalculationStatistics, currency: &str) -> String {
    let mut out = format!(
        "{} calculations; avg base {}, avg final {}, avg discount {}",
        stats.total_calculations,
        format_price(stats.avg_base_price, currency),
        format_price(stats.avg_final_price, currency),
        format_price(stats.avg_discount, currency)
    );

    for (rank, usage) in stats.top_rules.iter().enumerate() {
        let _ = write!(out, "\n  {}. {} ({})", rank + 1, usage.name, usage.count);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::RuleUsage;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_price_uses_currency_precision() {
        assert_eq!(format_price(dec!(12.5), "USDT"), "12.50 USDT");
        assert_eq!(format_price(dec!(12.125), "USD"), "12.13 USD");
        assert_eq!(format_price(dec!(1.5), "TRX"), "1.500000 TRX");
    }

    #[test]
    fn test_format_resource_amount() {
        assert_eq!(format_resource_amount(32_000, ResourceType::Energy), "32,000 energy");
        assert_eq!(format_resource_amount(1_234_567, ResourceType::Bandwidth), "1,234,567 bandwidth");
        assert_eq!(format_resource_amount(999, ResourceType::Energy), "999 energy");
        assert_eq!(format_resource_amount(-1_000, ResourceType::Energy), "-1,000 energy");
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(dec!(0.125)), "12.50%");
        assert_eq!(format_percentage(Decimal::ZERO), "0.00%");
    }

    #[test]
    fn test_format_price_change() {
        assert_eq!(format_price_change(dec!(10), dec!(12), "USDT"), "+2.00 USDT (+20.00%)");
        assert_eq!(format_price_change(dec!(10), dec!(7.5), "USDT"), "-2.50 USDT (-25.00%)");
        assert_eq!(format_price_change(Decimal::ZERO, dec!(3), "USDT"), "+3.00 USDT");
    }

    #[test]
    fn test_render_calculation_statistics_lists_rules() {
        let stats = CalculationStatistics {
            total_calculations: 2,
            avg_base_price: dec!(100),
            avg_final_price: dec!(90),
            avg_discount: dec!(10),
            top_rules: vec![RuleUsage {
                name: "Bulk 10%".to_string(),
                count: 2,
            }],
        };

        let rendered = render_calculation_statistics(&stats, "USDT");
        assert!(rendered.starts_with("2 calculations"));
        assert!(rendered.contains("1. Bulk 10% (2)"));
    }
}
