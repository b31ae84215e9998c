//! Money helpers using rust_decimal for precision
//!
//! All amounts are `Decimal` and are rounded to 2 decimal places with
//! standard half-up rounding (`MidpointAwayFromZero`) wherever rounding
//! happens: fee calculation, incoming wallet amounts, configuration.

use rust_decimal::prelude::*;

/// Rounding strategy for monetary values (2 decimal places, half-up)
pub const DECIMAL_PLACES: u32 = 2;

/// Display currency (single-currency deployment)
pub const CURRENCY_SYMBOL: &str = "₹";

/// Round to 2 decimal places, half-up
#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// `₹12.50`
pub fn format_amount(value: Decimal) -> String {
    format!("{}{:.2}", CURRENCY_SYMBOL, round_money(value))
}

/// Parse a config/user supplied amount (`"10"`, `"12.5"`)
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok().map(round_money)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_money(Decimal::new(1005, 3)), Decimal::new(101, 2));
        assert_eq!(round_money(Decimal::new(1015, 3)), Decimal::new(102, 2));
        assert_eq!(round_money(Decimal::new(-1005, 3)), Decimal::new(-101, 2));
        assert_eq!(round_money(Decimal::new(1004, 3)), Decimal::new(100, 2));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(Decimal::from(10)), "₹10.00");
        assert_eq!(format_amount(Decimal::new(25, 1)), "₹2.50");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(" 12.5 "), Some(Decimal::new(125, 1)));
        assert_eq!(parse_amount("abc"), None);
    }
}
