//! Fixed-point money helpers. Balances, prices and quantities are
//! `rust_decimal::Decimal` quantized to 8 fractional digits at every state
//! boundary; IEEE-754 never touches a balance.

use rust_decimal::{Decimal, RoundingStrategy};

/// Comparison epsilon matching the 8-digit money scale.
pub const EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

/// Quantize to the canonical 8-digit money scale.
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(8, RoundingStrategy::MidpointNearestEven)
}

/// Round a quantity down to the exchange lot step. A zero or negative step
/// is invalid and yields zero so the caller refuses the trade.
pub fn round_down_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (qty / step).floor() * step
}

/// True when `a` and `b` agree within one fixed-point epsilon.
pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_pins_eight_digits() {
        assert_eq!(quantize(dec!(0.123456789)), dec!(0.12345679));
        assert_eq!(quantize(dec!(20)), dec!(20));
    }

    #[test]
    fn lot_step_rounds_down() {
        assert_eq!(round_down_to_step(dec!(0.00047), dec!(0.0001)), dec!(0.0004));
        assert_eq!(round_down_to_step(dec!(1.999), dec!(0.5)), dec!(1.5));
        // exact multiples are untouched
        assert_eq!(round_down_to_step(dec!(0.0004), dec!(0.0001)), dec!(0.0004));
    }

    #[test]
    fn invalid_step_yields_zero() {
        assert_eq!(round_down_to_step(dec!(1), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(round_down_to_step(dec!(1), dec!(-0.1)), Decimal::ZERO);
    }

    #[test]
    fn approx_eq_within_epsilon() {
        assert!(approx_eq(dec!(1.00000001), dec!(1.00000002)));
        assert!(!approx_eq(dec!(1.0000001), dec!(1.0000003)));
    }
}
