// Shared math and formatting helpers

use crate::types::Px;
use rust_decimal::{Decimal, RoundingStrategy};

/// Snap a quantity down to the exchange lot step. The result is a multiple
/// of `step` and never exceeds the input.
pub fn round_to_step_size(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    let snapped = (quantity / step).floor() * step;
    snapped
        .round_dp_with_strategy(step.scale(), RoundingStrategy::ToNegativeInfinity)
        .normalize()
}

/// Bid/ask spread as a percentage of the bid.
pub fn spread_pct(bid: Px, ask: Px) -> Decimal {
    if bid.0 <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (ask.0 - bid.0) / bid.0 * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn step_snap_is_multiple_and_never_rounds_up() {
        let qty = round_to_step_size(dec!(0.123456), dec!(0.001));
        assert_eq!(qty, dec!(0.123));
        assert!(qty <= dec!(0.123456));
        assert_eq!(qty % dec!(0.001), Decimal::ZERO);

        let qty = round_to_step_size(dec!(5.000001), dec!(0.5));
        assert_eq!(qty, dec!(5).normalize());
    }

    #[test]
    fn step_snap_with_zero_step_is_identity() {
        assert_eq!(round_to_step_size(dec!(1.23), Decimal::ZERO), dec!(1.23));
    }

    #[test]
    fn spread_pct_handles_zero_bid() {
        assert_eq!(spread_pct(Px(Decimal::ZERO), Px(dec!(1))), Decimal::ZERO);
        assert_eq!(spread_pct(Px(dec!(100)), Px(dec!(100.1))), dec!(0.1));
    }
}
