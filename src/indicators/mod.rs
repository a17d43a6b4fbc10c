// Pure technical indicator computations over ordered price series.
// No I/O, no shared state; callers feed history and get immutable results.

pub mod bollinger;
pub mod stochastic;

pub use bollinger::{
    analyze_bollinger, compute_bollinger_bands, BollingerAnalysis, BollingerBandsResult,
    BollingerSignal, MarketCondition, PricePoint, TrendDirection, VolatilityInfo, VolatilityLevel,
    WidthTrend,
};
pub use stochastic::{
    analyze_stochastic, compute_stochastic, PriceData, StochasticAnalysis, StochasticDirection,
    StochasticResult, StochasticSignal, StochasticTrend,
};

use rust_decimal::Decimal;

pub(crate) const INDICATOR_SCALE: u32 = 8;

/// Square root by Newton's method, capped at 50 iterations on a fixed
/// 8-decimal scale. Decimal has no native sqrt.
pub(crate) fn decimal_sqrt(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let two = Decimal::TWO;
    let mut x = value;
    let mut last = Decimal::ZERO;
    for _ in 0..50 {
        if x == last {
            break;
        }
        last = x;
        x = ((x + value / x) / two).round_dp(INDICATOR_SCALE);
    }
    x
}

pub(crate) fn simple_moving_average(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = values.iter().copied().sum();
    (sum / Decimal::from(values.len())).round_dp(INDICATOR_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sqrt_converges_on_perfect_squares() {
        assert_eq!(decimal_sqrt(dec!(0)), dec!(0));
        assert_eq!(decimal_sqrt(dec!(4)), dec!(2));
        assert_eq!(decimal_sqrt(dec!(144)), dec!(12));
    }

    #[test]
    fn sqrt_approximates_irrationals() {
        let root = decimal_sqrt(dec!(2));
        let err = (root * root - dec!(2)).abs();
        assert!(err < dec!(0.0000001), "error {err} too large");
    }

    #[test]
    fn sma_is_exact() {
        assert_eq!(simple_moving_average(&[dec!(1), dec!(2), dec!(3)]), dec!(2));
        assert_eq!(simple_moving_average(&[]), dec!(0));
    }
}
