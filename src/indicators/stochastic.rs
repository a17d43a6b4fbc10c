// Stochastic oscillator: %K locates the close inside the recent
// high/low range, %D smooths %K. Crossovers in the extreme zones are
// the actionable signals.

use super::{simple_moving_average, INDICATOR_SCALE};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub const DEFAULT_K_PERIOD: usize = 9;
pub const DEFAULT_D_PERIOD: usize = 3;

const MIN_EXTRA_POINTS: usize = 5;
const OVERSOLD: Decimal = Decimal::from_parts(20, 0, 0, false, 0);
const OVERBOUGHT: Decimal = Decimal::from_parts(80, 0, 0, false, 0);

#[derive(Clone, Copy, Debug)]
pub struct PriceData {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub ts: DateTime<Utc>,
}

impl PriceData {
    /// A single traded price observed with no intra-sample range.
    pub fn from_close(close: Decimal, ts: DateTime<Utc>) -> Self {
        Self {
            high: close,
            low: close,
            close,
            ts,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StochasticSignal {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

#[derive(Clone, Debug)]
pub struct StochasticResult {
    pub percent_k: Decimal,
    pub percent_d: Decimal,
    pub close: Decimal,
    pub signal: StochasticSignal,
    pub ts: DateTime<Utc>,
}

impl StochasticResult {
    pub fn is_oversold(&self) -> bool {
        self.percent_k < OVERSOLD
    }

    pub fn is_overbought(&self) -> bool {
        self.percent_k > OVERBOUGHT
    }
}

/// Compute %K/%D for every point with a full lookback window.
/// Requires `max(k_period, d_period) + 5` points.
pub fn compute_stochastic(
    series: &[PriceData],
    k_period: usize,
    d_period: usize,
) -> Result<Vec<StochasticResult>, EngineError> {
    let required = k_period.max(d_period) + MIN_EXTRA_POINTS;
    if k_period == 0 || d_period == 0 || series.len() < required {
        return Err(EngineError::InsufficientData {
            required,
            available: series.len(),
        });
    }

    let mut k_values: Vec<Decimal> = Vec::with_capacity(series.len() - k_period + 1);
    let mut results: Vec<StochasticResult> = Vec::with_capacity(series.len() - k_period + 1);

    for i in (k_period - 1)..series.len() {
        let window = &series[i + 1 - k_period..=i];
        let point = &series[i];
        let k = percent_k(point.close, window);
        k_values.push(k);

        let d_window_start = k_values.len().saturating_sub(d_period);
        let d = simple_moving_average(&k_values[d_window_start..]);

        let signal = determine_signal(k, d, results.last());
        results.push(StochasticResult {
            percent_k: k,
            percent_d: d,
            close: point.close,
            signal,
            ts: point.ts,
        });
    }
    Ok(results)
}

fn percent_k(close: Decimal, window: &[PriceData]) -> Decimal {
    let mut highest = window[0].high;
    let mut lowest = window[0].low;
    for point in &window[1..] {
        if point.high > highest {
            highest = point.high;
        }
        if point.low < lowest {
            lowest = point.low;
        }
    }
    let range = highest - lowest;
    if range.is_zero() {
        // No range means the close sits nowhere in particular
        return Decimal::new(50, 0);
    }
    ((close - lowest) / range * Decimal::ONE_HUNDRED).round_dp(INDICATOR_SCALE)
}

fn determine_signal(
    k: Decimal,
    d: Decimal,
    previous: Option<&StochasticResult>,
) -> StochasticSignal {
    let oversold = k < OVERSOLD;
    let overbought = k > OVERBOUGHT;

    if let Some(prev) = previous {
        let was_k_below_d = prev.percent_k < prev.percent_d;
        let is_k_above_d = k > d;

        if was_k_below_d && is_k_above_d && oversold {
            return StochasticSignal::StrongBuy;
        }
        if !was_k_below_d && !is_k_above_d && overbought {
            return StochasticSignal::StrongSell;
        }
    }

    if oversold {
        StochasticSignal::Buy
    } else if overbought {
        StochasticSignal::Sell
    } else {
        StochasticSignal::Neutral
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StochasticDirection {
    Rising,
    Falling,
    Flat,
}

#[derive(Clone, Debug)]
pub struct StochasticTrend {
    pub direction: StochasticDirection,
    pub strength: u8,
    pub is_overbought: bool,
    pub is_oversold: bool,
    pub has_recent_crossover: bool,
}

#[derive(Clone, Debug)]
pub struct StochasticAnalysis {
    pub current: StochasticResult,
    pub history: Vec<StochasticResult>,
    pub trend: StochasticTrend,
    pub confidence: Decimal,
}

pub fn analyze_stochastic(
    series: &[PriceData],
    k_period: usize,
    d_period: usize,
) -> Result<StochasticAnalysis, EngineError> {
    let results = compute_stochastic(series, k_period, d_period)?;
    let current = results
        .last()
        .cloned()
        .ok_or(EngineError::InsufficientData {
            required: k_period.max(d_period) + MIN_EXTRA_POINTS,
            available: series.len(),
        })?;

    let trend = analyze_trend(&results);
    let confidence = calculate_confidence(&current, &trend);

    Ok(StochasticAnalysis {
        current,
        history: results,
        trend,
        confidence,
    })
}

fn analyze_trend(results: &[StochasticResult]) -> StochasticTrend {
    let current = &results[results.len() - 1];
    let tail_start = results.len().saturating_sub(5);
    let tail = &results[tail_start..];

    let mut up = 0i32;
    let mut down = 0i32;
    for pair in tail.windows(2) {
        if pair[1].percent_k > pair[0].percent_k {
            up += 1;
        } else if pair[1].percent_k < pair[0].percent_k {
            down += 1;
        }
    }

    let direction = if up > down {
        StochasticDirection::Rising
    } else if down > up {
        StochasticDirection::Falling
    } else {
        StochasticDirection::Flat
    };
    let strength = ((up - down).unsigned_abs() + 1).clamp(1, 5) as u8;

    let has_recent_crossover = tail.iter().any(|r| {
        matches!(
            r.signal,
            StochasticSignal::StrongBuy | StochasticSignal::StrongSell
        )
    });

    StochasticTrend {
        direction,
        strength,
        is_overbought: current.is_overbought(),
        is_oversold: current.is_oversold(),
        has_recent_crossover,
    }
}

fn calculate_confidence(current: &StochasticResult, trend: &StochasticTrend) -> Decimal {
    let mut confidence = Decimal::new(50, 0);

    match current.signal {
        StochasticSignal::StrongBuy | StochasticSignal::StrongSell => {
            confidence += Decimal::new(30, 0);
        }
        StochasticSignal::Neutral => {
            confidence -= Decimal::new(20, 0);
        }
        _ => {}
    }

    if trend.strength >= 4 {
        confidence += Decimal::new(15, 0);
    }
    if current.percent_k > Decimal::new(90, 0) || current.percent_k < Decimal::TEN {
        confidence += Decimal::TEN;
    }

    confidence.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(closes: &[Decimal]) -> Vec<PriceData> {
        let base = Utc::now();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceData {
                high: *c + dec!(0.5),
                low: *c - dec!(0.5),
                close: *c,
                ts: base + chrono::Duration::seconds(i as i64 * 60),
            })
            .collect()
    }

    #[test]
    fn rejects_short_series() {
        let points = series(&[dec!(100); 10]);
        let err = compute_stochastic(&points, 9, 3).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                required: 14,
                available: 10
            }
        ));
    }

    #[test]
    fn percent_k_stays_in_range() {
        let closes: Vec<Decimal> = (0..30)
            .map(|i| dec!(100) + Decimal::from(i % 5) * dec!(0.3))
            .collect();
        let results = compute_stochastic(&series(&closes), 9, 3).unwrap();
        for result in &results {
            assert!(result.percent_k >= Decimal::ZERO);
            assert!(result.percent_k <= Decimal::ONE_HUNDRED);
            assert!(result.percent_d >= Decimal::ZERO);
            assert!(result.percent_d <= Decimal::ONE_HUNDRED);
        }
    }

    #[test]
    fn zero_range_window_yields_midpoint() {
        let base = Utc::now();
        let points: Vec<PriceData> = (0..20)
            .map(|i| PriceData::from_close(dec!(100), base + chrono::Duration::seconds(i * 60)))
            .collect();
        let results = compute_stochastic(&points, 9, 3).unwrap();
        for result in &results {
            assert_eq!(result.percent_k, dec!(50));
            assert_eq!(result.percent_d, dec!(50));
            assert_eq!(result.signal, StochasticSignal::Neutral);
        }
    }

    fn accelerating_decline(len: usize) -> Vec<Decimal> {
        (0..len)
            .map(|i| dec!(110) - dec!(0.1) * Decimal::from(i * i))
            .collect()
    }

    #[test]
    fn oversold_crossover_is_strong_buy() {
        // Accelerating decline drives %K strictly lower, then a bounce lifts
        // %K back above %D while still deep in the oversold zone.
        let mut closes = accelerating_decline(18);
        closes.push(dec!(83));
        let results = compute_stochastic(&series(&closes), 9, 3).unwrap();
        let last = results.last().unwrap();
        assert!(last.percent_k < dec!(20));
        assert_eq!(last.signal, StochasticSignal::StrongBuy);
    }

    #[test]
    fn analysis_detects_falling_trend() {
        let closes = accelerating_decline(20);
        let analysis = analyze_stochastic(&series(&closes), 9, 3).unwrap();
        assert_eq!(analysis.trend.direction, StochasticDirection::Falling);
        assert!(analysis.trend.is_oversold);
        assert!(analysis.confidence >= Decimal::ZERO);
        assert!(analysis.confidence <= Decimal::ONE_HUNDRED);
    }
}
