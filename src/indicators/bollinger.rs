// Bollinger Bands: SMA middle band with symmetric standard-deviation
// envelopes. Signals derive from band position, band-width trend and
// reversals back inside the bands.

use super::{decimal_sqrt, simple_moving_average, INDICATOR_SCALE};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub const DEFAULT_PERIOD: usize = 20;

/// Extra points beyond the period required before results are considered
/// reliable enough to act on.
const MIN_EXTRA_POINTS: usize = 10;

#[derive(Clone, Copy, Debug)]
pub struct PricePoint {
    pub price: Decimal,
    pub volume: Decimal,
    pub ts: DateTime<Utc>,
}

impl PricePoint {
    pub fn new(price: Decimal, ts: DateTime<Utc>) -> Self {
        Self {
            price,
            volume: Decimal::ZERO,
            ts,
        }
    }

    pub fn with_volume(price: Decimal, volume: Decimal, ts: DateTime<Utc>) -> Self {
        Self { price, volume, ts }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BollingerSignal {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
    Squeeze,
    Expansion,
    ReversalUp,
    ReversalDown,
}

#[derive(Clone, Debug)]
pub struct BollingerBandsResult {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
    pub price: Decimal,
    pub band_width: Decimal,
    pub percent_b: Decimal,
    pub signal: BollingerSignal,
    pub ts: DateTime<Utc>,
}

impl BollingerBandsResult {
    fn new(
        upper: Decimal,
        middle: Decimal,
        lower: Decimal,
        price: Decimal,
        signal: BollingerSignal,
        ts: DateTime<Utc>,
    ) -> Self {
        let band_width = if middle.is_zero() {
            Decimal::ZERO
        } else {
            ((upper - lower) / middle * Decimal::ONE_HUNDRED).round_dp(INDICATOR_SCALE)
        };
        let denominator = upper - lower;
        let percent_b = if denominator.is_zero() {
            // Collapsed bands carry no positional information
            Decimal::new(5, 1)
        } else {
            ((price - lower) / denominator).round_dp(INDICATOR_SCALE)
        };
        Self {
            upper,
            middle,
            lower,
            price,
            band_width,
            percent_b,
            signal,
            ts,
        }
    }
}

/// Compute one result per full window of `period` consecutive points.
/// Requires at least `period + 10` points.
pub fn compute_bollinger_bands(
    series: &[PricePoint],
    period: usize,
    k: Decimal,
) -> Result<Vec<BollingerBandsResult>, EngineError> {
    let required = period + MIN_EXTRA_POINTS;
    if period == 0 || series.len() < required {
        return Err(EngineError::InsufficientData {
            required,
            available: series.len(),
        });
    }

    let mut results: Vec<BollingerBandsResult> = Vec::with_capacity(series.len() - period + 1);
    for i in (period - 1)..series.len() {
        let window = &series[i + 1 - period..=i];
        let prices: Vec<Decimal> = window.iter().map(|p| p.price).collect();
        let middle = simple_moving_average(&prices);
        let sigma = population_std_dev(&prices, middle);

        let upper = middle + sigma * k;
        let lower = middle - sigma * k;

        let point = &series[i];
        let signal = determine_signal(point, upper, lower, &results);
        results.push(BollingerBandsResult::new(
            upper, middle, lower, point.price, signal, point.ts,
        ));
    }
    Ok(results)
}

fn population_std_dev(prices: &[Decimal], mean: Decimal) -> Decimal {
    let mut sum_sq = Decimal::ZERO;
    for price in prices {
        let diff = *price - mean;
        sum_sq += diff * diff;
    }
    let variance = (sum_sq / Decimal::from(prices.len())).round_dp(INDICATOR_SCALE);
    decimal_sqrt(variance)
}

fn determine_signal(
    point: &PricePoint,
    upper: Decimal,
    lower: Decimal,
    history: &[BollingerBandsResult],
) -> BollingerSignal {
    let price = point.price;

    // Collapsed bands carry no signal, including on the very first sample
    if upper == lower {
        return BollingerSignal::Neutral;
    }

    if let Some(prev) = history.last() {
        let current_width = upper - lower;
        let prev_width = prev.upper - prev.lower;
        let squeeze_bound = prev_width * Decimal::new(95, 2);
        let expansion_bound = prev_width * Decimal::new(105, 2);
        if current_width < squeeze_bound {
            return BollingerSignal::Squeeze;
        }
        if current_width > expansion_bound {
            return BollingerSignal::Expansion;
        }
    }

    let touching_upper = price >= upper * Decimal::new(98, 2);
    let touching_lower = price <= lower * Decimal::new(102, 2);
    let breaking_upper = price > upper;
    let breaking_lower = price < lower;
    let has_volume = point.volume > Decimal::ZERO;

    if breaking_lower && has_volume {
        BollingerSignal::StrongBuy
    } else if breaking_upper && has_volume {
        BollingerSignal::StrongSell
    } else if touching_lower {
        if let Some(prev) = history.last() {
            if prev.price < lower && price > lower {
                return BollingerSignal::ReversalUp;
            }
        }
        BollingerSignal::Buy
    } else if touching_upper {
        if let Some(prev) = history.last() {
            if prev.price > upper && price < upper {
                return BollingerSignal::ReversalDown;
            }
        }
        BollingerSignal::Sell
    } else {
        BollingerSignal::Neutral
    }
}

// ============================================================================
// Derived volatility / market condition summaries
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
    Extreme,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WidthTrend {
    Contracting,
    Expanding,
    Stable,
}

#[derive(Clone, Debug)]
pub struct VolatilityInfo {
    pub level: VolatilityLevel,
    pub band_width_percentile: Decimal,
    pub is_squeeze: bool,
    pub is_expansion: bool,
    pub trend: WidthTrend,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Clone, Debug)]
pub struct MarketCondition {
    pub direction: TrendDirection,
    pub strength: u8,
    pub is_overbought: bool,
    pub is_oversold: bool,
    pub is_breakout: bool,
}

#[derive(Clone, Debug)]
pub struct BollingerAnalysis {
    pub current: BollingerBandsResult,
    pub history: Vec<BollingerBandsResult>,
    pub volatility: VolatilityInfo,
    pub condition: MarketCondition,
    pub confidence: Decimal,
}

pub fn analyze_bollinger(
    series: &[PricePoint],
    period: usize,
    k: Decimal,
) -> Result<BollingerAnalysis, EngineError> {
    let results = compute_bollinger_bands(series, period, k)?;
    let current = results
        .last()
        .cloned()
        .ok_or(EngineError::InsufficientData {
            required: period + MIN_EXTRA_POINTS,
            available: series.len(),
        })?;

    let volatility = analyze_volatility(&results);
    let condition = analyze_market_condition(&current, &results);
    let confidence = calculate_confidence(&current, &volatility, &condition);

    Ok(BollingerAnalysis {
        current,
        history: results,
        volatility,
        condition,
        confidence,
    })
}

fn analyze_volatility(results: &[BollingerBandsResult]) -> VolatilityInfo {
    if results.len() < 10 {
        return VolatilityInfo {
            level: VolatilityLevel::Normal,
            band_width_percentile: Decimal::new(50, 0),
            is_squeeze: false,
            is_expansion: false,
            trend: WidthTrend::Stable,
        };
    }

    let start = results.len().saturating_sub(20);
    let recent: Vec<Decimal> = results[start..].iter().map(|r| r.band_width).collect();
    let current_width = results[results.len() - 1].band_width;
    let avg_width = simple_moving_average(&recent);

    let below = recent.iter().filter(|w| **w < current_width).count();
    let percentile = (Decimal::from(below) / Decimal::from(recent.len())
        * Decimal::ONE_HUNDRED)
        .round_dp(INDICATOR_SCALE);

    let level = if percentile < Decimal::TEN {
        VolatilityLevel::Low
    } else if percentile > Decimal::new(90, 0) {
        VolatilityLevel::Extreme
    } else if percentile > Decimal::new(70, 0) {
        VolatilityLevel::High
    } else {
        VolatilityLevel::Normal
    };

    let is_squeeze =
        level == VolatilityLevel::Low && current_width < avg_width * Decimal::new(8, 1);
    let is_expansion = current_width > avg_width * Decimal::new(12, 1);

    let mut trend = WidthTrend::Stable;
    if results.len() >= 5 {
        let tail = &results[results.len() - 5..];
        let increasing = tail.windows(2).all(|w| w[1].band_width > w[0].band_width);
        let decreasing = tail.windows(2).all(|w| w[1].band_width < w[0].band_width);
        if increasing {
            trend = WidthTrend::Expanding;
        } else if decreasing {
            trend = WidthTrend::Contracting;
        }
    }

    VolatilityInfo {
        level,
        band_width_percentile: percentile,
        is_squeeze,
        is_expansion,
        trend,
    }
}

fn analyze_market_condition(
    current: &BollingerBandsResult,
    results: &[BollingerBandsResult],
) -> MarketCondition {
    let percent_b = current.percent_b;
    let is_overbought = percent_b > Decimal::new(8, 1);
    let is_oversold = percent_b < Decimal::new(2, 1);
    let is_breakout = percent_b > Decimal::ONE || percent_b < Decimal::ZERO;

    let mut direction = TrendDirection::Neutral;
    let mut strength: u8 = 1;
    if results.len() >= 10 {
        let tail = &results[results.len() - 10..];
        let above = tail.iter().filter(|r| r.price > r.middle).count();
        let below = tail.len() - above;
        if above > 7 {
            direction = TrendDirection::Bullish;
            strength = (above - 5).min(5) as u8;
        } else if below > 7 {
            direction = TrendDirection::Bearish;
            strength = (below - 5).min(5) as u8;
        }
    }

    MarketCondition {
        direction,
        strength,
        is_overbought,
        is_oversold,
        is_breakout,
    }
}

fn calculate_confidence(
    current: &BollingerBandsResult,
    volatility: &VolatilityInfo,
    condition: &MarketCondition,
) -> Decimal {
    let mut confidence = Decimal::new(50, 0);

    match current.signal {
        BollingerSignal::StrongBuy | BollingerSignal::StrongSell => {
            confidence += Decimal::new(25, 0);
        }
        BollingerSignal::ReversalUp | BollingerSignal::ReversalDown => {
            confidence += Decimal::new(20, 0);
        }
        BollingerSignal::Neutral => {
            confidence -= Decimal::new(15, 0);
        }
        _ => {}
    }

    if current.percent_b > Decimal::new(9, 1) || current.percent_b < Decimal::new(1, 1) {
        confidence += Decimal::new(15, 0);
    }
    if condition.strength >= 4 {
        confidence += Decimal::TEN;
    }
    if volatility.is_squeeze {
        confidence -= Decimal::TEN;
    }

    confidence.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}
