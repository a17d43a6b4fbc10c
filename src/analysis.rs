// Multi-timeframe market analysis
// Pure functions from ticker statistics (1h/6h/24h) and the current book
// top to volume, liquidity and momentum summaries, combined into one
// scalping decision. Zero denominators yield defensive defaults instead
// of errors so a bad ticker payload can never wedge the engine.

use crate::types::{MarketTick, TickerStats};
use crate::utils::spread_pct;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt::Write as _;

const ANALYSIS_SCALE: u32 = 8;

const HIGH_VOLUME_THRESHOLD: Decimal = dec!(1.2);
const LOW_VOLUME_THRESHOLD: Decimal = dec!(0.7);
const MAX_SPREAD_PCT: Decimal = dec!(0.1);
const STRONG_PRICE_CHANGE: Decimal = dec!(1.0);
const MODERATE_PRICE_CHANGE: Decimal = dec!(0.4);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketStrength {
    VeryStrong,
    Strong,
    Moderate,
    Weak,
    VeryWeak,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeSignal {
    StrongBuy,
    ModerateBuy,
    Neutral,
    Avoid,
    StrongAvoid,
}

#[derive(Clone, Debug)]
pub struct VolumeAnalysis {
    pub volume_ratio: Decimal,
    pub volume_1h: Decimal,
    pub volume_6h: Decimal,
    pub avg_volume_per_hour_6h: Decimal,
    pub is_volume_increasing: bool,
    pub is_price_volume_aligned: bool,
    pub market_strength: MarketStrength,
    pub liquidity_score: Decimal,
    pub bid_ask_spread: Decimal,
    pub signal: VolumeSignal,
}

impl VolumeAnalysis {
    fn defensive_default() -> Self {
        Self {
            volume_ratio: Decimal::ZERO,
            volume_1h: Decimal::ZERO,
            volume_6h: Decimal::ZERO,
            avg_volume_per_hour_6h: Decimal::ZERO,
            is_volume_increasing: false,
            is_price_volume_aligned: false,
            market_strength: MarketStrength::VeryWeak,
            liquidity_score: Decimal::ZERO,
            bid_ask_spread: Decimal::ZERO,
            signal: VolumeSignal::StrongAvoid,
        }
    }
}

/// Compare the current hour's volume against the recent hourly average.
/// A ratio above 1.2 marks the market as heating up.
pub fn analyze_volume(
    h1: &TickerStats,
    h6: &TickerStats,
    h24: &TickerStats,
    tick: &MarketTick,
) -> VolumeAnalysis {
    if h6.volume.is_zero() || h24.volume.is_zero() || h24.quote_volume.is_zero() {
        return VolumeAnalysis::defensive_default();
    }

    let avg_volume_per_hour_6h = (h6.volume / dec!(6)).round_dp(ANALYSIS_SCALE);
    if avg_volume_per_hour_6h.is_zero() {
        return VolumeAnalysis::defensive_default();
    }
    let volume_ratio = (h1.volume / avg_volume_per_hour_6h).round_dp(ANALYSIS_SCALE);

    let is_volume_increasing = volume_ratio > HIGH_VOLUME_THRESHOLD;
    let is_price_volume_aligned = price_volume_aligned(h1.price_change_pct, volume_ratio);
    let market_strength =
        market_strength(h6.price_change_pct, h6.volume, h24.volume, volume_ratio);
    let liquidity_score =
        liquidity_score(h6.quote_volume, h24.quote_volume, h6.volume, h24.volume);
    let signal = volume_signal(volume_ratio, is_price_volume_aligned, market_strength);

    VolumeAnalysis {
        volume_ratio,
        volume_1h: h1.volume,
        volume_6h: h6.volume,
        avg_volume_per_hour_6h,
        is_volume_increasing,
        is_price_volume_aligned,
        market_strength,
        liquidity_score,
        bid_ask_spread: tick.ask.0 - tick.bid.0,
        signal,
    }
}

fn price_volume_aligned(price_change: Decimal, volume_ratio: Decimal) -> bool {
    // Price up on high volume is the only strong bullish alignment.
    if price_change > Decimal::ZERO && volume_ratio > HIGH_VOLUME_THRESHOLD {
        return true;
    }
    // Price up on thin volume smells like a fake breakout.
    if price_change > Decimal::ZERO && volume_ratio < LOW_VOLUME_THRESHOLD {
        return false;
    }
    // Price down on high volume is strong selling pressure.
    if price_change < Decimal::ZERO && volume_ratio > HIGH_VOLUME_THRESHOLD {
        return false;
    }
    volume_ratio > dec!(0.8)
}

fn market_strength(
    price_change_6h: Decimal,
    volume_6h: Decimal,
    volume_24h: Decimal,
    volume_ratio: Decimal,
) -> MarketStrength {
    let abs_change = price_change_6h.abs();
    let hourly_24h = (volume_24h / dec!(24)).round_dp(ANALYSIS_SCALE);
    let hourly_6h = (volume_6h / dec!(6)).round_dp(ANALYSIS_SCALE);
    if hourly_24h.is_zero() {
        return MarketStrength::VeryWeak;
    }
    let ratio_6h_vs_24h = (hourly_6h / hourly_24h).round_dp(ANALYSIS_SCALE);

    if abs_change > STRONG_PRICE_CHANGE && ratio_6h_vs_24h > dec!(2.0) && volume_ratio > dec!(1.5)
    {
        return MarketStrength::VeryStrong;
    }
    if abs_change > MODERATE_PRICE_CHANGE
        && ratio_6h_vs_24h > dec!(1.5)
        && volume_ratio > dec!(1.2)
    {
        return MarketStrength::Strong;
    }
    if abs_change > dec!(0.1) && ratio_6h_vs_24h > dec!(1.0) && volume_ratio > dec!(0.8) {
        return MarketStrength::Moderate;
    }
    if ratio_6h_vs_24h < dec!(0.3) || volume_ratio < dec!(0.3) {
        return MarketStrength::VeryWeak;
    }
    if ratio_6h_vs_24h < LOW_VOLUME_THRESHOLD || volume_ratio < LOW_VOLUME_THRESHOLD {
        return MarketStrength::Weak;
    }
    MarketStrength::Moderate
}

/// 0-100 score from relative 6h vs 24h activity: quote volume (0-40),
/// base volume (0-30), alignment between the two (0-30).
fn liquidity_score(
    quote_volume_6h: Decimal,
    quote_volume_24h: Decimal,
    volume_6h: Decimal,
    volume_24h: Decimal,
) -> Decimal {
    let hourly_quote_24h = (quote_volume_24h / dec!(24)).round_dp(ANALYSIS_SCALE);
    let hourly_base_24h = (volume_24h / dec!(24)).round_dp(ANALYSIS_SCALE);
    if hourly_quote_24h.is_zero() || hourly_base_24h.is_zero() {
        return Decimal::ZERO;
    }
    let quote_ratio =
        ((quote_volume_6h / dec!(6)) / hourly_quote_24h).round_dp(ANALYSIS_SCALE);
    let base_ratio = ((volume_6h / dec!(6)) / hourly_base_24h).round_dp(ANALYSIS_SCALE);

    let mut score = Decimal::ZERO;

    score += if quote_ratio > dec!(2.0) {
        dec!(40)
    } else if quote_ratio > dec!(1.5) {
        dec!(30)
    } else if quote_ratio > dec!(1.0) {
        dec!(20)
    } else if quote_ratio > dec!(0.5) {
        dec!(10)
    } else {
        Decimal::ZERO
    };

    score += if base_ratio > dec!(2.0) {
        dec!(30)
    } else if base_ratio > dec!(1.5) {
        dec!(20)
    } else if base_ratio > dec!(1.0) {
        dec!(15)
    } else if base_ratio > dec!(0.5) {
        dec!(10)
    } else {
        Decimal::ZERO
    };

    let alignment = (quote_ratio - base_ratio).abs();
    score += if alignment < dec!(0.2) {
        dec!(30)
    } else if alignment < dec!(0.5) {
        dec!(20)
    } else if alignment < dec!(1.0) {
        dec!(10)
    } else {
        Decimal::ZERO
    };

    score
}

fn volume_signal(
    volume_ratio: Decimal,
    is_aligned: bool,
    strength: MarketStrength,
) -> VolumeSignal {
    if volume_ratio > HIGH_VOLUME_THRESHOLD
        && is_aligned
        && matches!(strength, MarketStrength::VeryStrong | MarketStrength::Strong)
    {
        return VolumeSignal::StrongBuy;
    }
    if volume_ratio > dec!(1.0) && is_aligned && strength != MarketStrength::VeryWeak {
        return VolumeSignal::ModerateBuy;
    }
    if volume_ratio < dec!(0.3) || strength == MarketStrength::VeryWeak {
        return VolumeSignal::StrongAvoid;
    }
    if volume_ratio < LOW_VOLUME_THRESHOLD || !is_aligned {
        return VolumeSignal::Avoid;
    }
    VolumeSignal::Neutral
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiquidityLevel {
    Excellent,
    Good,
    Moderate,
    Poor,
    VeryPoor,
}

#[derive(Clone, Debug)]
pub struct LiquidityAnalysis {
    pub quote_volume_24h: Decimal,
    pub avg_trade_size: Decimal,
    pub spread_pct: Decimal,
    pub trades_per_hour: Decimal,
    pub consistency_score: Decimal,
    pub level: LiquidityLevel,
    pub has_good_liquidity: bool,
    pub is_suitable_for_scalping: bool,
}

impl LiquidityAnalysis {
    fn defensive_default() -> Self {
        Self {
            quote_volume_24h: Decimal::ZERO,
            avg_trade_size: Decimal::ZERO,
            spread_pct: Decimal::ONE_HUNDRED,
            trades_per_hour: Decimal::ZERO,
            consistency_score: Decimal::ZERO,
            level: LiquidityLevel::VeryPoor,
            has_good_liquidity: false,
            is_suitable_for_scalping: false,
        }
    }
}

/// Judge whether the book is tight and busy enough to scalp. The
/// consistency score reuses the relative-volume score so a burst of
/// wash-looking quote volume with no base volume behind it scores low.
pub fn analyze_liquidity(
    h6: &TickerStats,
    h24: &TickerStats,
    tick: &MarketTick,
) -> LiquidityAnalysis {
    if h24.trade_count == 0 || h24.quote_volume.is_zero() || tick.bid.0.is_zero() {
        return LiquidityAnalysis::defensive_default();
    }

    let trades = Decimal::from(h24.trade_count);
    let avg_trade_size = (h24.quote_volume / trades).round_dp(ANALYSIS_SCALE);
    let spread_pct = spread_pct(tick.bid, tick.ask).round_dp(4);
    let trades_per_hour = (trades / dec!(24)).round_dp(2);
    let consistency_score =
        liquidity_score(h6.quote_volume, h24.quote_volume, h6.volume, h24.volume);

    let level = liquidity_level(spread_pct, trades_per_hour, consistency_score);
    let has_good_liquidity =
        matches!(level, LiquidityLevel::Excellent | LiquidityLevel::Good);
    let is_suitable_for_scalping = has_good_liquidity && spread_pct < MAX_SPREAD_PCT;

    LiquidityAnalysis {
        quote_volume_24h: h24.quote_volume,
        avg_trade_size,
        spread_pct,
        trades_per_hour,
        consistency_score,
        level,
        has_good_liquidity,
        is_suitable_for_scalping,
    }
}

fn liquidity_level(
    spread_pct: Decimal,
    trades_per_hour: Decimal,
    consistency: Decimal,
) -> LiquidityLevel {
    if spread_pct < dec!(0.05) && trades_per_hour > dec!(100) && consistency > dec!(80) {
        return LiquidityLevel::Excellent;
    }
    if spread_pct < MAX_SPREAD_PCT && trades_per_hour > dec!(50) && consistency > dec!(60) {
        return LiquidityLevel::Good;
    }
    if spread_pct < dec!(0.2) && trades_per_hour > dec!(20) && consistency > dec!(40) {
        return LiquidityLevel::Moderate;
    }
    if spread_pct < dec!(0.5) && trades_per_hour > dec!(5) {
        return LiquidityLevel::Poor;
    }
    LiquidityLevel::VeryPoor
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MomentumDirection {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

#[derive(Clone, Debug)]
pub struct MarketMomentum {
    pub price_change_1h: Decimal,
    pub price_change_6h: Decimal,
    pub price_change_24h: Decimal,
    pub short_term: MomentumDirection,
    pub medium_term: MomentumDirection,
    pub long_term: MomentumDirection,
    pub is_trend_aligned: bool,
    pub is_suitable_for_scalping: bool,
    pub momentum_score: Decimal,
}

pub fn analyze_momentum(
    h1: &TickerStats,
    h6: &TickerStats,
    h24: &TickerStats,
) -> MarketMomentum {
    let short_term = momentum_direction(h1.price_change_pct);
    let medium_term = momentum_direction(h6.price_change_pct);
    let long_term = momentum_direction(h24.price_change_pct);

    let is_trend_aligned = trend_aligned(short_term, medium_term, long_term);
    let is_suitable_for_scalping = momentum_suitable(short_term, medium_term, long_term);
    let momentum_score = (h1.price_change_pct * dec!(0.5)
        + h6.price_change_pct * dec!(0.3)
        + h24.price_change_pct * dec!(0.2))
    .round_dp(ANALYSIS_SCALE);

    MarketMomentum {
        price_change_1h: h1.price_change_pct,
        price_change_6h: h6.price_change_pct,
        price_change_24h: h24.price_change_pct,
        short_term,
        medium_term,
        long_term,
        is_trend_aligned,
        is_suitable_for_scalping,
        momentum_score,
    }
}

fn momentum_direction(price_change: Decimal) -> MomentumDirection {
    if price_change > STRONG_PRICE_CHANGE {
        MomentumDirection::StrongBullish
    } else if price_change > MODERATE_PRICE_CHANGE {
        MomentumDirection::Bullish
    } else if price_change < -STRONG_PRICE_CHANGE {
        MomentumDirection::StrongBearish
    } else if price_change < -MODERATE_PRICE_CHANGE {
        MomentumDirection::Bearish
    } else {
        MomentumDirection::Neutral
    }
}

fn is_bullish(d: MomentumDirection) -> bool {
    matches!(
        d,
        MomentumDirection::Bullish | MomentumDirection::StrongBullish
    )
}

fn is_bearish(d: MomentumDirection) -> bool {
    matches!(
        d,
        MomentumDirection::Bearish | MomentumDirection::StrongBearish
    )
}

fn trend_aligned(
    short: MomentumDirection,
    medium: MomentumDirection,
    long: MomentumDirection,
) -> bool {
    (is_bullish(short) && is_bullish(medium) && is_bullish(long))
        || (is_bearish(short) && is_bearish(medium) && is_bearish(long))
}

fn momentum_suitable(
    short: MomentumDirection,
    medium: MomentumDirection,
    long: MomentumDirection,
) -> bool {
    if long == MomentumDirection::StrongBearish || medium == MomentumDirection::StrongBearish {
        return false;
    }
    is_bullish(short)
        && medium != MomentumDirection::StrongBearish
        && long != MomentumDirection::StrongBearish
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalpingSignal {
    StrongBuy,
    ModerateBuy,
    WeakBuy,
    Hold,
    Avoid,
    EmergencyExit,
}

#[derive(Clone, Debug)]
pub struct ScalpingDecision {
    pub signal: ScalpingSignal,
    pub confidence: Decimal,
    pub risk_score: Decimal,
    pub suggested_trade_size: Decimal,
    pub suggested_profit_margin_pct: Decimal,
    pub reason: String,
}

impl ScalpingDecision {
    pub fn should_buy(&self) -> bool {
        matches!(
            self.signal,
            ScalpingSignal::StrongBuy | ScalpingSignal::ModerateBuy
        )
    }

    pub fn should_avoid(&self) -> bool {
        matches!(
            self.signal,
            ScalpingSignal::Avoid | ScalpingSignal::EmergencyExit
        )
    }
}

pub fn make_scalping_decision(
    volume: &VolumeAnalysis,
    momentum: &MarketMomentum,
    liquidity: &LiquidityAnalysis,
) -> ScalpingDecision {
    let signal = scalping_signal(volume, momentum, liquidity);
    let confidence = decision_confidence(volume, momentum, liquidity);
    let risk_score = decision_risk(volume, momentum, liquidity);
    let suggested_trade_size = suggested_trade_size(liquidity, confidence);
    let suggested_profit_margin_pct = suggested_profit_margin(momentum, confidence);

    let mut reason = String::new();
    let _ = write!(
        reason,
        "signal={:?} volume={:?} (ratio {}) momentum={:?}/{:?}/{:?} liquidity={:?}",
        signal,
        volume.signal,
        volume.volume_ratio.round_dp(2),
        momentum.short_term,
        momentum.medium_term,
        momentum.long_term,
        liquidity.level
    );

    ScalpingDecision {
        signal,
        confidence,
        risk_score,
        suggested_trade_size,
        suggested_profit_margin_pct,
        reason,
    }
}

fn scalping_signal(
    volume: &VolumeAnalysis,
    momentum: &MarketMomentum,
    liquidity: &LiquidityAnalysis,
) -> ScalpingSignal {
    if !liquidity.has_good_liquidity || momentum.long_term == MomentumDirection::StrongBearish {
        return ScalpingSignal::EmergencyExit;
    }
    if matches!(volume.signal, VolumeSignal::Avoid | VolumeSignal::StrongAvoid)
        || !momentum.is_suitable_for_scalping
        || !liquidity.is_suitable_for_scalping
    {
        return ScalpingSignal::Avoid;
    }
    if volume.signal == VolumeSignal::StrongBuy
        && momentum.is_trend_aligned
        && momentum.short_term == MomentumDirection::StrongBullish
        && liquidity.level == LiquidityLevel::Excellent
    {
        return ScalpingSignal::StrongBuy;
    }
    if volume.signal == VolumeSignal::ModerateBuy
        && momentum.is_suitable_for_scalping
        && liquidity.has_good_liquidity
    {
        return ScalpingSignal::ModerateBuy;
    }
    if volume.signal == VolumeSignal::ModerateBuy
        && momentum.short_term == MomentumDirection::Bullish
    {
        return ScalpingSignal::WeakBuy;
    }
    ScalpingSignal::Hold
}

fn decision_confidence(
    volume: &VolumeAnalysis,
    momentum: &MarketMomentum,
    liquidity: &LiquidityAnalysis,
) -> Decimal {
    let mut confidence = Decimal::ZERO;

    confidence += match volume.signal {
        VolumeSignal::StrongBuy => dec!(40),
        VolumeSignal::ModerateBuy => dec!(25),
        VolumeSignal::Neutral => dec!(15),
        _ => Decimal::ZERO,
    };

    if momentum.is_trend_aligned {
        confidence += dec!(20);
    }
    if momentum.is_suitable_for_scalping {
        confidence += dec!(10);
    }

    confidence += match liquidity.level {
        LiquidityLevel::Excellent => dec!(30),
        LiquidityLevel::Good => dec!(20),
        LiquidityLevel::Moderate => dec!(10),
        _ => Decimal::ZERO,
    };

    confidence
}

fn decision_risk(
    volume: &VolumeAnalysis,
    momentum: &MarketMomentum,
    liquidity: &LiquidityAnalysis,
) -> Decimal {
    let mut risk = Decimal::ZERO;
    if volume.volume_ratio < LOW_VOLUME_THRESHOLD {
        risk += dec!(30);
    }
    if is_bearish(momentum.long_term) {
        risk += dec!(40);
    }
    if matches!(
        liquidity.level,
        LiquidityLevel::Poor | LiquidityLevel::VeryPoor
    ) {
        risk += dec!(30);
    }
    risk
}

fn suggested_trade_size(liquidity: &LiquidityAnalysis, confidence: Decimal) -> Decimal {
    let base = dec!(10);
    let liquidity_multiplier = match liquidity.level {
        LiquidityLevel::Excellent => dec!(3),
        LiquidityLevel::Good => dec!(2),
        _ => Decimal::ONE,
    };
    (base * (confidence / Decimal::ONE_HUNDRED) * liquidity_multiplier)
        .round_dp(ANALYSIS_SCALE)
}

fn suggested_profit_margin(momentum: &MarketMomentum, confidence: Decimal) -> Decimal {
    let mut margin = dec!(0.3);
    if momentum.short_term == MomentumDirection::StrongBullish {
        margin *= dec!(1.5);
    }
    if confidence > dec!(70) {
        margin *= dec!(1.2);
    }
    margin
}
