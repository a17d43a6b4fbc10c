// Domain types for the scalping engine
// Normalized internal events are decoupled from any exchange SDK shape;
// connection/websocket.rs performs the one-time translation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Core Domain Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Px(pub Decimal);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qty(pub Decimal);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Symbol trading rules from the exchange filters.
#[derive(Clone, Debug)]
pub struct SymbolRules {
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_notional: Decimal,
    pub price_precision: usize,
    pub qty_precision: usize,
}

// ============================================================================
// Normalized Events
// ============================================================================

/// Best bid/ask snapshot. Latest-value semantics, replaced wholesale per update.
#[derive(Clone, Debug, Serialize)]
pub struct MarketTick {
    pub symbol: String,
    pub bid: Px,
    pub bid_qty: Qty,
    pub ask: Px,
    pub ask_qty: Qty,
    pub ts: DateTime<Utc>,
}

impl MarketTick {
    pub fn spread(&self) -> Decimal {
        self.ask.0 - self.bid.0
    }
}

/// A single executed trade from the public trade stream.
#[derive(Clone, Debug, Serialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: Px,
    pub qty: Qty,
    /// True when the resting (maker) side of the fill was the buyer,
    /// meaning the aggressor was a seller.
    pub buyer_is_maker: bool,
    pub trade_ts: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl TradeEvent {
    pub fn notional(&self) -> Decimal {
        self.price.0 * self.qty.0
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

/// Full account balance view. Replaced wholesale on session start and
/// patched by balance events; readers never see a partial update.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AccountSnapshot {
    pub balances: HashMap<String, AssetBalance>,
    pub ts: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn free(&self, asset: &str) -> Decimal {
        self.balances
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Account updates from the user-data session: a wholesale snapshot on
/// connect, per-asset patches while the stream is live.
#[derive(Clone, Debug)]
pub enum AccountEvent {
    Snapshot(AccountSnapshot),
    BalancePatch {
        asset: String,
        free: Decimal,
        locked: Decimal,
        ts: DateTime<Utc>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

/// Fill/lifecycle report from the user-data stream.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionReport {
    pub symbol: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<i64>,
    pub side: Side,
    pub status: OrderStatus,
    pub price: Px,
    pub last_fill_qty: Qty,
    pub cumulative_qty: Qty,
    pub ts: DateTime<Utc>,
}

// ============================================================================
// Order Lifecycle
// ============================================================================

/// The engine's single in-flight buy. At most one exists at any time.
#[derive(Clone, Debug)]
pub struct PendingOrder {
    pub order_id: String,
    pub symbol: String,
    pub buy_price: Px,
    pub quantity: Qty,
    pub created_at: DateTime<Utc>,
    pub expected_sell_price: Px,
    pub exchange_order_id: Option<i64>,
}

impl PendingOrder {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

#[derive(Clone, Debug)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub price: Px,
    pub quantity: Qty,
    pub client_order_id: String,
}

#[derive(Clone, Debug)]
pub struct OpenOrder {
    pub exchange_order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Px,
    pub orig_qty: Qty,
    pub status: OrderStatus,
}

// ============================================================================
// Market Structure Views
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct DepthLevel {
    pub price: Px,
    pub qty: Qty,
}

#[derive(Clone, Debug, Default)]
pub struct DepthSnapshot {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl DepthSnapshot {
    pub fn best_bid(&self) -> Option<Px> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Px> {
        self.asks.first().map(|l| l.price)
    }
}

/// Rolling-window ticker statistics used by the market analysis engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickerWindow {
    H1,
    H6,
    H24,
}

impl TickerWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickerWindow::H1 => "1h",
            TickerWindow::H6 => "6h",
            TickerWindow::H24 => "24h",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TickerStats {
    pub window: TickerWindow,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub price_change_pct: Decimal,
    pub trade_count: u64,
    pub last_price: Px,
}

/// Cached 1h/6h/24h stats, refreshed periodically and read on demand
/// by the evaluation path.
#[derive(Clone, Debug)]
pub struct MultiTimeframeStats {
    pub h1: TickerStats,
    pub h6: TickerStats,
    pub h24: TickerStats,
    pub fetched_at: DateTime<Utc>,
}
