// Exchange-facing operations behind a trait so the engine can run
// against the live REST client or a mock in tests.

use crate::types::{
    AccountSnapshot, DepthSnapshot, NewOrderRequest, OpenOrder, Px, Qty, SymbolRules, TickerStats,
    TickerWindow,
};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TradingAdapter: Send + Sync {
    async fn account_snapshot(&self) -> Result<AccountSnapshot>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// Submit a limit order. Returns the exchange order id.
    async fn place_limit_order(&self, req: NewOrderRequest) -> Result<String>;

    /// Submit a one-cancels-other sell pair: a limit leg at `limit` and a
    /// stop leg at `stop`. Returns the order list id.
    async fn place_oco_sell(&self, symbol: &str, limit: Px, stop: Px, qty: Qty) -> Result<String>;

    async fn order_book_depth(&self, symbol: &str, limit: usize) -> Result<DepthSnapshot>;

    async fn exchange_filters(&self, symbol: &str) -> Result<SymbolRules>;

    async fn ticker_stats(&self, symbol: &str, window: TickerWindow) -> Result<TickerStats>;
}
