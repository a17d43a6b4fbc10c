// CONNECTION: exchange transport
// rest.rs speaks signed HTTP, websocket.rs translates stream payloads,
// session.rs supervises the long-lived stream tasks.

pub mod rest;
pub mod session;
pub mod websocket;

use crate::config::BotConfig;
use crate::types::{
    AccountSnapshot, DepthSnapshot, NewOrderRequest, OpenOrder, Px, Qty, SymbolRules, TickerStats,
    TickerWindow,
};
use crate::venue::TradingAdapter;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;

pub(crate) fn check_message_size(size: usize, max: usize, stream_name: &str) -> Result<()> {
    if size > max {
        return Err(anyhow!(
            "WebSocket message too large: {size} bytes (max {max}) on {stream_name} stream"
        ));
    }
    Ok(())
}

pub struct Connection {
    pub config: BotConfig,
    pub http: Client,
}

impl Connection {
    pub fn new(config: BotConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("spot-scalper/0.1")
            .build()
            .map_err(|e| anyhow!("failed to build http client: {e}"))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl TradingAdapter for Connection {
    async fn account_snapshot(&self) -> Result<AccountSnapshot> {
        rest::fetch_account(self).await
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        rest::fetch_open_orders(self, symbol).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        rest::cancel_order(self, symbol, order_id).await
    }

    async fn place_limit_order(&self, req: NewOrderRequest) -> Result<String> {
        rest::place_limit_order(self, req).await
    }

    async fn place_oco_sell(&self, symbol: &str, limit: Px, stop: Px, qty: Qty) -> Result<String> {
        rest::place_oco_sell(self, symbol, limit, stop, qty).await
    }

    async fn order_book_depth(&self, symbol: &str, limit: usize) -> Result<DepthSnapshot> {
        rest::fetch_depth(self, symbol, limit).await
    }

    async fn exchange_filters(&self, symbol: &str) -> Result<SymbolRules> {
        rest::fetch_exchange_filters(self, symbol).await
    }

    async fn ticker_stats(&self, symbol: &str, window: TickerWindow) -> Result<TickerStats> {
        rest::fetch_ticker_stats(self, symbol, window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_message_is_rejected() {
        assert!(check_message_size(100, 1024, "trade").is_ok());
        assert!(check_message_size(2048, 1024, "trade").is_err());
    }
}
