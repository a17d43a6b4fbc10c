// Event bus for module communication
// Ingestion sessions publish normalized events; engine tasks subscribe.

use crate::types::{AccountEvent, ExecutionReport, MarketTick, TradeEvent};
use tokio::sync::broadcast;

pub struct EventBus {
    pub market_tick_tx: broadcast::Sender<MarketTick>,
    pub trade_tx: broadcast::Sender<TradeEvent>,
    pub account_tx: broadcast::Sender<AccountEvent>,
    pub execution_tx: broadcast::Sender<ExecutionReport>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (market_tick_tx, _) = broadcast::channel(buffer);
        let (trade_tx, _) = broadcast::channel(buffer);
        let (account_tx, _) = broadcast::channel(buffer);
        let (execution_tx, _) = broadcast::channel(buffer);
        Self {
            market_tick_tx,
            trade_tx,
            account_tx,
            execution_tx,
        }
    }

    pub fn subscribe_market_tick(&self) -> broadcast::Receiver<MarketTick> {
        self.market_tick_tx.subscribe()
    }

    pub fn subscribe_trade(&self) -> broadcast::Receiver<TradeEvent> {
        self.trade_tx.subscribe()
    }

    pub fn subscribe_account(&self) -> broadcast::Receiver<AccountEvent> {
        self.account_tx.subscribe()
    }

    pub fn subscribe_execution(&self) -> broadcast::Receiver<ExecutionReport> {
        self.execution_tx.subscribe()
    }

    /// Receiver counts per channel, for liveness monitoring. A zero count on
    /// a critical channel means a consumer task has died.
    pub fn health_stats(&self) -> EventBusHealth {
        EventBusHealth {
            market_tick_receivers: self.market_tick_tx.receiver_count(),
            trade_receivers: self.trade_tx.receiver_count(),
            account_receivers: self.account_tx.receiver_count(),
            execution_receivers: self.execution_tx.receiver_count(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[derive(Debug, Clone)]
pub struct EventBusHealth {
    pub market_tick_receivers: usize,
    pub trade_receivers: usize,
    pub account_receivers: usize,
    pub execution_receivers: usize,
}
