// Shared runtime state
// Latest-value slots are replaced wholesale; readers never observe a
// partially applied update. Stale updates (older timestamps) are ignored.

use crate::types::{
    AccountSnapshot, AssetBalance, MarketTick, MultiTimeframeStats, TradeEvent,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Clone)]
pub struct SharedState {
    ticker: Arc<Mutex<Option<MarketTick>>>,
    last_trade: Arc<Mutex<Option<TradeEvent>>>,
    trades: Arc<Mutex<VecDeque<TradeEvent>>>,
    account: Arc<Mutex<Option<AccountSnapshot>>>,
    stats: Arc<Mutex<Option<MultiTimeframeStats>>>,
    max_recent_trades: usize,
}

impl SharedState {
    pub fn new(max_recent_trades: usize) -> Self {
        Self {
            ticker: Arc::new(Mutex::new(None)),
            last_trade: Arc::new(Mutex::new(None)),
            trades: Arc::new(Mutex::new(VecDeque::new())),
            account: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(None)),
            max_recent_trades,
        }
    }

    pub fn apply_tick(&self, tick: MarketTick) {
        if let Ok(mut slot) = self.ticker.lock() {
            if let Some(last) = slot.as_ref() {
                if tick.ts < last.ts {
                    warn!(
                        "STATE: stale tick ignored (update: {:?}, last: {:?})",
                        tick.ts, last.ts
                    );
                    return;
                }
            }
            *slot = Some(tick);
        }
    }

    pub fn latest_tick(&self) -> Option<MarketTick> {
        self.ticker.lock().ok().and_then(|slot| slot.clone())
    }

    /// Append a trade to the rolling window. Pruning past the length cap
    /// happens here so memory stays bounded regardless of read frequency.
    pub fn record_trade(&self, trade: TradeEvent) {
        if let Ok(mut slot) = self.last_trade.lock() {
            *slot = Some(trade.clone());
        }
        if let Ok(mut window) = self.trades.lock() {
            window.push_back(trade);
            while window.len() > self.max_recent_trades {
                window.pop_front();
            }
        }
    }

    pub fn last_trade(&self) -> Option<TradeEvent> {
        self.last_trade.lock().ok().and_then(|slot| slot.clone())
    }

    /// Trades newer than the lookback, oldest first. Expired entries are
    /// filtered lazily; the length cap in record_trade bounds growth.
    pub fn trades_within(&self, lookback_secs: i64, now: DateTime<Utc>) -> Vec<TradeEvent> {
        let cutoff = now - Duration::seconds(lookback_secs);
        self.trades
            .lock()
            .map(|window| {
                window
                    .iter()
                    .filter(|t| t.received_at >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn apply_account_snapshot(&self, snap: AccountSnapshot) {
        if let Ok(mut slot) = self.account.lock() {
            if let Some(last) = slot.as_ref() {
                if snap.ts < last.ts {
                    warn!(
                        "STATE: stale account snapshot ignored (update: {:?}, last: {:?})",
                        snap.ts, last.ts
                    );
                    return;
                }
            }
            *slot = Some(snap);
        }
    }

    /// Patch one asset balance in place under the snapshot lock. The whole
    /// snapshot value swap happens atomically from a reader's perspective.
    pub fn patch_balance(&self, asset: &str, free: Decimal, locked: Decimal, ts: DateTime<Utc>) {
        if let Ok(mut slot) = self.account.lock() {
            let mut snap = slot.clone().unwrap_or_default();
            if ts < snap.ts {
                warn!(
                    "STATE: stale balance patch ignored for {} (update: {:?}, last: {:?})",
                    asset, ts, snap.ts
                );
                return;
            }
            snap.balances
                .insert(asset.to_string(), AssetBalance { free, locked });
            snap.ts = ts;
            *slot = Some(snap);
        }
    }

    pub fn account(&self) -> Option<AccountSnapshot> {
        self.account.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn free_balance(&self, asset: &str) -> Decimal {
        self.account()
            .map(|snap| snap.free(asset))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn set_stats(&self, stats: MultiTimeframeStats) {
        if let Ok(mut slot) = self.stats.lock() {
            *slot = Some(stats);
        }
    }

    pub fn stats(&self) -> Option<MultiTimeframeStats> {
        self.stats.lock().ok().and_then(|slot| slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Px, Qty};
    use rust_decimal_macros::dec;

    fn tick(bid: Decimal, ts: DateTime<Utc>) -> MarketTick {
        MarketTick {
            symbol: "BTCUSDT".into(),
            bid: Px(bid),
            bid_qty: Qty(dec!(1)),
            ask: Px(bid + dec!(0.05)),
            ask_qty: Qty(dec!(1)),
            ts,
        }
    }

    fn trade(received_at: DateTime<Utc>) -> TradeEvent {
        TradeEvent {
            symbol: "BTCUSDT".into(),
            price: Px(dec!(100)),
            qty: Qty(dec!(0.5)),
            buyer_is_maker: false,
            trade_ts: received_at,
            received_at,
        }
    }

    #[test]
    fn stale_tick_is_ignored() {
        let state = SharedState::new(50);
        let now = Utc::now();
        state.apply_tick(tick(dec!(100), now));
        state.apply_tick(tick(dec!(99), now - Duration::seconds(5)));
        assert_eq!(state.latest_tick().unwrap().bid, Px(dec!(100)));
    }

    #[test]
    fn trade_window_is_capped_and_filtered() {
        let state = SharedState::new(3);
        let now = Utc::now();
        for i in 0..5 {
            state.record_trade(trade(now - Duration::seconds(i)));
        }
        let all = state.trades_within(60, now);
        assert_eq!(all.len(), 3);

        state.record_trade(trade(now - Duration::seconds(120)));
        let fresh = state.trades_within(60, now);
        assert!(fresh.iter().all(|t| t.received_at >= now - Duration::seconds(60)));
    }

    #[test]
    fn stale_balance_patch_is_ignored() {
        let state = SharedState::new(50);
        let now = Utc::now();
        state.patch_balance("USDT", dec!(100), dec!(0), now);
        state.patch_balance("USDT", dec!(50), dec!(0), now - Duration::seconds(10));
        assert_eq!(state.free_balance("USDT"), dec!(100));
    }
}
