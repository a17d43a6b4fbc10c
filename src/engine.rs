// ENGINE: Order lifecycle coordinator
// One evaluation cycle per inbound event. At most one pending buy exists
// at any time; the slot is occupied before submission and cleared by
// compare-and-swap so the timeout path and the protective-sell path
// cannot both act on the same order.

use crate::analysis::{analyze_liquidity, analyze_momentum, analyze_volume, make_scalping_decision};
use crate::config::BotConfig;
use crate::control::{StreamKind, StreamToggles};
use crate::error::EngineError;
use crate::indicators::{analyze_stochastic, stochastic};
use crate::state::SharedState;
use crate::storage::RecentBuckets;
use crate::types::{
    AccountEvent, AccountSnapshot, ExecutionReport, MarketTick, NewOrderRequest, OrderStatus,
    PendingOrder, Px, Qty, Side, SymbolRules, TradeEvent,
};
use crate::utils::round_to_step_size;
use crate::venue::TradingAdapter;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowDirection {
    Bullish,
    Bearish,
    Neutral,
}

/// Aggressor-side pressure over the rolling trade window.
#[derive(Clone, Debug)]
pub struct TradeMomentum {
    pub direction: FlowDirection,
    pub buy_count: usize,
    pub sell_count: usize,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
}

/// Classify window pressure by comparing aggressor-buy notional against
/// aggressor-sell notional. buyer-is-maker means the aggressor sold.
pub fn trade_momentum(trades: &[TradeEvent]) -> TradeMomentum {
    let mut buy_volume = Decimal::ZERO;
    let mut sell_volume = Decimal::ZERO;
    let mut buy_count = 0usize;
    let mut sell_count = 0usize;

    for trade in trades {
        if trade.buyer_is_maker {
            sell_volume += trade.notional();
            sell_count += 1;
        } else {
            buy_volume += trade.notional();
            buy_count += 1;
        }
    }

    let direction = if trades.is_empty() || buy_volume == sell_volume {
        FlowDirection::Neutral
    } else if buy_volume > sell_volume {
        FlowDirection::Bullish
    } else {
        FlowDirection::Bearish
    };

    TradeMomentum {
        direction,
        buy_count,
        sell_count,
        buy_volume,
        sell_volume,
    }
}

pub struct ScalpingEngine {
    config: BotConfig,
    state: SharedState,
    adapter: Arc<dyn TradingAdapter>,
    toggles: Arc<StreamToggles>,
    rules: SymbolRules,
    buckets: RecentBuckets,
    pending: Mutex<Option<PendingOrder>>,
    last_order_at: Mutex<Option<DateTime<Utc>>>,
}

impl ScalpingEngine {
    pub fn new(
        config: BotConfig,
        state: SharedState,
        adapter: Arc<dyn TradingAdapter>,
        toggles: Arc<StreamToggles>,
        rules: SymbolRules,
        buckets: RecentBuckets,
    ) -> Self {
        Self {
            config,
            state,
            adapter,
            toggles,
            rules,
            buckets,
            pending: Mutex::new(None),
            last_order_at: Mutex::new(None),
        }
    }

    pub fn pending_order(&self) -> Option<PendingOrder> {
        self.pending.lock().ok().and_then(|slot| slot.clone())
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    pub async fn on_tick(&self, tick: MarketTick) -> Result<()> {
        self.state.apply_tick(tick);
        if self.toggles.is_enabled(StreamKind::BookTicker) {
            self.evaluate_guarded().await;
        }
        Ok(())
    }

    pub async fn on_trade(&self, trade: TradeEvent) -> Result<()> {
        self.state.record_trade(trade);
        if self.toggles.is_enabled(StreamKind::Trade) {
            self.evaluate_guarded().await;
        }
        Ok(())
    }

    pub async fn on_account(&self, event: AccountEvent) -> Result<()> {
        match event {
            AccountEvent::Snapshot(snapshot) => self.state.apply_account_snapshot(snapshot),
            AccountEvent::BalancePatch {
                asset,
                free,
                locked,
                ts,
            } => self.state.patch_balance(&asset, free, locked, ts),
        }
        Ok(())
    }

    pub async fn on_execution(&self, report: ExecutionReport) -> Result<()> {
        match report.status {
            OrderStatus::Filled if report.side == Side::Buy => {
                self.handle_buy_fill(&report).await?;
            }
            OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => {
                if self.clear_slot(&report.client_order_id) {
                    info!(
                        "ENGINE: pending buy {} ended as {:?}, slot cleared",
                        report.client_order_id, report.status
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// All evaluation failures are logged, never propagated; a bad cycle
    /// must not take down the consumer task.
    async fn evaluate_guarded(&self) {
        if let Err(e) = self.evaluate(Utc::now()).await {
            warn!(error = %e, "ENGINE: evaluation cycle failed");
        }
    }

    // ------------------------------------------------------------------
    // Evaluation cycle
    // ------------------------------------------------------------------

    pub async fn evaluate(&self, now: DateTime<Utc>) -> Result<()> {
        if let Some(pending) = self.pending_order() {
            // Timeout takes precedence over sell eligibility.
            if pending.age_secs(now) > self.config.pending_cancel_timeout_secs {
                self.cancel_aged_pending(&pending).await;
                return Ok(());
            }
            self.try_protective_sell(&pending).await?;
            return Ok(());
        }

        let Some(tick) = self.state.latest_tick() else {
            debug!("ENGINE: no ticker yet, skipping cycle");
            return Ok(());
        };
        if self.state.last_trade().is_none() {
            debug!("ENGINE: no trades yet, skipping cycle");
            return Ok(());
        }
        let Some(account) = self.state.account() else {
            debug!("ENGINE: no account snapshot yet, skipping cycle");
            return Ok(());
        };

        if self.in_cooldown(now) {
            return Ok(());
        }
        if tick.spread() < self.config.min_spread_threshold {
            return Ok(());
        }

        if let Some(stats) = self.state.stats() {
            let volume = analyze_volume(&stats.h1, &stats.h6, &stats.h24, &tick);
            let liquidity = analyze_liquidity(&stats.h6, &stats.h24, &tick);
            let momentum = analyze_momentum(&stats.h1, &stats.h6, &stats.h24);
            let decision = make_scalping_decision(&volume, &momentum, &liquidity);
            if decision.should_avoid() {
                info!("ENGINE: skipping cycle, {}", decision.reason);
                return Ok(());
            }
        }

        self.log_oscillator();

        let trades = self.state.trades_within(self.config.trade_window_secs, now);
        let momentum = trade_momentum(&trades);
        debug!(
            "ENGINE: window momentum {:?} (buys {} / {}, sells {} / {})",
            momentum.direction,
            momentum.buy_count,
            momentum.buy_volume,
            momentum.sell_count,
            momentum.sell_volume
        );

        match momentum.direction {
            FlowDirection::Bullish => self.try_buy(&tick, &account, now).await,
            FlowDirection::Bearish => self.try_direct_sell(&tick, &account, now).await,
            FlowDirection::Neutral => Ok(()),
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_order_at
            .lock()
            .ok()
            .and_then(|slot| *slot)
            .map(|last| (now - last).num_seconds() < self.config.order_cooldown_secs)
            .unwrap_or(false)
    }

    /// Oscillator read over sealed buckets, observability only. Short
    /// histories are expected at startup and stay silent.
    fn log_oscillator(&self) {
        let data = self.buckets.price_data();
        match analyze_stochastic(&data, stochastic::DEFAULT_K_PERIOD, stochastic::DEFAULT_D_PERIOD)
        {
            Ok(analysis) => debug!(
                "ENGINE: stochastic %K={} %D={} signal={:?} confidence={}",
                analysis.current.percent_k,
                analysis.current.percent_d,
                analysis.current.signal,
                analysis.confidence
            ),
            Err(EngineError::InsufficientData { .. }) => {}
            Err(e) => warn!(error = %e, "ENGINE: oscillator read failed"),
        }
    }

    // ------------------------------------------------------------------
    // Buy path
    // ------------------------------------------------------------------

    async fn try_buy(
        &self,
        tick: &MarketTick,
        account: &AccountSnapshot,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let quote_free = account.free(&self.config.quote_asset);
        if quote_free < self.config.min_trade_amount {
            debug!(
                "ENGINE: quote balance {} below minimum {}, no buy",
                quote_free, self.config.min_trade_amount
            );
            return Ok(());
        }

        let price = self.snap_price(tick.bid.0 - self.config.scalp_margin);
        if price <= Decimal::ZERO {
            return Err(EngineError::InvalidMarketState("non-positive buy price").into());
        }

        let budget = quote_free * self.config.max_position_fraction;
        let quantity = self.snap_qty(budget / price);
        if quantity.is_zero() || quantity * price < self.rules.min_notional {
            debug!("ENGINE: snapped quantity {} too small, no buy", quantity);
            return Ok(());
        }

        let margin = self.config.profit_margin_pct / Decimal::ONE_HUNDRED;
        let pending = PendingOrder {
            order_id: Uuid::new_v4().to_string(),
            symbol: self.config.symbol.clone(),
            buy_price: Px(price),
            quantity: Qty(quantity),
            created_at: now,
            expected_sell_price: Px(self.snap_price(price * (Decimal::ONE + margin))),
            exchange_order_id: None,
        };

        // Occupy the slot before the submit call so a concurrent cycle
        // cannot place a second buy.
        {
            let Ok(mut slot) = self.pending.lock() else {
                return Err(EngineError::InvalidMarketState("pending slot poisoned").into());
            };
            if slot.is_some() {
                return Ok(());
            }
            *slot = Some(pending.clone());
        }

        let request = NewOrderRequest {
            symbol: pending.symbol.clone(),
            side: Side::Buy,
            price: pending.buy_price,
            quantity: pending.quantity,
            client_order_id: pending.order_id.clone(),
        };

        match self.adapter.place_limit_order(request).await {
            Ok(exchange_id) => {
                if let Ok(mut slot) = self.pending.lock() {
                    if let Some(current) = slot.as_mut() {
                        if current.order_id == pending.order_id {
                            current.exchange_order_id = exchange_id.parse().ok();
                        }
                    }
                }
                self.mark_order_time(now);
                info!(
                    "ENGINE: buy {} {} @ {} placed (id {}, exchange {})",
                    pending.quantity.0, pending.symbol, pending.buy_price.0, pending.order_id,
                    exchange_id
                );
                Ok(())
            }
            Err(e) => {
                self.clear_slot(&pending.order_id);
                Err(EngineError::OrderSubmissionFailed(e.to_string()).into())
            }
        }
    }

    /// Bearish flow sells held base inventory directly. Never occupies
    /// the pending slot; it only fires from the slot-empty branch.
    async fn try_direct_sell(
        &self,
        tick: &MarketTick,
        account: &AccountSnapshot,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let base_free = account.free(&self.config.base_asset);
        let notional = base_free * tick.bid.0;
        if notional < self.config.min_trade_amount {
            return Ok(());
        }

        let price = self.snap_price(tick.ask.0 + self.config.scalp_margin);
        let quantity = self.snap_qty(base_free);
        if quantity.is_zero() || quantity * price < self.rules.min_notional {
            return Ok(());
        }

        let request = NewOrderRequest {
            symbol: self.config.symbol.clone(),
            side: Side::Sell,
            price: Px(price),
            quantity: Qty(quantity),
            client_order_id: Uuid::new_v4().to_string(),
        };
        let client_order_id = request.client_order_id.clone();

        match self.adapter.place_limit_order(request).await {
            Ok(exchange_id) => {
                self.mark_order_time(now);
                info!(
                    "ENGINE: direct sell {} {} @ {} placed (id {}, exchange {})",
                    quantity, self.config.symbol, price, client_order_id, exchange_id
                );
                Ok(())
            }
            Err(e) => Err(EngineError::OrderSubmissionFailed(e.to_string()).into()),
        }
    }

    // ------------------------------------------------------------------
    // Pending order resolution
    // ------------------------------------------------------------------

    async fn cancel_aged_pending(&self, pending: &PendingOrder) {
        info!(
            "ENGINE: pending buy {} aged out after {}s, cancelling",
            pending.order_id, self.config.pending_cancel_timeout_secs
        );
        if let Err(e) = self
            .adapter
            .cancel_order(&pending.symbol, &pending.order_id)
            .await
        {
            // The order may have filled or been cancelled already.
            warn!(error = %e, "ENGINE: cancel of {} failed", pending.order_id);
        }
        self.clear_slot(&pending.order_id);
    }

    /// Fallback sell path for a buy that filled while the user-data
    /// stream was quiet: held base inventory covering the min notional
    /// means the buy went through.
    async fn try_protective_sell(&self, pending: &PendingOrder) -> Result<()> {
        let depth = self
            .adapter
            .order_book_depth(&pending.symbol, 5)
            .await?;
        let Some(best_bid) = depth.best_bid() else {
            return Ok(());
        };

        let base_free = self.state.free_balance(&self.config.base_asset);
        if base_free * best_bid.0 < self.rules.min_notional {
            return Ok(());
        }

        let margin = self.config.profit_margin_pct / Decimal::ONE_HUNDRED;
        let target = pending.buy_price.0 * (Decimal::ONE + margin);
        let floor = best_bid.0 * (Decimal::ONE + margin / Decimal::TWO);
        let sell = self.snap_price(target.max(floor));
        let stop =
            self.snap_price(sell * (Decimal::ONE - self.config.stop_loss_pct / Decimal::ONE_HUNDRED));

        let quantity = self.snap_qty(base_free);
        if quantity.is_zero() {
            return Ok(());
        }

        let list_id = self
            .adapter
            .place_oco_sell(&pending.symbol, Px(sell), Px(stop), Qty(quantity))
            .await?;
        info!(
            "ENGINE: protective sell {} {} limit {} stop {} placed (list {})",
            quantity, pending.symbol, sell, stop, list_id
        );
        self.clear_slot(&pending.order_id);
        Ok(())
    }

    /// Fill report path: place the protective sell against the actual
    /// fill price and release the slot.
    async fn handle_buy_fill(&self, report: &ExecutionReport) -> Result<()> {
        let Some(pending) = self.pending_order() else {
            return Ok(());
        };
        if pending.order_id != report.client_order_id {
            return Ok(());
        }

        let margin = self.config.profit_margin_pct / Decimal::ONE_HUNDRED;
        let ask = self
            .state
            .latest_tick()
            .map(|t| t.ask.0)
            .unwrap_or(report.price.0);
        let sell = self.snap_price(
            (report.price.0 * (Decimal::ONE + margin)).max(ask * (Decimal::ONE + margin)),
        );
        let stop =
            self.snap_price(sell * (Decimal::ONE - self.config.stop_loss_pct / Decimal::ONE_HUNDRED));
        let quantity = self.snap_qty(report.cumulative_qty.0);
        if quantity.is_zero() {
            self.clear_slot(&pending.order_id);
            return Ok(());
        }

        let list_id = self
            .adapter
            .place_oco_sell(&pending.symbol, Px(sell), Px(stop), Qty(quantity))
            .await?;
        info!(
            "ENGINE: buy {} filled at {}, protective sell limit {} stop {} (list {})",
            pending.order_id, report.price.0, sell, stop, list_id
        );
        self.clear_slot(&pending.order_id);
        Ok(())
    }

    /// Cancel everything open for the configured symbol and release the
    /// slot, regardless of who placed the orders.
    pub async fn emergency_stop(&self) -> Result<()> {
        let open = self.adapter.open_orders(&self.config.symbol).await?;
        warn!(
            "ENGINE: emergency stop, cancelling {} open orders",
            open.len()
        );
        for order in open {
            if let Err(e) = self
                .adapter
                .cancel_order(&order.symbol, &order.client_order_id)
                .await
            {
                warn!(error = %e, "ENGINE: emergency cancel of {} failed", order.client_order_id);
            }
        }
        if let Ok(mut slot) = self.pending.lock() {
            *slot = None;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Slot and bookkeeping
    // ------------------------------------------------------------------

    /// Clear the slot only if it still holds `order_id`. Returns whether
    /// this caller won the swap.
    fn clear_slot(&self, order_id: &str) -> bool {
        let Ok(mut slot) = self.pending.lock() else {
            return false;
        };
        match slot.as_ref() {
            Some(current) if current.order_id == order_id => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    fn mark_order_time(&self, now: DateTime<Utc>) {
        if let Ok(mut last) = self.last_order_at.lock() {
            *last = Some(now);
        }
    }

    fn snap_price(&self, price: Decimal) -> Decimal {
        if self.rules.tick_size.is_zero() {
            return price.round_dp(self.rules.price_precision as u32);
        }
        round_to_step_size(price, self.rules.tick_size)
    }

    /// Lot step first, then truncation at the venue quantity precision.
    fn snap_qty(&self, qty: Decimal) -> Decimal {
        round_to_step_size(qty, self.rules.step_size)
            .round_dp_with_strategy(self.rules.qty_precision as u32, RoundingStrategy::ToZero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Px;
    use rust_decimal_macros::dec;

    fn trade(notional_price: Decimal, qty: Decimal, buyer_is_maker: bool) -> TradeEvent {
        let now = Utc::now();
        TradeEvent {
            symbol: "BTCUSDT".into(),
            price: Px(notional_price),
            qty: Qty(qty),
            buyer_is_maker,
            trade_ts: now,
            received_at: now,
        }
    }

    #[test]
    fn aggressor_buys_dominate_to_bullish() {
        let trades: Vec<TradeEvent> = (0..10).map(|_| trade(dec!(100), dec!(1), false)).collect();
        let momentum = trade_momentum(&trades);
        assert_eq!(momentum.direction, FlowDirection::Bullish);
        assert_eq!(momentum.buy_count, 10);
        assert_eq!(momentum.sell_count, 0);
    }

    #[test]
    fn buyer_is_maker_counts_as_sell_pressure() {
        let trades = vec![
            trade(dec!(100), dec!(1), true),
            trade(dec!(100), dec!(2), true),
            trade(dec!(100), dec!(1), false),
        ];
        let momentum = trade_momentum(&trades);
        assert_eq!(momentum.direction, FlowDirection::Bearish);
        assert_eq!(momentum.sell_volume, dec!(300));
        assert_eq!(momentum.buy_volume, dec!(100));
    }

    #[test]
    fn balanced_or_empty_window_is_neutral() {
        assert_eq!(trade_momentum(&[]).direction, FlowDirection::Neutral);
        let trades = vec![
            trade(dec!(100), dec!(1), true),
            trade(dec!(100), dec!(1), false),
        ];
        assert_eq!(trade_momentum(&trades).direction, FlowDirection::Neutral);
    }
}
