// End-to-end engine lifecycle tests against a recording venue mock.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spot_scalper::config::BotConfig;
use spot_scalper::control::StreamToggles;
use spot_scalper::engine::ScalpingEngine;
use spot_scalper::state::SharedState;
use spot_scalper::storage::RecentBuckets;
use spot_scalper::types::{
    AccountEvent, AccountSnapshot, AssetBalance, DepthLevel, DepthSnapshot, ExecutionReport,
    MarketTick, NewOrderRequest, OpenOrder, OrderStatus, Px, Qty, Side, SymbolRules, TickerStats,
    TickerWindow, TradeEvent,
};
use spot_scalper::venue::TradingAdapter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum VenueCall {
    LimitOrder {
        side: Side,
        price: Decimal,
        qty: Decimal,
    },
    Cancel {
        order_id: String,
    },
    OcoSell {
        limit: Decimal,
        stop: Decimal,
        qty: Decimal,
    },
}

/// Records every order-path call. An optional submit delay widens the
/// race window for the concurrency test.
struct MockVenue {
    calls: Mutex<Vec<VenueCall>>,
    submit_delay_ms: u64,
}

impl MockVenue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            submit_delay_ms: 0,
        })
    }

    fn with_submit_delay(ms: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            submit_delay_ms: ms,
        })
    }

    fn calls(&self) -> Vec<VenueCall> {
        self.calls.lock().unwrap().clone()
    }

    fn limit_orders(&self) -> Vec<(Side, Decimal, Decimal)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                VenueCall::LimitOrder { side, price, qty } => Some((side, price, qty)),
                _ => None,
            })
            .collect()
    }

    fn oco_sells(&self) -> Vec<(Decimal, Decimal, Decimal)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                VenueCall::OcoSell { limit, stop, qty } => Some((limit, stop, qty)),
                _ => None,
            })
            .collect()
    }

    fn cancels(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                VenueCall::Cancel { order_id } => Some(order_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TradingAdapter for MockVenue {
    async fn account_snapshot(&self) -> Result<AccountSnapshot> {
        Ok(AccountSnapshot::default())
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>> {
        Ok(Vec::new())
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(VenueCall::Cancel {
            order_id: order_id.to_string(),
        });
        Ok(())
    }

    async fn place_limit_order(&self, req: NewOrderRequest) -> Result<String> {
        if self.submit_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.submit_delay_ms)).await;
        }
        self.calls.lock().unwrap().push(VenueCall::LimitOrder {
            side: req.side,
            price: req.price.0,
            qty: req.quantity.0,
        });
        Ok("9001".to_string())
    }

    async fn place_oco_sell(&self, _symbol: &str, limit: Px, stop: Px, qty: Qty) -> Result<String> {
        self.calls.lock().unwrap().push(VenueCall::OcoSell {
            limit: limit.0,
            stop: stop.0,
            qty: qty.0,
        });
        Ok("7001".to_string())
    }

    async fn order_book_depth(&self, _symbol: &str, _limit: usize) -> Result<DepthSnapshot> {
        Ok(DepthSnapshot {
            bids: vec![DepthLevel {
                price: Px(dec!(100.00)),
                qty: Qty(dec!(5)),
            }],
            asks: vec![DepthLevel {
                price: Px(dec!(100.05)),
                qty: Qty(dec!(5)),
            }],
        })
    }

    async fn exchange_filters(&self, _symbol: &str) -> Result<SymbolRules> {
        Ok(rules())
    }

    async fn ticker_stats(&self, _symbol: &str, _window: TickerWindow) -> Result<TickerStats> {
        Err(anyhow!("ticker stats not wired in this mock"))
    }
}

fn rules() -> SymbolRules {
    SymbolRules {
        step_size: dec!(0.00001),
        tick_size: dec!(0.01),
        min_notional: dec!(5),
        price_precision: 2,
        qty_precision: 5,
    }
}

fn account(balances: &[(&str, Decimal)]) -> AccountSnapshot {
    let mut map = HashMap::new();
    for (asset, free) in balances {
        map.insert(
            asset.to_string(),
            AssetBalance {
                free: *free,
                locked: Decimal::ZERO,
            },
        );
    }
    AccountSnapshot {
        balances: map,
        ts: Utc::now(),
    }
}

fn tick(bid: Decimal, ask: Decimal) -> MarketTick {
    MarketTick {
        symbol: "BTCUSDT".into(),
        bid: Px(bid),
        bid_qty: Qty(dec!(3)),
        ask: Px(ask),
        ask_qty: Qty(dec!(3)),
        ts: Utc::now(),
    }
}

fn aggressor_buy(price: Decimal) -> TradeEvent {
    let now = Utc::now();
    TradeEvent {
        symbol: "BTCUSDT".into(),
        price: Px(price),
        qty: Qty(dec!(0.5)),
        buyer_is_maker: false,
        trade_ts: now,
        received_at: now,
    }
}

fn aggressor_sell(price: Decimal) -> TradeEvent {
    TradeEvent {
        buyer_is_maker: true,
        ..aggressor_buy(price)
    }
}

fn build_engine(
    venue: Arc<MockVenue>,
    toggles: Arc<StreamToggles>,
) -> (Arc<ScalpingEngine>, SharedState) {
    build_engine_with_rules(venue, toggles, rules())
}

fn build_engine_with_rules(
    venue: Arc<MockVenue>,
    toggles: Arc<StreamToggles>,
    rules: SymbolRules,
) -> (Arc<ScalpingEngine>, SharedState) {
    let state = SharedState::new(50);
    let engine = Arc::new(ScalpingEngine::new(
        BotConfig::default(),
        state.clone(),
        venue,
        toggles,
        rules,
        RecentBuckets::new(64),
    ));
    (engine, state)
}

#[tokio::test]
async fn bullish_flow_places_exactly_one_buy_below_bid() {
    let venue = MockVenue::new();
    let (engine, _) = build_engine(venue.clone(), Arc::new(StreamToggles::all_enabled()));

    engine
        .on_account(AccountEvent::Snapshot(account(&[("USDT", dec!(1000))])))
        .await
        .unwrap();
    engine.on_tick(tick(dec!(100.00), dec!(100.05))).await.unwrap();
    for _ in 0..10 {
        engine.on_trade(aggressor_buy(dec!(100.02))).await.unwrap();
    }

    let orders = venue.limit_orders();
    assert_eq!(orders.len(), 1, "one bullish window, one buy");
    let (side, price, qty) = orders[0];
    assert_eq!(side, Side::Buy);
    assert_eq!(price, dec!(99.98));
    assert!(qty * price >= dec!(5));
    assert!(qty * price <= dec!(1000));

    let pending = engine.pending_order().expect("slot occupied after submit");
    assert_eq!(pending.buy_price.0, dec!(99.98));
    assert_eq!(pending.exchange_order_id, Some(9001));
    assert!(venue.oco_sells().is_empty(), "no inventory, no sell yet");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cycles_place_at_most_one_buy() {
    let venue = MockVenue::with_submit_delay(20);
    let (engine, _) = build_engine(venue.clone(), Arc::new(StreamToggles::all_disabled()));

    engine
        .on_account(AccountEvent::Snapshot(account(&[("USDT", dec!(1000))])))
        .await
        .unwrap();
    engine.on_tick(tick(dec!(100.00), dec!(100.05))).await.unwrap();
    engine.on_trade(aggressor_buy(dec!(100.02))).await.unwrap();

    let now = Utc::now();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.evaluate(now).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(venue.limit_orders().len(), 1);
    assert!(engine.pending_order().is_some());
}

#[tokio::test]
async fn buy_quantity_respects_lot_step_and_precision() {
    let venue = MockVenue::new();
    let coarse = SymbolRules {
        step_size: dec!(0.00001),
        tick_size: dec!(0.01),
        min_notional: dec!(5),
        price_precision: 2,
        qty_precision: 2,
    };
    let (engine, _) =
        build_engine_with_rules(venue.clone(), Arc::new(StreamToggles::all_disabled()), coarse);

    engine
        .on_account(AccountEvent::Snapshot(account(&[("USDT", dec!(995))])))
        .await
        .unwrap();
    engine.on_tick(tick(dec!(100.00), dec!(100.05))).await.unwrap();
    engine.on_trade(aggressor_buy(dec!(100.02))).await.unwrap();
    engine.evaluate(Utc::now()).await.unwrap();

    let orders = venue.limit_orders();
    assert_eq!(orders.len(), 1);
    let (side, price, qty) = orders[0];
    assert_eq!(side, Side::Buy);
    assert_eq!(price, dec!(99.98));
    // 995 / 99.98 = 9.95199..., truncated at two decimals, never up.
    assert_eq!(qty, dec!(9.95));
    assert!(qty * price <= dec!(995));
}

#[tokio::test]
async fn aged_pending_is_cancelled_even_when_sell_is_eligible() {
    let venue = MockVenue::new();
    let (engine, _) = build_engine(venue.clone(), Arc::new(StreamToggles::all_disabled()));

    // Base inventory makes the protective sell eligible; the timeout must
    // still win.
    engine
        .on_account(AccountEvent::Snapshot(account(&[
            ("USDT", dec!(1000)),
            ("BTC", dec!(1)),
        ])))
        .await
        .unwrap();
    engine.on_tick(tick(dec!(100.00), dec!(100.05))).await.unwrap();
    engine.on_trade(aggressor_buy(dec!(100.02))).await.unwrap();

    let placed_at = Utc::now();
    engine.evaluate(placed_at).await.unwrap();
    let pending = engine.pending_order().expect("buy placed");

    engine
        .evaluate(placed_at + Duration::seconds(11))
        .await
        .unwrap();

    assert_eq!(venue.cancels(), vec![pending.order_id]);
    assert!(venue.oco_sells().is_empty(), "timeout wins over the sell path");
    assert!(engine.pending_order().is_none(), "slot released after cancel");
}

#[tokio::test]
async fn buy_fill_places_protective_oco_with_stop_below_limit() {
    let venue = MockVenue::new();
    let (engine, _) = build_engine(venue.clone(), Arc::new(StreamToggles::all_disabled()));

    engine
        .on_account(AccountEvent::Snapshot(account(&[("USDT", dec!(1000))])))
        .await
        .unwrap();
    engine.on_tick(tick(dec!(100.00), dec!(100.05))).await.unwrap();
    engine.on_trade(aggressor_buy(dec!(100.02))).await.unwrap();
    engine.evaluate(Utc::now()).await.unwrap();
    let pending = engine.pending_order().expect("buy placed");

    engine
        .on_execution(ExecutionReport {
            symbol: "BTCUSDT".into(),
            client_order_id: pending.order_id.clone(),
            exchange_order_id: Some(9001),
            side: Side::Buy,
            status: OrderStatus::Filled,
            price: Px(dec!(99.98)),
            last_fill_qty: Qty(dec!(10)),
            cumulative_qty: Qty(dec!(10)),
            ts: Utc::now(),
        })
        .await
        .unwrap();

    let ocos = venue.oco_sells();
    assert_eq!(ocos.len(), 1);
    let (limit, stop, qty) = ocos[0];
    // Ask-anchored target: 100.05 * 1.003 snapped down to the tick.
    assert_eq!(limit, dec!(100.35));
    assert_eq!(stop, dec!(100.04));
    assert!(stop < limit);
    assert_eq!(qty, dec!(10));
    assert!(engine.pending_order().is_none(), "slot released after fill");
}

#[tokio::test]
async fn cancelled_execution_report_releases_the_slot() {
    let venue = MockVenue::new();
    let (engine, _) = build_engine(venue.clone(), Arc::new(StreamToggles::all_disabled()));

    engine
        .on_account(AccountEvent::Snapshot(account(&[("USDT", dec!(1000))])))
        .await
        .unwrap();
    engine.on_tick(tick(dec!(100.00), dec!(100.05))).await.unwrap();
    engine.on_trade(aggressor_buy(dec!(100.02))).await.unwrap();
    engine.evaluate(Utc::now()).await.unwrap();
    let pending = engine.pending_order().expect("buy placed");

    engine
        .on_execution(ExecutionReport {
            symbol: "BTCUSDT".into(),
            client_order_id: pending.order_id.clone(),
            exchange_order_id: Some(9001),
            side: Side::Buy,
            status: OrderStatus::Canceled,
            price: Px(dec!(99.98)),
            last_fill_qty: Qty(Decimal::ZERO),
            cumulative_qty: Qty(Decimal::ZERO),
            ts: Utc::now(),
        })
        .await
        .unwrap();

    assert!(engine.pending_order().is_none());
    assert!(venue.oco_sells().is_empty());
}

#[tokio::test]
async fn bearish_flow_sells_inventory_without_occupying_the_slot() {
    let venue = MockVenue::new();
    let (engine, _) = build_engine(venue.clone(), Arc::new(StreamToggles::all_disabled()));

    engine
        .on_account(AccountEvent::Snapshot(account(&[("BTC", dec!(1))])))
        .await
        .unwrap();
    engine.on_tick(tick(dec!(100.00), dec!(100.05))).await.unwrap();
    for _ in 0..3 {
        engine.on_trade(aggressor_sell(dec!(100.00))).await.unwrap();
    }
    engine.evaluate(Utc::now()).await.unwrap();

    let orders = venue.limit_orders();
    assert_eq!(orders.len(), 1);
    let (side, price, qty) = orders[0];
    assert_eq!(side, Side::Sell);
    assert_eq!(price, dec!(100.07));
    assert_eq!(qty, dec!(1));
    assert!(engine.pending_order().is_none(), "direct sell never holds the slot");
}

#[tokio::test]
async fn balance_patch_updates_the_tradeable_quote() {
    let venue = MockVenue::new();
    let (engine, state) = build_engine(venue.clone(), Arc::new(StreamToggles::all_disabled()));

    engine
        .on_account(AccountEvent::Snapshot(account(&[("USDT", dec!(3))])))
        .await
        .unwrap();
    engine.on_tick(tick(dec!(100.00), dec!(100.05))).await.unwrap();
    engine.on_trade(aggressor_buy(dec!(100.02))).await.unwrap();

    // Below min_trade_amount: no buy.
    engine.evaluate(Utc::now()).await.unwrap();
    assert!(venue.limit_orders().is_empty());

    engine
        .on_account(AccountEvent::BalancePatch {
            asset: "USDT".into(),
            free: dec!(500),
            locked: Decimal::ZERO,
            ts: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(state.free_balance("USDT"), dec!(500));

    engine.evaluate(Utc::now()).await.unwrap();
    assert_eq!(venue.limit_orders().len(), 1);
}
