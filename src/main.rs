use anyhow::{Context, Result};
use spot_scalper::config::BotConfig;
use spot_scalper::connection::session::{
    run_book_ticker_session, run_trade_session, run_user_data_session, StreamSupervisor,
};
use spot_scalper::connection::Connection;
use spot_scalper::control::{ControlHandle, StreamKind, StreamToggles};
use spot_scalper::engine::ScalpingEngine;
use spot_scalper::event_bus::EventBus;
use spot_scalper::event_loop::run_event_loop;
use spot_scalper::state::SharedState;
use spot_scalper::storage::{BucketAggregator, BucketSink, JsonlBucketStore, RecentBuckets};
use spot_scalper::types::{MultiTimeframeStats, TickerWindow};
use spot_scalper::venue::TradingAdapter;
use spot_scalper::logging;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

const RECENT_BUCKET_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = BotConfig::load("config.json")?;
    info!("Starting spot scalper for {}", config.symbol);

    let connection = Arc::new(Connection::new(config.clone())?);
    let rules = connection
        .exchange_filters(&config.symbol)
        .await
        .context("failed to fetch exchange filters")?;
    info!(
        "Symbol rules: step {} tick {} min notional {}",
        rules.step_size, rules.tick_size, rules.min_notional
    );

    let state = SharedState::new(config.max_recent_trades);
    let bus = Arc::new(EventBus::new(config.event_buffer));
    let toggles = Arc::new(StreamToggles::all_enabled());
    let control = ControlHandle::new(toggles.clone(), state.clone());
    let shutdown = Arc::new(AtomicBool::new(false));

    let store = Arc::new(JsonlBucketStore::new(&config.bucket_store_path)?);
    let buckets = RecentBuckets::new(RECENT_BUCKET_CAPACITY);
    for bucket in store.load_recent(RECENT_BUCKET_CAPACITY)? {
        buckets.push(bucket);
    }

    let engine = Arc::new(ScalpingEngine::new(
        config.clone(),
        state.clone(),
        connection.clone() as Arc<dyn TradingAdapter>,
        toggles.clone(),
        rules,
        buckets.clone(),
    ));

    spawn_engine_loops(&bus, &engine, &shutdown);
    spawn_bucket_task(&bus, &shutdown, &config, store, buckets);
    spawn_stats_task(
        connection.clone() as Arc<dyn TradingAdapter>,
        &config,
        state.clone(),
        bus.clone(),
        shutdown.clone(),
    );
    spawn_sessions(&connection, &bus, &toggles, &config);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested, status: {:?}", control.status());
    shutdown.store(true, Ordering::SeqCst);
    toggles.disable(StreamKind::BookTicker);
    toggles.disable(StreamKind::Trade);
    toggles.disable(StreamKind::UserData);

    // Give consumer loops a moment to drain before the runtime drops.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

fn spawn_engine_loops(bus: &Arc<EventBus>, engine: &Arc<ScalpingEngine>, shutdown: &Arc<AtomicBool>) {
    {
        let engine = engine.clone();
        tokio::spawn(run_event_loop(
            bus.subscribe_market_tick(),
            shutdown.clone(),
            "ENGINE",
            "market-tick",
            move |tick| {
                let engine = engine.clone();
                async move { engine.on_tick(tick).await }
            },
        ));
    }
    {
        let engine = engine.clone();
        tokio::spawn(run_event_loop(
            bus.subscribe_trade(),
            shutdown.clone(),
            "ENGINE",
            "trade",
            move |trade| {
                let engine = engine.clone();
                async move { engine.on_trade(trade).await }
            },
        ));
    }
    {
        let engine = engine.clone();
        tokio::spawn(run_event_loop(
            bus.subscribe_account(),
            shutdown.clone(),
            "ENGINE",
            "account",
            move |event| {
                let engine = engine.clone();
                async move { engine.on_account(event).await }
            },
        ));
    }
    {
        let engine = engine.clone();
        tokio::spawn(run_event_loop(
            bus.subscribe_execution(),
            shutdown.clone(),
            "ENGINE",
            "execution",
            move |report| {
                let engine = engine.clone();
                async move { engine.on_execution(report).await }
            },
        ));
    }
}

fn spawn_bucket_task(
    bus: &Arc<EventBus>,
    shutdown: &Arc<AtomicBool>,
    config: &BotConfig,
    store: Arc<JsonlBucketStore>,
    buckets: RecentBuckets,
) {
    let aggregator = Arc::new(Mutex::new(BucketAggregator::new(config.bucket_window_secs)));
    tokio::spawn(run_event_loop(
        bus.subscribe_trade(),
        shutdown.clone(),
        "STORAGE",
        "trade",
        move |trade| {
            let aggregator = aggregator.clone();
            let store = store.clone();
            let buckets = buckets.clone();
            async move {
                let sealed = aggregator
                    .lock()
                    .ok()
                    .and_then(|mut agg| agg.apply(&trade));
                if let Some(bucket) = sealed {
                    store.store(&bucket)?;
                    buckets.push(bucket);
                }
                Ok(())
            }
        },
    ));
}

/// Periodic 1h/6h/24h ticker refresh; the engine reads the cache on its
/// evaluation path instead of fetching inline.
fn spawn_stats_task(
    adapter: Arc<dyn TradingAdapter>,
    config: &BotConfig,
    state: SharedState,
    bus: Arc<EventBus>,
    shutdown: Arc<AtomicBool>,
) {
    let symbol = config.symbol.clone();
    let refresh = Duration::from_secs(config.stats_refresh_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresh);
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let fetched = tokio::try_join!(
                adapter.ticker_stats(&symbol, TickerWindow::H1),
                adapter.ticker_stats(&symbol, TickerWindow::H6),
                adapter.ticker_stats(&symbol, TickerWindow::H24),
            );
            match fetched {
                Ok((h1, h6, h24)) => {
                    state.set_stats(MultiTimeframeStats {
                        h1,
                        h6,
                        h24,
                        fetched_at: Utc::now(),
                    });
                }
                Err(e) => warn!(error = %e, "STATS: ticker refresh failed"),
            }
            let health = bus.health_stats();
            if health.market_tick_receivers == 0 || health.execution_receivers == 0 {
                error!("STATS: a critical consumer died: {:?}", health);
            }
        }
        info!("STATS: refresh task stopped");
    });
}

fn spawn_sessions(
    connection: &Arc<Connection>,
    bus: &Arc<EventBus>,
    toggles: &Arc<StreamToggles>,
    config: &BotConfig,
) {
    let delay = Duration::from_secs(config.reconnect_delay_secs);

    let ticker_supervisor =
        StreamSupervisor::new(StreamKind::BookTicker, toggles.clone(), delay);
    {
        let conn = connection.clone();
        let bus = bus.clone();
        let supervisor = ticker_supervisor.clone();
        tokio::spawn(async move {
            supervisor
                .run(move |handle| {
                    let conn = conn.clone();
                    let bus = bus.clone();
                    async move { run_book_ticker_session(conn, bus, handle).await }
                })
                .await;
        });
    }

    let trade_supervisor = StreamSupervisor::new(StreamKind::Trade, toggles.clone(), delay);
    {
        let conn = connection.clone();
        let bus = bus.clone();
        let supervisor = trade_supervisor.clone();
        tokio::spawn(async move {
            supervisor
                .run(move |handle| {
                    let conn = conn.clone();
                    let bus = bus.clone();
                    async move { run_trade_session(conn, bus, handle).await }
                })
                .await;
        });
    }

    let user_supervisor = StreamSupervisor::new(StreamKind::UserData, toggles.clone(), delay);
    {
        let conn = connection.clone();
        let bus = bus.clone();
        let supervisor = user_supervisor.clone();
        tokio::spawn(async move {
            supervisor
                .run(move |handle| {
                    let conn = conn.clone();
                    let bus = bus.clone();
                    async move { run_user_data_session(conn, bus, handle).await }
                })
                .await;
        });
    }
}
