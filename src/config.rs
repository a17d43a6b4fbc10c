// Configuration loading
// Strategy constants are injected here rather than hard-coded in the engine;
// every field has a serde default so a partial config file is valid, and
// SCALPER_* environment variables override file values.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_base_asset")]
    pub base_asset: String,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,

    /// Minimum absolute spread (quote units) before a cycle may trade.
    #[serde(default = "default_min_spread_threshold")]
    pub min_spread_threshold: Decimal,
    /// Absolute offset below the bid for buy placement.
    #[serde(default = "default_scalp_margin")]
    pub scalp_margin: Decimal,
    /// Target profit margin for protective sells, percent.
    #[serde(default = "default_profit_margin_pct")]
    pub profit_margin_pct: Decimal,
    /// Stop distance below the protective sell limit, percent.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Minimum tradeable notional in quote units.
    #[serde(default = "default_min_trade_amount")]
    pub min_trade_amount: Decimal,
    /// Fraction of the free quote balance committed per buy.
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: Decimal,

    /// Lookback for trade momentum analysis.
    #[serde(default = "default_trade_window_secs")]
    pub trade_window_secs: i64,
    /// Hard cap on the rolling trade window length.
    #[serde(default = "default_max_recent_trades")]
    pub max_recent_trades: usize,
    #[serde(default = "default_order_cooldown_secs")]
    pub order_cooldown_secs: i64,
    /// Age after which an unfilled pending buy is cancelled.
    #[serde(default = "default_pending_cancel_timeout_secs")]
    pub pending_cancel_timeout_secs: i64,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_stats_refresh_secs")]
    pub stats_refresh_secs: u64,
    #[serde(default = "default_bucket_window_secs")]
    pub bucket_window_secs: i64,
    #[serde(default = "default_max_ws_message_bytes")]
    pub max_ws_message_bytes: usize,

    #[serde(default = "default_bucket_store_path")]
    pub bucket_store_path: String,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults are total")
    }
}

impl BotConfig {
    /// Load from a JSON file if present, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut cfg = if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config file {path}"))?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SCALPER_SYMBOL") {
            self.symbol = v;
        }
        if let Ok(v) = std::env::var("SCALPER_BASE_ASSET") {
            self.base_asset = v;
        }
        if let Ok(v) = std::env::var("SCALPER_QUOTE_ASSET") {
            self.quote_asset = v;
        }
        if let Ok(v) = std::env::var("SCALPER_API_KEY") {
            self.api_key = v;
        }
        if let Ok(v) = std::env::var("SCALPER_API_SECRET") {
            self.api_secret = v;
        }
        if let Ok(v) = std::env::var("SCALPER_REST_BASE_URL") {
            self.rest_base_url = v;
        }
        if let Ok(v) = std::env::var("SCALPER_WS_BASE_URL") {
            self.ws_base_url = v;
        }
        if let Some(v) = env_decimal("SCALPER_MIN_SPREAD_THRESHOLD") {
            self.min_spread_threshold = v;
        }
        if let Some(v) = env_decimal("SCALPER_SCALP_MARGIN") {
            self.scalp_margin = v;
        }
        if let Some(v) = env_decimal("SCALPER_PROFIT_MARGIN_PCT") {
            self.profit_margin_pct = v;
        }
        if let Some(v) = env_decimal("SCALPER_MIN_TRADE_AMOUNT") {
            self.min_trade_amount = v;
        }
        if let Some(v) = env_parse::<u64>("SCALPER_RECONNECT_DELAY_SECS") {
            self.reconnect_delay_secs = v;
        }
        if let Some(v) = env_parse::<i64>("SCALPER_PENDING_CANCEL_TIMEOUT_SECS") {
            self.pending_cancel_timeout_secs = v;
        }
    }
}

fn env_decimal(key: &str) -> Option<Decimal> {
    std::env::var(key).ok().and_then(|v| Decimal::from_str(&v).ok())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_base_asset() -> String {
    "BTC".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_min_spread_threshold() -> Decimal {
    Decimal::new(1, 4) // 0.0001
}

fn default_scalp_margin() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_profit_margin_pct() -> Decimal {
    Decimal::new(3, 1) // 0.3%
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(3, 1) // 0.3%
}

fn default_min_trade_amount() -> Decimal {
    Decimal::new(10, 0)
}

fn default_max_position_fraction() -> Decimal {
    Decimal::ONE
}

fn default_trade_window_secs() -> i64 {
    30
}

fn default_max_recent_trades() -> usize {
    50
}

fn default_order_cooldown_secs() -> i64 {
    10
}

fn default_pending_cancel_timeout_secs() -> i64 {
    10
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_stats_refresh_secs() -> u64 {
    60
}

fn default_bucket_window_secs() -> i64 {
    60
}

fn default_max_ws_message_bytes() -> usize {
    1024 * 1024
}

fn default_bucket_store_path() -> String {
    "data/buckets.jsonl".to_string()
}

fn default_event_buffer() -> usize {
    1024
}
