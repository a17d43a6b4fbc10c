// Stream payload translation. Raw frames become normalized events here;
// malformed or unknown payloads are logged and dropped so one bad frame
// never ends a session.

use crate::connection::check_message_size;
use crate::types::{
    AccountEvent, ExecutionReport, MarketTick, OrderStatus, Px, Qty, Side, TradeEvent,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

pub(crate) fn extract_text_from_message(
    msg: &Result<Message, tokio_tungstenite::tungstenite::Error>,
    max_bytes: usize,
    stream_name: &str,
) -> Result<Option<String>> {
    let size = msg
        .as_ref()
        .map(|m| match m {
            Message::Text(txt) => txt.len(),
            Message::Binary(bin) => bin.len(),
            _ => 0,
        })
        .unwrap_or(0);
    check_message_size(size, max_bytes, stream_name)?;

    match msg {
        Ok(Message::Text(txt)) => Ok(Some(txt.to_string())),
        Ok(Message::Binary(_)) => Ok(None),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_)) => Ok(None),
        Err(e) => Err(anyhow!("WebSocket error on {stream_name}: {e:?}")),
    }
}

// ============================================================================
// Book ticker stream
// ============================================================================

#[derive(Debug, Deserialize)]
struct BookTickerEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid_price: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "a")]
    ask_price: String,
    #[serde(rename = "A")]
    ask_qty: String,
}

/// The book-ticker payload carries no event time; stamp on receipt.
pub(crate) fn parse_book_ticker(payload: &str, received_at: DateTime<Utc>) -> Option<MarketTick> {
    let event: BookTickerEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "CONNECTION: dropping malformed book-ticker payload");
            return None;
        }
    };
    Some(MarketTick {
        symbol: event.symbol,
        bid: Px(decimal_field(&event.bid_price, "b", "book-ticker")?),
        bid_qty: Qty(decimal_field(&event.bid_qty, "B", "book-ticker")?),
        ask: Px(decimal_field(&event.ask_price, "a", "book-ticker")?),
        ask_qty: Qty(decimal_field(&event.ask_qty, "A", "book-ticker")?),
        ts: received_at,
    })
}

// ============================================================================
// Trade stream
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawTradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

pub(crate) fn parse_trade(payload: &str, received_at: DateTime<Utc>) -> Option<TradeEvent> {
    let event: RawTradeEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "CONNECTION: dropping malformed trade payload");
            return None;
        }
    };
    Some(TradeEvent {
        symbol: event.symbol,
        price: Px(decimal_field(&event.price, "p", "trade")?),
        qty: Qty(decimal_field(&event.qty, "q", "trade")?),
        buyer_is_maker: event.buyer_is_maker,
        trade_ts: DateTime::<Utc>::from_timestamp_millis(event.trade_time)
            .unwrap_or(received_at),
        received_at,
    })
}

// ============================================================================
// User-data stream
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawExecutionReport {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "L")]
    last_fill_price: String,
    #[serde(rename = "l")]
    last_fill_qty: String,
    #[serde(rename = "z")]
    cumulative_qty: String,
    #[serde(rename = "E")]
    event_time: i64,
}

#[derive(Debug, Deserialize)]
struct RawAccountPosition {
    #[serde(rename = "B")]
    balances: Vec<RawBalance>,
    #[serde(rename = "E")]
    event_time: i64,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f")]
    free: String,
    #[serde(rename = "l")]
    locked: String,
}

#[derive(Debug)]
pub(crate) enum UserEvent {
    Execution(ExecutionReport),
    Account(Vec<AccountEvent>),
    Ignored,
}

/// Dispatch one user-data payload by its `e` tag. Unknown event types
/// are ignored, not errors.
pub(crate) fn parse_user_event(payload: &str) -> Result<UserEvent> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    match value.get("e").and_then(|v| v.as_str()) {
        Some("executionReport") => {
            let raw: RawExecutionReport = serde_json::from_value(value)?;
            Ok(UserEvent::Execution(into_execution_report(raw)?))
        }
        Some("outboundAccountPosition") => {
            let raw: RawAccountPosition = serde_json::from_value(value)?;
            let ts = DateTime::<Utc>::from_timestamp_millis(raw.event_time)
                .unwrap_or_else(Utc::now);
            let patches = raw
                .balances
                .into_iter()
                .filter_map(|b| {
                    Some(AccountEvent::BalancePatch {
                        asset: b.asset,
                        free: decimal_field(&b.free, "f", "account-position")?,
                        locked: decimal_field(&b.locked, "l", "account-position")?,
                        ts,
                    })
                })
                .collect();
            Ok(UserEvent::Account(patches))
        }
        _ => Ok(UserEvent::Ignored),
    }
}

fn into_execution_report(raw: RawExecutionReport) -> Result<ExecutionReport> {
    let side = match raw.side.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        other => return Err(anyhow!("unknown execution side: {other}")),
    };
    let status = crate::connection::rest::parse_order_status(&raw.status);

    // Fills report the actual trade price; order-level updates carry it
    // in the limit price field.
    let price = parse_decimal(&raw.last_fill_price)
        .filter(|p| !p.is_zero())
        .or_else(|| parse_decimal(&raw.price))
        .ok_or_else(|| anyhow!("execution report without a parseable price"))?;

    Ok(ExecutionReport {
        symbol: raw.symbol,
        client_order_id: raw.client_order_id,
        exchange_order_id: Some(raw.order_id),
        side,
        status,
        price: Px(price),
        last_fill_qty: Qty(
            parse_decimal(&raw.last_fill_qty)
                .ok_or_else(|| anyhow!("bad last fill quantity"))?,
        ),
        cumulative_qty: Qty(
            parse_decimal(&raw.cumulative_qty)
                .ok_or_else(|| anyhow!("bad cumulative quantity"))?,
        ),
        ts: DateTime::<Utc>::from_timestamp_millis(raw.event_time).unwrap_or_else(Utc::now),
    })
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw).ok()
}

/// Like `parse_decimal`, but for paths that drop the event rather than
/// error out: the drop still needs a trace.
fn decimal_field(raw: &str, field: &str, stream: &str) -> Option<Decimal> {
    match Decimal::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, field, "CONNECTION: dropping {stream} payload with bad decimal");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountEvent;
    use rust_decimal_macros::dec;

    #[test]
    fn book_ticker_payload_becomes_tick() {
        let payload = r#"{"u":400900217,"s":"BTCUSDT","b":"100.00","B":"3.1","a":"100.05","A":"2.7"}"#;
        let now = Utc::now();
        let tick = parse_book_ticker(payload, now).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.bid, Px(dec!(100.00)));
        assert_eq!(tick.ask, Px(dec!(100.05)));
        assert_eq!(tick.ts, now);
    }

    #[test]
    fn malformed_payload_is_dropped() {
        assert!(parse_book_ticker("not json", Utc::now()).is_none());
        assert!(parse_trade(r#"{"s":"BTCUSDT"}"#, Utc::now()).is_none());
        // Valid JSON with a garbage numeric field is dropped the same way.
        let payload = r#"{"s":"BTCUSDT","b":"abc","B":"1","a":"100.05","A":"1"}"#;
        assert!(parse_book_ticker(payload, Utc::now()).is_none());
    }

    #[test]
    fn trade_payload_keeps_aggressor_flag() {
        let payload = r#"{"e":"trade","E":1737000000100,"s":"BTCUSDT","t":12345,"p":"100.02","q":"0.5","T":1737000000090,"m":true,"M":true}"#;
        let trade = parse_trade(payload, Utc::now()).unwrap();
        assert!(trade.buyer_is_maker);
        assert_eq!(trade.price, Px(dec!(100.02)));
        assert_eq!(trade.trade_ts.timestamp_millis(), 1737000000090);
    }

    #[test]
    fn execution_report_prefers_fill_price() {
        let payload = r#"{"e":"executionReport","E":1737000000100,"s":"BTCUSDT","c":"abc-123","S":"BUY","o":"LIMIT","f":"GTC","q":"1.0","p":"99.98","X":"FILLED","i":998877,"l":"1.0","z":"1.0","L":"99.97"}"#;
        let event = parse_user_event(payload).unwrap();
        let UserEvent::Execution(report) = event else {
            panic!("expected execution report");
        };
        assert_eq!(report.client_order_id, "abc-123");
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.price, Px(dec!(99.97)));
        assert_eq!(report.cumulative_qty, Qty(dec!(1.0)));
    }

    #[test]
    fn account_position_becomes_balance_patches() {
        let payload = r#"{"e":"outboundAccountPosition","E":1737000000100,"u":1737000000099,"B":[{"a":"BTC","f":"1.5","l":"0.0"},{"a":"USDT","f":"250.0","l":"10.0"}]}"#;
        let event = parse_user_event(payload).unwrap();
        let UserEvent::Account(patches) = event else {
            panic!("expected balance patches");
        };
        assert_eq!(patches.len(), 2);
        let AccountEvent::BalancePatch { asset, free, .. } = &patches[0] else {
            panic!("expected a patch");
        };
        assert_eq!(asset, "BTC");
        assert_eq!(*free, dec!(1.5));
    }

    #[test]
    fn bad_balance_entry_drops_only_that_patch() {
        let payload = r#"{"e":"outboundAccountPosition","E":1737000000100,"u":1737000000099,"B":[{"a":"BTC","f":"oops","l":"0.0"},{"a":"USDT","f":"250.0","l":"10.0"}]}"#;
        let event = parse_user_event(payload).unwrap();
        let UserEvent::Account(patches) = event else {
            panic!("expected balance patches");
        };
        assert_eq!(patches.len(), 1);
        let AccountEvent::BalancePatch { asset, free, .. } = &patches[0] else {
            panic!("expected a patch");
        };
        assert_eq!(asset, "USDT");
        assert_eq!(*free, dec!(250.0));
    }

    #[test]
    fn unknown_user_event_is_ignored() {
        let payload = r#"{"e":"listStatus","E":1737000000100}"#;
        assert!(matches!(parse_user_event(payload).unwrap(), UserEvent::Ignored));
    }
}
