// Spot REST client. Signed endpoints carry an HMAC-SHA256 signature over
// the urlencoded query plus a millisecond timestamp.

use crate::connection::Connection;
use crate::types::{
    AccountSnapshot, AssetBalance, DepthLevel, DepthSnapshot, NewOrderRequest, OpenOrder,
    OrderStatus, Px, Qty, Side, SymbolRules, TickerStats, TickerWindow,
};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderEntry {
    order_id: i64,
    client_order_id: String,
    symbol: String,
    side: String,
    price: String,
    orig_qty: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcoAck {
    order_list_id: i64,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
struct ExchangeSymbol {
    symbol: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
    #[serde(rename = "baseAssetPrecision", default)]
    base_asset_precision: usize,
    #[serde(rename = "quotePrecision", default)]
    quote_precision: usize,
}

#[derive(Debug, Deserialize)]
struct SymbolFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(flatten)]
    data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    volume: String,
    quote_volume: String,
    price_change_percent: String,
    count: u64,
    last_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

// ============================================================================
// Public operations
// ============================================================================

pub async fn fetch_account(conn: &Connection) -> Result<AccountSnapshot> {
    ensure_credentials(conn)?;
    let response = signed_get(conn, "/api/v3/account", Vec::new())
        .await?
        .json::<AccountResponse>()
        .await
        .context("failed to parse account response")?;

    let mut snapshot = AccountSnapshot {
        ts: Utc::now(),
        ..Default::default()
    };
    for entry in response.balances {
        let free = parse_decimal(&entry.free, "balance free")?;
        let locked = parse_decimal(&entry.locked, "balance locked")?;
        if free.is_zero() && locked.is_zero() {
            continue;
        }
        snapshot
            .balances
            .insert(entry.asset, AssetBalance { free, locked });
    }
    Ok(snapshot)
}

pub async fn fetch_open_orders(conn: &Connection, symbol: &str) -> Result<Vec<OpenOrder>> {
    ensure_credentials(conn)?;
    let params = vec![("symbol".to_string(), symbol.to_string())];
    let response = signed_get(conn, "/api/v3/openOrders", params)
        .await?
        .json::<Vec<OpenOrderEntry>>()
        .await
        .context("failed to parse open orders response")?;

    response
        .into_iter()
        .map(|entry| {
            Ok(OpenOrder {
                exchange_order_id: entry.order_id,
                client_order_id: entry.client_order_id,
                symbol: entry.symbol,
                side: parse_side(&entry.side)?,
                price: Px(parse_decimal(&entry.price, "order price")?),
                orig_qty: Qty(parse_decimal(&entry.orig_qty, "order quantity")?),
                status: parse_order_status(&entry.status),
            })
        })
        .collect()
}

pub async fn cancel_order(conn: &Connection, symbol: &str, client_order_id: &str) -> Result<()> {
    ensure_credentials(conn)?;
    let params = vec![
        ("symbol".to_string(), symbol.to_string()),
        ("origClientOrderId".to_string(), client_order_id.to_string()),
    ];
    signed_delete(conn, "/api/v3/order", params).await?;
    tracing::info!("CONNECTION: order {} cancelled", client_order_id);
    Ok(())
}

pub async fn place_limit_order(conn: &Connection, order: NewOrderRequest) -> Result<String> {
    ensure_credentials(conn)?;
    if order.quantity.0 <= Decimal::ZERO {
        return Err(anyhow!("order quantity must be positive"));
    }
    if order.price.0 <= Decimal::ZERO {
        return Err(anyhow!("order price must be positive"));
    }

    let params = vec![
        ("symbol".to_string(), order.symbol.clone()),
        ("side".to_string(), order.side.as_str().to_string()),
        ("type".to_string(), "LIMIT".to_string()),
        ("timeInForce".to_string(), "GTC".to_string()),
        ("price".to_string(), format_decimal(order.price.0)),
        ("quantity".to_string(), format_decimal(order.quantity.0)),
        ("newClientOrderId".to_string(), order.client_order_id.clone()),
    ];

    let ack = signed_post(conn, "/api/v3/order", params)
        .await?
        .json::<OrderAck>()
        .await
        .context("failed to parse order ack")?;
    tracing::info!(
        "CONNECTION: {} limit order sent ({} @ {}, exchange id {})",
        order.side.as_str(),
        order.quantity.0,
        order.price.0,
        ack.order_id
    );
    Ok(ack.order_id.to_string())
}

pub async fn place_oco_sell(
    conn: &Connection,
    symbol: &str,
    limit: Px,
    stop: Px,
    qty: Qty,
) -> Result<String> {
    ensure_credentials(conn)?;
    if qty.0 <= Decimal::ZERO {
        return Err(anyhow!("OCO quantity must be positive"));
    }
    if stop.0 >= limit.0 {
        return Err(anyhow!("OCO stop {} must be below limit {}", stop.0, limit.0));
    }

    let params = vec![
        ("symbol".to_string(), symbol.to_string()),
        ("side".to_string(), "SELL".to_string()),
        ("quantity".to_string(), format_decimal(qty.0)),
        ("price".to_string(), format_decimal(limit.0)),
        ("stopPrice".to_string(), format_decimal(stop.0)),
        ("stopLimitPrice".to_string(), format_decimal(stop.0)),
        ("stopLimitTimeInForce".to_string(), "GTC".to_string()),
    ];

    let ack = signed_post(conn, "/api/v3/order/oco", params)
        .await?
        .json::<OcoAck>()
        .await
        .context("failed to parse OCO ack")?;
    tracing::info!(
        "CONNECTION: OCO sell sent ({} limit {} stop {}, list {})",
        qty.0,
        limit.0,
        stop.0,
        ack.order_list_id
    );
    Ok(ack.order_list_id.to_string())
}

pub async fn fetch_depth(conn: &Connection, symbol: &str, limit: usize) -> Result<DepthSnapshot> {
    let url = format!("{}/api/v3/depth", conn.config.rest_base_url);
    let response = conn
        .http
        .get(&url)
        .query(&[("symbol", symbol), ("limit", &limit.to_string())])
        .send()
        .await?
        .error_for_status()?
        .json::<DepthResponse>()
        .await
        .context("failed to parse depth response")?;

    Ok(DepthSnapshot {
        bids: parse_levels(&response.bids)?,
        asks: parse_levels(&response.asks)?,
    })
}

pub async fn fetch_exchange_filters(conn: &Connection, symbol: &str) -> Result<SymbolRules> {
    let url = format!("{}/api/v3/exchangeInfo", conn.config.rest_base_url);
    let response = conn
        .http
        .get(&url)
        .query(&[("symbol", symbol)])
        .send()
        .await?
        .error_for_status()?
        .json::<ExchangeInfoResponse>()
        .await
        .context("failed to parse exchange info response")?;

    let info = response
        .symbols
        .into_iter()
        .find(|s| s.symbol == symbol)
        .ok_or_else(|| anyhow!("symbol not found in exchange info: {symbol}"))?;

    let mut rules = SymbolRules {
        step_size: Decimal::new(1, 3),
        tick_size: Decimal::new(1, 2),
        min_notional: Decimal::TEN,
        price_precision: info.quote_precision,
        qty_precision: info.base_asset_precision,
    };

    for filter in info.filters {
        match filter.filter_type.as_str() {
            "LOT_SIZE" => {
                if let Some(step) = filter.data.get("stepSize").and_then(|v| v.as_str()) {
                    rules.step_size = parse_decimal(step, "stepSize")?;
                }
            }
            "PRICE_FILTER" => {
                if let Some(tick) = filter.data.get("tickSize").and_then(|v| v.as_str()) {
                    rules.tick_size = parse_decimal(tick, "tickSize")?;
                }
            }
            "NOTIONAL" | "MIN_NOTIONAL" => {
                if let Some(min) = filter
                    .data
                    .get("minNotional")
                    .and_then(|v| v.as_str())
                {
                    rules.min_notional = parse_decimal(min, "minNotional")?;
                }
            }
            _ => {}
        }
    }
    Ok(rules)
}

pub async fn fetch_ticker_stats(
    conn: &Connection,
    symbol: &str,
    window: TickerWindow,
) -> Result<TickerStats> {
    let url = format!("{}/api/v3/ticker", conn.config.rest_base_url);
    let response = conn
        .http
        .get(&url)
        .query(&[("symbol", symbol), ("windowSize", window.as_str())])
        .send()
        .await?
        .error_for_status()?
        .json::<TickerResponse>()
        .await
        .context("failed to parse ticker response")?;

    Ok(TickerStats {
        window,
        volume: parse_decimal(&response.volume, "ticker volume")?,
        quote_volume: parse_decimal(&response.quote_volume, "ticker quote volume")?,
        price_change_pct: parse_decimal(&response.price_change_percent, "ticker change")?,
        trade_count: response.count,
        last_price: Px(parse_decimal(&response.last_price, "ticker last price")?),
    })
}

pub async fn create_listen_key(conn: &Connection) -> Result<String> {
    ensure_credentials(conn)?;
    let url = format!("{}/api/v3/userDataStream", conn.config.rest_base_url);
    let response = conn
        .http
        .post(&url)
        .header("X-MBX-APIKEY", &conn.config.api_key)
        .send()
        .await?
        .error_for_status()?
        .json::<ListenKeyResponse>()
        .await
        .context("failed to parse listen key response")?;
    Ok(response.listen_key)
}

pub async fn keepalive_listen_key(conn: &Connection, key: &str) -> Result<()> {
    let url = format!("{}/api/v3/userDataStream", conn.config.rest_base_url);
    conn.http
        .put(&url)
        .query(&[("listenKey", key)])
        .header("X-MBX-APIKEY", &conn.config.api_key)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

// ============================================================================
// Signing
// ============================================================================

async fn signed_get(
    conn: &Connection,
    path: &str,
    params: Vec<(String, String)>,
) -> Result<reqwest::Response> {
    let query = sign_params(conn, params)?;
    let url = format!("{}{}?{}", conn.config.rest_base_url, path, query);
    let response = conn
        .http
        .get(&url)
        .header("X-MBX-APIKEY", &conn.config.api_key)
        .send()
        .await?
        .error_for_status()?;
    Ok(response)
}

async fn signed_post(
    conn: &Connection,
    path: &str,
    params: Vec<(String, String)>,
) -> Result<reqwest::Response> {
    let body = sign_params(conn, params)?;
    let url = format!("{}{}", conn.config.rest_base_url, path);
    let response = conn
        .http
        .post(&url)
        .header("X-MBX-APIKEY", &conn.config.api_key)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(response)
}

async fn signed_delete(
    conn: &Connection,
    path: &str,
    params: Vec<(String, String)>,
) -> Result<reqwest::Response> {
    let query = sign_params(conn, params)?;
    let url = format!("{}{}?{}", conn.config.rest_base_url, path, query);
    let response = conn
        .http
        .delete(&url)
        .header("X-MBX-APIKEY", &conn.config.api_key)
        .send()
        .await?
        .error_for_status()?;
    Ok(response)
}

fn sign_params(conn: &Connection, mut params: Vec<(String, String)>) -> Result<String> {
    params.push(("timestamp".into(), Utc::now().timestamp_millis().to_string()));
    let query = serde_urlencoded::to_string(&params)?;
    let mut mac = HmacSha256::new_from_slice(conn.config.api_secret.as_bytes())
        .map_err(|err| anyhow!("failed to init signer: {err}"))?;
    mac.update(query.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{query}&signature={signature}"))
}

pub(crate) fn ensure_credentials(conn: &Connection) -> Result<()> {
    if conn.config.api_key.is_empty() || conn.config.api_secret.is_empty() {
        Err(anyhow!("API key/secret required"))
    } else {
        Ok(())
    }
}

// ============================================================================
// Parse helpers
// ============================================================================

fn parse_decimal(raw: &str, what: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("failed to parse {what}: {raw:?}"))
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<DepthLevel>> {
    raw.iter()
        .map(|level| {
            Ok(DepthLevel {
                price: Px(parse_decimal(&level[0], "depth price")?),
                qty: Qty(parse_decimal(&level[1], "depth quantity")?),
            })
        })
        .collect()
}

fn parse_side(raw: &str) -> Result<Side> {
    match raw {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(anyhow!("unknown order side: {other}")),
    }
}

pub(crate) fn parse_order_status(raw: &str) -> OrderStatus {
    match raw {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Expired,
    }
}

fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decimal_formatting_strips_trailing_zeros() {
        assert_eq!(format_decimal(dec!(99.980000)), "99.98");
        assert_eq!(format_decimal(dec!(0.00120)), "0.0012");
        assert_eq!(format_decimal(dec!(10)), "10");
    }

    #[test]
    fn order_status_mapping() {
        assert_eq!(parse_order_status("NEW"), OrderStatus::New);
        assert_eq!(parse_order_status("FILLED"), OrderStatus::Filled);
        assert_eq!(parse_order_status("CANCELED"), OrderStatus::Canceled);
        assert_eq!(parse_order_status("EXPIRED"), OrderStatus::Expired);
    }

    #[test]
    fn depth_levels_parse_decimals() {
        let raw = vec![
            ["100.01".to_string(), "1.5".to_string()],
            ["100.00".to_string(), "2".to_string()],
        ];
        let levels = parse_levels(&raw).unwrap();
        assert_eq!(levels[0].price, Px(dec!(100.01)));
        assert_eq!(levels[1].qty, Qty(dec!(2)));
    }
}
