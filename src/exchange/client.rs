//! Bithumb REST client
//!
//! Public market data under `/public`, signed account endpoints under
//! `/info` and `/trade`. All symbols are KRW markets.

use super::{as_f64, num, unwrap_envelope, AccountApi, Balance, ExchangeError, MarketDataSource};
use crate::auth::BithumbAuth;
use crate::types::{Candle, CandleInterval, Order, OrderBook, OrderBookLevel, OrderType, Ticker};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_REST_URL: &str = "https://api.bithumb.com";
const PAYMENT_CURRENCY: &str = "KRW";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BithumbClient {
    client: Client,
    base_url: String,
    auth: BithumbAuth,
}

impl BithumbClient {
    pub fn new(base_url: impl Into<String>, auth: BithumbAuth) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.auth.is_configured()
    }

    pub fn api_key_redacted(&self) -> String {
        self.auth.get_api_key_redacted()
    }

    async fn get_public(&self, path: &str) -> Result<Value, ExchangeError> {
        let url = format!("{}/public{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        let body: Value = response.json().await?;
        let body = unwrap_envelope(body)?;
        body.get("data")
            .cloned()
            .ok_or_else(|| ExchangeError::ParseError(format!("no data in response for {}", path)))
    }

    async fn post_private(
        &self,
        endpoint: &str,
        params: BTreeMap<String, String>,
    ) -> Result<Value, ExchangeError> {
        let signed = self.auth.sign_request(endpoint, params)?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .header("Api-Key", &signed.api_key)
            .header("Api-Sign", &signed.signature)
            .header("Api-Nonce", signed.nonce.to_string())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(signed.body)
            .send()
            .await?;

        let body: Value = response.json().await?;
        unwrap_envelope(body)
    }
}

fn market(symbol: &str) -> String {
    format!("{}_{}", symbol.to_uppercase(), PAYMENT_CURRENCY)
}

#[async_trait]
impl MarketDataSource for BithumbClient {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let data = self.get_public(&format!("/ticker/{}", market(symbol))).await?;
        parse_ticker(&symbol.to_uppercase(), &data)
    }

    async fn get_all_tickers(&self) -> Result<Vec<Ticker>, ExchangeError> {
        let data = self.get_public(&format!("/ticker/ALL_{}", PAYMENT_CURRENCY)).await?;
        parse_all_tickers(&data)
    }

    async fn get_order_book(&self, symbol: &str) -> Result<OrderBook, ExchangeError> {
        let data = self.get_public(&format!("/orderbook/{}", market(symbol))).await?;
        parse_order_book(&data)
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let data = self
            .get_public(&format!("/candlestick/{}/{}", market(symbol), interval))
            .await?;
        parse_candles(&data, count)
    }
}

#[async_trait]
impl AccountApi for BithumbClient {
    async fn get_balance(&self, currency: &str) -> Result<Balance, ExchangeError> {
        let mut params = BTreeMap::new();
        params.insert("currency".to_string(), currency.to_uppercase());
        params.insert("payment_currency".to_string(), PAYMENT_CURRENCY.to_string());

        let body = self.post_private("/info/balance", params).await?;
        let data = body
            .get("data")
            .ok_or_else(|| ExchangeError::ParseError("no data in balance response".to_string()))?;

        let available_krw = num(data, "available_krw")?;
        let available_key = format!("available_{}", currency.to_lowercase());
        let available = data.get(&available_key).and_then(as_f64).unwrap_or(available_krw);

        Ok(Balance {
            currency: currency.to_uppercase(),
            available,
            available_krw,
        })
    }

    async fn place_order(&self, order: &Order) -> Result<String, ExchangeError> {
        let mut params = BTreeMap::new();
        params.insert("order_currency".to_string(), order.symbol.to_uppercase());
        params.insert("payment_currency".to_string(), PAYMENT_CURRENCY.to_string());
        params.insert("type".to_string(), order.side.to_string());
        params.insert("units".to_string(), order.quantity.to_string());
        if order.order_type == OrderType::Limit {
            if let Some(price) = order.price {
                params.insert("price".to_string(), price.to_string());
            }
        }

        info!(
            "Placing {} {:?} order: {} x {} ({})",
            order.side, order.order_type, order.symbol, order.quantity, order.reason
        );

        let body = self.post_private("/trade/place", params).await?;
        let order_id = body
            .get("order_id")
            .or_else(|| body.get("data").and_then(|d| d.get("order_id")))
            .and_then(|id| id.as_str())
            .map(String::from);

        match order_id {
            Some(id) => Ok(id),
            None => {
                warn!("Order accepted without order_id: {}", body);
                Err(ExchangeError::ParseError("no order_id in response".to_string()))
            }
        }
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let mut params = BTreeMap::new();
        params.insert("order_id".to_string(), order_id.to_string());
        params.insert("order_currency".to_string(), symbol.to_uppercase());
        params.insert("payment_currency".to_string(), PAYMENT_CURRENCY.to_string());

        self.post_private("/trade/cancel", params).await?;
        info!("Cancelled order {} on {}", order_id, symbol);
        Ok(())
    }
}

// ==========================================
// Response parsing
// ==========================================

pub(crate) fn parse_ticker(symbol: &str, data: &Value) -> Result<Ticker, ExchangeError> {
    let price = num(data, "closing_price")?;
    let open = num(data, "opening_price")?;
    let change_24h = if open > 0.0 { (price - open) / open * 100.0 } else { 0.0 };

    Ok(Ticker {
        symbol: symbol.to_string(),
        price,
        change_24h,
        volume_24h: num(data, "units_traded_24H")?,
        volume_krw: num(data, "acc_trade_value_24H")?,
        high_24h: num(data, "max_price")?,
        low_24h: num(data, "min_price")?,
    })
}

/// The ALL_KRW payload maps each symbol to its ticker plus a `date` key.
pub(crate) fn parse_all_tickers(data: &Value) -> Result<Vec<Ticker>, ExchangeError> {
    let map = data
        .as_object()
        .ok_or_else(|| ExchangeError::ParseError("ticker payload is not an object".to_string()))?;

    let mut tickers = Vec::with_capacity(map.len());
    for (symbol, value) in map {
        if symbol == "date" {
            continue;
        }
        match parse_ticker(symbol, value) {
            Ok(ticker) => tickers.push(ticker),
            Err(e) => debug!("Skipping ticker {}: {}", symbol, e),
        }
    }
    Ok(tickers)
}

pub(crate) fn parse_order_book(data: &Value) -> Result<OrderBook, ExchangeError> {
    let side = |key: &str| -> Result<Vec<OrderBookLevel>, ExchangeError> {
        data.get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| ExchangeError::ParseError(format!("order book missing {}", key)))?
            .iter()
            .map(|level| -> Result<OrderBookLevel, ExchangeError> {
                Ok(OrderBookLevel {
                    price: num(level, "price")?,
                    quantity: num(level, "quantity")?,
                })
            })
            .collect()
    };

    Ok(OrderBook {
        bids: side("bids")?,
        asks: side("asks")?,
    })
}

/// Rows are `[ts_ms, open, close, high, low, volume]`.
pub(crate) fn parse_candles(data: &Value, count: usize) -> Result<Vec<Candle>, ExchangeError> {
    let rows = data
        .as_array()
        .ok_or_else(|| ExchangeError::ParseError("candle payload is not an array".to_string()))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let cols = row
            .as_array()
            .filter(|c| c.len() >= 6)
            .ok_or_else(|| ExchangeError::ParseError("candle row has fewer than 6 columns".to_string()))?;

        let field = |i: usize| {
            as_f64(&cols[i]).ok_or_else(|| ExchangeError::ParseError(format!("candle column {} is not numeric", i)))
        };

        let ts = field(0)? as i64;
        let timestamp = Utc
            .timestamp_millis_opt(ts)
            .single()
            .ok_or_else(|| ExchangeError::ParseError(format!("bad candle timestamp {}", ts)))?;

        candles.push(Candle {
            timestamp,
            open: field(1)?,
            close: field(2)?,
            high: field(3)?,
            low: field(4)?,
            volume: field(5)?,
        });
    }

    candles.sort_by_key(|c| c.timestamp);
    let skip = candles.len().saturating_sub(count);
    Ok(candles.split_off(skip))
}
