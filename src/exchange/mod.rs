//! Exchange module - market data and account access
//!
//! The core only talks to the traits here. [`BithumbClient`] is the REST
//! implementation used in production.

mod client;

pub use client::{BithumbClient, DEFAULT_REST_URL};

use crate::auth::AuthError;
use crate::types::{Candle, CandleInterval, Order, OrderBook, Ticker};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Envelope status the exchange uses for success
pub const STATUS_OK: &str = "0000";

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Exchange error {status}: {message}")]
    ApiError { status: String, message: String },
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

/// Available balance for one currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub available: f64,
    pub available_krw: f64,
}

/// Public market data
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;
    async fn get_all_tickers(&self) -> Result<Vec<Ticker>, ExchangeError>;
    async fn get_order_book(&self, symbol: &str) -> Result<OrderBook, ExchangeError>;
    /// Most recent `count` candles, oldest first
    async fn get_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// Signed account endpoints
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn get_balance(&self, currency: &str) -> Result<Balance, ExchangeError>;
    /// Returns the exchange order id
    async fn place_order(&self, order: &Order) -> Result<String, ExchangeError>;
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError>;
}

/// Splits a `{status, data, message}` response into its payload or an error.
pub fn unwrap_envelope(body: Value) -> Result<Value, ExchangeError> {
    let status = body
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| ExchangeError::ParseError("missing status".to_string()))?;

    if status != STATUS_OK {
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(ExchangeError::ApiError {
            status: status.to_string(),
            message,
        });
    }

    Ok(body)
}

/// Reads a number the exchange may send either as a string or a JSON number.
pub(crate) fn num(value: &Value, key: &str) -> Result<f64, ExchangeError> {
    let field = value
        .get(key)
        .ok_or_else(|| ExchangeError::ParseError(format!("missing field {}", key)))?;
    as_f64(field).ok_or_else(|| ExchangeError::ParseError(format!("field {} is not numeric", key)))
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
