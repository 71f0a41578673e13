//! Type definitions shared by the analysis pipeline, controller and exchange client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle interval accepted by the exchange chart endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::OneHour => "1h",
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 24h ticker snapshot for one KRW market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub price: f64,
    /// Percent change against the 24h opening price
    pub change_24h: f64,
    pub volume_24h: f64,
    /// Quote-currency (KRW) traded value over 24h
    pub volume_krw: f64,
    pub high_24h: f64,
    pub low_24h: f64,
}

/// Order book level (price + quantity)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Order book, best levels first
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

impl OrderBook {
    /// One bid 0.1% under and one ask 0.1% over `price`, unit quantity each.
    pub fn synthetic(price: f64) -> Self {
        Self {
            bids: vec![OrderBookLevel { price: price * 0.999, quantity: 1.0 }],
            asks: vec![OrderBookLevel { price: price * 1.001, quantity: 1.0 }],
        }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn bid_volume(&self) -> f64 {
        self.bids.iter().map(|l| l.quantity).sum()
    }

    pub fn ask_volume(&self) -> f64 {
        self.asks.iter().map(|l| l.quantity).sum()
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order request handed to an execution gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    /// Free-text audit trail, e.g. "take-profit"
    pub reason: String,
}

impl Order {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reason: reason.into(),
        }
    }
}

/// Confirmation returned once an order is accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub filled_at: DateTime<Utc>,
    pub simulated: bool,
}

/// The single open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub current_price: f64,
    pub profit_loss: f64,
    pub profit_loss_pct: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn open(symbol: impl Into<String>, entry_price: f64, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            entry_price,
            quantity,
            current_price: entry_price,
            profit_loss: 0.0,
            profit_loss_pct: 0.0,
            opened_at: Utc::now(),
        }
    }

    /// Re-mark the position at `price` and recompute P&L.
    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.profit_loss = (price - self.entry_price) * self.quantity;
        self.profit_loss_pct = if self.entry_price > 0.0 {
            (price - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_order_book() {
        let book = OrderBook::synthetic(1000.0);
        assert!((book.best_bid().unwrap() - 999.0).abs() < 1e-9);
        assert!((book.best_ask().unwrap() - 1001.0).abs() < 1e-9);
        assert_eq!(book.bid_volume(), 1.0);
        assert_eq!(book.ask_volume(), 1.0);
    }

    #[test]
    fn test_position_mark() {
        let mut position = Position::open("BTC", 100.0, 2.0);
        position.mark(110.0);
        assert!((position.profit_loss - 20.0).abs() < 1e-9);
        assert!((position.profit_loss_pct - 10.0).abs() < 1e-9);

        position.mark(95.0);
        assert!((position.profit_loss + 10.0).abs() < 1e-9);
        assert!((position.profit_loss_pct + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_interval_serializes_as_exchange_code() {
        let json = serde_json::to_string(&CandleInterval::FiveMinutes).unwrap();
        assert_eq!(json, "\"5m\"");
        assert_eq!(CandleInterval::OneHour.to_string(), "1h");
    }
}
