//! In-memory fakes for unit tests

use crate::exchange::{AccountApi, Balance, ExchangeError, MarketDataSource};
use crate::executor::{ExecutionError, ExecutionStats, OrderGateway};
use crate::signals::SentimentSnapshot;
use crate::strategy::analyzer::{AnalysisCause, AnalysisMetadata};
use crate::strategy::{AnalysisError, IndicatorScores, MarketAnalysis, Signal, SymbolAnalyzer, VolatilitySnapshot};
use crate::trading_config::TradingMode;
use crate::types::{Candle, CandleInterval, Order, OrderBook, OrderFill, Ticker};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn ticker(symbol: &str, price: f64, volume_krw: f64) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        price,
        change_24h: 0.0,
        volume_24h: volume_krw / price,
        volume_krw,
        high_24h: price,
        low_24h: price,
    }
}

/// One five-minute candle per close, oldest first
pub fn candles_from_closes(closes: &[f64], volume: f64) -> Vec<Candle> {
    let start = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            timestamp: start + ChronoDuration::minutes(5 * i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        })
        .collect()
}

// ==========================================
// Market data
// ==========================================

#[derive(Default)]
pub struct MockMarket {
    tickers: Mutex<Vec<Ticker>>,
    candles: Mutex<HashMap<String, Vec<Candle>>>,
    books: Mutex<HashMap<String, OrderBook>>,
    delay: Mutex<Option<Duration>>,
    fail_all_tickers: AtomicBool,
    ticker_calls: AtomicUsize,
    tickers_in_flight: AtomicUsize,
    max_tickers_in_flight: AtomicUsize,
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tickers(&self, tickers: Vec<Ticker>) {
        *self.tickers.lock() = tickers;
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles.lock().insert(symbol.to_string(), candles);
    }

    pub fn set_order_book(&self, symbol: &str, book: OrderBook) {
        self.books.lock().insert(symbol.to_string(), book);
    }

    /// Delay applied to `get_all_tickers`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_fail_all_tickers(&self, fail: bool) {
        self.fail_all_tickers.store(fail, Ordering::SeqCst);
    }

    pub fn ticker_calls(&self) -> usize {
        self.ticker_calls.load(Ordering::SeqCst)
    }

    /// Most `get_all_tickers` calls ever observed running at once
    pub fn max_concurrent_ticker_calls(&self) -> usize {
        self.max_tickers_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataSource for MockMarket {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let found = self.tickers.lock().iter().find(|t| t.symbol == symbol).cloned();
        found.ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn get_all_tickers(&self) -> Result<Vec<Ticker>, ExchangeError> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.tickers_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_tickers_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.tickers_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_all_tickers.load(Ordering::SeqCst) {
            return Err(ExchangeError::ApiError {
                status: "5500".to_string(),
                message: "mock outage".to_string(),
            });
        }
        Ok(self.tickers.lock().clone())
    }

    async fn get_order_book(&self, symbol: &str) -> Result<OrderBook, ExchangeError> {
        let book = self.books.lock().get(symbol).cloned();
        book.ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn get_candles(&self, symbol: &str, _interval: CandleInterval, count: usize) -> Result<Vec<Candle>, ExchangeError> {
        let candles = self.candles.lock().get(symbol).cloned();
        let candles = candles.ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;
        let skip = candles.len().saturating_sub(count);
        Ok(candles[skip..].to_vec())
    }
}

// ==========================================
// Account
// ==========================================

pub struct MockAccount {
    balance_krw: f64,
    reject: Mutex<Option<String>>,
    placed: Mutex<Vec<Order>>,
}

impl MockAccount {
    pub fn new(balance_krw: f64) -> Self {
        Self {
            balance_krw,
            reject: Mutex::new(None),
            placed: Mutex::new(Vec::new()),
        }
    }

    pub fn reject_orders(&self, message: &str) {
        *self.reject.lock() = Some(message.to_string());
    }

    pub fn placed(&self) -> Vec<Order> {
        self.placed.lock().clone()
    }
}

#[async_trait]
impl AccountApi for MockAccount {
    async fn get_balance(&self, currency: &str) -> Result<Balance, ExchangeError> {
        Ok(Balance {
            currency: currency.to_string(),
            available: self.balance_krw,
            available_krw: self.balance_krw,
        })
    }

    async fn place_order(&self, order: &Order) -> Result<String, ExchangeError> {
        let reject = self.reject.lock().clone();
        if let Some(message) = reject {
            return Err(ExchangeError::ApiError {
                status: "5600".to_string(),
                message,
            });
        }
        let mut placed = self.placed.lock();
        placed.push(order.clone());
        Ok(format!("live-{}", placed.len()))
    }

    async fn cancel_order(&self, _order_id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        Ok(())
    }
}

// ==========================================
// Gateway
// ==========================================

/// Records every order attempt, fills or rejects on demand
pub struct MockGateway {
    balance_krw: f64,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    orders: Mutex<Vec<Order>>,
    failed: AtomicUsize,
}

impl MockGateway {
    pub fn new(balance_krw: f64) -> Self {
        Self {
            balance_krw,
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
            orders: Mutex::new(Vec::new()),
            failed: AtomicUsize::new(0),
        }
    }

    /// Holds every order this long before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl OrderGateway for MockGateway {
    fn mode(&self) -> TradingMode {
        TradingMode::Simulation
    }

    async fn available_krw(&self) -> Result<f64, ExecutionError> {
        Ok(self.balance_krw)
    }

    async fn place_order(&self, order: &Order) -> Result<OrderFill, ExecutionError> {
        let id = {
            let mut orders = self.orders.lock();
            orders.push(order.clone());
            orders.len()
        };
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(ExecutionError::OrderRejected("mock rejection".to_string()));
        }
        Ok(OrderFill {
            order_id: format!("mock-{}", id),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price: order.price,
            filled_at: Utc::now(),
            simulated: true,
        })
    }

    fn stats(&self) -> ExecutionStats {
        let sent = self.orders.lock().len() as u64;
        let failed = self.failed.load(Ordering::SeqCst) as u64;
        ExecutionStats {
            orders_sent: sent,
            orders_filled: sent - failed,
            orders_failed: failed,
        }
    }
}

// ==========================================
// Analyzer
// ==========================================

/// Canned analyses keyed by symbol; unknown symbols fail
#[derive(Default)]
pub struct MockAnalyzer {
    canned: Mutex<HashMap<String, (f64, Signal, f64)>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, score: f64, signal: Signal, sentiment_confidence: f64) {
        self.canned
            .lock()
            .insert(symbol.to_string(), (score, signal, sentiment_confidence));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().get(symbol).copied().unwrap_or(0)
    }

    pub fn was_called(&self, symbol: &str) -> bool {
        self.calls(symbol) > 0
    }
}

#[async_trait]
impl SymbolAnalyzer for MockAnalyzer {
    async fn analyze_market(&self, symbol: &str) -> Result<MarketAnalysis, AnalysisError> {
        *self.calls.lock().entry(symbol.to_string()).or_insert(0) += 1;

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let canned = self.canned.lock().get(symbol).copied();
        let Some((score, signal, confidence)) = canned else {
            return Err(AnalysisError::Failed {
                symbol: symbol.to_string(),
                source: AnalysisCause::Exchange(ExchangeError::UnknownSymbol(symbol.to_string())),
            });
        };

        Ok(MarketAnalysis {
            symbol: symbol.to_string(),
            score,
            signal,
            indicators: IndicatorScores {
                rsi: score,
                macd: score,
                bollinger: score,
                volume: score,
                volatility: score,
                sentiment: score,
                event: score,
            },
            metadata: AnalysisMetadata {
                volatility: VolatilitySnapshot {
                    atr: 0.0,
                    range_ratio: 0.0,
                    order_book_imbalance: 0.5,
                    volume_spike: 1.0,
                },
                sentiment: SentimentSnapshot {
                    aggregate_score: 0.0,
                    confidence,
                    sources: Vec::new(),
                },
                events: Vec::new(),
            },
            analyzed_at: Utc::now(),
        })
    }
}
