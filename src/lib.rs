//! Bithumb auto-trading engine
//!
//! Indicator scoring, a single-position trading controller, and a streaming
//! market feed, served over an axum HTTP/WebSocket API.

pub mod api;
pub mod auth;
pub mod exchange;
pub mod executor;
pub mod indicators;
pub mod market_feed;
pub mod settings;
pub mod signals;
pub mod strategy;
pub mod trading;
pub mod trading_config;
pub mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub market: Arc<dyn exchange::MarketDataSource>,
    pub analyzer: Arc<strategy::MarketAnalyzer>,
    pub signals: Arc<signals::SignalBoard>,
    pub controller: Arc<trading::TradingController>,
    pub feed: Arc<market_feed::StreamingMarketFeed>,
}
