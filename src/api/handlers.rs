//! API request handlers

use crate::signals::{EventSignal, SentimentSnapshot, SignalProvider};
use crate::strategy::{OrderBookSource, SymbolAnalyzer, Weights};
use crate::trading_config::TradingConfigUpdate;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

// ==========================================
// Response Helpers
// ==========================================

pub fn error_response(error: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "success": false,
            "error": error
        })),
    )
        .into_response()
}

pub fn bad_request(error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "success": false,
            "error": error
        })),
    )
        .into_response()
}

fn ok<T: serde::Serialize>(data: T) -> Response {
    Json(serde_json::json!({
        "success": true,
        "data": data
    }))
    .into_response()
}

// ==========================================
// Request Types
// ==========================================

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedSubscribeRequest {
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderBookSourceRequest {
    pub source: OrderBookSource,
}

fn check_sentiment(snapshot: &SentimentSnapshot) -> Result<(), &'static str> {
    if !(-1.0..=1.0).contains(&snapshot.aggregate_score) {
        return Err("aggregateScore must be within [-1, 1]");
    }
    if !(0.0..=1.0).contains(&snapshot.confidence) {
        return Err("confidence must be within [0, 1]");
    }
    Ok(())
}

fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

// ==========================================
// Health & Market Data
// ==========================================

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "autotrade_engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn get_coins(State(state): State<Arc<AppState>>) -> Response {
    match state.market.get_all_tickers().await {
        Ok(mut tickers) => {
            tickers.sort_by(|a, b| b.volume_krw.total_cmp(&a.volume_krw));
            ok(tickers)
        }
        Err(e) => error_response(&e.to_string()),
    }
}

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Response {
    let Some(symbol) = normalize_symbol(&req.symbol) else {
        return bad_request("symbol is required");
    };

    match state.analyzer.analyze_market(&symbol).await {
        Ok(analysis) => ok(analysis),
        Err(e) => error_response(&e.to_string()),
    }
}

// ==========================================
// Trading Controller
// ==========================================

pub async fn get_trading_status(State(state): State<Arc<AppState>>) -> Response {
    ok(state.controller.status())
}

pub async fn get_trading_config(State(state): State<Arc<AppState>>) -> Response {
    ok(state.controller.get_config())
}

pub async fn update_trading_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TradingConfigUpdate>,
) -> Response {
    match state.controller.update_config(update) {
        Ok(config) => ok(config),
        Err(e) => {
            warn!("Rejected config update: {}", e);
            bad_request(&e.to_string())
        }
    }
}

pub async fn start_trading(State(state): State<Arc<AppState>>) -> Response {
    let started = state.controller.start();
    ok(serde_json::json!({ "started": started, "running": state.controller.is_running() }))
}

pub async fn stop_trading(State(state): State<Arc<AppState>>) -> Response {
    let stopped = state.controller.stop();
    ok(serde_json::json!({ "stopped": stopped, "running": state.controller.is_running() }))
}

pub async fn emergency_stop(State(state): State<Arc<AppState>>) -> Response {
    let closed = state.controller.emergency_stop().await;
    ok(serde_json::json!({
        "positionClosed": closed,
        "position": state.controller.get_current_position()
    }))
}

pub async fn get_position(State(state): State<Arc<AppState>>) -> Response {
    ok(state.controller.get_current_position())
}

// ==========================================
// Sentiment & Event Signals
// ==========================================

pub async fn get_signals(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let Some(symbol) = normalize_symbol(&symbol) else {
        return bad_request("symbol is required");
    };
    let sentiment = state.signals.sentiment(&symbol).await;
    let events = state.signals.events(&symbol).await;
    ok(serde_json::json!({ "symbol": symbol, "sentiment": sentiment, "events": events }))
}

pub async fn set_sentiment(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Json(snapshot): Json<SentimentSnapshot>,
) -> Response {
    let Some(symbol) = normalize_symbol(&symbol) else {
        return bad_request("symbol is required");
    };
    if let Err(e) = check_sentiment(&snapshot) {
        return bad_request(e);
    }

    info!(
        "Sentiment for {} set to {:.2} (confidence {:.2})",
        symbol, snapshot.aggregate_score, snapshot.confidence
    );
    state.signals.set_sentiment(&symbol, snapshot.clone());
    ok(snapshot)
}

pub async fn clear_sentiment(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let Some(symbol) = normalize_symbol(&symbol) else {
        return bad_request("symbol is required");
    };
    state.signals.clear_sentiment(&symbol);
    ok(state.signals.sentiment(&symbol).await)
}

pub async fn add_event(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Json(mut event): Json<EventSignal>,
) -> Response {
    let Some(symbol) = normalize_symbol(&symbol) else {
        return bad_request("symbol is required");
    };
    if !(0.0..=1.0).contains(&event.confidence) {
        return bad_request("confidence must be within [0, 1]");
    }
    if event.id.is_empty() {
        event.id = Uuid::new_v4().to_string();
    }

    info!(
        "Event {} for {}: {:?} {:?} {:?}",
        event.id, symbol, event.kind, event.severity, event.impact
    );
    state.signals.push_event(&symbol, event.clone());
    ok(event)
}

pub async fn clear_events(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let Some(symbol) = normalize_symbol(&symbol) else {
        return bad_request("symbol is required");
    };
    state.signals.clear_events(&symbol);
    ok(serde_json::json!({ "symbol": symbol, "events": [] }))
}

// ==========================================
// Strategy Settings
// ==========================================

fn strategy_settings(state: &AppState) -> Response {
    ok(serde_json::json!({
        "analyzer": state.analyzer.settings(),
        "defaultSentiment": state.signals.default_sentiment()
    }))
}

pub async fn get_strategy_settings(State(state): State<Arc<AppState>>) -> Response {
    strategy_settings(&state)
}

pub async fn update_weights(
    State(state): State<Arc<AppState>>,
    Json(weights): Json<Weights>,
) -> Response {
    if !weights.is_valid() {
        return bad_request("weights must be finite, non-negative and not all zero");
    }
    info!("Score weights updated: {:?}", weights);
    state.analyzer.set_weights(weights);
    strategy_settings(&state)
}

pub async fn set_order_book_source(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderBookSourceRequest>,
) -> Response {
    info!("Order book source set to {:?}", req.source);
    state.analyzer.set_order_book_source(req.source);
    strategy_settings(&state)
}

pub async fn set_default_sentiment(
    State(state): State<Arc<AppState>>,
    Json(snapshot): Json<SentimentSnapshot>,
) -> Response {
    if let Err(e) = check_sentiment(&snapshot) {
        return bad_request(e);
    }
    info!(
        "Default sentiment set to {:.2} (confidence {:.2})",
        snapshot.aggregate_score, snapshot.confidence
    );
    state.signals.set_default_sentiment(snapshot);
    strategy_settings(&state)
}

// ==========================================
// Streaming Feed
// ==========================================

pub async fn get_live_prices(State(state): State<Arc<AppState>>) -> Response {
    ok(serde_json::json!({
        "connected": state.feed.is_connected(),
        "symbols": state.feed.subscribed_symbols(),
        "prices": state.feed.latest_tickers()
    }))
}

pub async fn feed_subscribe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedSubscribeRequest>,
) -> Response {
    if req.symbols.iter().all(|s| s.trim().is_empty()) {
        return bad_request("symbols must not be empty");
    }
    state.feed.subscribe(req.symbols);
    ok(serde_json::json!({
        "symbols": state.feed.subscribed_symbols(),
        "connected": state.feed.is_connected()
    }))
}

pub async fn feed_unsubscribe(State(state): State<Arc<AppState>>) -> Response {
    state.feed.unsubscribe();
    ok(serde_json::json!({ "symbols": [] }))
}

pub async fn feed_connect(State(state): State<Arc<AppState>>) -> Response {
    let started = state.feed.connect();
    ok(serde_json::json!({ "started": started }))
}

pub async fn feed_disconnect(State(state): State<Arc<AppState>>) -> Response {
    state.feed.disconnect();
    ok(serde_json::json!({ "connected": false }))
}
