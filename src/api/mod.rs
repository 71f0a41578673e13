//! API module - Axum HTTP server and routes
//!
//! Operator controls for the trading controller, signal injection, and the
//! streaming price relay.

mod handlers;
mod websocket;

use crate::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ==========================================
        // Health & Market Data
        // ==========================================
        .route("/api/health", get(handlers::health_check))
        .route("/api/coins", get(handlers::get_coins))
        .route("/api/analyze", post(handlers::analyze))

        // ==========================================
        // Trading Controller
        // ==========================================
        .route("/api/trading/status", get(handlers::get_trading_status))
        .route(
            "/api/trading/config",
            get(handlers::get_trading_config).put(handlers::update_trading_config),
        )
        .route("/api/trading/start", post(handlers::start_trading))
        .route("/api/trading/stop", post(handlers::stop_trading))
        .route("/api/trading/emergency-stop", post(handlers::emergency_stop))
        .route("/api/trading/position", get(handlers::get_position))

        // ==========================================
        // Sentiment & Event Signals
        // ==========================================
        .route("/api/signals/:symbol", get(handlers::get_signals))
        .route(
            "/api/signals/:symbol/sentiment",
            put(handlers::set_sentiment).delete(handlers::clear_sentiment),
        )
        .route(
            "/api/signals/:symbol/events",
            post(handlers::add_event).delete(handlers::clear_events),
        )

        // ==========================================
        // Strategy Settings
        // ==========================================
        .route("/api/strategy/settings", get(handlers::get_strategy_settings))
        .route("/api/strategy/weights", put(handlers::update_weights))
        .route("/api/strategy/order-book-source", put(handlers::set_order_book_source))
        .route("/api/strategy/default-sentiment", put(handlers::set_default_sentiment))

        // ==========================================
        // Streaming Feed
        // ==========================================
        .route("/api/prices/live", get(handlers::get_live_prices))
        .route("/api/feed/subscribe", post(handlers::feed_subscribe))
        .route("/api/feed/unsubscribe", post(handlers::feed_unsubscribe))
        .route("/api/feed/connect", post(handlers::feed_connect))
        .route("/api/feed/disconnect", post(handlers::feed_disconnect))

        // ==========================================
        // WebSocket for real-time updates
        // ==========================================
        .route("/ws", get(websocket::ws_handler))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
