//! Bithumb auto-trading server

use autotrade_engine::api::create_router;
use autotrade_engine::auth::BithumbAuth;
use autotrade_engine::exchange::{AccountApi, BithumbClient};
use autotrade_engine::executor::{GatewayRouter, LiveGateway, SimulationGateway};
use autotrade_engine::market_feed::StreamingMarketFeed;
use autotrade_engine::settings::AppSettings;
use autotrade_engine::signals::SignalBoard;
use autotrade_engine::strategy::{AnalyzerSettings, MarketAnalyzer};
use autotrade_engine::trading::TradingController;
use autotrade_engine::trading_config::{ConfigManager, TradingMode};
use autotrade_engine::AppState;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Bithumb auto-trading server v{}", env!("CARGO_PKG_VERSION"));

    let settings = AppSettings::from_env();

    // Exchange client
    let auth = match (&settings.api_key, &settings.api_secret) {
        (Some(key), Some(secret)) => match BithumbAuth::new(key.clone(), secret.clone()) {
            Ok(auth) => auth,
            Err(e) => {
                warn!("Ignoring API credentials: {}", e);
                BithumbAuth::new_public_only()
            }
        },
        _ => BithumbAuth::new_public_only(),
    };
    let client = Arc::new(BithumbClient::new(settings.rest_url.clone(), auth));
    if client.has_credentials() {
        info!("API key loaded: {}", client.api_key_redacted());
    } else if settings.trading.mode == TradingMode::Live {
        warn!("Live mode configured without API credentials; orders will be rejected");
    }

    // Analysis pipeline
    let signals = Arc::new(SignalBoard::new());
    let analyzer = Arc::new(MarketAnalyzer::with_settings(
        client.clone(),
        signals.clone(),
        AnalyzerSettings {
            order_book: settings.order_book_source,
            ..AnalyzerSettings::default()
        },
    ));

    // Trading controller
    let account: Arc<dyn AccountApi> = client.clone();
    let gateways = GatewayRouter::new(
        Arc::new(SimulationGateway::new()),
        Arc::new(LiveGateway::new(account)),
    );
    let config = Arc::new(ConfigManager::new(settings.trading.clone()));
    let controller = Arc::new(TradingController::new(
        client.clone(),
        analyzer.clone(),
        gateways,
        config,
    ));

    // Streaming feed
    let feed = Arc::new(StreamingMarketFeed::new(settings.ws_url.clone()));
    if !settings.feed_symbols.is_empty() {
        feed.subscribe(settings.feed_symbols.clone());
        feed.connect();
    }

    if settings.trading.enabled {
        controller.start();
    }

    let state = Arc::new(AppState {
        market: client,
        analyzer,
        signals,
        controller: controller.clone(),
        feed: feed.clone(),
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!("Starting API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Open positions are left for the operator
    controller.stop();
    feed.disconnect();

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
