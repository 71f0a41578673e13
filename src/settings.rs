//! Process settings from the environment
//!
//! Read once at boot after `dotenvy::dotenv()`. A value that fails to parse
//! logs a warning and falls back to its default.

use crate::exchange::DEFAULT_REST_URL;
use crate::market_feed::DEFAULT_WS_URL;
use crate::strategy::OrderBookSource;
use crate::trading_config::{TradingConfig, TradingMode};

use std::str::FromStr;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub port: u16,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub rest_url: String,
    pub ws_url: String,
    pub trading: TradingConfig,
    pub order_book_source: OrderBookSource,
    /// Subscribed on boot; empty leaves the feed idle
    pub feed_symbols: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port: 8000,
            api_key: None,
            api_secret: None,
            rest_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            trading: TradingConfig::default(),
            order_book_source: OrderBookSource::Synthetic,
            feed_symbols: Vec::new(),
        }
    }
}

impl AppSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut trading = defaults.trading.clone();
        trading.mode = parse_or(get("TRADING_MODE"), "TRADING_MODE", trading.mode);
        trading.investment_percentage =
            parse_or(get("INVESTMENT_PERCENTAGE"), "INVESTMENT_PERCENTAGE", trading.investment_percentage);
        trading.profit_target = parse_or(get("PROFIT_TARGET"), "PROFIT_TARGET", trading.profit_target);
        trading.min_volume_krw = parse_or(get("MIN_VOLUME_KRW"), "MIN_VOLUME_KRW", trading.min_volume_krw);
        trading.enabled = parse_or(get("TRADING_ENABLED"), "TRADING_ENABLED", trading.enabled);

        if let Err(e) = trading.validate() {
            warn!("Invalid trading settings ({}), using defaults", e);
            trading = TradingConfig::default();
        }

        let order_book_source = match get("ORDER_BOOK_SOURCE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("synthetic") => OrderBookSource::Synthetic,
            Some("live") => OrderBookSource::Live,
            Some(other) => {
                warn!("Unknown ORDER_BOOK_SOURCE '{}', using synthetic", other);
                OrderBookSource::Synthetic
            }
        };

        let feed_symbols = get("FEED_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            port: parse_or(get("PORT"), "PORT", defaults.port),
            api_key: get("BITHUMB_API_KEY"),
            api_secret: get("BITHUMB_API_SECRET"),
            rest_url: url_or(get("BITHUMB_REST_URL"), "BITHUMB_REST_URL", &["http", "https"], defaults.rest_url),
            ws_url: url_or(get("BITHUMB_WS_URL"), "BITHUMB_WS_URL", &["ws", "wss"], defaults.ws_url),
            trading,
            order_book_source,
            feed_symbols,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Could not parse {}='{}', using default", key, raw);
            default
        }),
    }
}

fn url_or(raw: Option<String>, key: &str, schemes: &[&str], default: String) -> String {
    let Some(raw) = raw else {
        return default;
    };
    match Url::parse(&raw) {
        Ok(url) if schemes.contains(&url.scheme()) => raw,
        Ok(url) => {
            warn!("{} has unsupported scheme '{}', using default", key, url.scheme());
            default
        }
        Err(e) => {
            warn!("{} is not a valid URL ({}), using default", key, e);
            default
        }
    }
}
