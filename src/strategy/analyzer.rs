//! Market analysis pipeline
//!
//! Fetches recent candles for a symbol, runs the indicator set and fuses the
//! readings with injected sentiment/event snapshots into a [`MarketAnalysis`].

use super::scoring::{self, IndicatorScores, Signal, VolatilitySnapshot, Weights};
use crate::exchange::{ExchangeError, MarketDataSource};
use crate::indicators::{self, IndicatorError};
use crate::signals::{EventSignal, SentimentSnapshot, SignalProvider};
use crate::types::{CandleInterval, OrderBook};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Fewest candles an analysis will run on
pub const MIN_CANDLES: usize = 20;

#[derive(Debug, Error)]
pub enum AnalysisCause {
    #[error(transparent)]
    Indicator(#[from] IndicatorError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis failed for {symbol}: {source}")]
    Failed {
        symbol: String,
        #[source]
        source: AnalysisCause,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub volatility: VolatilitySnapshot,
    pub sentiment: SentimentSnapshot,
    pub events: Vec<EventSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub symbol: String,
    pub score: f64,
    pub signal: Signal,
    pub indicators: IndicatorScores,
    pub metadata: AnalysisMetadata,
    pub analyzed_at: DateTime<Utc>,
}

impl MarketAnalysis {
    pub fn confidence_ok(&self) -> bool {
        scoring::confidence_gate(&self.metadata.sentiment, &self.metadata.events)
    }

    pub fn should_trade(&self) -> bool {
        scoring::should_trade(self.score, self.confidence_ok())
    }
}

/// Anything that can produce a [`MarketAnalysis`] for a symbol
#[async_trait]
pub trait SymbolAnalyzer: Send + Sync {
    async fn analyze_market(&self, symbol: &str) -> Result<MarketAnalysis, AnalysisError>;
}

/// Where the order book used for imbalance scoring comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderBookSource {
    /// One level either side of the last close, saves a request per symbol
    #[default]
    Synthetic,
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerSettings {
    pub interval: CandleInterval,
    pub candle_count: usize,
    pub order_book: OrderBookSource,
    pub weights: Weights,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            interval: CandleInterval::FiveMinutes,
            candle_count: 60,
            order_book: OrderBookSource::Synthetic,
            weights: Weights::default(),
        }
    }
}

pub struct MarketAnalyzer {
    market: Arc<dyn MarketDataSource>,
    signals: Arc<dyn SignalProvider>,
    settings: RwLock<AnalyzerSettings>,
}

impl MarketAnalyzer {
    pub fn new(market: Arc<dyn MarketDataSource>, signals: Arc<dyn SignalProvider>) -> Self {
        Self::with_settings(market, signals, AnalyzerSettings::default())
    }

    pub fn with_settings(
        market: Arc<dyn MarketDataSource>,
        signals: Arc<dyn SignalProvider>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            market,
            signals,
            settings: RwLock::new(settings),
        }
    }

    pub fn settings(&self) -> AnalyzerSettings {
        self.settings.read().clone()
    }

    pub fn set_order_book_source(&self, source: OrderBookSource) {
        self.settings.write().order_book = source;
    }

    pub fn set_weights(&self, weights: Weights) {
        self.settings.write().weights = weights;
    }

    async fn run(&self, symbol: &str) -> Result<MarketAnalysis, AnalysisCause> {
        let settings = self.settings();

        let candles = self
            .market
            .get_candles(symbol, settings.interval, settings.candle_count)
            .await?;

        if candles.len() < MIN_CANDLES {
            return Err(IndicatorError::InsufficientData {
                indicator: "candles",
                required: MIN_CANDLES,
                provided: candles.len(),
            }
            .into());
        }

        let prices: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let current_price = prices[prices.len() - 1];

        let order_book = match settings.order_book {
            OrderBookSource::Synthetic => OrderBook::synthetic(current_price),
            OrderBookSource::Live => self.market.get_order_book(symbol).await?,
        };

        let sentiment = self.signals.sentiment(symbol).await;
        let events = self.signals.events(symbol).await;

        let analysis = assemble(symbol, &prices, &volumes, &order_book, sentiment, events, &settings.weights)?;
        debug!(
            "Analysis {}: score={:.1} signal={:?}",
            symbol, analysis.score, analysis.signal
        );
        Ok(analysis)
    }
}

#[async_trait]
impl SymbolAnalyzer for MarketAnalyzer {
    async fn analyze_market(&self, symbol: &str) -> Result<MarketAnalysis, AnalysisError> {
        self.run(symbol).await.map_err(|source| {
            warn!("Analysis failed for {}: {}", symbol, source);
            AnalysisError::Failed {
                symbol: symbol.to_string(),
                source,
            }
        })
    }
}

/// Scores one symbol from its close/volume series.
///
/// The "previous" MACD state comes from the same series with the last sample
/// dropped rather than from a rolling history.
pub fn assemble(
    symbol: &str,
    prices: &[f64],
    volumes: &[f64],
    order_book: &OrderBook,
    sentiment: SentimentSnapshot,
    events: Vec<EventSignal>,
    weights: &Weights,
) -> Result<MarketAnalysis, IndicatorError> {
    let (Some(&current_price), Some(&current_volume)) = (prices.last(), volumes.last()) else {
        return Err(IndicatorError::InsufficientData {
            indicator: "candles",
            required: MIN_CANDLES,
            provided: 0,
        });
    };

    let rsi = indicators::rsi(prices, indicators::DEFAULT_RSI_PERIOD)?;
    let macd = indicators::macd(prices)?;
    let prev_macd = indicators::macd(&prices[..prices.len() - 1])?;
    let bands = indicators::bollinger_bands(prices, indicators::DEFAULT_BOLLINGER_PERIOD, indicators::DEFAULT_BOLLINGER_K)?;
    let avg_volume = indicators::avg_volume(volumes, indicators::DEFAULT_VOLUME_PERIOD)?;
    let volatility = scoring::volatility_snapshot(prices, volumes, order_book)?;

    let scores = IndicatorScores {
        rsi: indicators::score_rsi(rsi),
        macd: indicators::score_macd(&macd, &prev_macd),
        bollinger: indicators::score_bollinger(current_price, &bands),
        volume: indicators::score_volume(current_volume, avg_volume),
        volatility: scoring::score_volatility(&volatility),
        sentiment: scoring::score_sentiment(&sentiment),
        event: scoring::score_event(&events),
    };

    let score = scoring::total_score(&scores, weights);

    Ok(MarketAnalysis {
        symbol: symbol.to_string(),
        score,
        signal: scoring::signal_for(score),
        indicators: scores,
        metadata: AnalysisMetadata {
            volatility,
            sentiment,
            events,
        },
        analyzed_at: Utc::now(),
    })
}
