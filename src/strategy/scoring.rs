//! Multi-signal score fusion
//!
//! Pure functions that turn indicator readings, volatility, sentiment and
//! events into seven sub-scores, one weighted composite score, a signal and
//! a confidence gate.

use crate::indicators::{self, IndicatorError};
use crate::signals::{EventSignal, SentimentSnapshot};
use crate::types::OrderBook;
use serde::{Deserialize, Serialize};

/// Window used for the range ratio and the volume spike baseline
pub const VOLATILITY_WINDOW: usize = 24;

const EPSILON: f64 = 1e-8;

pub const BUY_THRESHOLD: f64 = 70.0;
pub const SELL_THRESHOLD: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorScores {
    pub rsi: f64,
    pub macd: f64,
    pub bollinger: f64,
    pub volume: f64,
    pub volatility: f64,
    pub sentiment: f64,
    pub event: f64,
}

/// Relative weight of each sub-score. Weights need not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub rsi: f64,
    pub macd: f64,
    pub bollinger: f64,
    pub volume: f64,
    pub volatility: f64,
    pub sentiment: f64,
    pub event: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            rsi: 20.0,
            macd: 20.0,
            bollinger: 15.0,
            volume: 15.0,
            volatility: 10.0,
            sentiment: 10.0,
            event: 10.0,
        }
    }
}

impl Weights {
    pub fn uniform() -> Self {
        Self {
            rsi: 1.0,
            macd: 1.0,
            bollinger: 1.0,
            volume: 1.0,
            volatility: 1.0,
            sentiment: 1.0,
            event: 1.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.rsi + self.macd + self.bollinger + self.volume + self.volatility + self.sentiment + self.event
    }

    /// Every weight finite and non-negative, at least one positive
    pub fn is_valid(&self) -> bool {
        let all = [
            self.rsi,
            self.macd,
            self.bollinger,
            self.volume,
            self.volatility,
            self.sentiment,
            self.event,
        ];
        all.iter().all(|w| w.is_finite() && *w >= 0.0) && self.total() > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatilitySnapshot {
    pub atr: f64,
    pub range_ratio: f64,
    pub order_book_imbalance: f64,
    pub volume_spike: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Hold,
    Sell,
}

// ==========================================
// Volatility
// ==========================================

pub fn volatility_snapshot(
    prices: &[f64],
    volumes: &[f64],
    order_book: &OrderBook,
) -> Result<VolatilitySnapshot, IndicatorError> {
    let atr = indicators::atr(prices, indicators::DEFAULT_ATR_PERIOD)?;

    let (Some(&current), Some(&last_volume)) = (prices.last(), volumes.last()) else {
        return Err(IndicatorError::InsufficientData {
            indicator: "volatility",
            required: 1,
            provided: 0,
        });
    };

    let recent = &prices[prices.len().saturating_sub(VOLATILITY_WINDOW)..];
    let high = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let low = recent.iter().copied().fold(f64::INFINITY, f64::min);
    let range_ratio = (current - low) / (high - low).max(EPSILON);

    let bid_volume = order_book.bid_volume();
    let ask_volume = order_book.ask_volume();
    let order_book_imbalance = bid_volume / (bid_volume + ask_volume).max(EPSILON);

    let recent_volumes = &volumes[volumes.len().saturating_sub(VOLATILITY_WINDOW)..];
    let baseline = indicators::sma(recent_volumes, recent_volumes.len())?;
    let volume_spike = last_volume / baseline.max(EPSILON);

    Ok(VolatilitySnapshot {
        atr,
        range_ratio,
        order_book_imbalance,
        volume_spike,
    })
}

pub fn score_volatility(snapshot: &VolatilitySnapshot) -> f64 {
    let mut score: f64 = 50.0;
    if snapshot.atr >= 0.015 {
        score += 10.0;
    }
    if snapshot.range_ratio >= 0.8 {
        score += 10.0;
    }
    if snapshot.order_book_imbalance >= 0.6 {
        score += 10.0;
    }
    if snapshot.volume_spike >= 2.0 {
        score += 10.0;
    }
    if snapshot.order_book_imbalance <= 0.4 {
        score -= 10.0;
    }
    if snapshot.range_ratio <= 0.2 {
        score -= 10.0;
    }
    score.clamp(0.0, 100.0)
}

// ==========================================
// Sentiment / Events
// ==========================================

/// Low-confidence sentiment scores a flat 40 whatever its sign.
pub fn score_sentiment(snapshot: &SentimentSnapshot) -> f64 {
    if snapshot.confidence < 0.5 {
        return 40.0;
    }
    ((snapshot.aggregate_score + 1.0) / 2.0 * 100.0).round()
}

pub fn score_event(events: &[EventSignal]) -> f64 {
    if events.is_empty() {
        return 60.0;
    }

    let weighted: f64 = events
        .iter()
        .map(|e| e.impact.direction() * e.severity.weight() * e.confidence)
        .sum();

    let normalized = ((weighted + 1.0) / 2.0).clamp(0.0, 1.0);
    (normalized * 100.0).round()
}

// ==========================================
// Fusion
// ==========================================

/// Weighted mean of the sub-scores. All-zero weights score 0.
pub fn total_score(scores: &IndicatorScores, weights: &Weights) -> f64 {
    let total_weight = weights.total();
    if total_weight <= 0.0 {
        return 0.0;
    }

    let weighted_sum = scores.rsi * weights.rsi
        + scores.macd * weights.macd
        + scores.bollinger * weights.bollinger
        + scores.volume * weights.volume
        + scores.volatility * weights.volatility
        + scores.sentiment * weights.sentiment
        + scores.event * weights.event;

    weighted_sum / total_weight
}

pub fn signal_for(score: f64) -> Signal {
    if score >= BUY_THRESHOLD {
        Signal::Buy
    } else if score <= SELL_THRESHOLD {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

pub fn confidence_gate(sentiment: &SentimentSnapshot, events: &[EventSignal]) -> bool {
    sentiment.confidence >= 0.5 && !events.iter().any(EventSignal::is_critical_bearish)
}

pub fn should_trade(score: f64, gate_ok: bool) -> bool {
    gate_ok && score >= BUY_THRESHOLD
}
