//! Sentiment and event inputs for the analysis pipeline
//!
//! The pipeline never produces these itself. They come from a
//! [`SignalProvider`]; [`SignalBoard`] is the in-process provider an operator
//! fills through the API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentSourceKind {
    News,
    Community,
    Social,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentSource {
    pub source: SentimentSourceKind,
    pub score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentSnapshot {
    /// -1 (negative) to 1 (positive)
    pub aggregate_score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<SentimentSource>,
}

impl SentimentSnapshot {
    /// Placeholder used until a real sentiment feed reports: neutral tone,
    /// confidence just above the trading gate.
    pub fn neutral() -> Self {
        Self {
            aggregate_score: 0.0,
            confidence: 0.6,
            sources: Vec::new(),
        }
    }
}

impl Default for SentimentSnapshot {
    fn default() -> Self {
        Self::neutral()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Macro,
    Exchange,
    Listing,
    Regulation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn weight(&self) -> f64 {
        match self {
            Severity::High => 1.0,
            Severity::Medium => 0.6,
            Severity::Low => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Bullish,
    Bearish,
    Neutral,
}

impl Impact {
    pub fn direction(&self) -> f64 {
        match self {
            Impact::Bullish => 1.0,
            Impact::Bearish => -1.0,
            Impact::Neutral => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSignal {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub severity: Severity,
    pub impact: Impact,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub detected_at: DateTime<Utc>,
}

impl EventSignal {
    /// A high-severity bearish event reported with at least 0.7 confidence.
    pub fn is_critical_bearish(&self) -> bool {
        self.impact == Impact::Bearish && self.severity == Severity::High && self.confidence >= 0.7
    }
}

/// Source of sentiment and event inputs for one symbol
#[async_trait]
pub trait SignalProvider: Send + Sync {
    async fn sentiment(&self, symbol: &str) -> SentimentSnapshot;
    async fn events(&self, symbol: &str) -> Vec<EventSignal>;
}

/// Operator-maintained sentiment/event snapshots
pub struct SignalBoard {
    default_sentiment: RwLock<SentimentSnapshot>,
    sentiment: RwLock<HashMap<String, SentimentSnapshot>>,
    events: RwLock<HashMap<String, Vec<EventSignal>>>,
}

impl SignalBoard {
    pub fn new() -> Self {
        Self::with_default(SentimentSnapshot::neutral())
    }

    pub fn with_default(default_sentiment: SentimentSnapshot) -> Self {
        Self {
            default_sentiment: RwLock::new(default_sentiment),
            sentiment: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }

    pub fn default_sentiment(&self) -> SentimentSnapshot {
        self.default_sentiment.read().clone()
    }

    /// Sentiment reported for every symbol without its own override
    pub fn set_default_sentiment(&self, snapshot: SentimentSnapshot) {
        *self.default_sentiment.write() = snapshot;
    }

    pub fn set_sentiment(&self, symbol: &str, snapshot: SentimentSnapshot) {
        self.sentiment.write().insert(symbol.to_uppercase(), snapshot);
    }

    pub fn clear_sentiment(&self, symbol: &str) {
        self.sentiment.write().remove(&symbol.to_uppercase());
    }

    pub fn push_event(&self, symbol: &str, event: EventSignal) {
        self.events
            .write()
            .entry(symbol.to_uppercase())
            .or_default()
            .push(event);
    }

    pub fn clear_events(&self, symbol: &str) {
        self.events.write().remove(&symbol.to_uppercase());
    }
}

impl Default for SignalBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalProvider for SignalBoard {
    async fn sentiment(&self, symbol: &str) -> SentimentSnapshot {
        self.sentiment
            .read()
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_else(|| self.default_sentiment.read().clone())
    }

    async fn events(&self, symbol: &str) -> Vec<EventSignal> {
        self.events
            .read()
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(impact: Impact, severity: Severity, confidence: f64) -> EventSignal {
        EventSignal {
            id: "evt-1".to_string(),
            kind: EventKind::Regulation,
            severity,
            impact,
            confidence,
            scheduled_at: None,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_board_falls_back_to_default() {
        let board = SignalBoard::new();
        let snapshot = board.sentiment("btc").await;
        assert_eq!(snapshot, SentimentSnapshot::neutral());
        assert!(board.events("btc").await.is_empty());
    }

    #[tokio::test]
    async fn test_board_default_can_be_replaced() {
        let board = SignalBoard::new();
        board.set_sentiment("eth", SentimentSnapshot { aggregate_score: 0.5, confidence: 0.9, sources: vec![] });
        board.set_default_sentiment(SentimentSnapshot { aggregate_score: -0.2, confidence: 0.4, sources: vec![] });

        assert_eq!(board.default_sentiment().confidence, 0.4);
        assert_eq!(board.sentiment("BTC").await.aggregate_score, -0.2);
        // overrides win over the default
        assert_eq!(board.sentiment("ETH").await.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_board_per_symbol_overrides() {
        let board = SignalBoard::new();
        board.set_sentiment("eth", SentimentSnapshot { aggregate_score: 0.5, confidence: 0.9, sources: vec![] });
        board.push_event("ETH", event(Impact::Bearish, Severity::High, 0.8));

        assert_eq!(board.sentiment("ETH").await.confidence, 0.9);
        assert_eq!(board.sentiment("BTC").await.confidence, 0.6);
        assert_eq!(board.events("eth").await.len(), 1);

        board.clear_events("eth");
        board.clear_sentiment("eth");
        assert!(board.events("ETH").await.is_empty());
        assert_eq!(board.sentiment("ETH").await.confidence, 0.6);
    }

    #[test]
    fn test_critical_bearish() {
        assert!(event(Impact::Bearish, Severity::High, 0.7).is_critical_bearish());
        assert!(!event(Impact::Bearish, Severity::High, 0.69).is_critical_bearish());
        assert!(!event(Impact::Bearish, Severity::Medium, 0.9).is_critical_bearish());
        assert!(!event(Impact::Bullish, Severity::High, 0.9).is_critical_bearish());
    }

    #[test]
    fn test_event_wire_format() {
        let json = r#"{"id":"e1","type":"listing","severity":"medium","impact":"bullish","confidence":0.8,"detectedAt":"2024-01-01T00:00:00Z"}"#;
        let parsed: EventSignal = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, EventKind::Listing);
        assert_eq!(parsed.impact, Impact::Bullish);
        assert!(parsed.scheduled_at.is_none());
    }
}
