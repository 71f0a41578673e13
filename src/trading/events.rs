//! Trading events
//!
//! One variant per observable controller event, fanned out to every
//! subscriber over a broadcast channel.

use crate::strategy::Signal;
use crate::trading_config::TradingConfig;
use crate::types::{OrderSide, Position};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    ConfidenceExit,
    Emergency,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::TakeProfit => "take-profit",
            ExitReason::StopLoss => "stop-loss",
            ExitReason::ConfidenceExit => "confidence-exit",
            ExitReason::Emergency => "emergency",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradingEvent {
    Started {
        at: DateTime<Utc>,
    },
    Stopped {
        at: DateTime<Utc>,
    },
    PositionOpened {
        position: Position,
        score: f64,
    },
    PositionClosed {
        symbol: String,
        reason: ExitReason,
        exit_price: f64,
        profit_loss: f64,
        profit_loss_pct: f64,
    },
    PositionUpdate {
        position: Position,
    },
    OrderFilled {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        price: f64,
        reason: String,
        order_id: String,
    },
    OrderFailed {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        reason: String,
        error: String,
    },
    NoOpportunity {
        candidates: usize,
        analyzed: usize,
    },
    ConfidenceExit {
        symbol: String,
        sentiment_confidence: f64,
        signal: Signal,
        score: f64,
    },
    Error {
        context: String,
        message: String,
    },
    EmergencyStopped {
        position_closed: bool,
        at: DateTime<Utc>,
    },
    ConfigUpdated {
        config: TradingConfig,
    },
}

/// Broadcast fan-out for [`TradingEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TradingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.tx.subscribe()
    }

    /// Send to current subscribers; an event with no subscribers is dropped.
    pub fn emit(&self, event: TradingEvent) {
        debug!("event: {:?}", event);
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
