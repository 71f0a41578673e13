//! Streaming market feed
//!
//! One multiplexed WebSocket to the public Bithumb stream carrying ticker
//! and transaction channels. A supervisor task owns the connection:
//! - re-sends the remembered subscription on every open
//! - pings every 30s while open, answers server pings
//! - reconnects with exponential backoff (1s doubling, capped at 30s)
//! - goes dormant after 10 failed attempts until `connect()` is called again
//!
//! Consumers only observe [`FeedEvent`]s; nothing outside the supervisor
//! writes to the socket except through its outbound queue.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub const DEFAULT_WS_URL: &str = "wss://pubwss.bithumb.com/pub/ws";

pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const BASE_RECONNECT_DELAY_MS: u64 = 1_000;
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FEED_CHANNEL_CAPACITY: usize = 1000;

/// Exchange timestamps are Korea Standard Time
const KST_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed {channel} message: {reason}")]
    Malformed { channel: &'static str, reason: String },
}

fn malformed(channel: &'static str, reason: impl Into<String>) -> FeedError {
    FeedError::Malformed {
        channel,
        reason: reason.into(),
    }
}

/// Delay before reconnect attempt `attempt` (1-based)
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = BASE_RECONNECT_DELAY_MS.saturating_mul(1u64 << exp);
    Duration::from_millis(ms.min(MAX_RECONNECT_DELAY_MS))
}

// ==========================================
// Messages
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerUpdate {
    pub symbol: String,
    pub price: f64,
    pub change_24h: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Bid,
    Ask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub side: TradeSide,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Connected,
    Disconnected,
    Ticker(TickerUpdate),
    Transaction(TransactionUpdate),
    Error { message: String },
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    MaxReconnectAttempts { attempts: u32 },
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Ticker(TickerUpdate),
    Transactions(Vec<TransactionUpdate>),
}

/// Decodes one text frame. Status/ack frames decode to `None`.
pub fn parse_message(text: &str) -> Result<Option<FeedMessage>, FeedError> {
    let value: Value = serde_json::from_str(text)?;

    match value.get("type").and_then(Value::as_str) {
        Some("ticker") => {
            let content = value
                .get("content")
                .ok_or_else(|| malformed("ticker", "missing content"))?;
            parse_ticker(content).map(|t| Some(FeedMessage::Ticker(t)))
        }
        Some("transaction") => {
            let content = value
                .get("content")
                .ok_or_else(|| malformed("transaction", "missing content"))?;
            let rows: Vec<&Value> = match content.get("list").and_then(Value::as_array) {
                Some(list) => list.iter().collect(),
                None => vec![content],
            };
            let updates = rows
                .into_iter()
                .map(parse_transaction)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(FeedMessage::Transactions(updates)))
        }
        _ => {
            if let Some(status) = value.get("status").and_then(Value::as_str) {
                let resmsg = value.get("resmsg").cloned().unwrap_or_default();
                debug!("Feed status {}: {}", status, resmsg);
            }
            Ok(None)
        }
    }
}

fn parse_ticker(content: &Value) -> Result<TickerUpdate, FeedError> {
    let field = |key: &str| number(content, key).ok_or_else(|| malformed("ticker", format!("bad {}", key)));

    Ok(TickerUpdate {
        symbol: strip_market(content, "ticker")?,
        price: field("closePrice")?,
        change_24h: field("chgRate")?,
        volume: field("volume")?,
        timestamp: ticker_time(
            content.get("date").and_then(Value::as_str),
            content.get("time").and_then(Value::as_str),
        )
        .unwrap_or_else(Utc::now),
    })
}

fn parse_transaction(row: &Value) -> Result<TransactionUpdate, FeedError> {
    let field = |key: &str| number(row, key).ok_or_else(|| malformed("transaction", format!("bad {}", key)));

    let side = match row.get("buySellGb").and_then(Value::as_str) {
        Some("1") => TradeSide::Bid,
        _ => TradeSide::Ask,
    };

    Ok(TransactionUpdate {
        symbol: strip_market(row, "transaction")?,
        price: field("contPrice")?,
        quantity: field("contQty")?,
        side,
        timestamp: row
            .get("contDtm")
            .and_then(Value::as_str)
            .and_then(transaction_time)
            .unwrap_or_else(Utc::now),
    })
}

fn strip_market(content: &Value, channel: &'static str) -> Result<String, FeedError> {
    let market = content
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(channel, "missing symbol"))?;
    Ok(market.trim_end_matches("_KRW").to_string())
}

fn number(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn kst(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(KST_OFFSET_SECS)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `date` is `YYYYMMDD`, `time` is `HHMMSS`
fn ticker_time(date: Option<&str>, time: Option<&str>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date?, "%Y%m%d").ok()?;
    let time = match time {
        Some(t) => NaiveTime::parse_from_str(t, "%H%M%S").ok()?,
        None => NaiveTime::from_hms_opt(0, 0, 0)?,
    };
    kst(date.and_time(time))
}

/// `contDtm` is `YYYY-MM-DD HH:MM:SS.ffffff`
fn transaction_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    kst(naive)
}

/// Ticker and transaction subscribe frames for `symbols`
pub fn subscription_frames(symbols: &[String]) -> Vec<String> {
    if symbols.is_empty() {
        return Vec::new();
    }
    let markets: Vec<String> = symbols.iter().map(|s| format!("{}_KRW", s)).collect();
    vec![
        json!({"type": "ticker", "symbols": markets, "tickTypes": ["24H"]}).to_string(),
        json!({"type": "transaction", "symbols": markets}).to_string(),
    ]
}

// ==========================================
// Feed
// ==========================================

struct Shared {
    url: String,
    symbols: RwLock<Vec<String>>,
    connected: AtomicBool,
    ws_tx: RwLock<Option<mpsc::UnboundedSender<String>>>,
    events: broadcast::Sender<FeedEvent>,
    latest: DashMap<String, TickerUpdate>,
}

impl Shared {
    fn emit(&self, event: FeedEvent) {
        let _ = self.events.send(event);
    }

    fn handle_text(&self, text: &str) {
        match parse_message(text) {
            Ok(Some(FeedMessage::Ticker(update))) => {
                self.latest.insert(update.symbol.clone(), update.clone());
                self.emit(FeedEvent::Ticker(update));
            }
            Ok(Some(FeedMessage::Transactions(updates))) => {
                for update in updates {
                    self.emit(FeedEvent::Transaction(update));
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Dropping feed message: {}", e),
        }
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.ws_tx.write() = None;
    }
}

enum SessionEnd {
    Shutdown,
    Closed { was_open: bool },
}

pub struct StreamingMarketFeed {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<mpsc::Sender<()>>>,
}

impl StreamingMarketFeed {
    pub fn new(url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                symbols: RwLock::new(Vec::new()),
                connected: AtomicBool::new(false),
                ws_tx: RwLock::new(None),
                events,
                latest: DashMap::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Starts the supervisor. Returns false if one is already active; a
    /// dormant supervisor (attempts exhausted) counts as inactive.
    pub fn connect(&self) -> bool {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().map_or(false, |tx| !tx.is_closed()) {
            debug!("Market feed already active");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(supervise(Arc::clone(&self.shared), shutdown_rx));
        *supervisor = Some(shutdown_tx);
        info!("Market feed connecting to {}", self.shared.url);
        true
    }

    /// Closes the connection, cancels any pending reconnect and forgets the
    /// subscription.
    pub fn disconnect(&self) {
        if let Some(shutdown_tx) = self.supervisor.lock().take() {
            let _ = shutdown_tx.try_send(());
        }
        self.shared.mark_closed();
        self.shared.symbols.write().clear();
        info!("Market feed disconnected");
    }

    /// Replaces the remembered symbol set; sent now if connected, otherwise
    /// on the next open.
    pub fn subscribe(&self, symbols: Vec<String>) {
        let symbols: Vec<String> = symbols
            .into_iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        *self.shared.symbols.write() = symbols.clone();

        if !self.is_connected() {
            debug!("Feed not connected, {} symbols queued for next open", symbols.len());
            return;
        }
        let tx = self.shared.ws_tx.read().clone();
        if let Some(tx) = tx {
            for frame in subscription_frames(&symbols) {
                let _ = tx.send(frame);
            }
            info!("Subscribed to {} symbols", symbols.len());
        }
    }

    /// Forgets the symbol set. The stream has no unsubscribe frame, so
    /// already-subscribed channels keep flowing until the connection drops.
    pub fn unsubscribe(&self) {
        self.shared.symbols.write().clear();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.shared.symbols.read().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.events.subscribe()
    }

    pub fn latest_ticker(&self, symbol: &str) -> Option<TickerUpdate> {
        self.shared.latest.get(&symbol.to_uppercase()).map(|t| t.clone())
    }

    pub fn latest_tickers(&self) -> Vec<TickerUpdate> {
        let mut tickers: Vec<TickerUpdate> = self.shared.latest.iter().map(|e| e.value().clone()).collect();
        tickers.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        tickers
    }
}

async fn supervise(shared: Arc<Shared>, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut attempt: u32 = 0;

    loop {
        let end = run_session(&shared, &mut shutdown_rx, &mut attempt).await;
        shared.mark_closed();

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Closed { was_open } => {
                if was_open {
                    warn!("Market feed disconnected");
                    shared.emit(FeedEvent::Disconnected);
                }
            }
        }

        if attempt >= MAX_RECONNECT_ATTEMPTS {
            error!("Market feed gave up after {} reconnect attempts", attempt);
            shared.emit(FeedEvent::MaxReconnectAttempts { attempts: attempt });
            break;
        }
        attempt += 1;
        let delay = reconnect_delay(attempt);
        info!(
            "Reconnecting market feed in {:?} (attempt {}/{})",
            delay, attempt, MAX_RECONNECT_ATTEMPTS
        );
        shared.emit(FeedEvent::ReconnectScheduled {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => break,
        }
    }

    debug!("Market feed supervisor exited");
}

async fn run_session(shared: &Shared, shutdown_rx: &mut mpsc::Receiver<()>, attempt: &mut u32) -> SessionEnd {
    let connecting = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(shared.url.as_str()));
    let result = tokio::select! {
        result = connecting => result,
        _ = shutdown_rx.recv() => return SessionEnd::Shutdown,
    };

    let ws_stream = match result {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            warn!("Market feed connect failed: {}", e);
            shared.emit(FeedEvent::Error { message: e.to_string() });
            return SessionEnd::Closed { was_open: false };
        }
        Err(_) => {
            warn!("Market feed connect timed out after {:?}", CONNECT_TIMEOUT);
            shared.emit(FeedEvent::Error {
                message: "connect timed out".to_string(),
            });
            return SessionEnd::Closed { was_open: false };
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *shared.ws_tx.write() = Some(tx);
    shared.connected.store(true, Ordering::SeqCst);
    *attempt = 0;

    info!("Market feed connected to {}", shared.url);
    shared.emit(FeedEvent::Connected);

    let symbols = shared.symbols.read().clone();
    for frame in subscription_frames(&symbols) {
        if let Err(e) = write.send(Message::Text(frame)).await {
            warn!("Failed to resend subscription: {}", e);
            return SessionEnd::Closed { was_open: true };
        }
    }
    if !symbols.is_empty() {
        info!("Resubscribed to {} symbols", symbols.len());
    }

    let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!("Market feed closed by server: {:?}", frame);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Market feed error: {}", e);
                        shared.emit(FeedEvent::Error { message: e.to_string() });
                        break;
                    }
                    None => {
                        warn!("Market feed stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    warn!("Failed to send ping, closing market feed");
                    break;
                }
                debug!("Sent ping to market feed");
            }
            Some(frame) = rx.recv() => {
                if write.send(Message::Text(frame)).await.is_err() {
                    warn!("Failed to send frame, closing market feed");
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
        }
    }

    SessionEnd::Closed { was_open: true }
}
