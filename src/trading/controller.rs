//! Trading Controller
//!
//! Single-position state machine driven by a cancellable periodic tick.
//!
//! Each tick snapshots the config, fetches the ticker universe and then
//! either manages the open position (take-profit / stop-loss /
//! confidence-exit) or scans liquid candidates for the best entry.
//!
//! Cancellation is ticket based: `start()` issues a new ticket, `stop()`
//! revokes it. A tick carries its ticket and re-checks it right before any
//! order or position mutation, so work finishing after a stop is dropped.

use super::events::{EventBus, ExitReason, TradingEvent};
use crate::exchange::MarketDataSource;
use crate::executor::{ExecutionStats, GatewayRouter, OrderGateway};
use crate::strategy::scoring::SELL_THRESHOLD;
use crate::strategy::{MarketAnalysis, Signal, SymbolAnalyzer};
use crate::trading_config::{ConfigError, ConfigManager, TradingConfig, TradingConfigUpdate};
use crate::types::{Order, OrderSide, Position, Ticker};

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Revoked/unused ticket
const NO_TICKET: u64 = 0;

/// Handle to the running tick loop
struct Schedule {
    ticket: u64,
    shutdown_tx: mpsc::Sender<()>,
}

/// Resets the in-flight flag when a tick finishes, even by panic
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub position: Option<Position>,
    pub config: TradingConfig,
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    /// Counters of the gateway the current mode routes to
    pub execution: ExecutionStats,
}

pub struct TradingController {
    market: Arc<dyn MarketDataSource>,
    analyzer: Arc<dyn SymbolAnalyzer>,
    gateways: GatewayRouter,
    config: Arc<ConfigManager>,
    events: EventBus,
    tick_interval: Duration,

    position: RwLock<Option<Position>>,
    // Serializes order placement with the position write that follows it
    trade_lock: tokio::sync::Mutex<()>,

    schedule: Mutex<Option<Schedule>>,
    active_ticket: AtomicU64,
    next_ticket: AtomicU64,
    tick_in_progress: AtomicBool,

    ticks_run: AtomicU64,
    ticks_skipped: AtomicU64,
}

impl TradingController {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        analyzer: Arc<dyn SymbolAnalyzer>,
        gateways: GatewayRouter,
        config: Arc<ConfigManager>,
    ) -> Self {
        Self {
            market,
            analyzer,
            gateways,
            config,
            events: EventBus::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            position: RwLock::new(None),
            trade_lock: tokio::sync::Mutex::new(()),
            schedule: Mutex::new(None),
            active_ticket: AtomicU64::new(NO_TICKET),
            next_ticket: AtomicU64::new(NO_TICKET),
            tick_in_progress: AtomicBool::new(false),
            ticks_run: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    // ==========================================
    // Lifecycle
    // ==========================================

    /// Stopped -> Running. Returns false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut schedule = self.schedule.lock();
        if schedule.is_some() {
            debug!("Trading controller already running");
            return false;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        self.active_ticket.store(ticket, Ordering::SeqCst);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let controller = Arc::clone(self);
        let period = self.tick_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !controller.is_live(ticket) {
                            break;
                        }
                        controller.try_tick(ticket).await;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
            debug!("Tick loop for ticket {} exited", ticket);
        });

        *schedule = Some(Schedule { ticket, shutdown_tx });
        drop(schedule);

        info!("Trading controller STARTED (tick every {:?})", self.tick_interval);
        self.events.emit(TradingEvent::Started { at: Utc::now() });
        true
    }

    /// Running -> Stopped. Leaves any open position alone. Returns false if
    /// already stopped.
    pub fn stop(&self) -> bool {
        let Some(schedule) = self.schedule.lock().take() else {
            debug!("Trading controller already stopped");
            return false;
        };

        self.active_ticket.store(NO_TICKET, Ordering::SeqCst);
        let _ = schedule.shutdown_tx.try_send(());

        info!("Trading controller STOPPED (ticket {})", schedule.ticket);
        self.events.emit(TradingEvent::Stopped { at: Utc::now() });
        true
    }

    /// Stops ticking and market-sells any open position. Returns whether a
    /// position was closed.
    pub async fn emergency_stop(&self) -> bool {
        warn!("EMERGENCY STOP requested");
        self.stop();

        // close_position waits out any entry still holding the trade lock,
        // then sells whatever that entry committed
        let gateway = self.gateways.for_mode(self.config.get_config().mode);
        let closed = self.close_position(None, gateway.as_ref(), ExitReason::Emergency).await;

        self.events.emit(TradingEvent::EmergencyStopped {
            position_closed: closed,
            at: Utc::now(),
        });
        closed
    }

    pub fn is_running(&self) -> bool {
        self.schedule.lock().is_some()
    }

    fn is_live(&self, ticket: u64) -> bool {
        ticket != NO_TICKET && self.active_ticket.load(Ordering::SeqCst) == ticket
    }

    // ==========================================
    // Accessors
    // ==========================================

    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.events.subscribe()
    }

    pub fn get_current_position(&self) -> Option<Position> {
        self.position.read().clone()
    }

    pub fn get_config(&self) -> TradingConfig {
        self.config.get_config()
    }

    pub fn update_config(&self, update: TradingConfigUpdate) -> Result<TradingConfig, ConfigError> {
        let config = self.config.update(update)?;
        self.events.emit(TradingEvent::ConfigUpdated { config: config.clone() });
        Ok(config)
    }

    pub fn status(&self) -> ControllerStatus {
        let config = self.get_config();
        ControllerStatus {
            running: self.is_running(),
            position: self.get_current_position(),
            execution: self.gateways.for_mode(config.mode).stats(),
            config,
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
        }
    }

    // ==========================================
    // Tick
    // ==========================================

    /// Run one tick now under the current ticket. Returns false when
    /// stopped or when another tick is still in flight.
    pub async fn run_tick(&self) -> bool {
        let ticket = self.active_ticket.load(Ordering::SeqCst);
        if ticket == NO_TICKET {
            return false;
        }
        self.try_tick(ticket).await
    }

    async fn try_tick(&self, ticket: u64) -> bool {
        if self
            .tick_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Tick already in progress, skipping");
            self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let _in_flight = InFlight(&self.tick_in_progress);

        self.tick(ticket).await;
        self.ticks_run.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn tick(&self, ticket: u64) {
        let config = self.config.get_config();
        if !config.enabled {
            debug!("Trading disabled, tick skipped");
            return;
        }
        let gateway = self.gateways.for_mode(config.mode);

        let universe = match self.market.get_all_tickers().await {
            Ok(tickers) => Some(tickers),
            Err(e) => {
                self.emit_error("tickers", e.to_string());
                None
            }
        };

        let open = self.position.read().clone();
        match (open, universe) {
            (Some(position), _) => self.manage(ticket, &config, gateway.as_ref(), position).await,
            (None, Some(tickers)) => {
                let candidates: Vec<Ticker> = tickers
                    .into_iter()
                    .filter(|t| t.volume_krw >= config.min_volume_krw)
                    .collect();
                self.scan(ticket, &config, gateway.as_ref(), candidates).await;
            }
            (None, None) => {}
        }
    }

    async fn manage(&self, ticket: u64, config: &TradingConfig, gateway: &dyn OrderGateway, position: Position) {
        let symbol = position.symbol;

        let ticker = match self.market.get_ticker(&symbol).await {
            Ok(ticker) => ticker,
            Err(e) => {
                self.emit_error(&format!("manage {}", symbol), e.to_string());
                return;
            }
        };

        if !self.is_live(ticket) {
            return;
        }
        let marked = {
            let mut guard = self.position.write();
            match guard.as_mut() {
                Some(p) if p.symbol == symbol => {
                    p.mark(ticker.price);
                    p.clone()
                }
                _ => return,
            }
        };
        self.events.emit(TradingEvent::PositionUpdate { position: marked.clone() });

        if marked.profit_loss_pct >= config.profit_target {
            info!(
                "{} reached take-profit: {:.2}% >= {:.2}%",
                symbol, marked.profit_loss_pct, config.profit_target
            );
            self.close_position(Some(ticket), gateway, ExitReason::TakeProfit).await;
            return;
        }

        let analysis = match self.analyzer.analyze_market(&symbol).await {
            Ok(analysis) => analysis,
            Err(e) => {
                self.emit_error(&format!("manage {}", symbol), e.to_string());
                return;
            }
        };

        let gate_ok = analysis.confidence_ok();
        let strong_sell = analysis.signal == Signal::Sell && analysis.score < SELL_THRESHOLD;
        if gate_ok && !strong_sell {
            debug!("Holding {} (score {:.1}, {:?})", symbol, analysis.score, analysis.signal);
            return;
        }

        let reason = if strong_sell { ExitReason::StopLoss } else { ExitReason::ConfidenceExit };
        info!("Exiting {} ({}), score {:.1}", symbol, reason, analysis.score);

        let closed = self.close_position(Some(ticket), gateway, reason).await;
        if closed && !gate_ok {
            self.events.emit(TradingEvent::ConfidenceExit {
                symbol,
                sentiment_confidence: analysis.metadata.sentiment.confidence,
                signal: analysis.signal,
                score: analysis.score,
            });
        }
    }

    async fn scan(&self, ticket: u64, config: &TradingConfig, gateway: &dyn OrderGateway, candidates: Vec<Ticker>) {
        if candidates.is_empty() {
            debug!("No candidates above {} KRW volume", config.min_volume_krw);
            self.events.emit(TradingEvent::NoOpportunity { candidates: 0, analyzed: 0 });
            return;
        }

        let results = join_all(candidates.iter().map(|t| self.analyzer.analyze_market(&t.symbol))).await;

        let mut analyzed = 0;
        let mut best: Option<(&Ticker, MarketAnalysis)> = None;
        for (ticker, result) in candidates.iter().zip(results) {
            match result {
                Ok(analysis) => {
                    analyzed += 1;
                    if !(analysis.should_trade() && analysis.signal == Signal::Buy) {
                        continue;
                    }
                    // strict comparison keeps the earliest of equal scores
                    let better = best.as_ref().map_or(true, |(_, b)| analysis.score > b.score);
                    if better {
                        best = Some((ticker, analysis));
                    }
                }
                Err(e) => self.emit_error(&format!("analyze {}", ticker.symbol), e.to_string()),
            }
        }

        let Some((ticker, analysis)) = best else {
            debug!("No opportunity among {} candidates", candidates.len());
            self.events.emit(TradingEvent::NoOpportunity {
                candidates: candidates.len(),
                analyzed,
            });
            return;
        };

        self.open_position(ticket, config, gateway, ticker, &analysis).await;
    }

    async fn open_position(
        &self,
        ticket: u64,
        config: &TradingConfig,
        gateway: &dyn OrderGateway,
        ticker: &Ticker,
        analysis: &MarketAnalysis,
    ) {
        let balance = match gateway.available_krw().await {
            Ok(balance) => balance,
            Err(e) => {
                self.emit_error("balance", e.to_string());
                return;
            }
        };

        if !(ticker.price > 0.0) {
            self.emit_error(&format!("entry {}", ticker.symbol), format!("invalid price {}", ticker.price));
            return;
        }

        let invest_krw = balance * config.investment_percentage / 100.0;
        let quantity = invest_krw / ticker.price;
        let order = Order::market(
            ticker.symbol.clone(),
            OrderSide::Buy,
            quantity,
            format!("entry score {:.1}", analysis.score),
        );

        let _trade = self.trade_lock.lock().await;
        if !self.is_live(ticket) {
            debug!("Controller stopped, dropping entry into {}", ticker.symbol);
            return;
        }
        let occupied = self.position.read().is_some();
        if occupied {
            warn!("Position already open, dropping entry into {}", ticker.symbol);
            return;
        }

        match gateway.place_order(&order).await {
            Ok(fill) => {
                let position = Position::open(ticker.symbol.clone(), ticker.price, quantity);
                *self.position.write() = Some(position.clone());

                info!(
                    "Opened {} x {:.8} @ {} (score {:.1})",
                    position.symbol, quantity, ticker.price, analysis.score
                );
                self.events.emit(TradingEvent::OrderFilled {
                    symbol: order.symbol.clone(),
                    side: OrderSide::Buy,
                    quantity,
                    price: ticker.price,
                    reason: order.reason.clone(),
                    order_id: fill.order_id,
                });
                self.events.emit(TradingEvent::PositionOpened {
                    position,
                    score: analysis.score,
                });
            }
            Err(e) => {
                error!("Entry order for {} failed: {}", ticker.symbol, e);
                self.events.emit(TradingEvent::OrderFailed {
                    symbol: order.symbol,
                    side: OrderSide::Buy,
                    quantity,
                    reason: order.reason,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Sells the whole open position. With a ticket, does nothing once that
    /// ticket is revoked. The position is cleared only on a confirmed fill.
    async fn close_position(&self, ticket: Option<u64>, gateway: &dyn OrderGateway, reason: ExitReason) -> bool {
        let _trade = self.trade_lock.lock().await;

        if let Some(ticket) = ticket {
            if !self.is_live(ticket) {
                debug!("Controller stopped, dropping {} exit", reason);
                return false;
            }
        }

        let open = self.position.read().clone();
        let Some(position) = open else {
            return false;
        };

        let order = Order::market(position.symbol.clone(), OrderSide::Sell, position.quantity, reason.to_string());

        match gateway.place_order(&order).await {
            Ok(fill) => {
                *self.position.write() = None;

                info!(
                    "Closed {} ({}): P&L {:.0} KRW ({:.2}%)",
                    position.symbol, reason, position.profit_loss, position.profit_loss_pct
                );
                self.events.emit(TradingEvent::OrderFilled {
                    symbol: position.symbol.clone(),
                    side: OrderSide::Sell,
                    quantity: position.quantity,
                    price: position.current_price,
                    reason: order.reason,
                    order_id: fill.order_id,
                });
                self.events.emit(TradingEvent::PositionClosed {
                    symbol: position.symbol,
                    reason,
                    exit_price: position.current_price,
                    profit_loss: position.profit_loss,
                    profit_loss_pct: position.profit_loss_pct,
                });
                true
            }
            Err(e) => {
                error!("Exit order for {} failed: {}", position.symbol, e);
                self.events.emit(TradingEvent::OrderFailed {
                    symbol: position.symbol,
                    side: OrderSide::Sell,
                    quantity: position.quantity,
                    reason: order.reason,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    fn emit_error(&self, context: &str, message: String) {
        warn!("{} failed: {}", context, message);
        self.events.emit(TradingEvent::Error {
            context: context.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SIMULATION_BALANCE_KRW;
    use crate::testing::{ticker, MockAnalyzer, MockGateway, MockMarket};
    use crate::trading_config::TradingMode;

    struct Harness {
        controller: Arc<TradingController>,
        market: Arc<MockMarket>,
        analyzer: Arc<MockAnalyzer>,
        gateway: Arc<MockGateway>,
        events: broadcast::Receiver<TradingEvent>,
    }

    fn harness() -> Harness {
        // ticks are driven by hand
        harness_with_interval(Duration::from_secs(3600))
    }

    fn harness_with_interval(tick_interval: Duration) -> Harness {
        let market = Arc::new(MockMarket::new());
        let analyzer = Arc::new(MockAnalyzer::new());
        let gateway = Arc::new(MockGateway::new(SIMULATION_BALANCE_KRW));
        let config = Arc::new(ConfigManager::new(TradingConfig {
            mode: TradingMode::Simulation,
            investment_percentage: 80.0,
            profit_target: 8.0,
            min_volume_krw: 1_000_000.0,
            enabled: true,
        }));

        let controller = Arc::new(
            TradingController::new(
                market.clone(),
                analyzer.clone(),
                GatewayRouter::new(gateway.clone(), gateway.clone()),
                config,
            )
            .with_tick_interval(tick_interval),
        );
        let events = controller.subscribe();

        Harness { controller, market, analyzer, gateway, events }
    }

    fn drain(rx: &mut broadcast::Receiver<TradingEvent>) -> Vec<TradingEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Start, then enter BTC at 100 via one scan tick.
    async fn open_btc(h: &mut Harness) {
        h.market.set_tickers(vec![ticker("BTC", 100.0, 5_000_000.0)]);
        h.analyzer.set("BTC", 80.0, Signal::Buy, 0.9);
        assert!(h.controller.start());
        assert!(h.controller.run_tick().await);
        assert!(h.controller.get_current_position().is_some());
        drain(&mut h.events);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut h = harness();
        assert!(h.controller.start());
        assert!(!h.controller.start());
        assert!(h.controller.is_running());

        let started = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, TradingEvent::Started { .. }))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut h = harness();
        assert!(!h.controller.stop());
        assert!(drain(&mut h.events).is_empty());

        h.controller.start();
        assert!(h.controller.stop());
        assert!(!h.controller.stop());
        assert!(!h.controller.is_running());
    }

    #[tokio::test]
    async fn test_run_tick_requires_running() {
        let h = harness();
        assert!(!h.controller.run_tick().await);
    }

    #[tokio::test]
    async fn test_disabled_config_tick_is_noop() {
        let mut h = harness();
        h.market.set_tickers(vec![ticker("BTC", 100.0, 5_000_000.0)]);
        h.analyzer.set("BTC", 90.0, Signal::Buy, 0.9);
        h.controller
            .update_config(TradingConfigUpdate { enabled: Some(false), ..Default::default() })
            .unwrap();
        h.controller.start();
        drain(&mut h.events);

        assert!(h.controller.run_tick().await);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.market.ticker_calls(), 0);
        assert!(h.gateway.orders().is_empty());
    }

    #[tokio::test]
    async fn test_scan_picks_best_qualifying_candidate() {
        let mut h = harness();
        h.market.set_tickers(vec![
            ticker("AAA", 10.0, 5_000_000.0),
            ticker("BBB", 20.0, 5_000_000.0),
            ticker("CCC", 40.0, 5_000_000.0),
            ticker("DDD", 50.0, 5_000_000.0),
            ticker("THIN", 60.0, 10.0),
        ]);
        h.analyzer.set("AAA", 80.0, Signal::Buy, 0.9);
        // highest score but the gate is closed
        h.analyzer.set("BBB", 95.0, Signal::Buy, 0.2);
        h.analyzer.set("CCC", 85.0, Signal::Buy, 0.9);
        h.analyzer.set("DDD", 85.0, Signal::Buy, 0.9);
        // filtered out by volume before analysis
        h.analyzer.set("THIN", 99.0, Signal::Buy, 0.9);

        h.controller.start();
        h.controller.run_tick().await;

        let position = h.controller.get_current_position().unwrap();
        assert_eq!(position.symbol, "CCC");
        assert_eq!(position.entry_price, 40.0);
        let expected_qty = SIMULATION_BALANCE_KRW * 0.8 / 40.0;
        assert!((position.quantity - expected_qty).abs() < 1e-9);
        assert!(!h.analyzer.was_called("THIN"));

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, TradingEvent::PositionOpened { position, .. } if position.symbol == "CCC")));
        let orders = h.gateway.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn test_scan_without_opportunity() {
        let mut h = harness();
        h.market.set_tickers(vec![ticker("AAA", 10.0, 5_000_000.0), ticker("BBB", 10.0, 5_000_000.0)]);
        h.analyzer.set("AAA", 50.0, Signal::Hold, 0.9);
        // BBB has no analysis and fails

        h.controller.start();
        h.controller.run_tick().await;

        assert!(h.controller.get_current_position().is_none());
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, TradingEvent::Error { context, .. } if context == "analyze BBB")));
        assert!(events.contains(&TradingEvent::NoOpportunity { candidates: 2, analyzed: 1 }));
        assert!(h.gateway.orders().is_empty());
    }

    #[tokio::test]
    async fn test_failed_buy_leaves_no_position() {
        let mut h = harness();
        h.market.set_tickers(vec![ticker("BTC", 100.0, 5_000_000.0)]);
        h.analyzer.set("BTC", 80.0, Signal::Buy, 0.9);
        h.gateway.set_failing(true);

        h.controller.start();
        h.controller.run_tick().await;

        assert!(h.controller.get_current_position().is_none());
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, TradingEvent::OrderFailed { side: OrderSide::Buy, .. })));
    }

    #[tokio::test]
    async fn test_take_profit_exit() {
        let mut h = harness();
        open_btc(&mut h).await;

        h.market.set_tickers(vec![ticker("BTC", 110.0, 5_000_000.0)]);
        h.controller.run_tick().await;

        assert!(h.controller.get_current_position().is_none());
        let events = drain(&mut h.events);
        assert!(matches!(&events[0], TradingEvent::PositionUpdate { position } if position.current_price == 110.0));
        assert!(events.iter().any(|e| matches!(e, TradingEvent::PositionClosed { reason: ExitReason::TakeProfit, .. })));
        // take-profit exits before any analysis
        assert_eq!(h.analyzer.calls("BTC"), 1);
    }

    #[tokio::test]
    async fn test_hold_keeps_position() {
        let mut h = harness();
        open_btc(&mut h).await;

        h.market.set_tickers(vec![ticker("BTC", 103.0, 5_000_000.0)]);
        h.analyzer.set("BTC", 55.0, Signal::Hold, 0.9);
        h.controller.run_tick().await;

        let position = h.controller.get_current_position().unwrap();
        assert!((position.profit_loss_pct - 3.0).abs() < 1e-9);
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TradingEvent::PositionUpdate { .. }));
    }

    #[tokio::test]
    async fn test_stop_loss_exit() {
        let mut h = harness();
        open_btc(&mut h).await;

        h.market.set_tickers(vec![ticker("BTC", 95.0, 5_000_000.0)]);
        h.analyzer.set("BTC", 20.0, Signal::Sell, 0.9);
        h.controller.run_tick().await;

        assert!(h.controller.get_current_position().is_none());
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            TradingEvent::PositionClosed { reason: ExitReason::StopLoss, profit_loss_pct, .. } if (*profit_loss_pct + 5.0).abs() < 1e-9
        )));
        assert!(!events.iter().any(|e| matches!(e, TradingEvent::ConfidenceExit { .. })));
    }

    #[tokio::test]
    async fn test_confidence_exit() {
        let mut h = harness();
        open_btc(&mut h).await;

        h.market.set_tickers(vec![ticker("BTC", 101.0, 5_000_000.0)]);
        h.analyzer.set("BTC", 60.0, Signal::Hold, 0.3);
        h.controller.run_tick().await;

        assert!(h.controller.get_current_position().is_none());
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, TradingEvent::PositionClosed { reason: ExitReason::ConfidenceExit, .. })));
        assert!(events.iter().any(|e| matches!(e, TradingEvent::ConfidenceExit { sentiment_confidence, .. } if *sentiment_confidence == 0.3)));
    }

    #[tokio::test]
    async fn test_failed_sell_keeps_position() {
        let mut h = harness();
        open_btc(&mut h).await;

        h.market.set_tickers(vec![ticker("BTC", 120.0, 5_000_000.0)]);
        h.gateway.set_failing(true);
        h.controller.run_tick().await;

        let position = h.controller.get_current_position().unwrap();
        assert_eq!(position.current_price, 120.0);
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, TradingEvent::OrderFailed { side: OrderSide::Sell, .. })));
        assert!(!events.iter().any(|e| matches!(e, TradingEvent::PositionClosed { .. })));
    }

    #[tokio::test]
    async fn test_emergency_stop_closes_position() {
        let mut h = harness();
        open_btc(&mut h).await;
        let orders_before = h.gateway.orders().len();

        assert!(h.controller.emergency_stop().await);

        assert!(!h.controller.is_running());
        assert!(h.controller.get_current_position().is_none());
        let orders = h.gateway.orders();
        assert_eq!(orders.len(), orders_before + 1);
        assert_eq!(orders.last().unwrap().reason, "emergency");

        let events = drain(&mut h.events);
        assert!(matches!(events.last(), Some(TradingEvent::EmergencyStopped { position_closed: true, .. })));
    }

    #[tokio::test]
    async fn test_emergency_stop_failed_sell() {
        let mut h = harness();
        open_btc(&mut h).await;
        let orders_before = h.gateway.orders().len();
        h.gateway.set_failing(true);

        assert!(!h.controller.emergency_stop().await);

        assert!(h.controller.get_current_position().is_some());
        assert_eq!(h.gateway.orders().len(), orders_before + 1);
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, TradingEvent::OrderFailed { side: OrderSide::Sell, .. })));
        assert!(matches!(events.last(), Some(TradingEvent::EmergencyStopped { position_closed: false, .. })));
    }

    #[tokio::test]
    async fn test_emergency_stop_without_position() {
        let mut h = harness();
        assert!(!h.controller.emergency_stop().await);
        assert!(h.gateway.orders().is_empty());
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TradingEvent::EmergencyStopped { position_closed: false, .. }));
    }

    #[tokio::test]
    async fn test_emergency_stop_waits_for_inflight_entry() {
        let mut h = harness();
        h.market.set_tickers(vec![ticker("BTC", 100.0, 5_000_000.0)]);
        h.analyzer.set("BTC", 90.0, Signal::Buy, 0.9);
        h.gateway.set_delay(Duration::from_millis(200));
        h.controller.start();

        let controller = h.controller.clone();
        let tick = tokio::spawn(async move { controller.run_tick().await });
        // the buy order is now sitting in the gateway
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.controller.emergency_stop().await);
        assert!(tick.await.unwrap());

        assert!(h.controller.get_current_position().is_none());
        let orders = h.gateway.orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[1].side, OrderSide::Sell);
        assert_eq!(orders[1].reason, "emergency");

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, TradingEvent::PositionOpened { .. })));
        assert!(matches!(events.last(), Some(TradingEvent::EmergencyStopped { position_closed: true, .. })));
    }

    #[tokio::test]
    async fn test_tick_loop_runs_sequentially_until_stopped() {
        let h = harness_with_interval(Duration::from_millis(20));
        h.market.set_tickers(vec![ticker("BTC", 100.0, 5_000_000.0)]);
        // each tick outlasts the period
        h.market.set_delay(Duration::from_millis(50));
        h.analyzer.set("BTC", 50.0, Signal::Hold, 0.9);

        assert!(h.controller.start());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(h.controller.stop());

        let status = h.controller.status();
        assert!(status.ticks_run >= 2, "only {} ticks ran", status.ticks_run);
        assert_eq!(status.ticks_skipped, 0);
        assert_eq!(h.market.max_concurrent_ticker_calls(), 1);

        // let a tick caught mid-flight finish, then nothing more runs
        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls = h.market.ticker_calls();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.market.ticker_calls(), calls);
    }

    #[tokio::test]
    async fn test_status_reports_execution_counters() {
        let mut h = harness();
        open_btc(&mut h).await;

        h.gateway.set_failing(true);
        h.market.set_tickers(vec![ticker("BTC", 120.0, 5_000_000.0)]);
        h.controller.run_tick().await;

        let execution = h.controller.status().execution;
        assert_eq!(execution.orders_sent, 2);
        assert_eq!(execution.orders_filled, 1);
        assert_eq!(execution.orders_failed, 1);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let h = harness();
        h.market.set_tickers(vec![ticker("BTC", 100.0, 5_000_000.0)]);
        h.market.set_delay(Duration::from_millis(200));
        h.analyzer.set("BTC", 50.0, Signal::Hold, 0.9);
        h.controller.start();

        let (a, b) = tokio::join!(h.controller.run_tick(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.controller.run_tick().await
        });

        assert!(a);
        assert!(!b);
        assert_eq!(h.controller.status().ticks_skipped, 1);
        assert_eq!(h.controller.status().ticks_run, 1);
    }

    #[tokio::test]
    async fn test_stop_during_tick_discards_entry() {
        let mut h = harness();
        h.market.set_tickers(vec![ticker("BTC", 100.0, 5_000_000.0)]);
        h.analyzer.set("BTC", 90.0, Signal::Buy, 0.9);
        h.analyzer.set_delay(Duration::from_millis(200));
        h.controller.start();

        let controller = h.controller.clone();
        let tick = tokio::spawn(async move { controller.run_tick().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.controller.stop();
        assert!(tick.await.unwrap());

        assert!(h.controller.get_current_position().is_none());
        assert!(h.gateway.orders().is_empty());
        let events = drain(&mut h.events);
        assert!(!events.iter().any(|e| matches!(e, TradingEvent::PositionOpened { .. })));
    }

    #[tokio::test]
    async fn test_ticker_failure_still_manages_position() {
        let mut h = harness();
        open_btc(&mut h).await;

        h.market.set_fail_all_tickers(true);
        h.market.set_tickers(vec![ticker("BTC", 110.0, 5_000_000.0)]);
        h.controller.run_tick().await;

        assert!(h.controller.get_current_position().is_none());
        let events = drain(&mut h.events);
        assert!(matches!(&events[0], TradingEvent::Error { context, .. } if context == "tickers"));
    }

    #[tokio::test]
    async fn test_update_config_emits_event() {
        let mut h = harness();
        let config = h
            .controller
            .update_config(TradingConfigUpdate { profit_target: Some(3.0), ..Default::default() })
            .unwrap();
        assert_eq!(config.profit_target, 3.0);
        assert!(matches!(drain(&mut h.events).as_slice(), [TradingEvent::ConfigUpdated { .. }]));

        assert!(h
            .controller
            .update_config(TradingConfigUpdate { profit_target: Some(-1.0), ..Default::default() })
            .is_err());
        assert!(drain(&mut h.events).is_empty());
    }
}
