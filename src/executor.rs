//! Order Execution
//!
//! The controller hands every order to an [`OrderGateway`]:
//! - [`SimulationGateway`] fills immediately against a fixed paper balance
//! - [`LiveGateway`] places a signed order on the exchange
//!
//! [`GatewayRouter`] picks one per tick from the configured mode.

use crate::exchange::{AccountApi, ExchangeError};
use crate::trading_config::TradingMode;
use crate::types::{Order, OrderFill};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Paper balance used in simulation mode
pub const SIMULATION_BALANCE_KRW: f64 = 10_000_000.0;

/// Execution errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    #[error("Order rejected: {0}")]
    OrderRejected(String),
    #[error("Exchange error: {0}")]
    Exchange(String),
}

impl From<ExchangeError> for ExecutionError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Auth(_) => ExecutionError::NotAuthenticated,
            ExchangeError::ApiError { message, .. } => ExecutionError::OrderRejected(message),
            other => ExecutionError::Exchange(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub orders_sent: u64,
    pub orders_filled: u64,
    pub orders_failed: u64,
}

#[derive(Default)]
struct Counters {
    orders_sent: AtomicU64,
    orders_filled: AtomicU64,
    orders_failed: AtomicU64,
}

impl Counters {
    fn record(&self, result: &Result<OrderFill, ExecutionError>) {
        self.orders_sent.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(_) => self.orders_filled.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.orders_failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> ExecutionStats {
        ExecutionStats {
            orders_sent: self.orders_sent.load(Ordering::Relaxed),
            orders_filled: self.orders_filled.load(Ordering::Relaxed),
            orders_failed: self.orders_failed.load(Ordering::Relaxed),
        }
    }
}

fn validate(order: &Order) -> Result<(), ExecutionError> {
    if !(order.quantity.is_finite() && order.quantity > 0.0) {
        return Err(ExecutionError::InvalidOrder(format!(
            "quantity must be positive, got {}",
            order.quantity
        )));
    }
    if order.symbol.is_empty() {
        return Err(ExecutionError::InvalidOrder("empty symbol".to_string()));
    }
    Ok(())
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    fn mode(&self) -> TradingMode;
    async fn available_krw(&self) -> Result<f64, ExecutionError>;
    async fn place_order(&self, order: &Order) -> Result<OrderFill, ExecutionError>;
    fn stats(&self) -> ExecutionStats;
}

// ==========================================
// Simulation
// ==========================================

pub struct SimulationGateway {
    balance_krw: f64,
    counters: Counters,
}

impl SimulationGateway {
    pub fn new() -> Self {
        Self::with_balance(SIMULATION_BALANCE_KRW)
    }

    pub fn with_balance(balance_krw: f64) -> Self {
        Self {
            balance_krw,
            counters: Counters::default(),
        }
    }
}

impl Default for SimulationGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderGateway for SimulationGateway {
    fn mode(&self) -> TradingMode {
        TradingMode::Simulation
    }

    async fn available_krw(&self) -> Result<f64, ExecutionError> {
        Ok(self.balance_krw)
    }

    async fn place_order(&self, order: &Order) -> Result<OrderFill, ExecutionError> {
        let result = validate(order).map(|_| OrderFill {
            order_id: format!("sim-{}", Uuid::new_v4()),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price: order.price,
            filled_at: Utc::now(),
            simulated: true,
        });

        if result.is_ok() {
            info!(
                "[SIM] {} {} x {:.8} ({})",
                order.side, order.symbol, order.quantity, order.reason
            );
        }
        self.counters.record(&result);
        result
    }

    fn stats(&self) -> ExecutionStats {
        self.counters.snapshot()
    }
}

// ==========================================
// Live
// ==========================================

pub struct LiveGateway {
    account: Arc<dyn AccountApi>,
    counters: Counters,
}

impl LiveGateway {
    pub fn new(account: Arc<dyn AccountApi>) -> Self {
        Self {
            account,
            counters: Counters::default(),
        }
    }
}

#[async_trait]
impl OrderGateway for LiveGateway {
    fn mode(&self) -> TradingMode {
        TradingMode::Live
    }

    async fn available_krw(&self) -> Result<f64, ExecutionError> {
        let balance = self.account.get_balance("KRW").await?;
        Ok(balance.available_krw)
    }

    async fn place_order(&self, order: &Order) -> Result<OrderFill, ExecutionError> {
        let result = match validate(order) {
            Ok(()) => self
                .account
                .place_order(order)
                .await
                .map(|order_id| OrderFill {
                    order_id,
                    symbol: order.symbol.clone(),
                    side: order.side,
                    quantity: order.quantity,
                    price: order.price,
                    filled_at: Utc::now(),
                    simulated: false,
                })
                .map_err(ExecutionError::from),
            Err(e) => Err(e),
        };

        match &result {
            Ok(fill) => info!("[LIVE] {} {} x {:.8} accepted as {}", order.side, order.symbol, order.quantity, fill.order_id),
            Err(e) => warn!("[LIVE] {} {} failed: {}", order.side, order.symbol, e),
        }
        self.counters.record(&result);
        result
    }

    fn stats(&self) -> ExecutionStats {
        self.counters.snapshot()
    }
}

// ==========================================
// Router
// ==========================================

/// Selects the gateway matching a [`TradingMode`]
#[derive(Clone)]
pub struct GatewayRouter {
    simulation: Arc<dyn OrderGateway>,
    live: Arc<dyn OrderGateway>,
}

impl GatewayRouter {
    pub fn new(simulation: Arc<dyn OrderGateway>, live: Arc<dyn OrderGateway>) -> Self {
        Self { simulation, live }
    }

    pub fn for_mode(&self, mode: TradingMode) -> Arc<dyn OrderGateway> {
        match mode {
            TradingMode::Simulation => self.simulation.clone(),
            TradingMode::Live => self.live.clone(),
        }
    }
}
