//! Trading module - automated single-position trading

mod controller;
mod events;

pub use controller::{ControllerStatus, TradingController, DEFAULT_TICK_INTERVAL};
pub use events::{ExitReason, TradingEvent};
