//! Trading configuration
//!
//! Operator-editable settings for the trading controller. Updates are
//! validated and merged under a write lock; the controller takes one
//! snapshot per tick.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("investment percentage must be in (0, 100], got {0}")]
    InvestmentPercentage(f64),
    #[error("profit target must be positive, got {0}")]
    ProfitTarget(f64),
    #[error("minimum KRW volume must be non-negative, got {0}")]
    MinVolume(f64),
    #[error("unknown trading mode: {0}")]
    UnknownMode(String),
}

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    #[default]
    Simulation,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Simulation => write!(f, "simulation"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(TradingMode::Live),
            "simulation" | "paper" => Ok(TradingMode::Simulation),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingConfig {
    pub mode: TradingMode,
    /// Share of available KRW committed to an entry, in percent
    pub investment_percentage: f64,
    /// Take-profit threshold, in percent
    pub profit_target: f64,
    /// Instruments trading less KRW than this over 24h are never scanned
    pub min_volume_krw: f64,
    pub enabled: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Simulation,
            investment_percentage: 80.0,
            profit_target: 8.0,
            min_volume_krw: 3_000_000_000.0,
            enabled: false,
        }
    }
}

impl TradingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.investment_percentage > 0.0 && self.investment_percentage <= 100.0) {
            return Err(ConfigError::InvestmentPercentage(self.investment_percentage));
        }
        if !(self.profit_target > 0.0) {
            return Err(ConfigError::ProfitTarget(self.profit_target));
        }
        if !(self.min_volume_krw >= 0.0) {
            return Err(ConfigError::MinVolume(self.min_volume_krw));
        }
        Ok(())
    }
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingConfigUpdate {
    pub mode: Option<TradingMode>,
    pub investment_percentage: Option<f64>,
    pub profit_target: Option<f64>,
    pub min_volume_krw: Option<f64>,
    pub enabled: Option<bool>,
}

/// Holds the live trading configuration
pub struct ConfigManager {
    config: RwLock<TradingConfig>,
}

impl ConfigManager {
    pub fn new(config: TradingConfig) -> Self {
        info!(
            "Trading config: mode={}, invest={}%, target={}%, min volume={} KRW, enabled={}",
            config.mode, config.investment_percentage, config.profit_target, config.min_volume_krw, config.enabled
        );
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn get_config(&self) -> TradingConfig {
        self.config.read().clone()
    }

    /// Merge `update` into the current config. Nothing changes if the merged
    /// result is invalid.
    pub fn update(&self, update: TradingConfigUpdate) -> Result<TradingConfig, ConfigError> {
        let mut config = self.config.write();
        let mut next = config.clone();

        if let Some(mode) = update.mode {
            next.mode = mode;
        }
        if let Some(pct) = update.investment_percentage {
            next.investment_percentage = pct;
        }
        if let Some(target) = update.profit_target {
            next.profit_target = target;
        }
        if let Some(volume) = update.min_volume_krw {
            next.min_volume_krw = volume;
        }
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }

        next.validate()?;

        if next.mode != config.mode {
            info!("Trading mode changed to {}", next.mode);
        }
        if next.enabled != config.enabled {
            info!("Trading {}", if next.enabled { "ENABLED" } else { "DISABLED" });
        }
        if next.investment_percentage != config.investment_percentage {
            info!("Updated investment percentage to {}%", next.investment_percentage);
        }
        if next.profit_target != config.profit_target {
            info!("Updated profit target to {}%", next.profit_target);
        }
        if next.min_volume_krw != config.min_volume_krw {
            info!("Updated minimum volume to {} KRW", next.min_volume_krw);
        }

        *config = next.clone();
        Ok(next)
    }
}
