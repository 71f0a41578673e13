//! Technical indicators and their 0-100 scores
//!
//! Every calculation fails fast with [`IndicatorError::InsufficientData`]
//! instead of returning a placeholder. Scores are step functions where a
//! higher value means a stronger buy reading.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_RSI_PERIOD: usize = 14;
pub const DEFAULT_ATR_PERIOD: usize = 14;
pub const DEFAULT_BOLLINGER_PERIOD: usize = 20;
pub const DEFAULT_BOLLINGER_K: f64 = 2.0;
pub const DEFAULT_VOLUME_PERIOD: usize = 20;

const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("insufficient data for {indicator}: need {required} samples, got {provided}")]
    InsufficientData {
        indicator: &'static str,
        required: usize,
        provided: usize,
    },
    #[error("invalid period 0 for {0}")]
    InvalidPeriod(&'static str),
}

fn require(indicator: &'static str, period: usize, required: usize, provided: usize) -> Result<(), IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod(indicator));
    }
    if provided < required {
        return Err(IndicatorError::InsufficientData { indicator, required, provided });
    }
    Ok(())
}

// ==========================================
// RSI
// ==========================================

/// Wilder-smoothed RSI. Needs `period + 1` prices.
pub fn rsi(prices: &[f64], period: usize) -> Result<f64, IndicatorError> {
    require("rsi", period, period + 1, prices.len())?;

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: f64| if c > 0.0 { c } else { 0.0 };
    let loss = |c: f64| if c < 0.0 { -c } else { 0.0 };

    let n = period as f64;
    let mut avg_gain = changes[..period].iter().map(|&c| gain(c)).sum::<f64>() / n;
    let mut avg_loss = changes[..period].iter().map(|&c| loss(c)).sum::<f64>() / n;

    for &c in &changes[period..] {
        avg_gain = (avg_gain * (n - 1.0) + gain(c)) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss(c)) / n;
    }

    if avg_loss == 0.0 {
        return Ok(100.0);
    }

    let rs = avg_gain / avg_loss;
    Ok(100.0 - 100.0 / (1.0 + rs))
}

pub fn score_rsi(rsi: f64) -> f64 {
    if rsi < 30.0 {
        100.0
    } else if rsi < 40.0 {
        70.0
    } else if rsi < 60.0 {
        50.0
    } else if rsi < 70.0 {
        30.0
    } else {
        0.0
    }
}

// ==========================================
// EMA / MACD
// ==========================================

/// EMA seeded from the first sample (no SMA warm-up). Needs `period` prices.
pub fn ema(prices: &[f64], period: usize) -> Result<f64, IndicatorError> {
    require("ema", period, period, prices.len())?;
    Ok(seeded_ema(prices, period))
}

fn seeded_ema(prices: &[f64], period: usize) -> f64 {
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut iter = prices.iter();
    let mut value = iter.next().copied().unwrap_or_default();
    for &price in iter {
        value = (price - value) * multiplier + value;
    }
    value
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// EMA(12) - EMA(26). The signal line is the 9-period EMA of a history that
/// holds only the current MACD value, so it always equals the MACD line.
pub fn macd(prices: &[f64]) -> Result<Macd, IndicatorError> {
    let fast = ema(prices, MACD_FAST)?;
    let slow = ema(prices, MACD_SLOW)?;
    let line = fast - slow;

    let history = [line];
    let signal = seeded_ema(&history, MACD_SIGNAL);

    Ok(Macd {
        macd: line,
        signal,
        histogram: line - signal,
    })
}

pub fn score_macd(curr: &Macd, prev: &Macd) -> f64 {
    if curr.macd > curr.signal && prev.macd <= prev.signal {
        return 100.0;
    }
    if curr.macd < curr.signal && prev.macd >= prev.signal {
        return 0.0;
    }
    if curr.histogram > 0.0 {
        50.0 + (curr.histogram / 1000.0).min(1.0) * 30.0
    } else {
        50.0 - (curr.histogram.abs() / 1000.0).min(1.0) * 30.0
    }
}

// ==========================================
// SMA / Std Dev / Bollinger
// ==========================================

/// Mean of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Result<f64, IndicatorError> {
    require("sma", period, period, values.len())?;
    let tail = &values[values.len() - period..];
    Ok(tail.iter().sum::<f64>() / period as f64)
}

/// Population standard deviation of the last `period` values.
pub fn std_dev(values: &[f64], period: usize) -> Result<f64, IndicatorError> {
    let mean = sma(values, period)?;
    let tail = &values[values.len() - period..];
    let variance = tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    Ok(variance.sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger_bands(prices: &[f64], period: usize, k: f64) -> Result<BollingerBands, IndicatorError> {
    let middle = sma(prices, period)?;
    let sd = std_dev(prices, period)?;
    Ok(BollingerBands {
        upper: middle + k * sd,
        middle,
        lower: middle - k * sd,
    })
}

/// Scores where `price` sits inside the bands. Zero-width bands give a NaN
/// position, which falls through every tier to 0.
pub fn score_bollinger(price: f64, bands: &BollingerBands) -> f64 {
    let position = (price - bands.lower) / (bands.upper - bands.lower);
    if position < 0.2 {
        100.0
    } else if position < 0.4 {
        70.0
    } else if position < 0.6 {
        50.0
    } else if position < 0.8 {
        30.0
    } else {
        0.0
    }
}

// ==========================================
// Volume
// ==========================================

pub fn avg_volume(volumes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    require("avg_volume", period, period, volumes.len())?;
    sma(volumes, period)
}

pub fn score_volume(current: f64, avg: f64) -> f64 {
    let ratio = current / avg;
    if ratio >= 3.0 {
        100.0
    } else if ratio >= 2.0 {
        80.0
    } else if ratio >= 1.5 {
        60.0
    } else if ratio >= 1.2 {
        50.0
    } else if ratio >= 1.0 {
        40.0
    } else {
        20.0
    }
}

// ==========================================
// ATR
// ==========================================

/// ATR over close prices only: each true range is the absolute
/// close-to-close move, averaged over the last `period` ranges.
pub fn atr(prices: &[f64], period: usize) -> Result<f64, IndicatorError> {
    require("atr", period, period + 1, prices.len())?;
    let ranges: Vec<f64> = prices
        .windows(2)
        .map(|w| w[0].max(w[1]) - w[0].min(w[1]))
        .collect();
    sma(&ranges, period)
}
