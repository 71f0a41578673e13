//! Strategy module - score fusion and the per-symbol analysis pipeline

pub mod analyzer;
pub mod scoring;

pub use analyzer::{
    AnalysisError, AnalyzerSettings, MarketAnalysis, MarketAnalyzer, OrderBookSource, SymbolAnalyzer,
};
pub use scoring::{IndicatorScores, Signal, VolatilitySnapshot, Weights};
