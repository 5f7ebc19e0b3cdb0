//! Gate Core Library
//!
//! Shared types, limits configuration and database helpers for the trade risk gate.

pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use crate::config::{
    ConfidenceRule, RiskLimitOverrides, RiskLimits, Settings, TrailTier, MAX_WINDOW_SECONDS,
};
pub use error::{Error, Result};
pub use types::{
    Direction, ExitReason, OpenPosition, TradeEvent, TradeOutcome, TradeRecord, TradeSignal,
};
