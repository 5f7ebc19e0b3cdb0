//! Trade event, signal and position types shared by the gate and its callers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[serde(alias = "BUY", alias = "up", alias = "buy")]
    Up,
    #[serde(alias = "SELL", alias = "down", alias = "sell")]
    Down,
}

impl Direction {
    /// Parse a loosely spelled direction ("UP", "buy", "Sell", ...).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "UP" | "BUY" => Some(Self::Up),
            "DOWN" | "SELL" => Some(Self::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy signal metadata attached to a trade request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeSignal {
    pub direction: Option<Direction>,
    /// Signal score on the strategy's own scale.
    pub confidence: Decimal,
    pub entry_price: Option<Decimal>,
    /// Minimum reward-to-risk the strategy requires for this setup.
    pub min_rr_required: Option<Decimal>,
    /// Reward-to-risk the strategy computed for this setup.
    pub risk_reward_ratio: Option<Decimal>,
}

impl TradeSignal {
    pub fn new(direction: Direction, confidence: Decimal) -> Self {
        Self {
            direction: Some(direction),
            confidence,
            ..Default::default()
        }
    }
}

/// A trade that the executor has just opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub contract_id: String,
    pub stake: Decimal,
    pub symbol: String,
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Broker-side open time. The gate's own clock is used when absent.
    #[serde(default)]
    pub open_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signal: Option<TradeSignal>,
}

impl TradeEvent {
    pub fn new(contract_id: impl Into<String>, symbol: impl Into<String>, stake: Decimal) -> Self {
        Self {
            contract_id: contract_id.into(),
            stake,
            symbol: symbol.into(),
            direction: None,
            open_time: None,
            signal: None,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_open_time(mut self, open_time: DateTime<Utc>) -> Self {
        self.open_time = Some(open_time);
        self
    }

    pub fn with_signal(mut self, signal: TradeSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Snapshot of an open position handed to the exit checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    #[serde(default)]
    pub contract_id: Option<String>,
    pub stake: Decimal,
    pub symbol: String,
    #[serde(default)]
    pub open_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub risk_reward_ratio: Option<Decimal>,
}

impl OpenPosition {
    pub fn new(contract_id: impl Into<String>, symbol: impl Into<String>, stake: Decimal) -> Self {
        Self {
            contract_id: Some(contract_id.into()),
            stake,
            symbol: symbol.into(),
            open_time: None,
            risk_reward_ratio: None,
        }
    }

    pub fn opened_at(mut self, open_time: DateTime<Utc>) -> Self {
        self.open_time = Some(open_time);
        self
    }

    pub fn with_risk_reward(mut self, ratio: Decimal) -> Self {
        self.risk_reward_ratio = Some(ratio);
        self
    }

    /// `pnl` as a percentage of the stake, saturating at the `Decimal`
    /// bounds. `None` without a positive stake.
    pub fn pnl_pct(&self, pnl: Decimal) -> Option<Decimal> {
        if self.stake <= Decimal::ZERO {
            return None;
        }
        let pct = pnl
            .checked_div(self.stake)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED));
        Some(pct.unwrap_or(if pnl.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        }))
    }
}

impl From<&TradeEvent> for OpenPosition {
    fn from(event: &TradeEvent) -> Self {
        Self {
            contract_id: Some(event.contract_id.clone()),
            stake: event.stake,
            symbol: event.symbol.clone(),
            open_time: event.open_time,
            risk_reward_ratio: event.signal.as_ref().and_then(|s| s.risk_reward_ratio),
        }
    }
}

/// A persisted trade as returned by the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub profit: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub direction: Option<Direction>,
}

impl TradeRecord {
    pub fn outcome(&self) -> TradeOutcome {
        TradeOutcome::normalize(&self.status, self.profit)
    }
}

/// Normalized result of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

const WIN_ALIASES: &[&str] = &["win", "won", "profit", "take_profit", "tp"];
const LOSS_ALIASES: &[&str] = &["loss", "lost", "stop_loss", "sl"];

impl TradeOutcome {
    /// Map a broker status string onto an outcome.
    ///
    /// Explicit win/loss spellings win outright. Anything else (neutral
    /// spellings such as "sold" or "breakeven", or unknown statuses) is
    /// decided by the sign of `pnl`.
    pub fn normalize(status: &str, pnl: Decimal) -> Self {
        let raw = status.trim().to_ascii_lowercase();
        if WIN_ALIASES.contains(&raw.as_str()) {
            return Self::Win;
        }
        if LOSS_ALIASES.contains(&raw.as_str()) {
            return Self::Loss;
        }

        if pnl > Decimal::ZERO {
            Self::Win
        } else if pnl < Decimal::ZERO {
            Self::Loss
        } else {
            Self::Breakeven
        }
    }

    pub fn is_loss(&self) -> bool {
        matches!(self, Self::Loss)
    }
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Win => f.write_str("win"),
            Self::Loss => f.write_str("loss"),
            Self::Breakeven => f.write_str("breakeven"),
        }
    }
}

/// Why the gate asked for an open position to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "trailing_profit_exit")]
    TrailingProfit,
    #[serde(rename = "stagnation_exit")]
    Stagnation,
    #[serde(rename = "emergency_daily_loss")]
    EmergencyDailyLoss,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrailingProfit => "trailing_profit_exit",
            Self::Stagnation => "stagnation_exit",
            Self::EmergencyDailyLoss => "emergency_daily_loss",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
