//! Tiered trailing-profit stop.
//!
//! Once a position's profit (as a percentage of stake) crosses the activation
//! threshold, the engine remembers the peak profit and closes the position if
//! profit falls more than a tier-dependent distance below that peak. The tier
//! is chosen from the peak, so bigger winners get a wider trail.
//!
//! An exit is latched: the state stays until the position is closed and every
//! later check repeats the exit.

use gate_core::{ExitReason, OpenPosition, RiskLimits, TrailTier};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Per-contract trailing state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailingState {
    pub trailing_active: bool,
    /// Never decreases while the state exists.
    pub highest_profit_pct: Decimal,
    /// Set once profit fell through the floor.
    pub exit_triggered: bool,
}

/// Outcome of a trailing check.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrailingDecision {
    pub should_close: bool,
    pub reason: Option<ExitReason>,
    /// True only on the call that first crossed the activation threshold.
    pub just_activated: bool,
}

impl TrailingDecision {
    fn hold() -> Self {
        Self::default()
    }

    fn activated() -> Self {
        Self {
            just_activated: true,
            ..Default::default()
        }
    }

    fn exit() -> Self {
        Self {
            should_close: true,
            reason: Some(ExitReason::TrailingProfit),
            just_activated: false,
        }
    }

    /// Reason as the caller-facing string ("" when holding).
    pub fn reason_str(&self) -> &'static str {
        self.reason.map(|r| r.as_str()).unwrap_or("")
    }
}

/// Trailing-stop state machine for every open contract of one gate.
#[derive(Debug, Clone)]
pub struct TrailingStopEngine {
    activation_pct: Decimal,
    /// Sorted by `min_profit_pct`, highest first.
    tiers: Vec<TrailTier>,
    states: HashMap<String, TrailingState>,
}

impl TrailingStopEngine {
    pub fn new(activation_pct: Decimal, mut tiers: Vec<TrailTier>) -> Self {
        tiers.sort_by(|a, b| b.min_profit_pct.cmp(&a.min_profit_pct));
        Self {
            activation_pct,
            tiers,
            states: HashMap::new(),
        }
    }

    pub fn from_limits(limits: &RiskLimits) -> Self {
        Self::new(limits.trail_activation_pct, limits.trail_tiers.clone())
    }

    /// Evaluate `current_pnl` for an open position.
    pub fn check(&mut self, position: &OpenPosition, current_pnl: Decimal) -> TrailingDecision {
        let contract_id = match position.contract_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => return TrailingDecision::hold(),
        };
        let Some(profit_pct) = position.pnl_pct(current_pnl) else {
            return TrailingDecision::hold();
        };

        let Some(state) = self.states.get_mut(contract_id) else {
            if profit_pct < self.activation_pct {
                return TrailingDecision::hold();
            }
            let distance = self.trail_distance(profit_pct);
            info!(
                contract_id = %contract_id,
                symbol = %position.symbol,
                profit_pct = %profit_pct.round_dp(2),
                distance_pct = %distance,
                floor_pct = %profit_pct.saturating_sub(distance).round_dp(2),
                "Trailing profit activated"
            );
            self.states.insert(
                contract_id.to_string(),
                TrailingState {
                    trailing_active: true,
                    highest_profit_pct: profit_pct,
                    exit_triggered: false,
                },
            );
            return TrailingDecision::activated();
        };

        if state.exit_triggered {
            return TrailingDecision::exit();
        }

        if profit_pct > state.highest_profit_pct {
            state.highest_profit_pct = profit_pct;
        }
        let peak = state.highest_profit_pct;
        let distance = trail_distance(&self.tiers, peak);
        let floor = peak.saturating_sub(distance);

        if profit_pct < floor {
            state.exit_triggered = true;
            warn!(
                contract_id = %contract_id,
                symbol = %position.symbol,
                profit_pct = %profit_pct.round_dp(2),
                peak_pct = %peak.round_dp(2),
                distance_pct = %distance,
                floor_pct = %floor.round_dp(2),
                "Trailing profit exit"
            );
            return TrailingDecision::exit();
        }

        debug!(
            contract_id = %contract_id,
            profit_pct = %profit_pct.round_dp(2),
            peak_pct = %peak.round_dp(2),
            floor_pct = %floor.round_dp(2),
            "Trailing profit holding"
        );
        TrailingDecision::hold()
    }

    /// Trail distance for a peak profit. Peaks below every tier use the
    /// lowest tier's distance.
    pub fn trail_distance(&self, peak_pct: Decimal) -> Decimal {
        trail_distance(&self.tiers, peak_pct)
    }

    pub fn state(&self, contract_id: &str) -> Option<&TrailingState> {
        self.states.get(contract_id)
    }

    /// Drop the state for a contract, whether or not trailing had activated.
    pub fn remove(&mut self, contract_id: &str) -> Option<TrailingState> {
        self.states.remove(contract_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }
}

fn trail_distance(tiers: &[TrailTier], peak_pct: Decimal) -> Decimal {
    tiers
        .iter()
        .find(|t| peak_pct >= t.min_profit_pct)
        .or_else(|| tiers.last())
        .map(|t| t.trail_distance_pct)
        .unwrap_or(Decimal::ZERO)
}
