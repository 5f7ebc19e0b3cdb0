//! The risk gate: one instance per trading user/strategy.
//!
//! `can_trade` runs a fixed sequence of checks and returns the first failure.
//! `record_trade_opened` / `record_trade_closed` feed the state those checks
//! read. Exit checks (`check_trailing_profit`, `check_stagnation_exit`,
//! `check_emergency_close`) are evaluated per open position by the caller.
//!
//! The gate is single-writer. Callers driving one gate from several tasks
//! must serialize access themselves.

use chrono::{DateTime, Duration, Utc};
use gate_core::{
    ExitReason, OpenPosition, RiskLimits, TradeEvent, TradeOutcome, TradeSignal,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::history::{load_daily_stats, DailyStats, TradeHistory};
use crate::loss_streak::LossStreakTracker;
use crate::rate_limiter::RateLimiter;
use crate::stagnation::StagnationMonitor;
use crate::trailing::{TrailingDecision, TrailingState, TrailingStopEngine};

/// Daily P&L share of the loss cap that triggers an emergency close.
const EMERGENCY_CLOSE_RATIO: Decimal = Decimal::from_parts(9, 0, 0, false, 1);
/// Daily P&L share of the loss cap that logs a warning.
const DAILY_LOSS_WARN_RATIO: Decimal = Decimal::from_parts(8, 0, 0, false, 1);

/// Symbol used for closes of contracts the gate never saw open.
const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// Verdict of a pre-trade check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    /// Identifies the failing check, or the success message.
    pub reason: String,
}

impl GateDecision {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
        }
    }

    fn block(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Verdict of a position exit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExitDecision {
    pub should_close: bool,
    pub reason: Option<ExitReason>,
}

impl ExitDecision {
    fn hold() -> Self {
        Self::default()
    }

    fn close(reason: ExitReason) -> Self {
        Self {
            should_close: true,
            reason: Some(reason),
        }
    }

    /// Reason as the caller-facing string ("" when holding).
    pub fn reason_str(&self) -> &'static str {
        self.reason.map(|r| r.as_str()).unwrap_or("")
    }
}

/// Read-only view of thresholds and live counters.
#[derive(Debug, Clone, Serialize)]
pub struct LimitsSnapshot {
    pub user_id: Option<String>,
    pub limits: RiskLimits,
    pub reference_stake: Decimal,
    pub max_daily_loss: Decimal,
    pub active_trades: usize,
    pub active_contracts: Vec<String>,
    pub daily_trade_count: u32,
    pub daily_up_count: u32,
    pub daily_down_count: u32,
    pub daily_pnl: Decimal,
    pub consecutive_losses: u32,
    pub loss_cooldown_until: Option<DateTime<Utc>>,
    pub symbol_cooldowns: BTreeMap<String, DateTime<Utc>>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub cooldown_remaining_secs: i64,
    pub recent_trade_count: usize,
    pub trailing_positions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateStatistics {
    pub daily_trades: u32,
    pub daily_pnl: Decimal,
    pub consecutive_losses: u32,
    pub up_trades: u32,
    pub down_trades: u32,
    pub active_trades: usize,
}

/// Per-strategy trade risk gate.
pub struct RiskGate<C: Clock = SystemClock> {
    user_id: Option<String>,
    limits: RiskLimits,
    clock: C,
    rate: RateLimiter,
    streaks: LossStreakTracker,
    trailing: TrailingStopEngine,
    stagnation: StagnationMonitor,
    daily_pnl: Decimal,
    /// Stake used for daily-loss sizing; follows the last opened trade.
    stake: Decimal,
    near_daily_loss_warned: bool,
}

impl RiskGate<SystemClock> {
    pub fn new(limits: RiskLimits) -> Self {
        Self::with_clock(limits, SystemClock)
    }
}

impl<C: Clock> RiskGate<C> {
    pub fn with_clock(limits: RiskLimits, clock: C) -> Self {
        info!(
            max_concurrent = limits.max_concurrent_trades,
            max_per_day = limits.max_trades_per_day,
            max_consecutive_losses = limits.max_consecutive_losses,
            daily_loss_multiplier = %limits.daily_loss_multiplier,
            "Risk gate initialized"
        );
        Self {
            user_id: None,
            rate: RateLimiter::new(&limits),
            streaks: LossStreakTracker::new(&limits),
            trailing: TrailingStopEngine::from_limits(&limits),
            stagnation: StagnationMonitor::from_limits(&limits),
            daily_pnl: Decimal::ZERO,
            stake: limits.reference_stake,
            near_daily_loss_warned: false,
            limits,
            clock,
        }
    }

    /// Build a gate seeded from today's persisted trades. A failing store
    /// starts the gate fresh.
    pub async fn from_history(
        limits: RiskLimits,
        clock: C,
        user_id: &str,
        store: &dyn TradeHistory,
    ) -> Self {
        let stats = load_daily_stats(store, user_id, clock.now()).await;
        let mut gate = Self::with_clock(limits, clock);
        gate.user_id = Some(user_id.to_string());
        gate.seed(&stats);
        gate
    }

    /// Overwrite daily counters and the global streak.
    pub fn seed(&mut self, stats: &DailyStats) {
        self.rate
            .seed(stats.trade_count, stats.up_count, stats.down_count);
        self.daily_pnl = stats.pnl;
        self.streaks.seed(stats.consecutive_losses);
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// May a new trade on `symbol` open now? An empty symbol skips the
    /// symbol-scoped checks.
    pub fn can_trade(&mut self, symbol: &str) -> GateDecision {
        let now = self.clock.now();
        let has_symbol = !symbol.is_empty();

        if has_symbol {
            if self.limits.is_symbol_blocked(symbol) {
                return GateDecision::block(format!("{symbol}: blocked from trading"));
            }
            if !self.limits.is_symbol_supported(symbol) {
                return GateDecision::block(format!("{symbol}: unsupported symbol"));
            }
        }

        if self.rate.concurrency_reached() {
            return GateDecision::block(format!(
                "Max concurrent trades reached ({}/{})",
                self.rate.active_count(),
                self.limits.max_concurrent_trades
            ));
        }

        if has_symbol && self.rate.symbol_concurrency_reached(symbol) {
            return GateDecision::block(format!(
                "{symbol}: max concurrent trades reached ({}/{})",
                self.rate.active_on_symbol(symbol),
                self.limits.max_concurrent_per_symbol
            ));
        }

        if self.rate.daily_limit_reached() {
            return GateDecision::block(format!(
                "Daily trade limit reached ({})",
                self.limits.max_trades_per_day
            ));
        }

        self.streaks.refresh_global(now);
        if let Some(secs) = self.streaks.global_cooldown_remaining(now) {
            return GateDecision::block(format!(
                "Circuit breaker cooldown active ({secs}s remaining)"
            ));
        }

        if let Some(secs) = self.rate.cooldown_remaining(now) {
            return GateDecision::block(format!("Cooldown active ({secs}s remaining)"));
        }

        if self.streaks.global_threshold_reached() {
            let streak = self.streaks.consecutive_losses();
            self.streaks.arm_global(now);
            return GateDecision::block(format!(
                "Circuit breaker triggered after {streak} consecutive losses: \
                 circuit breaker cooldown active ({}s remaining)",
                self.limits.loss_cooldown_seconds
            ));
        }

        let max_loss = self.limits.max_daily_loss(self.stake);
        if self.daily_pnl < -max_loss {
            return GateDecision::block(format!(
                "Daily loss limit reached (${} < ${})",
                self.daily_pnl.round_dp(2),
                (-max_loss).round_dp(2)
            ));
        }

        if let Some(span) = self.rate.runaway_span(now) {
            return GateDecision::block(format!(
                "Runaway trade protection activated ({} trades in {}s, limit {} per {}m)",
                self.rate.recent_trade_count(),
                span.num_seconds(),
                self.limits.runaway_trade_count,
                self.limits.runaway_window_minutes
            ));
        }

        if !has_symbol {
            return GateDecision::allow("All checks passed");
        }

        if let Some(secs) = self.streaks.symbol_cooldown_remaining(symbol, now) {
            return GateDecision::block(format!("{symbol}: cooldown active ({secs}s remaining)"));
        }

        if self.streaks.symbol_threshold_reached(symbol) {
            let streak = self.streaks.symbol_consecutive_losses(symbol);
            self.streaks.arm_symbol_streak_cooldown(symbol, now);
            return GateDecision::block(format!(
                "{symbol}: cooldown active after {streak} consecutive losses ({}s remaining)",
                self.limits.symbol_loss_cooldown_seconds
            ));
        }

        if self.streaks.short_loss_threshold_reached(symbol, now) {
            let count = self.streaks.short_loss_count(symbol, now);
            self.streaks.arm_short_loss_cooldown(symbol, now);
            return GateDecision::block(format!(
                "{symbol}: cooldown active after {count} quick losses ({}s remaining)",
                self.limits.short_loss_cooldown_seconds
            ));
        }

        GateDecision::allow("All checks passed")
    }

    /// `can_trade` plus the stake, confidence and risk/reward filters.
    pub fn can_open_trade(
        &mut self,
        symbol: &str,
        stake: Decimal,
        signal: &TradeSignal,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
    ) -> GateDecision {
        let decision = self.can_trade(symbol);
        if !decision.allowed {
            return decision;
        }

        if stake <= Decimal::ZERO {
            return GateDecision::block(format!("Stake must be positive (got {stake})"));
        }

        if let Some(direction) = signal.direction {
            if let Some(min) = self.limits.min_confidence_for(symbol, direction) {
                if signal.confidence < min {
                    return GateDecision::block(format!(
                        "{symbol} {direction} blocked: confidence {} < {}",
                        signal.confidence, min
                    ));
                }
            }
        }

        if let (Some(entry), Some(target), Some(stop), Some(min_rr)) =
            (signal.entry_price, take_profit, stop_loss, signal.min_rr_required)
        {
            let reward = target.saturating_sub(entry).abs();
            let risk = entry.saturating_sub(stop).abs();
            if risk.is_zero() {
                return GateDecision::block(format!(
                    "RR gate blocked: zero risk (entry {entry}, stop {stop})"
                ));
            }
            let ratio = reward.checked_div(risk).unwrap_or(Decimal::MAX);
            if ratio.saturating_add(self.limits.rr_tolerance) < min_rr {
                return GateDecision::block(format!(
                    "RR gate blocked: {} < {} required",
                    ratio.round_dp(2),
                    min_rr
                ));
            }
        }

        GateDecision::allow("OK")
    }

    pub fn record_trade_opened(&mut self, event: &TradeEvent) {
        if event.contract_id.is_empty() {
            warn!(symbol = %event.symbol, "Trade opened without a contract id, ignoring");
            return;
        }
        let now = self.clock.now();
        self.rate.record_open(event, now);
        if event.stake > Decimal::ZERO {
            self.stake = event.stake;
        }

        info!(
            contract_id = %event.contract_id,
            symbol = %event.symbol,
            stake = %event.stake,
            direction = ?event.direction,
            active = self.rate.active_count(),
            daily_trades = self.rate.daily_trade_count(),
            "Trade opened"
        );
    }

    /// Apply a closed trade. `duration` falls back to the time since the
    /// gate saw the trade open.
    pub fn record_trade_closed(
        &mut self,
        contract_id: &str,
        pnl: Decimal,
        status: &str,
        duration: Option<Duration>,
    ) {
        let now = self.clock.now();
        let active = self.rate.record_close(contract_id);
        let symbol = active
            .as_ref()
            .map(|t| t.symbol.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SYMBOL)
            .to_string();
        let duration = duration.or_else(|| active.as_ref().map(|t| now - t.opened_at));

        self.daily_pnl = self.daily_pnl.saturating_add(pnl);
        let outcome = TradeOutcome::normalize(status, pnl);
        self.streaks.record_outcome(&symbol, outcome, duration, now);
        self.trailing.remove(contract_id);

        info!(
            contract_id = %contract_id,
            symbol = %symbol,
            pnl = %pnl,
            outcome = %outcome,
            duration_secs = duration.map(|d| d.num_seconds()),
            daily_pnl = %self.daily_pnl,
            consecutive_losses = self.streaks.consecutive_losses(),
            "Trade closed"
        );

        let max_loss = self.limits.max_daily_loss(self.stake);
        if !self.near_daily_loss_warned && self.daily_pnl <= -(max_loss * DAILY_LOSS_WARN_RATIO) {
            warn!(
                daily_pnl = %self.daily_pnl,
                max_daily_loss = %max_loss,
                "Daily loss approaching limit"
            );
            self.near_daily_loss_warned = true;
        }
    }

    /// Stagnation rule for one open position. An exit drops any trailing state.
    pub fn check_stagnation_exit(
        &mut self,
        position: &OpenPosition,
        current_pnl: Decimal,
    ) -> ExitDecision {
        let now = self.clock.now();
        match self.stagnation.check(position, current_pnl, now) {
            Some(reason) => {
                if let Some(id) = position.contract_id.as_deref() {
                    self.trailing.remove(id);
                }
                ExitDecision::close(reason)
            }
            None => ExitDecision::hold(),
        }
    }

    pub fn check_trailing_profit(
        &mut self,
        position: &OpenPosition,
        current_pnl: Decimal,
    ) -> TrailingDecision {
        self.trailing.check(position, current_pnl)
    }

    /// Close a tracked position when it would take the day to within 10% of
    /// the daily loss cap.
    pub fn check_emergency_close(&self, contract_id: &str, current_pnl: Decimal) -> ExitDecision {
        if self.rate.active_trade(contract_id).is_none() {
            return ExitDecision::hold();
        }
        let threshold = self.limits.max_daily_loss(self.stake) * EMERGENCY_CLOSE_RATIO;
        let projected = self.daily_pnl.saturating_add(current_pnl);
        if projected <= -threshold {
            error!(
                contract_id = %contract_id,
                daily_pnl = %self.daily_pnl,
                current_pnl = %current_pnl,
                threshold = %threshold,
                "Emergency close: daily loss limit nearly reached"
            );
            return ExitDecision::close(ExitReason::EmergencyDailyLoss);
        }
        ExitDecision::hold()
    }

    /// Daily quota, P&L, global streak and runaway window. Open positions,
    /// symbol cooldowns, short-loss history and the global cooldown survive.
    pub fn reset_daily_stats(&mut self) {
        self.rate.reset_daily();
        self.streaks.reset_daily();
        self.daily_pnl = Decimal::ZERO;
        self.near_daily_loss_warned = false;
        info!(user_id = ?self.user_id, "Daily stats reset");
    }

    /// Longest remaining cooldown in seconds (base, global and, with a
    /// symbol, that symbol's). Zero when none is running.
    pub fn cooldown_remaining(&self, symbol: Option<&str>) -> i64 {
        self.cooldown_remaining_at(symbol, self.clock.now())
    }

    fn cooldown_remaining_at(&self, symbol: Option<&str>, now: DateTime<Utc>) -> i64 {
        [
            self.rate.cooldown_remaining(now),
            self.streaks.global_cooldown_remaining(now),
            symbol.and_then(|s| self.streaks.symbol_cooldown_remaining(s, now)),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }

    /// Set the stake used for daily-loss sizing. Non-positive values are ignored.
    pub fn update_stake(&mut self, stake: Decimal) {
        if stake > Decimal::ZERO {
            self.stake = stake;
        }
    }

    pub fn get_current_limits(&self) -> LimitsSnapshot {
        let now = self.clock.now();
        let mut active_contracts: Vec<String> = self
            .rate
            .active_trades()
            .map(|t| t.contract_id.clone())
            .collect();
        active_contracts.sort();

        LimitsSnapshot {
            user_id: self.user_id.clone(),
            limits: self.limits.clone(),
            reference_stake: self.stake,
            max_daily_loss: self.limits.max_daily_loss(self.stake),
            active_trades: self.rate.active_count(),
            active_contracts,
            daily_trade_count: self.rate.daily_trade_count(),
            daily_up_count: self.rate.daily_up_count(),
            daily_down_count: self.rate.daily_down_count(),
            daily_pnl: self.daily_pnl,
            consecutive_losses: self.streaks.consecutive_losses(),
            loss_cooldown_until: self.streaks.loss_cooldown_until(),
            symbol_cooldowns: self.streaks.active_symbol_cooldowns(now),
            last_trade_time: self.rate.last_trade_time(),
            cooldown_remaining_secs: self.cooldown_remaining_at(None, now),
            recent_trade_count: self.rate.recent_trade_count(),
            trailing_positions: self.trailing.tracked_count(),
        }
    }

    pub fn statistics(&self) -> GateStatistics {
        GateStatistics {
            daily_trades: self.rate.daily_trade_count(),
            daily_pnl: self.daily_pnl,
            consecutive_losses: self.streaks.consecutive_losses(),
            up_trades: self.rate.daily_up_count(),
            down_trades: self.rate.daily_down_count(),
            active_trades: self.rate.active_count(),
        }
    }

    pub fn trailing_state(&self, contract_id: &str) -> Option<&TrailingState> {
        self.trailing.state(contract_id)
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.streaks.consecutive_losses()
    }

    pub fn loss_cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.streaks.loss_cooldown_until()
    }

    pub fn symbol_consecutive_losses(&self, symbol: &str) -> u32 {
        self.streaks.symbol_consecutive_losses(symbol)
    }

    pub fn daily_pnl(&self) -> Decimal {
        self.daily_pnl
    }

    pub fn active_trade_count(&self) -> usize {
        self.rate.active_count()
    }

    pub fn reference_stake(&self) -> Decimal {
        self.stake
    }
}
