//! Consecutive-loss tracking and the cooldowns derived from it.
//!
//! Three independent counters feed the circuit breakers:
//! - the global streak (any symbol), which arms the global loss cooldown as
//!   soon as a close crosses the threshold
//! - a per-symbol streak
//! - recent short-duration losses per symbol, counted inside the lookback
//!   window
//!
//! The two symbol-scoped counters only arm a symbol cooldown when the gate
//! next asks about that symbol.

use chrono::{DateTime, Duration, Utc};
use gate_core::{RiskLimits, TradeOutcome};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{error, info, warn};

use crate::cooldown;

/// Why a symbol was put on cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolCooldownCause {
    ConsecutiveLosses,
    ShortLosses,
}

#[derive(Debug, Clone)]
struct StreakLimits {
    max_consecutive_losses: u32,
    loss_cooldown: Duration,
    symbol_max_consecutive_losses: u32,
    symbol_loss_cooldown: Duration,
    short_loss_duration: Duration,
    short_loss_lookback: Duration,
    short_loss_count_threshold: usize,
    short_loss_cooldown: Duration,
}

/// Loss streak state for one gate.
#[derive(Debug, Clone)]
pub struct LossStreakTracker {
    limits: StreakLimits,
    consecutive_losses: u32,
    loss_cooldown_until: Option<DateTime<Utc>>,
    symbol_consecutive_losses: HashMap<String, u32>,
    symbol_cooldown_until: HashMap<String, DateTime<Utc>>,
    /// (symbol, closed_at) of quick losses, oldest first.
    recent_short_losses: VecDeque<(String, DateTime<Utc>)>,
    near_breaker_warned: bool,
}

impl LossStreakTracker {
    pub fn new(limits: &RiskLimits) -> Self {
        Self {
            limits: StreakLimits {
                max_consecutive_losses: limits.max_consecutive_losses,
                loss_cooldown: cooldown::window(limits.loss_cooldown_seconds),
                symbol_max_consecutive_losses: limits.symbol_max_consecutive_losses,
                symbol_loss_cooldown: cooldown::window(limits.symbol_loss_cooldown_seconds),
                short_loss_duration: cooldown::window(limits.short_loss_duration_seconds),
                short_loss_lookback: cooldown::window(limits.short_loss_lookback_seconds),
                short_loss_count_threshold: limits.short_loss_count_threshold,
                short_loss_cooldown: cooldown::window(limits.short_loss_cooldown_seconds),
            },
            consecutive_losses: 0,
            loss_cooldown_until: None,
            symbol_consecutive_losses: HashMap::new(),
            symbol_cooldown_until: HashMap::new(),
            recent_short_losses: VecDeque::new(),
            near_breaker_warned: false,
        }
    }

    /// Seed the global streak from persisted history.
    pub fn seed(&mut self, consecutive_losses: u32) {
        self.consecutive_losses = consecutive_losses;
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn symbol_consecutive_losses(&self, symbol: &str) -> u32 {
        self.symbol_consecutive_losses
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }

    pub fn loss_cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.loss_cooldown_until
    }

    pub fn symbol_cooldown_until(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.symbol_cooldown_until.get(symbol).copied()
    }

    /// Symbol cooldowns still running at `now`.
    pub fn active_symbol_cooldowns(&self, now: DateTime<Utc>) -> BTreeMap<String, DateTime<Utc>> {
        self.symbol_cooldown_until
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(symbol, until)| (symbol.clone(), *until))
            .collect()
    }

    /// Apply a closed trade's outcome. Only the global cooldown is armed here.
    pub fn record_outcome(
        &mut self,
        symbol: &str,
        outcome: TradeOutcome,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        if !outcome.is_loss() {
            if self.consecutive_losses > 0 {
                info!(
                    previous_streak = self.consecutive_losses,
                    "Non-loss recorded - consecutive losses reset"
                );
            }
            self.consecutive_losses = 0;
            self.near_breaker_warned = false;
            self.symbol_consecutive_losses.insert(symbol.to_string(), 0);
            return;
        }

        self.consecutive_losses += 1;
        let symbol_streak = {
            let streak = self
                .symbol_consecutive_losses
                .entry(symbol.to_string())
                .or_insert(0);
            *streak += 1;
            *streak
        };

        info!(
            symbol = %symbol,
            consecutive_losses = self.consecutive_losses,
            max_consecutive_losses = self.limits.max_consecutive_losses,
            symbol_streak,
            "Loss recorded"
        );

        if self.consecutive_losses + 1 == self.limits.max_consecutive_losses
            && !self.near_breaker_warned
        {
            warn!(
                consecutive_losses = self.consecutive_losses,
                threshold = self.limits.max_consecutive_losses,
                "One loss away from circuit breaker"
            );
            self.near_breaker_warned = true;
        }

        if self.global_threshold_reached() {
            self.arm_global(now);
        }

        if duration.is_some_and(|d| d < self.limits.short_loss_duration) {
            self.prune_short_losses(now);
            self.recent_short_losses.push_back((symbol.to_string(), now));
        }
    }

    /// Clear an expired global cooldown. Returns true when it just expired;
    /// the streak starts clean afterwards.
    pub fn refresh_global(&mut self, now: DateTime<Utc>) -> bool {
        match self.loss_cooldown_until {
            Some(until) if now >= until => {
                self.loss_cooldown_until = None;
                self.consecutive_losses = 0;
                self.near_breaker_warned = false;
                warn!("Circuit breaker cooldown expired, trading resumed");
                true
            }
            _ => false,
        }
    }

    pub fn global_cooldown_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.loss_cooldown_until
            .and_then(|until| cooldown::remaining_until(until, now))
    }

    pub fn global_threshold_reached(&self) -> bool {
        self.consecutive_losses >= self.limits.max_consecutive_losses
    }

    /// Arm the global loss cooldown from `now`.
    pub fn arm_global(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = now + self.limits.loss_cooldown;
        self.loss_cooldown_until = Some(until);
        error!(
            consecutive_losses = self.consecutive_losses,
            cooldown_secs = self.limits.loss_cooldown.num_seconds(),
            until = %until,
            "Circuit breaker triggered - blocking all new trades"
        );
        until
    }

    pub fn symbol_cooldown_remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<i64> {
        self.symbol_cooldown_until
            .get(symbol)
            .and_then(|until| cooldown::remaining_until(*until, now))
    }

    pub fn symbol_threshold_reached(&self, symbol: &str) -> bool {
        self.symbol_consecutive_losses(symbol) >= self.limits.symbol_max_consecutive_losses
    }

    /// Arm the symbol streak cooldown and start the symbol's streak over.
    pub fn arm_symbol_streak_cooldown(&mut self, symbol: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let streak = self.symbol_consecutive_losses(symbol);
        let until = now + self.limits.symbol_loss_cooldown;
        self.apply_symbol_cooldown(
            symbol,
            until,
            SymbolCooldownCause::ConsecutiveLosses,
            streak as usize,
            now,
        );
        self.symbol_consecutive_losses.insert(symbol.to_string(), 0);
        until
    }

    /// Quick losses on `symbol` still inside the lookback window.
    pub fn short_loss_count(&mut self, symbol: &str, now: DateTime<Utc>) -> usize {
        self.prune_short_losses(now);
        self.recent_short_losses
            .iter()
            .filter(|(s, _)| s == symbol)
            .count()
    }

    pub fn short_loss_threshold_reached(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.short_loss_count(symbol, now) >= self.limits.short_loss_count_threshold
    }

    /// Arm the short-loss cooldown. The quick losses that tripped it are
    /// consumed so they cannot re-arm it once it expires.
    pub fn arm_short_loss_cooldown(&mut self, symbol: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let count = self.short_loss_count(symbol, now);
        let until = now + self.limits.short_loss_cooldown;
        self.apply_symbol_cooldown(symbol, until, SymbolCooldownCause::ShortLosses, count, now);
        self.recent_short_losses.retain(|(s, _)| s != symbol);
        until
    }

    /// Global streak only; symbol state and short-loss history survive a day roll.
    pub fn reset_daily(&mut self) {
        self.consecutive_losses = 0;
        self.near_breaker_warned = false;
    }

    fn prune_short_losses(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.limits.short_loss_lookback;
        while self
            .recent_short_losses
            .front()
            .is_some_and(|(_, at)| *at < cutoff)
        {
            self.recent_short_losses.pop_front();
        }
    }

    /// Symbol cooldowns only ever extend.
    fn apply_symbol_cooldown(
        &mut self,
        symbol: &str,
        until: DateTime<Utc>,
        cause: SymbolCooldownCause,
        count: usize,
        now: DateTime<Utc>,
    ) {
        if let Some(existing) = self.symbol_cooldown_until.get(symbol) {
            if until <= *existing {
                return;
            }
        }
        self.symbol_cooldown_until.insert(symbol.to_string(), until);
        warn!(
            symbol = %symbol,
            cause = ?cause,
            count,
            cooldown_secs = cooldown::remaining_until(until, now).unwrap_or(0),
            "Symbol cooldown applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_consecutive_losses: 3,
            loss_cooldown_seconds: 60,
            symbol_max_consecutive_losses: 2,
            symbol_loss_cooldown_seconds: 600,
            short_loss_duration_seconds: 60,
            short_loss_lookback_seconds: 7200,
            short_loss_count_threshold: 2,
            short_loss_cooldown_seconds: 900,
            ..Default::default()
        }
    }

    #[test]
    fn test_streak_arms_global_cooldown() {
        let now = Utc::now();
        let mut tracker = LossStreakTracker::new(&limits());

        tracker.record_outcome("A", TradeOutcome::Loss, None, now);
        tracker.record_outcome("B", TradeOutcome::Loss, None, now);
        assert!(tracker.loss_cooldown_until().is_none());

        tracker.record_outcome("C", TradeOutcome::Loss, None, now);
        assert_eq!(tracker.consecutive_losses(), 3);
        assert_eq!(tracker.global_cooldown_remaining(now), Some(60));
    }

    #[test]
    fn test_expiry_resets_streak() {
        let now = Utc::now();
        let mut tracker = LossStreakTracker::new(&limits());
        for _ in 0..3 {
            tracker.record_outcome("A", TradeOutcome::Loss, None, now);
        }

        assert!(!tracker.refresh_global(now + Duration::seconds(30)));
        assert_eq!(tracker.consecutive_losses(), 3);

        assert!(tracker.refresh_global(now + Duration::seconds(60)));
        assert_eq!(tracker.consecutive_losses(), 0);
        assert!(tracker.loss_cooldown_until().is_none());
    }

    #[test]
    fn test_non_loss_resets_both_streaks() {
        let now = Utc::now();
        let mut tracker = LossStreakTracker::new(&limits());
        tracker.record_outcome("A", TradeOutcome::Loss, None, now);
        assert_eq!(tracker.symbol_consecutive_losses("A"), 1);

        tracker.record_outcome("A", TradeOutcome::Breakeven, None, now);
        assert_eq!(tracker.consecutive_losses(), 0);
        assert_eq!(tracker.symbol_consecutive_losses("A"), 0);
    }

    #[test]
    fn test_symbol_streak_waits_for_arming() {
        let now = Utc::now();
        let mut tracker = LossStreakTracker::new(&limits());
        tracker.record_outcome("A", TradeOutcome::Loss, None, now);
        tracker.record_outcome("A", TradeOutcome::Loss, None, now);

        assert!(tracker.symbol_threshold_reached("A"));
        assert!(!tracker.symbol_threshold_reached("B"));
        assert_eq!(tracker.symbol_cooldown_remaining("A", now), None);

        tracker.arm_symbol_streak_cooldown("A", now);
        assert_eq!(tracker.symbol_cooldown_remaining("A", now), Some(600));
        assert_eq!(tracker.symbol_cooldown_remaining("B", now), None);
        // Arming starts the symbol streak over.
        assert_eq!(tracker.symbol_consecutive_losses("A"), 0);
    }

    #[test]
    fn test_short_losses_arm_and_are_consumed() {
        let now = Utc::now();
        let lim = RiskLimits {
            symbol_max_consecutive_losses: 99,
            ..limits()
        };
        let mut tracker = LossStreakTracker::new(&lim);

        tracker.record_outcome("A", TradeOutcome::Loss, Some(Duration::seconds(30)), now);
        assert_eq!(tracker.short_loss_count("A", now), 1);
        assert!(!tracker.short_loss_threshold_reached("A", now));
        tracker.record_outcome("A", TradeOutcome::Loss, Some(Duration::seconds(45)), now);
        assert!(tracker.short_loss_threshold_reached("A", now));
        assert_eq!(tracker.symbol_cooldown_remaining("A", now), None);

        tracker.arm_short_loss_cooldown("A", now);
        assert_eq!(tracker.symbol_cooldown_remaining("A", now), Some(900));
        assert_eq!(tracker.short_loss_count("A", now), 0);
    }

    #[test]
    fn test_slow_losses_are_not_short() {
        let now = Utc::now();
        let mut tracker = LossStreakTracker::new(&limits());
        tracker.record_outcome("A", TradeOutcome::Loss, Some(Duration::seconds(60)), now);
        tracker.record_outcome("A", TradeOutcome::Win, Some(Duration::seconds(5)), now);
        assert_eq!(tracker.short_loss_count("A", now), 0);
    }

    #[test]
    fn test_short_losses_pruned_by_lookback() {
        let now = Utc::now();
        let mut tracker = LossStreakTracker::new(&limits());
        tracker.record_outcome("A", TradeOutcome::Loss, Some(Duration::seconds(10)), now);

        assert_eq!(tracker.short_loss_count("A", now + Duration::seconds(7200)), 1);
        assert_eq!(tracker.short_loss_count("A", now + Duration::seconds(7201)), 0);
    }

    #[test]
    fn test_symbol_cooldown_only_extends() {
        let now = Utc::now();
        let mut tracker = LossStreakTracker::new(&limits());
        tracker.arm_short_loss_cooldown("A", now); // 900s
        tracker.arm_symbol_streak_cooldown("A", now); // 600s, shorter
        assert_eq!(tracker.symbol_cooldown_remaining("A", now), Some(900));
    }

    #[test]
    fn test_reset_daily_keeps_symbol_state() {
        let now = Utc::now();
        let mut tracker = LossStreakTracker::new(&limits());
        tracker.record_outcome("A", TradeOutcome::Loss, None, now);
        tracker.record_outcome("A", TradeOutcome::Loss, None, now);
        tracker.arm_symbol_streak_cooldown("A", now);

        tracker.reset_daily();
        assert_eq!(tracker.consecutive_losses(), 0);
        assert!(tracker.symbol_cooldown_until("A").is_some());
    }
}
