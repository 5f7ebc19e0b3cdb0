//! Position count, daily quota, trade spacing and runaway protection.

use chrono::{DateTime, Duration, Utc};
use gate_core::{Direction, RiskLimits, TradeEvent};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::cooldown;

/// An open position as the gate remembers it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveTrade {
    pub contract_id: String,
    pub symbol: String,
    pub stake: Decimal,
    pub direction: Option<Direction>,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_concurrent: usize,
    max_per_symbol: usize,
    max_per_day: u32,
    spacing: Duration,
    runaway_count: usize,
    runaway_window: Duration,

    active_trades: HashMap<String, ActiveTrade>,
    daily_trade_count: u32,
    daily_up_count: u32,
    daily_down_count: u32,
    last_trade_time: Option<DateTime<Utc>>,
    /// Opening times of the most recent trades, oldest first.
    recent_trade_timestamps: VecDeque<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(limits: &RiskLimits) -> Self {
        Self {
            max_concurrent: limits.max_concurrent_trades,
            max_per_symbol: limits.max_concurrent_per_symbol,
            max_per_day: limits.max_trades_per_day,
            spacing: cooldown::window(limits.cooldown_seconds),
            runaway_count: limits.runaway_trade_count,
            runaway_window: cooldown::window_minutes(limits.runaway_window_minutes),
            active_trades: HashMap::new(),
            daily_trade_count: 0,
            daily_up_count: 0,
            daily_down_count: 0,
            last_trade_time: None,
            recent_trade_timestamps: VecDeque::with_capacity(limits.runaway_trade_count + 1),
        }
    }

    /// Seed daily counters from persisted history.
    pub fn seed(&mut self, trades: u32, up: u32, down: u32) {
        self.daily_trade_count = trades;
        self.daily_up_count = up;
        self.daily_down_count = down;
    }

    pub fn active_count(&self) -> usize {
        self.active_trades.len()
    }

    pub fn active_on_symbol(&self, symbol: &str) -> usize {
        self.active_trades
            .values()
            .filter(|t| t.symbol == symbol)
            .count()
    }

    pub fn active_trade(&self, contract_id: &str) -> Option<&ActiveTrade> {
        self.active_trades.get(contract_id)
    }

    pub fn active_trades(&self) -> impl Iterator<Item = &ActiveTrade> {
        self.active_trades.values()
    }

    pub fn concurrency_reached(&self) -> bool {
        self.active_trades.len() >= self.max_concurrent
    }

    pub fn symbol_concurrency_reached(&self, symbol: &str) -> bool {
        self.active_on_symbol(symbol) >= self.max_per_symbol
    }

    pub fn daily_limit_reached(&self) -> bool {
        self.daily_trade_count >= self.max_per_day
    }

    /// Seconds until the next trade may open under the base spacing rule.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        cooldown::remaining_since(self.last_trade_time, self.spacing.num_seconds(), now)
    }

    /// Time spanned by a full runaway window, when that span is too short.
    pub fn runaway_span(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.recent_trade_timestamps.len() < self.runaway_count {
            return None;
        }
        let oldest = *self.recent_trade_timestamps.front()?;
        let span = now - oldest;
        (span < self.runaway_window).then_some(span)
    }

    pub fn record_open(&mut self, event: &TradeEvent, now: DateTime<Utc>) {
        self.active_trades.insert(
            event.contract_id.clone(),
            ActiveTrade {
                contract_id: event.contract_id.clone(),
                symbol: event.symbol.clone(),
                stake: event.stake,
                direction: event.direction,
                opened_at: event.open_time.unwrap_or(now),
            },
        );

        self.daily_trade_count += 1;
        match event.direction {
            Some(Direction::Up) => self.daily_up_count += 1,
            Some(Direction::Down) => self.daily_down_count += 1,
            None => {}
        }

        self.last_trade_time = Some(now);
        self.recent_trade_timestamps.push_back(now);
        while self.recent_trade_timestamps.len() > self.runaway_count {
            self.recent_trade_timestamps.pop_front();
        }
    }

    pub fn record_close(&mut self, contract_id: &str) -> Option<ActiveTrade> {
        self.active_trades.remove(contract_id)
    }

    /// Daily quota and runaway window only. Open positions and spacing survive.
    pub fn reset_daily(&mut self) {
        self.daily_trade_count = 0;
        self.daily_up_count = 0;
        self.daily_down_count = 0;
        self.recent_trade_timestamps.clear();
    }

    pub fn daily_trade_count(&self) -> u32 {
        self.daily_trade_count
    }

    pub fn daily_up_count(&self) -> u32 {
        self.daily_up_count
    }

    pub fn daily_down_count(&self) -> u32 {
        self.daily_down_count
    }

    pub fn last_trade_time(&self) -> Option<DateTime<Utc>> {
        self.last_trade_time
    }

    pub fn recent_trade_count(&self) -> usize {
        self.recent_trade_timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limits: RiskLimits) -> RateLimiter {
        RateLimiter::new(&limits)
    }

    fn event(id: &str, symbol: &str) -> TradeEvent {
        TradeEvent::new(id, symbol, Decimal::from(10)).with_direction(Direction::Down)
    }

    #[test]
    fn test_concurrency_and_symbol_caps() {
        let mut rl = limiter(RiskLimits {
            max_concurrent_trades: 2,
            max_concurrent_per_symbol: 1,
            ..Default::default()
        });
        let now = Utc::now();

        rl.record_open(&event("C1", "R_25"), now);
        assert!(!rl.concurrency_reached());
        assert!(rl.symbol_concurrency_reached("R_25"));
        assert!(!rl.symbol_concurrency_reached("R_50"));

        rl.record_open(&event("C2", "R_50"), now);
        assert!(rl.concurrency_reached());

        assert!(rl.record_close("C1").is_some());
        assert!(!rl.concurrency_reached());
        assert!(rl.record_close("C1").is_none());
    }

    #[test]
    fn test_spacing_cooldown() {
        let mut rl = limiter(RiskLimits {
            cooldown_seconds: 30,
            ..Default::default()
        });
        let now = Utc::now();
        assert_eq!(rl.cooldown_remaining(now), None);

        rl.record_open(&event("C1", "R_25"), now);
        assert_eq!(rl.cooldown_remaining(now + Duration::seconds(10)), Some(20));
        assert_eq!(rl.cooldown_remaining(now + Duration::seconds(30)), None);
    }

    #[test]
    fn test_runaway_window_is_bounded_and_trips() {
        let mut rl = limiter(RiskLimits {
            runaway_trade_count: 3,
            runaway_window_minutes: 10,
            max_concurrent_trades: 100,
            max_concurrent_per_symbol: 100,
            ..Default::default()
        });
        let start = Utc::now();

        for i in 0..5 {
            rl.record_open(&event(&format!("C{i}"), "R_25"), start + Duration::minutes(i));
        }
        assert_eq!(rl.recent_trade_count(), 3);

        // Oldest kept trade opened at minute 2.
        assert!(rl.runaway_span(start + Duration::minutes(11)).is_some());
        assert!(rl.runaway_span(start + Duration::minutes(12)).is_none());
    }

    #[test]
    fn test_daily_counters_and_reset() {
        let mut rl = limiter(RiskLimits {
            max_trades_per_day: 2,
            max_concurrent_trades: 10,
            max_concurrent_per_symbol: 10,
            ..Default::default()
        });
        let now = Utc::now();
        rl.record_open(&event("C1", "R_25"), now);
        rl.record_open(
            &TradeEvent::new("C2", "R_25", Decimal::from(10)).with_direction(Direction::Up),
            now,
        );

        assert!(rl.daily_limit_reached());
        assert_eq!(rl.daily_up_count(), 1);
        assert_eq!(rl.daily_down_count(), 1);

        rl.reset_daily();
        assert!(!rl.daily_limit_reached());
        assert_eq!(rl.recent_trade_count(), 0);
        assert_eq!(rl.active_count(), 2);
    }
}
