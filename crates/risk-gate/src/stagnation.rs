//! Time-boxed exit for losing positions.

use chrono::{DateTime, Duration, Utc};
use gate_core::{ExitReason, OpenPosition, RiskLimits};
use rust_decimal::Decimal;
use tracing::warn;

use crate::cooldown;

/// Closes positions that have stayed in the red past a time threshold.
#[derive(Debug, Clone)]
pub struct StagnationMonitor {
    exit_after: Duration,
    loss_pct: Decimal,
    rr_grace_threshold: Decimal,
    extra_time: Duration,
}

impl StagnationMonitor {
    pub fn new(
        exit_after: Duration,
        loss_pct: Decimal,
        rr_grace_threshold: Decimal,
        extra_time: Duration,
    ) -> Self {
        Self {
            exit_after,
            loss_pct,
            rr_grace_threshold,
            extra_time,
        }
    }

    pub fn from_limits(limits: &RiskLimits) -> Self {
        Self::new(
            cooldown::window(limits.stagnation_exit_seconds),
            limits.stagnation_loss_pct,
            limits.stagnation_rr_grace_threshold,
            cooldown::window(limits.stagnation_extra_seconds),
        )
    }

    /// Time a position must be open before it can be cut. High risk/reward
    /// setups get the extra time on top.
    pub fn required_time(&self, position: &OpenPosition) -> Duration {
        match position.risk_reward_ratio {
            Some(rr) if rr > self.rr_grace_threshold => self.exit_after.checked_add(&self.extra_time).unwrap_or(self.exit_after),
            _ => self.exit_after,
        }
    }

    /// `Some(ExitReason::Stagnation)` when the position should be closed.
    pub fn check(
        &self,
        position: &OpenPosition,
        current_pnl: Decimal,
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        let open_time = position.open_time?;
        let time_open = now - open_time;
        if time_open < self.required_time(position) {
            return None;
        }
        if current_pnl >= Decimal::ZERO {
            return None;
        }

        let loss_pct = position.pnl_pct(current_pnl)?.abs();
        if loss_pct > self.loss_pct {
            warn!(
                symbol = %position.symbol,
                contract_id = ?position.contract_id,
                open_secs = time_open.num_seconds(),
                loss_pct = %loss_pct.round_dp(2),
                "Stagnation exit"
            );
            return Some(ExitReason::Stagnation);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(exit_secs: i64, loss_pct: i64, extra_secs: i64) -> StagnationMonitor {
        StagnationMonitor::new(
            Duration::seconds(exit_secs),
            Decimal::from(loss_pct),
            Decimal::new(25, 1),
            Duration::seconds(extra_secs),
        )
    }

    #[test]
    fn test_losing_position_past_threshold_exits() {
        let now = Utc::now();
        let pos = OpenPosition::new("C1", "R_25", Decimal::from(10))
            .opened_at(now - Duration::seconds(200));

        let reason = monitor(150, 10, 0).check(&pos, Decimal::from(-2), now);
        assert_eq!(reason, Some(ExitReason::Stagnation));
    }

    #[test]
    fn test_grace_extension_for_high_risk_reward() {
        let now = Utc::now();
        let monitor = monitor(120, 5, 60);
        let pos = OpenPosition::new("C1", "R_25", Decimal::from(10))
            .with_risk_reward(Decimal::from(3))
            .opened_at(now - Duration::seconds(170));

        assert_eq!(monitor.check(&pos, Decimal::from(-1), now), None);

        let pos = pos.opened_at(now - Duration::seconds(190));
        assert_eq!(
            monitor.check(&pos, Decimal::from(-1), now),
            Some(ExitReason::Stagnation)
        );
    }

    #[test]
    fn test_breakeven_and_profit_never_exit() {
        let now = Utc::now();
        let monitor = monitor(10, 1, 0);
        let pos = OpenPosition::new("C1", "R_25", Decimal::from(10))
            .opened_at(now - Duration::seconds(600));

        assert_eq!(monitor.check(&pos, Decimal::ZERO, now), None);
        assert_eq!(monitor.check(&pos, Decimal::from(3), now), None);
    }

    #[test]
    fn test_small_loss_is_held() {
        let now = Utc::now();
        let pos = OpenPosition::new("C1", "R_25", Decimal::from(10))
            .opened_at(now - Duration::seconds(600));
        // 3% of stake, threshold is strictly greater than 3%
        assert_eq!(monitor(10, 3, 0).check(&pos, Decimal::new(-3, 1), now), None);
    }

    #[test]
    fn test_missing_open_time_is_noop() {
        let pos = OpenPosition::new("C1", "R_25", Decimal::from(10));
        assert_eq!(monitor(0, 0, 0).check(&pos, Decimal::from(-5), Utc::now()), None);
    }

    #[test]
    fn test_extreme_loss_on_tiny_stake_exits() {
        let now = Utc::now();
        let pos = OpenPosition::new("C1", "R_25", Decimal::new(1, 4))
            .opened_at(now - Duration::seconds(600));
        let huge: Decimal = "-10000000000000000000000000".parse().unwrap();

        assert_eq!(
            monitor(10, 5, 0).check(&pos, huge, now),
            Some(ExitReason::Stagnation)
        );
    }

    #[test]
    fn test_zero_stake_is_noop() {
        let now = Utc::now();
        let pos = OpenPosition::new("C1", "R_25", Decimal::ZERO)
            .opened_at(now - Duration::seconds(600));
        assert_eq!(monitor(10, 5, 0).check(&pos, Decimal::from(-5), now), None);
    }
}
