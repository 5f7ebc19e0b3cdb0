//! Risk Gate
//!
//! Pre-trade checks, circuit breakers and open-position exit rules for one
//! trading user/strategy.

pub mod clock;
pub mod cooldown;
pub mod gate;
pub mod history;
pub mod loss_streak;
pub mod rate_limiter;
pub mod stagnation;
pub mod trailing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{ExitDecision, GateDecision, GateStatistics, LimitsSnapshot, RiskGate};
pub use history::{load_daily_stats, DailyStats, PgTradeHistory, TradeHistory};
pub use loss_streak::{LossStreakTracker, SymbolCooldownCause};
pub use rate_limiter::{ActiveTrade, RateLimiter};
pub use stagnation::StagnationMonitor;
pub use trailing::{TrailingDecision, TrailingState, TrailingStopEngine};
