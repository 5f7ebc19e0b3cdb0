//! Risk limit configuration.
//!
//! [`RiskLimits`] carries every tunable of the gate with its default. Per-user
//! adjustments arrive as a [`RiskLimitOverrides`] (every field optional) and are
//! resolved once, at construction, by [`RiskLimits::with_overrides`].

use crate::types::Direction;
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Longest time window any limit may configure (366 days).
pub const MAX_WINDOW_SECONDS: i64 = 366 * 24 * 60 * 60;

/// One band of the trailing-stop tier table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailTier {
    /// Peak profit (% of stake) at which this band starts.
    pub min_profit_pct: Decimal,
    /// Allowed retracement below the peak (% of stake).
    pub trail_distance_pct: Decimal,
}

impl TrailTier {
    pub fn new(min_profit_pct: Decimal, trail_distance_pct: Decimal) -> Self {
        Self {
            min_profit_pct,
            trail_distance_pct,
        }
    }
}

/// Minimum signal confidence for a symbol/direction pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRule {
    pub symbol: String,
    pub direction: Direction,
    pub min_confidence: Decimal,
}

/// Resolved gate configuration for one user/strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Open positions allowed across all symbols.
    pub max_concurrent_trades: usize,
    /// Open positions allowed on a single symbol.
    pub max_concurrent_per_symbol: usize,
    /// Minimum spacing between opened trades.
    pub cooldown_seconds: i64,
    pub max_trades_per_day: u32,

    /// Global consecutive losses before the circuit breaker arms.
    pub max_consecutive_losses: u32,
    pub loss_cooldown_seconds: i64,
    /// Daily loss cap as a multiple of the reference stake.
    pub daily_loss_multiplier: Decimal,
    /// Reference stake for daily-loss sizing until the first trade opens.
    pub reference_stake: Decimal,

    pub symbol_max_consecutive_losses: u32,
    pub symbol_loss_cooldown_seconds: i64,

    /// A loss that closes faster than this counts as a short loss.
    pub short_loss_duration_seconds: i64,
    pub short_loss_lookback_seconds: i64,
    pub short_loss_count_threshold: usize,
    pub short_loss_cooldown_seconds: i64,

    /// Trades allowed inside the runaway window.
    pub runaway_trade_count: usize,
    pub runaway_window_minutes: i64,

    pub stagnation_exit_seconds: i64,
    /// Loss (% of stake) beyond which a stale position is closed.
    pub stagnation_loss_pct: Decimal,
    /// Setups with a risk/reward above this get `stagnation_extra_seconds` more time.
    pub stagnation_rr_grace_threshold: Decimal,
    pub stagnation_extra_seconds: i64,

    /// Profit (% of stake) that switches trailing on.
    pub trail_activation_pct: Decimal,
    pub trail_tiers: Vec<TrailTier>,

    /// Slack applied to the risk/reward comparison so exact ties always pass.
    pub rr_tolerance: Decimal,
    pub confidence_rules: Vec<ConfidenceRule>,

    /// Empty means every symbol is tradable.
    pub allowed_symbols: Vec<String>,
    pub blocked_symbols: Vec<String>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_concurrent_trades: 1,
            max_concurrent_per_symbol: 1,
            cooldown_seconds: 30,
            max_trades_per_day: 80,

            max_consecutive_losses: 3,
            loss_cooldown_seconds: 3 * 60 * 60,
            daily_loss_multiplier: Decimal::new(20, 1), // 2.0x stake
            reference_stake: Decimal::from(50),

            symbol_max_consecutive_losses: 2,
            symbol_loss_cooldown_seconds: 45 * 60,

            short_loss_duration_seconds: 60,
            short_loss_lookback_seconds: 2 * 60 * 60,
            short_loss_count_threshold: 2,
            short_loss_cooldown_seconds: 30 * 60,

            runaway_trade_count: 10,
            runaway_window_minutes: 10,

            stagnation_exit_seconds: 75,
            stagnation_loss_pct: Decimal::new(30, 1), // 3.0%
            stagnation_rr_grace_threshold: Decimal::new(25, 1),
            stagnation_extra_seconds: 0,

            trail_activation_pct: Decimal::new(80, 1), // 8.0%
            trail_tiers: vec![
                TrailTier::new(Decimal::from(30), Decimal::from(7)),
                TrailTier::new(Decimal::from(15), Decimal::from(5)),
                TrailTier::new(Decimal::from(12), Decimal::from(3)),
            ],

            rr_tolerance: Decimal::new(1, 6),
            confidence_rules: vec![ConfidenceRule {
                symbol: "R_50".to_string(),
                direction: Direction::Down,
                min_confidence: Decimal::new(90, 1),
            }],

            allowed_symbols: Vec::new(),
            blocked_symbols: Vec::new(),
        }
    }
}

/// Optional per-user overrides. `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimitOverrides {
    pub max_concurrent_trades: Option<usize>,
    pub max_concurrent_per_symbol: Option<usize>,
    pub cooldown_seconds: Option<i64>,
    pub max_trades_per_day: Option<u32>,
    pub max_consecutive_losses: Option<u32>,
    pub loss_cooldown_seconds: Option<i64>,
    pub daily_loss_multiplier: Option<Decimal>,
    pub reference_stake: Option<Decimal>,
    pub symbol_max_consecutive_losses: Option<u32>,
    pub symbol_loss_cooldown_seconds: Option<i64>,
    pub short_loss_duration_seconds: Option<i64>,
    pub short_loss_lookback_seconds: Option<i64>,
    pub short_loss_count_threshold: Option<usize>,
    pub short_loss_cooldown_seconds: Option<i64>,
    pub runaway_trade_count: Option<usize>,
    pub runaway_window_minutes: Option<i64>,
    pub stagnation_exit_seconds: Option<i64>,
    pub stagnation_loss_pct: Option<Decimal>,
    pub stagnation_rr_grace_threshold: Option<Decimal>,
    pub stagnation_extra_seconds: Option<i64>,
    pub trail_activation_pct: Option<Decimal>,
    pub trail_tiers: Option<Vec<TrailTier>>,
    pub rr_tolerance: Option<Decimal>,
    pub confidence_rules: Option<Vec<ConfidenceRule>>,
    pub allowed_symbols: Option<Vec<String>>,
    pub blocked_symbols: Option<Vec<String>>,
}

macro_rules! apply_overrides {
    ($limits:ident, $overrides:ident; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$overrides.$field {
                $limits.$field = value.clone();
            }
        )+
    };
}

impl RiskLimits {
    /// Resolve overrides on top of these limits.
    pub fn with_overrides(&self, overrides: &RiskLimitOverrides) -> Self {
        let mut limits = self.clone();
        apply_overrides!(limits, overrides;
            max_concurrent_trades,
            max_concurrent_per_symbol,
            cooldown_seconds,
            max_trades_per_day,
            max_consecutive_losses,
            loss_cooldown_seconds,
            daily_loss_multiplier,
            reference_stake,
            symbol_max_consecutive_losses,
            symbol_loss_cooldown_seconds,
            short_loss_duration_seconds,
            short_loss_lookback_seconds,
            short_loss_count_threshold,
            short_loss_cooldown_seconds,
            runaway_trade_count,
            runaway_window_minutes,
            stagnation_exit_seconds,
            stagnation_loss_pct,
            stagnation_rr_grace_threshold,
            stagnation_extra_seconds,
            trail_activation_pct,
            trail_tiers,
            rr_tolerance,
            confidence_rules,
            allowed_symbols,
            blocked_symbols,
        );
        limits
    }

    /// Reject configurations the gate cannot evaluate meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_trades == 0 {
            return Err(config_error("max_concurrent_trades must be at least 1"));
        }
        if self.max_concurrent_per_symbol == 0 {
            return Err(config_error("max_concurrent_per_symbol must be at least 1"));
        }
        if self.runaway_trade_count == 0 {
            return Err(config_error("runaway_trade_count must be at least 1"));
        }
        if self.max_consecutive_losses == 0 {
            return Err(config_error("max_consecutive_losses must be at least 1"));
        }
        if self.symbol_max_consecutive_losses == 0 {
            return Err(config_error("symbol_max_consecutive_losses must be at least 1"));
        }
        if self.short_loss_count_threshold == 0 {
            return Err(config_error("short_loss_count_threshold must be at least 1"));
        }
        if self.daily_loss_multiplier <= Decimal::ZERO {
            return Err(config_error("daily_loss_multiplier must be positive"));
        }
        if self.reference_stake <= Decimal::ZERO {
            return Err(config_error("reference_stake must be positive"));
        }
        if self.trail_tiers.is_empty() {
            return Err(config_error("trail_tiers must contain at least one tier"));
        }
        if self
            .trail_tiers
            .iter()
            .any(|t| t.trail_distance_pct < Decimal::ZERO)
        {
            return Err(config_error("trail_distance_pct must not be negative"));
        }
        let windows = [
            self.cooldown_seconds,
            self.loss_cooldown_seconds,
            self.symbol_loss_cooldown_seconds,
            self.short_loss_duration_seconds,
            self.short_loss_lookback_seconds,
            self.short_loss_cooldown_seconds,
            self.runaway_window_minutes.saturating_mul(60),
            self.stagnation_exit_seconds,
            self.stagnation_extra_seconds,
        ];
        if windows.iter().any(|s| *s < 0) {
            return Err(config_error("time windows must not be negative"));
        }
        if windows.iter().any(|s| *s > MAX_WINDOW_SECONDS) {
            return Err(config_error("time windows must not exceed 366 days"));
        }
        Ok(())
    }

    /// Daily loss cap in currency for a given reference stake.
    pub fn max_daily_loss(&self, stake: Decimal) -> Decimal {
        self.daily_loss_multiplier.saturating_mul(stake)
    }

    pub fn is_symbol_blocked(&self, symbol: &str) -> bool {
        self.blocked_symbols.iter().any(|s| s == symbol)
    }

    pub fn is_symbol_supported(&self, symbol: &str) -> bool {
        self.allowed_symbols.is_empty() || self.allowed_symbols.iter().any(|s| s == symbol)
    }

    /// Confidence floor for a symbol/direction pair, if one is configured.
    pub fn min_confidence_for(&self, symbol: &str, direction: Direction) -> Option<Decimal> {
        self.confidence_rules
            .iter()
            .find(|r| r.symbol == symbol && r.direction == direction)
            .map(|r| r.min_confidence)
    }
}

fn config_error(message: &str) -> Error {
    Error::Config {
        message: message.to_string(),
    }
}

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub limits: RiskLimits,
}

impl Settings {
    /// Layer an optional TOML file and `RISK_GATE__*` environment variables
    /// over the default limits.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("RISK_GATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("allowed_symbols")
                .with_list_parse_key("blocked_symbols"),
        );

        let overrides: RiskLimitOverrides = builder.build()?.try_deserialize()?;
        let limits = RiskLimits::default().with_overrides(&overrides);
        limits.validate()?;

        info!(
            max_concurrent_trades = limits.max_concurrent_trades,
            max_trades_per_day = limits.max_trades_per_day,
            max_consecutive_losses = limits.max_consecutive_losses,
            trail_activation_pct = %limits.trail_activation_pct,
            "Risk limits loaded"
        );

        Ok(Self { limits })
    }
}
