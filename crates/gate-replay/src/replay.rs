//! Event stream driver.
//!
//! Each input line is one event with an `at` timestamp. The manual clock is
//! moved to `at` before the event is applied, so a replay is deterministic.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gate_core::{Direction, OpenPosition, TradeEvent, TradeSignal};
use risk_gate::{Clock, ExitDecision, ManualClock, RiskGate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayEvent {
    CanOpen {
        at: DateTime<Utc>,
        symbol: String,
        stake: Decimal,
        #[serde(default)]
        signal: TradeSignal,
        #[serde(default)]
        take_profit: Option<Decimal>,
        #[serde(default)]
        stop_loss: Option<Decimal>,
    },
    Opened {
        at: DateTime<Utc>,
        contract_id: String,
        symbol: String,
        stake: Decimal,
        #[serde(default)]
        direction: Option<Direction>,
        #[serde(default)]
        signal: Option<TradeSignal>,
    },
    /// Mark-to-market for an open position; runs the exit checks.
    Mark {
        at: DateTime<Utc>,
        contract_id: String,
        pnl: Decimal,
    },
    Closed {
        at: DateTime<Utc>,
        contract_id: String,
        pnl: Decimal,
        status: String,
        #[serde(default)]
        duration_secs: Option<i64>,
    },
    ResetDaily {
        at: DateTime<Utc>,
    },
    Advance {
        at: DateTime<Utc>,
    },
}

impl ReplayEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::CanOpen { at, .. }
            | Self::Opened { at, .. }
            | Self::Mark { at, .. }
            | Self::Closed { at, .. }
            | Self::ResetDaily { at }
            | Self::Advance { at } => *at,
        }
    }
}

/// One output line per input event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayOutput {
    CanOpen {
        at: DateTime<Utc>,
        symbol: String,
        allowed: bool,
        reason: String,
    },
    Opened {
        at: DateTime<Utc>,
        contract_id: String,
        active_trades: usize,
    },
    Mark {
        at: DateTime<Utc>,
        contract_id: String,
        close: bool,
        reason: String,
        trailing_activated: bool,
    },
    Closed {
        at: DateTime<Utc>,
        contract_id: String,
        daily_pnl: Decimal,
        consecutive_losses: u32,
    },
    ResetDaily {
        at: DateTime<Utc>,
    },
    Advance {
        at: DateTime<Utc>,
    },
}

/// Parse a JSON-lines event stream. Blank lines and `#` comments are skipped.
pub fn parse_events(input: &str) -> Result<Vec<ReplayEvent>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid event on line {}", n + 1))
        })
        .collect()
}

pub struct Replay {
    gate: RiskGate<ManualClock>,
    clock: ManualClock,
    /// Positions opened during the replay, for mark events.
    positions: HashMap<String, OpenPosition>,
}

impl Replay {
    pub fn new(gate: RiskGate<ManualClock>, clock: ManualClock) -> Self {
        Self {
            gate,
            clock,
            positions: HashMap::new(),
        }
    }

    pub fn gate(&self) -> &RiskGate<ManualClock> {
        &self.gate
    }

    pub fn apply(&mut self, event: ReplayEvent) -> ReplayOutput {
        let at = event.at();
        let now = self.clock.now();
        if at < now {
            warn!(at = %at, now = %now, "Event is earlier than the replay clock");
        }
        self.clock.set(at);

        match event {
            ReplayEvent::CanOpen {
                symbol,
                stake,
                signal,
                take_profit,
                stop_loss,
                ..
            } => {
                let decision =
                    self.gate
                        .can_open_trade(&symbol, stake, &signal, take_profit, stop_loss);
                ReplayOutput::CanOpen {
                    at,
                    symbol,
                    allowed: decision.allowed,
                    reason: decision.reason,
                }
            }
            ReplayEvent::Opened {
                contract_id,
                symbol,
                stake,
                direction,
                signal,
                ..
            } => {
                let mut trade = TradeEvent::new(contract_id.clone(), symbol, stake).with_open_time(at);
                trade.direction = direction.or_else(|| signal.as_ref().and_then(|s| s.direction));
                trade.signal = signal;

                self.gate.record_trade_opened(&trade);
                if !contract_id.is_empty() {
                    self.positions
                        .insert(contract_id.clone(), OpenPosition::from(&trade));
                }
                ReplayOutput::Opened {
                    at,
                    contract_id,
                    active_trades: self.gate.active_trade_count(),
                }
            }
            ReplayEvent::Mark {
                contract_id, pnl, ..
            } => self.mark(at, contract_id, pnl),
            ReplayEvent::Closed {
                contract_id,
                pnl,
                status,
                duration_secs,
                ..
            } => {
                self.positions.remove(&contract_id);
                self.gate.record_trade_closed(
                    &contract_id,
                    pnl,
                    &status,
                    duration_secs.map(chrono::Duration::seconds),
                );
                ReplayOutput::Closed {
                    at,
                    contract_id,
                    daily_pnl: self.gate.daily_pnl(),
                    consecutive_losses: self.gate.consecutive_losses(),
                }
            }
            ReplayEvent::ResetDaily { .. } => {
                self.gate.reset_daily_stats();
                ReplayOutput::ResetDaily { at }
            }
            ReplayEvent::Advance { .. } => ReplayOutput::Advance { at },
        }
    }

    /// Emergency close first, then trailing, then stagnation. The first rule
    /// asking to close decides the reason.
    fn mark(&mut self, at: DateTime<Utc>, contract_id: String, pnl: Decimal) -> ReplayOutput {
        let Some(position) = self.positions.get(&contract_id).cloned() else {
            debug!(contract_id = %contract_id, "Mark for unknown position");
            return ReplayOutput::Mark {
                at,
                contract_id,
                close: false,
                reason: "not_tracked".to_string(),
                trailing_activated: false,
            };
        };

        let emergency = self.gate.check_emergency_close(&contract_id, pnl);
        let trailing = self.gate.check_trailing_profit(&position, pnl);
        let stagnation = if trailing.should_close {
            ExitDecision::default()
        } else {
            self.gate.check_stagnation_exit(&position, pnl)
        };

        let reason = if emergency.should_close {
            emergency.reason_str()
        } else if trailing.should_close {
            trailing.reason_str()
        } else {
            stagnation.reason_str()
        };

        ReplayOutput::Mark {
            at,
            contract_id,
            close: emergency.should_close || trailing.should_close || stagnation.should_close,
            reason: reason.to_string(),
            trailing_activated: trailing.just_activated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::RiskLimits;

    fn replay(limits: RiskLimits, start: &str) -> Replay {
        let clock = ManualClock::new(start.parse().unwrap());
        Replay::new(RiskGate::with_clock(limits, clock.clone()), clock)
    }

    fn run(replay: &mut Replay, input: &str) -> Vec<ReplayOutput> {
        parse_events(input)
            .unwrap()
            .into_iter()
            .map(|e| replay.apply(e))
            .collect()
    }

    #[test]
    fn test_parse_skips_blank_and_comment_lines() {
        let events = parse_events(
            r#"
            # warm-up
            {"event":"advance","at":"2026-02-25T09:00:00Z"}

            {"event":"reset_daily","at":"2026-02-25T09:00:01Z"}
            "#,
        )
        .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_parse_error_names_the_line() {
        let err = parse_events("{\"event\":\"advance\",\"at\":\"2026-02-25T09:00:00Z\"}\n{\"event\":\"nope\"}")
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_open_then_blocked_by_spacing() {
        let mut replay = replay(RiskLimits::default(), "2026-02-25T09:00:00Z");
        let out = run(
            &mut replay,
            r#"
            {"event":"can_open","at":"2026-02-25T09:00:00Z","symbol":"R_25","stake":10,"signal":{"direction":"DOWN","confidence":7}}
            {"event":"opened","at":"2026-02-25T09:00:00Z","contract_id":"C1","symbol":"R_25","stake":10,"direction":"DOWN"}
            {"event":"closed","at":"2026-02-25T09:00:10Z","contract_id":"C1","pnl":"-1","status":"lost","duration_secs":10}
            {"event":"can_open","at":"2026-02-25T09:00:15Z","symbol":"R_25","stake":10}
            "#,
        );

        assert!(matches!(&out[0], ReplayOutput::CanOpen { allowed: true, reason, .. } if reason == "OK"));
        assert!(matches!(&out[1], ReplayOutput::Opened { active_trades: 1, .. }));
        assert!(matches!(&out[2], ReplayOutput::Closed { consecutive_losses: 1, .. }));
        assert!(
            matches!(&out[3], ReplayOutput::CanOpen { allowed: false, reason, .. } if reason == "Cooldown active (15s remaining)")
        );
    }

    #[test]
    fn test_mark_reports_trailing_exit() {
        let mut replay = replay(
            RiskLimits {
                trail_activation_pct: Decimal::from(10),
                ..Default::default()
            },
            "2026-02-25T09:00:00Z",
        );
        let out = run(
            &mut replay,
            r#"
            {"event":"opened","at":"2026-02-25T09:00:00Z","contract_id":"C1","symbol":"R_25","stake":50}
            {"event":"mark","at":"2026-02-25T09:00:05Z","contract_id":"C1","pnl":5}
            {"event":"mark","at":"2026-02-25T09:00:06Z","contract_id":"C1","pnl":6}
            {"event":"mark","at":"2026-02-25T09:00:07Z","contract_id":"C1","pnl":"4.0"}
            {"event":"mark","at":"2026-02-25T09:00:08Z","contract_id":"C9","pnl":1}
            "#,
        );

        assert!(matches!(&out[1], ReplayOutput::Mark { trailing_activated: true, close: false, .. }));
        assert!(matches!(&out[2], ReplayOutput::Mark { close: false, .. }));
        assert!(
            matches!(&out[3], ReplayOutput::Mark { close: true, reason, .. } if reason == "trailing_profit_exit")
        );
        assert!(
            matches!(&out[4], ReplayOutput::Mark { close: false, reason, .. } if reason == "not_tracked")
        );
    }

    #[test]
    fn test_mark_reports_stagnation_exit() {
        let mut replay = replay(RiskLimits::default(), "2026-02-25T09:00:00Z");
        let out = run(
            &mut replay,
            r#"
            {"event":"opened","at":"2026-02-25T09:00:00Z","contract_id":"C1","symbol":"R_25","stake":10}
            {"event":"mark","at":"2026-02-25T09:01:00Z","contract_id":"C1","pnl":"-1"}
            {"event":"mark","at":"2026-02-25T09:01:20Z","contract_id":"C1","pnl":"-1"}
            "#,
        );

        assert!(matches!(&out[1], ReplayOutput::Mark { close: false, .. }));
        assert!(
            matches!(&out[2], ReplayOutput::Mark { close: true, reason, .. } if reason == "stagnation_exit")
        );
    }

    #[test]
    fn test_reset_daily_clears_quota() {
        let mut replay = replay(
            RiskLimits {
                max_trades_per_day: 1,
                ..Default::default()
            },
            "2026-02-25T23:59:00Z",
        );
        let out = run(
            &mut replay,
            r#"
            {"event":"opened","at":"2026-02-25T23:59:00Z","contract_id":"C1","symbol":"R_25","stake":10}
            {"event":"closed","at":"2026-02-25T23:59:30Z","contract_id":"C1","pnl":2,"status":"won"}
            {"event":"can_open","at":"2026-02-25T23:59:50Z","symbol":"R_25","stake":10}
            {"event":"reset_daily","at":"2026-02-26T00:00:00Z"}
            {"event":"can_open","at":"2026-02-26T00:00:01Z","symbol":"R_25","stake":10}
            "#,
        );

        assert!(
            matches!(&out[2], ReplayOutput::CanOpen { allowed: false, reason, .. } if reason.starts_with("Daily trade limit"))
        );
        assert!(matches!(&out[4], ReplayOutput::CanOpen { allowed: true, .. }));
        assert_eq!(replay.gate().statistics().daily_trades, 0);
    }

    #[test]
    fn test_output_is_tagged_json() {
        let output = ReplayOutput::Advance {
            at: "2026-02-25T09:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["event"], "advance");
    }
}
