//! Cooldown arithmetic shared by every timed check.

use chrono::{DateTime, Duration, Utc};
use gate_core::MAX_WINDOW_SECONDS;

/// A configured window, clamped to `0..=MAX_WINDOW_SECONDS`.
pub fn window(secs: i64) -> Duration {
    Duration::seconds(secs.clamp(0, MAX_WINDOW_SECONDS))
}

/// Like [`window`], for limits configured in minutes.
pub fn window_minutes(minutes: i64) -> Duration {
    window(minutes.saturating_mul(60))
}

/// Whole seconds in `d`, rounded up.
pub fn ceil_secs(d: Duration) -> i64 {
    let secs = d.num_seconds();
    if d > Duration::seconds(secs) {
        secs + 1
    } else {
        secs
    }
}

/// Seconds left until `until`, or `None` once it has passed.
pub fn remaining_until(until: DateTime<Utc>, now: DateTime<Utc>) -> Option<i64> {
    if now < until {
        Some(ceil_secs(until - now))
    } else {
        None
    }
}

/// Seconds left of a `window_secs` cooldown that started at `last`.
pub fn remaining_since(
    last: Option<DateTime<Utc>>,
    window_secs: i64,
    now: DateTime<Utc>,
) -> Option<i64> {
    let last = last?;
    remaining_until(last + window(window_secs), now)
}
