//! Trade history boundary used to seed the gate at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gate_core::{Direction, TradeOutcome, TradeRecord};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

/// Read access to persisted trades.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeHistory: Send + Sync {
    /// Trades for `user_id` created at or after `since`.
    async fn trades_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> gate_core::Result<Vec<TradeRecord>>;
}

/// Trade history backed by the `trades` table.
pub struct PgTradeHistory {
    pool: PgPool,
}

impl PgTradeHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeHistory for PgTradeHistory {
    async fn trades_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> gate_core::Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT profit, status, created_at, signal
            FROM trades
            WHERE user_id = $1 AND created_at >= $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let profit: Option<Decimal> = row.try_get("profit")?;
            let status: Option<String> = row.try_get("status")?;
            let signal: Option<String> = row.try_get("signal")?;
            records.push(TradeRecord {
                profit: profit.unwrap_or(Decimal::ZERO),
                status: status.unwrap_or_default(),
                created_at: row.try_get("created_at")?,
                direction: signal.as_deref().and_then(Direction::parse),
            });
        }

        debug!(user_id = %user_id, count = records.len(), "Fetched trade history");
        Ok(records)
    }
}

/// Counters derived from today's trades.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyStats {
    pub trade_count: u32,
    pub pnl: Decimal,
    /// Losses at the end of the day's sequence, newest backward.
    pub consecutive_losses: u32,
    pub up_count: u32,
    pub down_count: u32,
}

impl DailyStats {
    pub fn from_records(mut records: Vec<TradeRecord>) -> Self {
        records.sort_by_key(|r| r.created_at);

        let mut stats = Self {
            trade_count: records.len() as u32,
            pnl: records
                .iter()
                .fold(Decimal::ZERO, |acc, r| acc.saturating_add(r.profit)),
            ..Default::default()
        };

        for record in &records {
            match record.direction {
                Some(Direction::Up) => stats.up_count += 1,
                Some(Direction::Down) => stats.down_count += 1,
                None => {}
            }
        }

        stats.consecutive_losses = records
            .iter()
            .rev()
            .take_while(|r| r.outcome() == TradeOutcome::Loss)
            .count() as u32;

        stats
    }
}

/// UTC midnight of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now)
}

/// Load today's stats for `user_id`. A failing store yields empty stats.
pub async fn load_daily_stats(
    store: &dyn TradeHistory,
    user_id: &str,
    now: DateTime<Utc>,
) -> DailyStats {
    match store.trades_since(user_id, start_of_day(now)).await {
        Ok(records) if records.is_empty() => {
            info!(user_id = %user_id, "No trades today yet, starting fresh");
            DailyStats::default()
        }
        Ok(records) => {
            let stats = DailyStats::from_records(records);
            info!(
                user_id = %user_id,
                trades = stats.trade_count,
                pnl = %stats.pnl,
                consecutive_losses = stats.consecutive_losses,
                "Loaded today's trade stats"
            );
            stats
        }
        Err(e) => {
            warn!(
                user_id = %user_id,
                error = %e,
                "Could not load daily stats, starting with zero counters"
            );
            DailyStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(profit: i64, status: &str, minute: i64) -> TradeRecord {
        TradeRecord {
            profit: Decimal::from(profit),
            status: status.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 2, 25, 10, 0, 0).unwrap()
                + Duration::minutes(minute),
            direction: Some(Direction::Down),
        }
    }

    #[test]
    fn test_trailing_losses_counted_from_newest() {
        // Out of order on purpose; sorting puts the win in the middle.
        let stats = DailyStats::from_records(vec![
            record(-1, "loss", 30),
            record(-1, "lost", 0),
            record(2, "won", 10),
            record(-1, "loss", 20),
        ]);

        assert_eq!(stats.trade_count, 4);
        assert_eq!(stats.pnl, Decimal::from(-1));
        assert_eq!(stats.consecutive_losses, 2);
        assert_eq!(stats.down_count, 4);
    }

    #[test]
    fn test_breakeven_stops_the_streak() {
        let stats = DailyStats::from_records(vec![
            record(-1, "loss", 0),
            record(0, "breakeven", 1),
            record(-1, "loss", 2),
        ]);
        assert_eq!(stats.consecutive_losses, 1);
    }

    #[test]
    fn test_start_of_day() {
        let now = Utc.with_ymd_and_hms(2026, 2, 25, 17, 45, 12).unwrap();
        assert_eq!(
            start_of_day(now),
            Utc.with_ymd_and_hms(2026, 2, 25, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_load_uses_day_start_and_folds_records() {
        let now = Utc.with_ymd_and_hms(2026, 2, 25, 12, 0, 0).unwrap();
        let mut store = MockTradeHistory::new();
        store
            .expect_trades_since()
            .withf(move |user, since| user == "user-1" && *since == start_of_day(now))
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    record(-1, "loss", 0),
                    record(-1, "lost", 5),
                    record(-1, "loss", 10),
                ])
            });

        let stats = load_daily_stats(&store, "user-1", now).await;
        assert_eq!(stats.trade_count, 3);
        assert_eq!(stats.consecutive_losses, 3);
    }

    #[test]
    fn test_store_failure_is_fresh_start() {
        let mut store = MockTradeHistory::new();
        store.expect_trades_since().returning(|_, _| {
            Err(gate_core::Error::InvalidRecord("connection reset".to_string()))
        });

        let stats = tokio_test::block_on(load_daily_stats(&store, "user-1", Utc::now()));
        assert_eq!(stats, DailyStats::default());
    }
}
