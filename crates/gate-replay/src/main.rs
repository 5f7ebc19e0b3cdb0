//! Gate Replay
//!
//! Drives one risk gate from a JSON-lines event file and prints every verdict
//! as a JSON line on stdout. Logs go to stderr.

mod replay;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use gate_core::db::{create_pool, DatabaseConfig};
use gate_core::Settings;
use risk_gate::{ManualClock, PgTradeHistory, RiskGate};
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::replay::{parse_events, Replay};

/// Replay trade events through the risk gate
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Risk limit overrides (TOML). RISK_GATE__* env vars apply on top
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines event file (stdin when omitted)
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Seed today's counters from the trades table for this user (needs DATABASE_URL)
    #[arg(short, long)]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gate_replay=info,risk_gate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    info!("Starting gate replay v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(args.config.as_deref())?;

    let input = match &args.events {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let events = parse_events(&input)?;
    info!(events = events.len(), "Loaded replay events");

    let start = events.first().map(|e| e.at()).unwrap_or_else(Utc::now);
    let clock = ManualClock::new(start);

    let gate = match (&args.user_id, DatabaseConfig::from_env()) {
        (Some(user_id), Some(db)) => {
            let pool = create_pool(&db).await?;
            let store = PgTradeHistory::new(pool);
            RiskGate::from_history(settings.limits, clock.clone(), user_id, &store).await
        }
        (Some(user_id), None) => {
            warn!(user_id = %user_id, "DATABASE_URL not set, starting with fresh counters");
            RiskGate::with_clock(settings.limits, clock.clone())
        }
        (None, _) => RiskGate::with_clock(settings.limits, clock.clone()),
    };

    let mut replay = Replay::new(gate, clock);
    for event in events {
        let output = replay.apply(event);
        println!("{}", serde_json::to_string(&output)?);
    }

    let snapshot = replay.gate().get_current_limits();
    println!(
        "{}",
        serde_json::json!({ "event": "snapshot", "limits": snapshot })
    );

    info!(
        trades = snapshot.daily_trade_count,
        daily_pnl = %snapshot.daily_pnl,
        "Replay finished"
    );

    Ok(())
}
