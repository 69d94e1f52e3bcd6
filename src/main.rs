//! PredictRoom demo driver.
//!
//! Runs one simulated room lifecycle end to end: create a room, place a
//! handful of stakes, activate with a starting quote, settle against a
//! simulated closing quote, and deliver payouts to a paper treasury.
//!
//! Usage:
//!   cargo run --release -- --symbol TSLA --participants 8

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use predictroom_backend::{
    events::EventBus,
    models::{Config, Direction},
    settlement::SettlementEngine,
    transfer::PaperTreasury,
    RoomLedger,
};

#[derive(Parser, Debug)]
#[command(name = "predictroom")]
#[command(about = "Run a simulated prediction-room lifecycle")]
struct Args {
    /// Underlying symbol for the demo room
    #[arg(long)]
    symbol: Option<String>,

    /// Room duration in minutes
    #[arg(long)]
    duration: Option<i64>,

    /// Number of simulated participants
    #[arg(long)]
    participants: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing();

    let args = Args::parse();
    let symbol = args.symbol.unwrap_or_else(|| config.demo_symbol.clone());
    let duration = args.duration.unwrap_or(config.demo_duration_minutes);
    let participants = args.participants.unwrap_or(config.demo_participants);

    let events = EventBus::new(config.event_capacity);
    let mut event_rx = events.subscribe();
    let ledger = Arc::new(RoomLedger::new(config.admin_account.clone(), events));
    let engine = SettlementEngine::new(ledger.clone(), config.tie_policy);

    info!(
        symbol = %symbol,
        duration, participants, tie_policy = ?config.tie_policy, "starting demo lifecycle"
    );

    let room_id = ledger.create_room("demo-creator", "Demo room", &symbol, duration, 10)?;

    let starting_price: u64 = 250_00;
    let ending_price = {
        let mut rng = rand::thread_rng();
        for i in 0..participants {
            let direction = if rng.gen_bool(0.5) {
                Direction::Up
            } else {
                Direction::Down
            };
            let amount = rng.gen_range(10..=500u64);
            ledger.place_stake(room_id, &format!("acct-{i}"), direction, amount)?;
        }

        // Simulated closing quote within +-5% of the start.
        let drift_pct = rng.gen_range(-5i64..=5);
        (starting_price as i64 + starting_price as i64 * drift_pct / 100).max(1) as u64
    };

    ledger.activate_room(room_id, "demo-creator", starting_price)?;

    let totals = ledger.totals(room_id)?;
    info!(
        up_total = totals.up_total,
        down_total = totals.down_total,
        up_count = totals.up_count,
        down_count = totals.down_count,
        "room ready for settlement"
    );

    let result = engine.settle(room_id, ending_price, "demo-trigger")?;
    info!(
        starting_price,
        ending_price,
        outcome = ?result.outcome,
        total_pool = result.total_pool,
        winners = result.winner_count,
        losers = result.loser_count,
        dust = result.dust(),
        "settlement complete"
    );

    let treasury = PaperTreasury::new();
    let outcomes = engine.distribute(&result, &treasury).await;
    for outcome in &outcomes {
        match &outcome.error {
            None => info!(
                account = %outcome.account,
                amount = outcome.amount,
                "payout delivered"
            ),
            Some(err) => info!(
                account = %outcome.account,
                amount = outcome.amount,
                error = %err,
                "payout pending external retry"
            ),
        }
    }

    while let Ok(event) = event_rx.try_recv() {
        debug!(?event, "room event");
    }

    let mut balances: Vec<_> = treasury.balances().into_iter().collect();
    balances.sort();
    for (account, balance) in balances {
        info!(account = %account, balance, "final treasury balance");
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "predictroom_backend=info,predictroom=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
