//! tradewarden: automated market-position trading bot.
//!
//! Confidence-scaled position sizing, tranche and trailing exits, winner
//! amplification, and portfolio-wide risk guards around a single polling
//! control loop.

mod bot;
mod feed;
mod ledger;
mod models;
mod trading;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bot::{Bot, BotConfig};
use crate::feed::{HttpPriceFeed, NullConfidence, SimConfidence, SimFeed};
use crate::ledger::SqliteLedger;
use crate::trading::{AmplifierConfig, ExitPolicy, RiskLimits, SizingBounds};

/// tradewarden CLI.
#[derive(Parser)]
#[command(name = "tradewarden")]
#[command(about = "Automated position trader with portfolio risk guards", long_about = None)]
struct Cli {
    /// Ledger database path
    #[arg(short, long, default_value = "sqlite:./tradewarden.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop against a live market-data feed
    Run {
        /// Starting balance in base-currency units
        #[arg(short, long)]
        balance: f64,

        /// Polling interval in seconds
        #[arg(short, long, default_value = "30")]
        interval: u64,

        /// Market-data API base URL
        #[arg(long, env = "TRADEWARDEN_FEED_URL")]
        feed_url: String,

        /// Asset id to consider for entries (repeatable)
        #[arg(short, long = "watch")]
        watch: Vec<String>,
    },

    /// Paper-trade a scripted market, no live feed required
    Paper {
        /// Starting balance in base-currency units
        #[arg(short, long, default_value = "1000")]
        balance: f64,

        /// Seconds between simulated cycles
        #[arg(short, long, default_value = "1")]
        interval: u64,

        /// Number of cycles to simulate
        #[arg(short, long, default_value = "10")]
        cycles: u32,
    },

    /// Show the effective configuration
    Config,

    /// Show ledger totals
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            balance,
            interval,
            feed_url,
            watch,
        } => {
            if watch.is_empty() {
                println!("No assets to watch. Pass at least one --watch <asset_id>.");
                return Ok(());
            }

            info!(
                balance = balance,
                interval = interval,
                watchlist = watch.len(),
                "Starting tradewarden"
            );

            let watch_count = watch.len();
            let config = BotConfig {
                starting_balance: Decimal::try_from(balance)?,
                poll_interval_secs: interval,
                watchlist: watch,
                ..Default::default()
            };

            let feed = HttpPriceFeed::new(feed_url)?;
            let ledger = SqliteLedger::new(&cli.database).await?;
            let mut bot = Bot::new(config, feed, NullConfidence, ledger)?;

            println!("\n=== tradewarden ===");
            println!("Balance:  {}", balance);
            println!("Interval: {}s", interval);
            println!("Watching: {} assets", watch_count);
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }

            let summary = bot.ledger().summary().await?;
            println!(
                "\nClosed trades: {} ({} wins / {} losses), realized P&L {:.4}",
                summary.total_trades, summary.wins, summary.losses, summary.realized_pnl
            );
        }

        Commands::Paper {
            balance,
            interval,
            cycles,
        } => {
            info!(balance = balance, cycles = cycles, "Starting paper trading");

            let config = BotConfig {
                starting_balance: Decimal::try_from(balance)?,
                poll_interval_secs: interval,
                watchlist: vec![
                    "CLIMBER".to_string(),
                    "SPIKER".to_string(),
                    "GLITCHY".to_string(),
                ],
                ..Default::default()
            };

            let confidence = SimConfidence::new()
                .with_score("CLIMBER", 0.88)
                .with_score("SPIKER", 0.70);
            let ledger = SqliteLedger::new("sqlite::memory:").await?;
            let mut bot = Bot::new(config, SimFeed::demo(), confidence, ledger)?;

            println!("\n=== Paper Trading Mode ===");
            println!("Balance: {}", balance);
            println!("Cycles:  {}", cycles);
            println!("\nThis is SIMULATED trading - no real money involved.\n");

            for cycle in 1..=cycles {
                bot.tick().await?;

                let risk = bot.risk();
                println!(
                    "[{}] cycle {:>3} | equity {:.4} | cash {:.4} | positions {} | daily loss {:.4}",
                    chrono::Local::now().format("%H:%M:%S"),
                    cycle,
                    risk.balance,
                    bot.cash(),
                    bot.positions().len(),
                    risk.daily_loss
                );

                if cycle < cycles {
                    tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
                }
            }

            let summary = bot.ledger().summary().await?;
            let stats = bot.amplifier().stats();

            println!("\n=== Paper Run Summary ===");
            println!("Closed trades:   {}", summary.total_trades);
            println!("Wins / Losses:   {} / {}", summary.wins, summary.losses);
            println!("Realized P&L:    {:.4}", summary.realized_pnl);
            println!("Open positions:  {}", bot.positions().len());
            println!("Peak balance:    {:.4}", bot.risk().peak_balance);
            if stats.winners > 0 {
                println!(
                    "Winners tracked: {} (mean return {:.1}%)",
                    stats.winners,
                    stats.mean_return * 100.0
                );
            }
            for pattern in bot.amplifier().patterns().iter().take(3) {
                println!(
                    "  {} seen in {:.0}% of big winners",
                    pattern.signal,
                    pattern.frequency * 100.0
                );
            }
            if bot.risk().circuit_breaker_tripped {
                println!("Circuit breaker: TRIPPED");
            }
        }

        Commands::Config => {
            let sizing = SizingBounds::default();
            let exits = ExitPolicy::default();
            let limits = RiskLimits::default();
            let amplifier = AmplifierConfig::default();

            println!("\n=== Position Sizing ===\n");
            println!("  Min Fraction:         {}%", sizing.min_pct * dec!(100));
            println!("  Default Fraction:     {}%", sizing.default_pct * dec!(100));
            println!("  Max Fraction:         {}%", sizing.max_pct * dec!(100));
            println!("  Confidence Band:      {} - {}", sizing.low_confidence, sizing.high_confidence);
            println!("  Absolute Min Size:    {}", sizing.absolute_min);
            println!("  Absolute Max Size:    {}", sizing.absolute_max);

            println!("\n=== Exit Policy ===\n");
            println!("  Stop Loss:            {}%", exits.stop_loss_pct * dec!(100));
            for tranche in &exits.tranches {
                println!(
                    "  Tranche:              +{}% -> sell {}%",
                    tranche.profit_threshold_pct * dec!(100),
                    tranche.exit_fraction * dec!(100)
                );
            }
            println!("  Trail Activation:     +{}%", exits.trailing_activation_pct * dec!(100));
            println!("  Trail Distance:       {}%", exits.trail_distance_pct * dec!(100));
            match exits.take_profit_pct {
                Some(tp) => println!("  Take Profit:          +{}%", tp * dec!(100)),
                None => println!("  Take Profit:          disabled"),
            }
            println!("  Max Hold:             {}h", exits.max_hold_hours);

            println!("\n=== Risk Limits ===\n");
            println!("  Max Daily Loss:       {}% of peak", limits.max_daily_loss_pct * dec!(100));
            println!("  Max Drawdown:         {}% of peak", limits.max_drawdown_pct * dec!(100));
            println!("  Max Open Positions:   {}", limits.max_open_positions);
            println!("  Catastrophic Loss:    {}% of peak", limits.catastrophic_loss_pct * dec!(100));

            println!("\n=== Winner Amplifier ===\n");
            println!("  Scale-Up Gain:        >{}%", amplifier.scale_up_min_gain * dec!(100));
            println!("  Scale-Up Momentum:    >{}", amplifier.scale_up_min_momentum);
            println!("  Scale-Up Drawdown:    <{}%", amplifier.scale_up_max_drawdown * dec!(100));
            println!("  Scale-Up Max Age:     {}d", amplifier.scale_up_max_age_days);
            println!("  Super Winner Gain:    >{}%", amplifier.super_winner_gain * dec!(100));
            println!("  Scale-Up Fraction:    {}%", amplifier.scale_up_fraction * dec!(100));
        }

        Commands::Status => {
            let ledger = SqliteLedger::new(&cli.database).await?;
            let summary = ledger.summary().await?;

            println!("\n=== Ledger Status ===");
            println!("Closed trades:  {}", summary.total_trades);
            println!("Wins:           {}", summary.wins);
            println!("Losses:         {}", summary.losses);
            println!("Realized P&L:   {:.4}", summary.realized_pnl);
            match summary.last_equity {
                Some(equity) => println!("Last equity:    {:.4}", equity),
                None => println!("Last equity:    (no cycles recorded)"),
            }
        }
    }

    Ok(())
}
