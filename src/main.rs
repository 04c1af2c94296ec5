use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::{Parser, Subcommand};
use phasebot::backtest::{aggregate, BacktestRunner, MarketScenario, SyntheticDataGenerator, TradeRecord};
use phasebot::config::Settings;
use phasebot::controller::MultiTimeframeController;
use phasebot::engine::PollingLoop;
use phasebot::{Broker, PaperBroker, Timeframe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "phasebot",
    about = "Multi-timeframe phase trading bot with paper broker and backtester"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to config/default.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a synthetic scenario through the paper broker and report metrics.
    Backtest {
        /// uptrend, downtrend, sideways or volatile.
        #[arg(long, default_value = "uptrend")]
        scenario: MarketScenario,

        /// Run every scenario and print a comparison table.
        #[arg(long, default_value_t = false)]
        all: bool,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Entry-timeframe candles to generate.
        #[arg(long, default_value_t = 3 * 24 * 60)]
        minutes: usize,

        /// Print the full report (metrics, final phases, events) as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Trade the configured symbols live against the paper broker, fed by a
    /// synthetic market that advances one entry candle per poll.
    Run {
        #[arg(long, default_value = "volatile")]
        scenario: MarketScenario,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Entry candles to trade before stopping. Runs until Ctrl+C when unset.
        #[arg(long)]
        minutes: Option<usize>,

        /// Entry candles replayed into history before trading starts.
        #[arg(long, default_value_t = 360)]
        warmup: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Backtest {
            scenario,
            all,
            seed,
            minutes,
            json,
        } => run_backtest(&settings, scenario, all, seed, minutes, json),
        Commands::Run {
            scenario,
            seed,
            minutes,
            warmup,
        } => run_paper(&settings, scenario, seed, minutes, warmup).await,
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("phasebot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_backtest(
    settings: &Settings,
    scenario: MarketScenario,
    all: bool,
    seed: u64,
    minutes: usize,
    json: bool,
) -> Result<()> {
    let runner = BacktestRunner::new(settings.backtest_config()?);
    let scenarios: Vec<MarketScenario> = if all {
        MarketScenario::ALL.to_vec()
    } else {
        vec![scenario]
    };

    let mut results = Vec::new();
    for scenario in scenarios {
        match runner.run_scenario(scenario, seed, minutes) {
            Ok(report) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!("\n=== {} ({}) ===", scenario, report.symbol);
                    println!("{}", report.metrics);
                    if let Some(snapshot) = &report.snapshot {
                        println!(
                            "Final phases: K={} B={} E={} (active {})",
                            snapshot.timeframes[0].phase,
                            snapshot.timeframes[1].phase,
                            snapshot.timeframes[2].phase,
                            snapshot.active_timeframe
                        );
                    }
                }
                results.push((scenario, report.metrics));
            }
            Err(e) => eprintln!("Backtest failed for {}: {}", scenario, e),
        }
    }

    if results.is_empty() {
        bail!("no backtest completed");
    }
    if all && !json {
        println!("\n{:<12} {:>10} {:>8} {:>8} {:>8}", "Scenario", "P&L", "Trades", "Win%", "Orders");
        println!("{}", "-".repeat(50));
        for (scenario, m) in &results {
            println!(
                "{:<12} {:>10.2} {:>8} {:>8.1} {:>8}",
                scenario.to_string(),
                m.total_pnl,
                m.total_trades,
                m.win_rate,
                m.orders_placed
            );
        }
    }
    Ok(())
}

async fn run_paper(
    settings: &Settings,
    scenario: MarketScenario,
    seed: u64,
    minutes: Option<usize>,
    warmup: usize,
) -> Result<()> {
    let [k_min, b_min, e_min] = settings.timeframes.minutes();
    // One week of feed when running until interrupted
    let trade_candles = minutes.unwrap_or(7 * 24 * 60 / e_min.max(1) as usize);
    let total = warmup + trade_candles;

    let start = Utc
        .with_ymd_and_hms(2024, 1, 8, 0, 0, 0)
        .single()
        .context("invalid feed start")?;
    let broker = Arc::new(PaperBroker::new(settings.timeframes.durations()));

    for (i, symbol) in settings.symbols.iter().enumerate() {
        let candles = SyntheticDataGenerator::new(seed.wrapping_add(i as u64))
            .with_base_price(settings.paper.base_price)
            .generate(scenario, start, total, e_min);
        broker.add_symbol(settings.symbol_spec(symbol))?;
        broker.load_series(symbol, Timeframe::Context, aggregate(&candles, e_min, k_min))?;
        broker.load_series(symbol, Timeframe::Confirmation, aggregate(&candles, e_min, b_min))?;
        broker.load_series(symbol, Timeframe::Entry, candles)?;
    }

    let now = start + Duration::minutes(warmup as i64 * e_min);
    let end = start + Duration::minutes(total as i64 * e_min);
    broker.advance_to(now)?;

    let mut poller = PollingLoop::new(broker.clone(), settings.engine.poll_interval())
        .with_summary_every(settings.engine.summary_every);

    for symbol in &settings.symbols {
        let mut controller = MultiTimeframeController::new(
            symbol.clone(),
            broker.clone(),
            settings.controller_settings(),
            settings.entry_logic()?,
            settings.risk_manager(),
        );
        controller
            .initialize()
            .with_context(|| format!("failed to initialize controller for {}", symbol))?;
        poller.add_controller(controller);
    }

    let stop = poller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down...");
            stop.stop();
        }
    });

    tracing::info!(
        symbols = ?settings.symbols,
        %scenario,
        from = %now,
        to = %end,
        "Paper trading started, press Ctrl+C to stop"
    );

    let feed = broker.clone();
    let mut clock = now;
    poller
        .run_with(move || {
            if clock >= end {
                return Ok(false);
            }
            clock += Duration::minutes(e_min);
            feed.advance_to(clock)?;
            Ok(true)
        })
        .await?;

    report_paper(&broker, &settings.symbols, broker.now().unwrap_or(now))?;
    Ok(())
}

fn report_paper(broker: &PaperBroker, symbols: &[String], now: DateTime<Utc>) -> Result<()> {
    let closed = broker.closed_trades();
    let mut pnl = 0.0;
    for trade in &closed {
        pnl += TradeRecord::from_closed(trade, &broker.symbol_spec(&trade.symbol)?).pnl;
    }
    tracing::info!(at = %now, closed = closed.len(), pnl, "Paper session finished");

    for symbol in symbols {
        let open = broker.open_positions(symbol)?;
        let pending = broker.open_orders(symbol)?;
        tracing::info!(%symbol, open = open.len(), pending = pending.len(), "Remaining exposure");
    }
    Ok(())
}
