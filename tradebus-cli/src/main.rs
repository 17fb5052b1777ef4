//! tradebus CLI: replay event scripts through the bus and portfolio ledger.
//!
//! Commands:
//! - `replay`: publish every event of a JSON-lines script and report the portfolio
//! - `check-config`: validate a TOML simulation config and print the effective values

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};
use tradebus_core::bus::{BusStats, EventBus};
use tradebus_core::config::SimulationConfig;
use tradebus_core::engine::{PortfolioManager, PortfolioSummary};
use tradebus_core::event::{Event, EventKind, EventPayload};

#[derive(Parser)]
#[command(
    name = "tradebus",
    about = "tradebus CLI: event-driven portfolio accounting"
)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish every event of a JSON-lines script and print the resulting portfolio.
    Replay {
        /// Script with one `{"timestamp", "kind", "payload"}` object per line.
        script: PathBuf,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the configured initial cash.
        #[arg(long)]
        initial_cash: Option<f64>,

        /// Queue the whole script and release it as one batch.
        #[arg(long, default_value_t = false)]
        batch: bool,

        /// Write the run report as JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a TOML config file.
    CheckConfig {
        config: PathBuf,
    },
}

/// One line of a replay script.
#[derive(Debug, Deserialize)]
struct ScriptLine {
    timestamp: DateTime<Utc>,
    kind: EventKind,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Everything the `replay` command reports.
#[derive(Debug, Serialize)]
struct RunReport {
    script: PathBuf,
    lines_read: usize,
    lines_skipped: usize,
    events_published: usize,
    portfolio: PortfolioSummary,
    bus: BusStats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Replay {
            script,
            config,
            initial_cash,
            batch,
            output,
        } => {
            let config = load_config(config.as_deref(), initial_cash)?;
            let report = replay_script(&script, config, batch)?;
            print_report(&report);
            if let Some(path) = output {
                write_report(&report, &path)?;
                println!("Report written to {}", path.display());
            }
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let loaded = SimulationConfig::load(&config)
                .with_context(|| format!("invalid config {}", config.display()))?;
            println!("{} is valid", config.display());
            println!("{}", serde_json::to_string_pretty(&loaded)?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, initial_cash: Option<f64>) -> Result<SimulationConfig> {
    let mut config = match path {
        Some(path) => SimulationConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    if let Some(cash) = initial_cash {
        config.portfolio.initial_cash = cash;
        config.validate().context("invalid --initial-cash")?;
    }
    Ok(config)
}

/// Parse one script line into an event. Blank lines and `#` comments yield `None`.
fn parse_line(line: &str) -> Result<Option<Event>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let parsed: ScriptLine = serde_json::from_str(trimmed).context("malformed script line")?;
    let payload = EventPayload::from_json(parsed.kind, parsed.payload)?;
    Ok(Some(Event::new(payload, parsed.timestamp)))
}

fn replay_script(script: &Path, config: SimulationConfig, batch: bool) -> Result<RunReport> {
    let file = File::open(script).with_context(|| format!("failed to open {}", script.display()))?;

    let mut bus = EventBus::new(config.bus.clone());
    let portfolio = Rc::new(RefCell::new(PortfolioManager::new(config.portfolio.clone())));
    PortfolioManager::attach(&portfolio, &mut bus)?;

    if batch {
        bus.start_batch();
    }

    let mut lines_read = 0;
    let mut lines_skipped = 0;
    let mut events_published = 0;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", script.display()))?;
        lines_read += 1;
        match parse_line(&line) {
            Ok(Some(event)) => {
                bus.publish(event);
                events_published += 1;
            }
            Ok(None) => {}
            Err(err) => {
                lines_skipped += 1;
                warn!(line = index + 1, error = %format!("{err:#}"), "skipping script line");
            }
        }
    }

    if batch {
        let released = bus.end_batch();
        info!(released, "batch released");
    }

    let summary = portfolio.borrow().summary();
    Ok(RunReport {
        script: script.to_path_buf(),
        lines_read,
        lines_skipped,
        events_published,
        portfolio: summary,
        bus: bus.stats().clone(),
    })
}

fn print_report(report: &RunReport) {
    let p = &report.portfolio;
    println!("=== Replay: {} ===", report.script.display());
    println!(
        "Lines: {} read, {} skipped, {} events published",
        report.lines_read, report.lines_skipped, report.events_published
    );
    println!();
    println!("Initial cash:     {:>14.2}", p.initial_cash);
    println!("Cash:             {:>14.2}", p.cash);
    println!("Positions value:  {:>14.2}", p.positions_value);
    println!("Equity:           {:>14.2}", p.equity);
    println!("Total return:     {:>13.2}%", p.total_return_pct);
    println!("Realized PnL:     {:>14.2}", p.realized_pnl);
    println!("Unrealized PnL:   {:>14.2}", p.unrealized_pnl);
    println!("Commission:       {:>14.2}", p.fills.total_commission);
    println!(
        "Max drawdown:     {:>14.2} ({:.2}%)",
        p.max_drawdown, p.max_drawdown_pct
    );
    println!();
    println!(
        "Fills: {} applied, {} duplicate, {} rejected, {} ignored",
        p.fills.fills_processed, p.fills.fills_duplicate, p.fills.fills_rejected, p.fills.fills_ignored
    );
    let closed = &p.closed_positions;
    let profit_factor = closed
        .profit_factor
        .map_or_else(|| "n/a".to_string(), |pf| format!("{pf:.2}"));
    println!(
        "Closed positions: {} ({} won, {} lost, win rate {:.1}%, profit factor {})",
        closed.count,
        closed.wins,
        closed.losses,
        closed.win_rate * 100.0,
        profit_factor
    );
    println!("Trades: {} open, {} closed", p.trades_open, p.trades_closed);
    println!();
    let bus = &report.bus;
    println!(
        "Bus: {} published, {} dispatched, {} duplicates, {} handler failures",
        bus.events_published, bus.events_dispatched, bus.duplicates_dropped, bus.handler_failures
    );
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
