//! insidebar CLI: backtest inside-bar breakouts on a CSV of bars.
//!
//! Commands:
//! - `run`: detect, simulate, and print the summary and monthly table
//! - `sweep`: backtest the parameter grid in parallel, best total profit first

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use insidebar::data::{load_csv, write_trades_csv};
use insidebar::prelude::*;

#[derive(Parser)]
#[command(name = "insidebar", about = "Inside-bar breakout detector and backtester")]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one configuration and print its metrics.
    Run {
        /// CSV with time, open, high, low, volume and optional close columns.
        csv: PathBuf,

        /// Path to a TOML run config.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Take-profit distance as a multiple of the stop distance.
        #[arg(long)]
        risk_reward: Option<f64>,

        /// Units per trade.
        #[arg(long)]
        trade_size: Option<f64>,

        /// Starting equity for metrics.
        #[arg(long)]
        initial_capital: Option<f64>,

        /// Write the trade ledger to this CSV file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Backtest every combination of the parameter grids.
    Sweep {
        /// CSV with time, open, high, low, volume and optional close columns.
        csv: PathBuf,

        /// Path to a TOML run config; its policies apply to every grid point.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Starting equity for metrics.
        #[arg(long)]
        initial_capital: Option<f64>,

        /// Rows to print.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("insidebar={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run {
            csv,
            config,
            risk_reward,
            trade_size,
            initial_capital,
            output,
        } => {
            let mut run_config = load_config(config.as_deref())?;
            if let Some(rr) = risk_reward {
                run_config.backtest.risk_reward_ratio = rr;
            }
            if let Some(size) = trade_size {
                run_config.backtest.trade_size = size;
            }
            if let Some(capital) = initial_capital {
                run_config.initial_capital = capital;
            }
            run_config.validate()?;
            run_single(&csv, &run_config, output.as_deref())
        }
        Commands::Sweep {
            csv,
            config,
            initial_capital,
            top,
        } => {
            let mut run_config = load_config(config.as_deref())?;
            if let Some(capital) = initial_capital {
                run_config.initial_capital = capital;
            }
            run_config.validate()?;
            run_sweep(&csv, &run_config, top)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(p) => RunConfig::load(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(RunConfig::default()),
    }
}

fn run_single(csv: &Path, config: &RunConfig, output: Option<&Path>) -> Result<()> {
    let series = load_csv(csv).with_context(|| format!("loading {}", csv.display()))?;
    let backtester = Backtester::new(config.backtest)?;
    let trades = backtester.run_with(&config.detector, series.as_slice());
    let metrics = Metrics::compute(&trades, config.initial_capital)?;

    print_summary(&metrics);

    if let Some(path) = output {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        write_trades_csv(BufWriter::new(file), &trades)?;
        println!("\nTrades written to {}", path.display());
    }
    Ok(())
}

fn run_sweep(csv: &Path, config: &RunConfig, top: usize) -> Result<()> {
    let series = load_csv(csv).with_context(|| format!("loading {}", csv.display()))?;

    let detectors: Vec<InsideBarDetector> = param_grid()?;
    let ratios: Vec<BacktestConfig> = param_grid()?;
    let grid: Vec<SweepParams> = detectors
        .iter()
        .flat_map(|&detector| {
            ratios.iter().map(move |rr| SweepParams {
                detector,
                backtest: BacktestConfig {
                    risk_reward_ratio: rr.risk_reward_ratio,
                    ..config.backtest
                },
            })
        })
        .collect();
    let total = grid.len();
    tracing::info!(
        detector = <InsideBarDetector as Parameterized>::name(),
        simulator = <BacktestConfig as Parameterized>::name(),
        sets = total,
        "sweeping parameter grid"
    );

    let (mut results, errors) = sweep_parallel(series.as_slice(), config.initial_capital, grid);
    for e in &errors {
        tracing::warn!(params = ?e.params, error = %e.error, "parameter set failed");
    }
    if results.is_empty() {
        bail!("all {total} parameter sets failed");
    }

    results.sort_by(|a, b| b.metrics.total_profit.total_cmp(&a.metrics.total_profit));

    println!(
        "{:>9} {:>8} {:>6} {:>7} {:>8} {:>12} {:>9}",
        "tolerance", "max_wait", "rr", "trades", "win %", "profit", "max dd %"
    );
    for r in results.iter().take(top) {
        let d = r.params.detector.current_params();
        let m = &r.metrics;
        // 0 marks an unbounded wait
        let max_wait = match d["max_wait"] {
            w if w > 0.0 => w.to_string(),
            _ => "-".to_string(),
        };
        println!(
            "{:>9.2} {:>8} {:>6.2} {:>7} {:>8.2} {:>12.2} {:>9.2}",
            d["containment_tolerance"],
            max_wait,
            r.params.backtest.risk_reward_ratio,
            m.total_trades,
            m.win_rate,
            m.total_profit,
            m.max_drawdown_pct,
        );
    }
    println!("\n{} of {total} parameter sets completed", results.len());
    Ok(())
}

fn print_summary(m: &Metrics) {
    println!("Backtest Results");
    println!("----------------");
    println!("Total trades:       {}", m.total_trades);
    println!("Winning trades:     {}", m.winning_trades);
    println!("Win rate:           {:.2}%", m.win_rate);
    println!("Total profit:       {:.2}", m.total_profit);
    println!("Avg profit/trade:   {:.2}", m.avg_profit_per_trade);
    println!("Max drawdown:       {:.2} ({:.2}%)", m.max_drawdown, m.max_drawdown_pct);
    println!("Initial capital:    {:.2}", m.initial_capital);
    println!("Final capital:      {:.2}", m.final_capital);
    println!("Profit:             {:.2}%", m.profit_percentage);

    if !m.monthly_profits.is_empty() {
        println!("\nMonthly profit (% of initial capital)");
        for (month, pct) in &m.monthly_profits {
            println!("  {month}  {pct:>8.2}%");
        }
    }
}
