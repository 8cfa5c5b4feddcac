//! MarginLab CLI — run backtests and validate configs.
//!
//! Commands:
//! - `run` — backtest a strategy over CSV bars or synthetic bars
//! - `check-config` — validate a TOML config and print its run id

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use marginlab_core::engine::Diagnostic;
use marginlab_runner::{
    generate_synthetic_bars, load_bars_csv, run_loaded_range, save_artifacts, BacktestConfig,
    BacktestResult, LoadedBars,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "marginlab",
    about = "MarginLab CLI — leveraged margin-trading backtester"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest over CSV bars or synthetic bars.
    Run {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// CSV file with timestamp,open,high,low,close columns.
        #[arg(long)]
        bars: Option<PathBuf>,

        /// Generate this many synthetic bars instead of reading a file.
        #[arg(long)]
        synthetic: Option<usize>,

        /// Seed for synthetic bars.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Synthetic bar interval in minutes.
        #[arg(long, default_value_t = 60)]
        interval_minutes: i64,

        /// First bar index to backtest (inclusive). Defaults to 0.
        #[arg(long)]
        start: Option<usize>,

        /// Last bar index to backtest (exclusive). Defaults to the bar count.
        #[arg(long)]
        end: Option<usize>,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Skip writing artifacts.
        #[arg(long, default_value_t = false)]
        no_artifacts: bool,

        /// Print the full result as JSON instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Validate a TOML config and print its run id.
    CheckConfig {
        /// Path to the TOML config file.
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            bars,
            synthetic,
            seed,
            interval_minutes,
            start,
            end,
            output_dir,
            no_artifacts,
            json,
        } => run_backtest_cmd(RunArgs {
            config,
            bars,
            synthetic,
            seed,
            interval_minutes,
            start,
            end,
            output_dir,
            no_artifacts,
            json,
        }),
        Commands::CheckConfig { path } => run_check_config(path),
    }
}

struct RunArgs {
    config: Option<PathBuf>,
    bars: Option<PathBuf>,
    synthetic: Option<usize>,
    seed: u64,
    interval_minutes: i64,
    start: Option<usize>,
    end: Option<usize>,
    output_dir: PathBuf,
    no_artifacts: bool,
    json: bool,
}

fn run_backtest_cmd(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => BacktestConfig::from_file(path)?,
        None => BacktestConfig::default(),
    };

    let loaded = load_bars(&args)?;
    let start = args.start.unwrap_or(0);
    let end = args.end.unwrap_or(loaded.bars.len());
    info!(bars = loaded.bars.len(), start, end, "starting backtest");

    let result = run_loaded_range(&config, &loaded, start, end)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    if !args.no_artifacts {
        let run_dir = save_artifacts(&result, &args.output_dir)?;
        println!("Artifacts saved to: {}", run_dir.display());
    }

    Ok(())
}

fn load_bars(args: &RunArgs) -> Result<LoadedBars> {
    match (&args.bars, args.synthetic) {
        (Some(_), Some(_)) => bail!("--bars and --synthetic are mutually exclusive"),
        (None, None) => bail!("one of --bars or --synthetic is required"),
        (Some(path), None) => {
            load_bars_csv(path).with_context(|| format!("failed to load {}", path.display()))
        }
        (None, Some(count)) => {
            if count == 0 {
                bail!("--synthetic needs at least one bar");
            }
            if args.interval_minutes <= 0 {
                bail!("--interval-minutes must be positive");
            }
            Ok(generate_synthetic_bars(
                args.seed,
                count,
                synthetic_start(),
                Duration::minutes(args.interval_minutes),
            ))
        }
    }
}

fn synthetic_start() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default()
}

fn run_check_config(path: PathBuf) -> Result<()> {
    let config = BacktestConfig::from_file(&path)?;
    let run_id = config.run_id()?;
    println!("Config OK: {}", path.display());
    println!("  Strategy: {}", config.strategy.build().name());
    println!("  Run id:   {run_id}");
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    println!();
    println!("=== Backtest Result ===");
    println!("Strategy:    {}", result.strategy);
    println!("Run id:      {}", result.run_id);
    println!(
        "Bars:        {} (indices {}..{})",
        result.bar_count, result.start, result.end
    );
    println!("Dataset:     {}", result.dataset_hash);
    if result.has_synthetic {
        println!("WARNING: results computed on synthetic data");
    }
    println!();
    println!("{}", result.stats);
    println!();
    println!("--- Exits ---");
    println!(
        "Stop-loss:   {:>6}  profit {:>12.2}",
        result.exits.stop_loss, result.exits.stop_loss_profit
    );
    println!(
        "Take-profit: {:>6}  profit {:>12.2}",
        result.exits.take_profit, result.exits.take_profit_profit
    );

    if !result.skipped_bars.is_empty() {
        println!(
            "Skipped {} void bar(s): {:?}",
            result.skipped_bars.len(),
            result.skipped_bars
        );
    }

    if !result.diagnostics.is_empty() {
        println!();
        println!("--- Diagnostics ---");
        for diagnostic in &result.diagnostics {
            match diagnostic {
                Diagnostic::LeftoverPositionsDiscarded { trade_ids, .. } => {
                    let ids: Vec<u64> = trade_ids.iter().map(|id| id.0).collect();
                    println!("{diagnostic} (ids: {ids:?})");
                }
            }
        }
    }
    println!();
}
