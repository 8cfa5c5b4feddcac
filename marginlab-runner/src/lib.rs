//! MarginLab Runner — backtest orchestration on top of `marginlab-core`.
//!
//! This crate provides:
//! - TOML configuration with content-addressed run ids
//! - CSV bar loading and deterministic synthetic bars
//! - Reference strategies (null, SMA crossover)
//! - Statistics: equity curve, win rate, trade durations, return
//! - JSON/CSV artifact export

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;
pub mod stats;
pub mod strategies;

pub use config::{BacktestConfig, ConfigError, LedgerConfig, RunId, StatsConfig};
pub use data_loader::{
    generate_synthetic_bars, load_bars_csv, read_bars_csv, write_bars_csv, LoadError, LoadedBars,
};
pub use export::{load_artifacts, save_artifacts};
pub use runner::{
    run_backtest, run_backtest_range, run_loaded_range, BacktestResult, ExitTally, RunError,
};
pub use stats::{BacktestStats, EquityPoint, Timeframe};
pub use strategies::{MaCrossover, MaCrossoverParams, NullStrategy, ParamError, StrategyConfig};
