//! Backtest runner — wires together config, ledger, engine, strategy and statistics.
//!
//! Entry points:
//! - `run_backtest()`: every bar.
//! - `run_backtest_range()`: a `[start, end)` window of the bars. Strategies
//!   still see the bars before `start` as history.
//! - `run_loaded_range()`: same, tagging the result with the data provenance.

use marginlab_core::engine::{Diagnostic, ExitListener};
use marginlab_core::{Bar, ClosedTrade, Engine, EngineError, Ledger, LedgerError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{BacktestConfig, ConfigError, RunId};
use crate::data_loader::{compute_dataset_hash, LoadError, LoadedBars};
use crate::stats::BacktestStats;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Engine-driven exits counted by trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitTally {
    pub stop_loss: usize,
    pub take_profit: usize,
    pub stop_loss_profit: f64,
    pub take_profit_profit: f64,
}

impl ExitListener for ExitTally {
    fn on_stop_loss(&mut self, trade: &ClosedTrade, _price: f64) {
        self.stop_loss += 1;
        self.stop_loss_profit += trade.profit();
    }

    fn on_take_profit(&mut self, trade: &ClosedTrade, _price: f64) {
        self.take_profit += 1;
        self.take_profit_profit += trade.profit();
    }
}

/// Complete result of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub config: BacktestConfig,
    pub strategy: String,
    pub dataset_hash: String,
    pub has_synthetic: bool,
    pub bar_count: usize,
    pub start: usize,
    pub end: usize,
    pub stats: BacktestStats,
    pub trades: Vec<ClosedTrade>,
    pub exits: ExitTally,
    pub diagnostics: Vec<Diagnostic>,
    /// Void bars the engine skipped.
    #[serde(default)]
    pub skipped_bars: Vec<usize>,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Run a backtest over every bar.
pub fn run_backtest(config: &BacktestConfig, bars: &[Bar]) -> Result<BacktestResult, RunError> {
    run_backtest_range(config, bars, 0, bars.len())
}

/// Run a backtest over `bars[start..end]`.
pub fn run_backtest_range(
    config: &BacktestConfig,
    bars: &[Bar],
    start: usize,
    end: usize,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    let run_id = config.run_id()?;
    let ledger = Ledger::new(config.ledger.initial_equity, config.ledger.fees.clone())?;
    let mut engine = Engine::new(ledger, config.engine);
    let mut strategy = config.strategy.build();
    let mut tally = ExitTally::default();

    let report = engine.run_range(bars, start, end, strategy.as_mut(), &mut tally)?;

    let window = &bars[start..end];
    let stats = BacktestStats::compute(window, engine.ledger(), config.stats.resample);
    info!(
        run_id = %run_id,
        trades = stats.trade_count,
        final_equity = stats.final_equity,
        stop_losses = tally.stop_loss,
        take_profits = tally.take_profit,
        "run complete"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        config: config.clone(),
        strategy: strategy.name().to_string(),
        dataset_hash: compute_dataset_hash(window),
        has_synthetic: false,
        bar_count: window.len(),
        start,
        end,
        trades: engine.ledger().history().to_vec(),
        stats,
        exits: tally,
        diagnostics: report.diagnostics,
        skipped_bars: report.skipped_bars,
    })
}

/// Run over a window of loaded bars, carrying the synthetic-data tag.
pub fn run_loaded_range(
    config: &BacktestConfig,
    loaded: &LoadedBars,
    start: usize,
    end: usize,
) -> Result<BacktestResult, RunError> {
    let mut result = run_backtest_range(config, &loaded.bars, start, end)?;
    result.has_synthetic = loaded.synthetic;
    Ok(result)
}
