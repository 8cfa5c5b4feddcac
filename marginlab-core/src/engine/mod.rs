//! Backtesting engine — bar-by-bar resolution loop.
//!
//! For every bar in the run range the engine executes, in order:
//!
//! 1. Pre-strategy resolution: every open position is checked against the bar
//!    and closed if its stop-loss or take-profit triggered.
//! 2. Strategy: the injected [`Strategy`] may open new positions.
//! 3. Post-strategy resolution (only with `allow_same_bar_exit`): positions
//!    opened in step 2 are checked against the same bar.
//!
//! Positions still open when the bars run out are discarded through
//! [`Ledger::undo_positions`] rather than force-closed at the last price.

pub mod hooks;
pub mod resolution;

pub use hooks::{ExitCallbacks, ExitListener, Strategy, StrategyContext};
pub use resolution::{resolve_exit, ExitKind, ExitSignal, TieBreak};

use crate::domain::{Bar, ClosedTrade, Trade, TradeId};
use crate::ledger::{Ledger, LedgerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Engine behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Always test the stop-loss before the take-profit. When false, the
    /// OHLC path heuristic decides.
    pub enforce_stop_loss_first: bool,
    /// Let positions opened by the strategy exit within the same bar.
    pub allow_same_bar_exit: bool,
}

impl EngineConfig {
    pub fn tie_break(&self) -> TieBreak {
        TieBreak::from_enforce_flag(self.enforce_stop_loss_first)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enforce_stop_loss_first: true,
            allow_same_bar_exit: false,
        }
    }
}

/// Errors that abort a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid run range {start}..{end} for {bar_count} bars")]
    InvalidRange {
        start: usize,
        end: usize,
        bar_count: usize,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Lifecycle of the engine across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Running,
    Finished,
}

/// Which resolution pass closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPass {
    PreStrategy,
    PostStrategy,
}

/// A position closed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    pub pass: ResolutionPass,
    pub kind: ExitKind,
    pub price: f64,
    pub trade: ClosedTrade,
}

/// Recoverable conditions reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Positions still open at the end of the data were discarded.
    LeftoverPositionsDiscarded {
        count: usize,
        trade_ids: Vec<TradeId>,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::LeftoverPositionsDiscarded { count, .. } => {
                let (noun, pronoun) = if *count == 1 {
                    ("position", "it")
                } else {
                    ("positions", "they")
                };
                write!(
                    f,
                    "no data left to backtest, {count} {noun} still open, pretend {pronoun} never existed"
                )
            }
        }
    }
}

/// Everything a run produced besides the ledger state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub start: usize,
    pub end: usize,
    /// Engine-driven closes in close order.
    pub exits: Vec<ExitEvent>,
    pub diagnostics: Vec<Diagnostic>,
    /// Indices of void (NaN) bars that were skipped.
    pub skipped_bars: Vec<usize>,
}

impl RunReport {
    fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            ..Self::default()
        }
    }

    pub fn bars_processed(&self) -> usize {
        self.end - self.start - self.skipped_bars.len()
    }

    pub fn count(&self, kind: ExitKind) -> usize {
        self.exits.iter().filter(|e| e.kind == kind).count()
    }
}

/// The bar-resolution engine. Owns the ledger it trades on.
#[derive(Debug)]
pub struct Engine {
    ledger: Ledger,
    config: EngineConfig,
    phase: RunPhase,
}

impl Engine {
    pub fn new(ledger: Ledger, config: EngineConfig) -> Self {
        Self {
            ledger,
            config,
            phase: RunPhase::Idle,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Run over every bar.
    pub fn run(
        &mut self,
        bars: &[Bar],
        strategy: &mut dyn Strategy,
        listener: &mut dyn ExitListener,
    ) -> Result<RunReport, EngineError> {
        self.run_range(bars, 0, bars.len(), strategy, listener)
    }

    /// Run over `bars[start..end]`.
    ///
    /// The range is validated before anything is touched. The ledger is reset
    /// at the start of every run. On error the engine returns to `Idle`.
    pub fn run_range(
        &mut self,
        bars: &[Bar],
        start: usize,
        end: usize,
        strategy: &mut dyn Strategy,
        listener: &mut dyn ExitListener,
    ) -> Result<RunReport, EngineError> {
        if start >= end || end > bars.len() {
            return Err(EngineError::InvalidRange {
                start,
                end,
                bar_count: bars.len(),
            });
        }

        self.ledger.reset();
        self.phase = RunPhase::Running;
        info!(start, end, strategy = strategy.name(), "backtest started");

        match self.drive(bars, start, end, strategy, listener) {
            Ok(report) => {
                self.phase = RunPhase::Finished;
                info!(
                    bars = report.bars_processed(),
                    trades = self.ledger.history().len(),
                    equity = self.ledger.equity(),
                    "backtest finished"
                );
                Ok(report)
            }
            Err(err) => {
                self.phase = RunPhase::Idle;
                Err(err)
            }
        }
    }

    fn drive(
        &mut self,
        bars: &[Bar],
        start: usize,
        end: usize,
        strategy: &mut dyn Strategy,
        listener: &mut dyn ExitListener,
    ) -> Result<RunReport, EngineError> {
        let mut report = RunReport::new(start, end);
        let mut prev_close = None;

        for (index, bar) in bars.iter().enumerate().take(end).skip(start) {
            if bar.is_void() {
                warn!(bar = index, timestamp = %bar.timestamp, "skipping void bar");
                report.skipped_bars.push(index);
                continue;
            }

            self.resolve_pass(
                bar,
                index,
                prev_close,
                None,
                ResolutionPass::PreStrategy,
                listener,
                &mut report,
            )?;

            let opened_before: Option<HashSet<TradeId>> = self
                .config
                .allow_same_bar_exit
                .then(|| self.ledger.open_positions().iter().map(Trade::id).collect());

            let mut ctx = StrategyContext::new(&bars[..=index], bar, index, &mut self.ledger);
            strategy.next(&mut ctx)?;

            if let Some(ignore) = opened_before {
                self.resolve_pass(
                    bar,
                    index,
                    prev_close,
                    Some(&ignore),
                    ResolutionPass::PostStrategy,
                    listener,
                    &mut report,
                )?;
            }

            prev_close = Some(bar.close);
        }

        if !self.ledger.is_flat() {
            let discarded = self.ledger.undo_positions();
            let diagnostic = Diagnostic::LeftoverPositionsDiscarded {
                count: discarded.len(),
                trade_ids: discarded.iter().map(Trade::id).collect(),
            };
            warn!(count = discarded.len(), "{diagnostic}");
            report.diagnostics.push(diagnostic);
        }

        Ok(report)
    }

    /// Check open positions (minus `ignore`) against `bar` and close the triggered ones.
    #[allow(clippy::too_many_arguments)]
    fn resolve_pass(
        &mut self,
        bar: &Bar,
        index: usize,
        prev_close: Option<f64>,
        ignore: Option<&HashSet<TradeId>>,
        pass: ResolutionPass,
        listener: &mut dyn ExitListener,
        report: &mut RunReport,
    ) -> Result<(), LedgerError> {
        let tie_break = self.config.tie_break();
        let triggered: Vec<(TradeId, ExitSignal)> = self
            .ledger
            .open_positions()
            .iter()
            .filter(|trade| ignore.map_or(true, |set| !set.contains(&trade.id())))
            .filter_map(|trade| {
                resolve_exit(trade, bar, prev_close, tie_break).map(|signal| (trade.id(), signal))
            })
            .collect();

        let fee = self.ledger.fees().maker_fee;
        for (id, signal) in triggered {
            let closed = self
                .ledger
                .close_trade(signal.price, id, bar.timestamp, fee)?;
            match signal.kind {
                ExitKind::StopLoss => listener.on_stop_loss(&closed, signal.price),
                ExitKind::TakeProfit => listener.on_take_profit(&closed, signal.price),
            }
            debug!(id = %id, kind = ?signal.kind, price = signal.price, bar = index, "exit");
            report.exits.push(ExitEvent {
                bar_index: index,
                timestamp: bar.timestamp,
                pass,
                kind: signal.kind,
                price: signal.price,
                trade: closed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExitLevels;
    use crate::fees::FeeSchedule;
    use chrono::{Duration, TimeZone};

    struct Idle;

    impl Strategy for Idle {
        fn next(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), LedgerError> {
            Ok(())
        }
    }

    /// Opens one long on the first bar it sees, at the bar's close.
    struct OpenOnce {
        levels: ExitLevels,
        done: bool,
    }

    impl Strategy for OpenOnce {
        fn next(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), LedgerError> {
            if !self.done {
                self.done = true;
                let price = ctx.bar().close;
                ctx.open_long(price, 100.0, 0.0, 1.0, self.levels)?;
            }
            Ok(())
        }
    }

    fn bars(n: usize) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Bar::new(t0 + Duration::hours(i as i64), 100.0, 101.0, 99.0, 100.0))
            .collect()
    }

    fn engine() -> Engine {
        Engine::new(
            Ledger::new(1_000.0, FeeSchedule::zero()).unwrap(),
            EngineConfig::default(),
        )
    }

    #[test]
    fn default_config_is_strict_without_same_bar_exits() {
        let config = EngineConfig::default();
        assert!(config.enforce_stop_loss_first);
        assert!(!config.allow_same_bar_exit);
        assert_eq!(config.tie_break(), TieBreak::StopLossFirst);
    }

    #[test]
    fn phase_moves_idle_to_finished() {
        let mut engine = engine();
        assert_eq!(engine.phase(), RunPhase::Idle);
        let report = engine.run(&bars(3), &mut Idle, &mut ()).unwrap();
        assert_eq!(engine.phase(), RunPhase::Finished);
        assert_eq!(report.bars_processed(), 3);
        assert!(report.exits.is_empty());
        assert!(report.diagnostics.is_empty());
    }

    /// Counts the bars the strategy is called on.
    struct Counter(usize);

    impl Strategy for Counter {
        fn next(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), LedgerError> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn void_bars_are_skipped() {
        let mut data = bars(4);
        data[2].high = f64::NAN;
        let mut counter = Counter(0);
        let report = engine().run(&data, &mut counter, &mut ()).unwrap();
        assert_eq!(counter.0, 3);
        assert_eq!(report.skipped_bars, vec![2]);
        assert_eq!(report.bars_processed(), 3);
    }

    #[test]
    fn invalid_ranges_fail_before_mutation() {
        let mut engine = engine();
        let data = bars(3);
        for (start, end) in [(2, 2), (3, 1), (0, 4)] {
            let err = engine
                .run_range(&data, start, end, &mut Idle, &mut ())
                .unwrap_err();
            assert_eq!(
                err,
                EngineError::InvalidRange {
                    start,
                    end,
                    bar_count: 3
                }
            );
        }
        assert!(engine.run(&[], &mut Idle, &mut ()).is_err());
        assert_eq!(engine.phase(), RunPhase::Idle);
    }

    #[test]
    fn leftover_positions_are_discarded_with_diagnostic() {
        let mut engine = engine();
        let mut strategy = OpenOnce {
            levels: ExitLevels::none(),
            done: false,
        };
        let report = engine.run(&bars(3), &mut strategy, &mut ()).unwrap();
        assert_eq!(
            report.diagnostics,
            vec![Diagnostic::LeftoverPositionsDiscarded {
                count: 1,
                trade_ids: vec![TradeId(1)]
            }]
        );
        assert!(engine.ledger().is_flat());
        assert!(engine.ledger().history().is_empty());
        assert_eq!(engine.ledger().equity(), 1_000.0);
    }

    #[test]
    fn diagnostic_message_matches_count() {
        let one = Diagnostic::LeftoverPositionsDiscarded {
            count: 1,
            trade_ids: vec![TradeId(1)],
        };
        let two = Diagnostic::LeftoverPositionsDiscarded {
            count: 2,
            trade_ids: vec![TradeId(1), TradeId(2)],
        };
        assert!(one.to_string().contains("1 position still open, pretend it never"));
        assert!(two.to_string().contains("2 positions still open, pretend they never"));
    }

    #[test]
    fn diagnostic_serializes_with_type_tag() {
        let diag = Diagnostic::LeftoverPositionsDiscarded {
            count: 1,
            trade_ids: vec![TradeId(7)],
        };
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains(r#""type":"leftover_positions_discarded""#));
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diag);
    }

    #[test]
    fn strategy_errors_abort_the_run() {
        let mut engine = engine();
        let mut strategy = OpenOnce {
            levels: ExitLevels::new(Some(110.0), Some(90.0)),
            done: false,
        };
        let err = engine.run(&bars(2), &mut strategy, &mut ()).unwrap_err();
        assert!(matches!(err, EngineError::Ledger(LedgerError::Trade(_))));
        assert_eq!(engine.phase(), RunPhase::Idle);
    }

    #[test]
    fn runs_are_repeatable() {
        let mut engine = engine();
        let data = bars(4);
        let mut first = OpenOnce {
            levels: ExitLevels::none().with_take_profit(100.5),
            done: false,
        };
        let a = engine.run(&data, &mut first, &mut ()).unwrap();
        let mut second = OpenOnce {
            levels: ExitLevels::none().with_take_profit(100.5),
            done: false,
        };
        let b = engine.run(&data, &mut second, &mut ()).unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.ledger().history().len(), 1);
    }
}
