//! Hooks injected into a run: the strategy and the exit listener.
//!
//! The engine keeps no strategy state. A strategy sees bars up to and
//! including the current one plus read access to the ledger, and may open
//! positions through its [`StrategyContext`]. It cannot close them; exits are
//! the engine's job during resolution passes.

use crate::domain::{Bar, ClosedTrade, ExitLevels, Trade};
use crate::fees::FeeSchedule;
use crate::ledger::{Ledger, LedgerError};

/// Entry logic called once per bar, after the pre-strategy resolution pass.
pub trait Strategy {
    fn next(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), LedgerError>;

    /// Name of this strategy (for logging).
    fn name(&self) -> &str {
        "strategy"
    }
}

/// Callbacks invoked synchronously when the engine closes a position.
///
/// Exactly one of the two fires per closed position, matching the level that
/// actually triggered.
pub trait ExitListener {
    fn on_stop_loss(&mut self, _trade: &ClosedTrade, _price: f64) {}

    fn on_take_profit(&mut self, _trade: &ClosedTrade, _price: f64) {}
}

/// No-op listener.
impl ExitListener for () {}

type ExitCallback<'a> = Box<dyn FnMut(&ClosedTrade, f64) + 'a>;

/// Listener built from optional closures.
#[derive(Default)]
pub struct ExitCallbacks<'a> {
    stop_loss: Option<ExitCallback<'a>>,
    take_profit: Option<ExitCallback<'a>>,
}

impl<'a> ExitCallbacks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_loss(mut self, callback: impl FnMut(&ClosedTrade, f64) + 'a) -> Self {
        self.stop_loss = Some(Box::new(callback));
        self
    }

    pub fn with_take_profit(mut self, callback: impl FnMut(&ClosedTrade, f64) + 'a) -> Self {
        self.take_profit = Some(Box::new(callback));
        self
    }
}

impl ExitListener for ExitCallbacks<'_> {
    fn on_stop_loss(&mut self, trade: &ClosedTrade, price: f64) {
        if let Some(callback) = self.stop_loss.as_mut() {
            callback(trade, price);
        }
    }

    fn on_take_profit(&mut self, trade: &ClosedTrade, price: f64) {
        if let Some(callback) = self.take_profit.as_mut() {
            callback(trade, price);
        }
    }
}

/// What a strategy can see and do on one bar.
pub struct StrategyContext<'a> {
    bars: &'a [Bar],
    current: &'a Bar,
    index: usize,
    ledger: &'a mut Ledger,
}

impl<'a> StrategyContext<'a> {
    /// `bars` holds every bar up to and including `current`.
    pub(crate) fn new(bars: &'a [Bar], current: &'a Bar, index: usize, ledger: &'a mut Ledger) -> Self {
        Self {
            bars,
            current,
            index,
            ledger,
        }
    }

    /// The bar being processed.
    pub fn bar(&self) -> &Bar {
        self.current
    }

    /// The bar before the current one, if any.
    pub fn previous_bar(&self) -> Option<&Bar> {
        self.index.checked_sub(1).and_then(|i| self.bars.get(i))
    }

    /// All bars up to and including the current one.
    pub fn bars(&self) -> &[Bar] {
        self.bars
    }

    /// Index of the current bar in the full bar sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn equity(&self) -> f64 {
        self.ledger.equity()
    }

    pub fn initial_equity(&self) -> f64 {
        self.ledger.initial_equity()
    }

    pub fn fees(&self) -> &FeeSchedule {
        self.ledger.fees()
    }

    pub fn open_positions(&self) -> &[Trade] {
        self.ledger.open_positions()
    }

    pub fn history(&self) -> &[ClosedTrade] {
        self.ledger.history()
    }

    /// Open a long stamped with the current bar's timestamp.
    pub fn open_long(
        &mut self,
        price: f64,
        total: f64,
        fee: f64,
        leverage: f64,
        levels: ExitLevels,
    ) -> Result<Trade, LedgerError> {
        let open_time = self.current.timestamp;
        self.ledger
            .open_long(price, total, open_time, fee, leverage, levels)
    }

    /// Open a short stamped with the current bar's timestamp.
    pub fn open_short(
        &mut self,
        price: f64,
        total: f64,
        fee: f64,
        leverage: f64,
        levels: ExitLevels,
    ) -> Result<Trade, LedgerError> {
        let open_time = self.current.timestamp;
        self.ledger
            .open_short(price, total, open_time, fee, leverage, levels)
    }
}
