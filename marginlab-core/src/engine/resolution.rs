//! Exit resolution — decide which protective level a bar triggers.
//!
//! A bar only tells us open, high, low and close. When both the stop-loss and
//! the take-profit sit inside `[low, high]` we cannot know which was touched
//! first, so the tie-break policy picks an order deterministically:
//!
//! - `StopLossFirst`: adverse level always wins (worst case).
//! - `OhlcPath`: infer the path from the open. A gap through the stop at the
//!   open fills the stop; an open at the adverse extreme (open == low for a
//!   long) means price only moved in the position's favor, so the take-profit
//!   is checked first; otherwise the stop is checked first.
//!
//! At most one level fires per position per pass.

use crate::domain::{Bar, Trade, TradeSide};
use serde::{Deserialize, Serialize};

/// How to order the stop-loss and take-profit checks within one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    StopLossFirst,
    OhlcPath,
}

impl TieBreak {
    pub fn from_enforce_flag(enforce_stop_loss_first: bool) -> Self {
        if enforce_stop_loss_first {
            TieBreak::StopLossFirst
        } else {
            TieBreak::OhlcPath
        }
    }
}

/// Which level closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    StopLoss,
    TakeProfit,
}

/// A triggered exit: close at `price` because of `kind`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitSignal {
    pub kind: ExitKind,
    pub price: f64,
}

/// Whether the bar opened beyond the previous close against the position
/// (below it for a long, above it for a short).
pub fn gapped_against(side: TradeSide, bar: &Bar, prev_close: Option<f64>) -> bool {
    match (side, prev_close) {
        (_, None) => false,
        (TradeSide::Long, Some(prev)) => bar.open < prev,
        (TradeSide::Short, Some(prev)) => bar.open > prev,
    }
}

/// Whether the bar opened at its adverse extreme, i.e. price only moved in the
/// position's favor after the open (open == low for a long, open == high for a short).
pub fn opened_at_adverse_extreme(side: TradeSide, bar: &Bar) -> bool {
    bar.open == side.adverse_extreme(bar)
}

/// Resolve a single open trade against a bar.
pub fn resolve_exit(
    trade: &Trade,
    bar: &Bar,
    prev_close: Option<f64>,
    tie_break: TieBreak,
) -> Option<ExitSignal> {
    let side = trade.side();
    let stop_loss = || {
        trade
            .is_stop_loss(side.adverse_extreme(bar))
            .then(|| stop_signal(trade))
            .flatten()
    };
    let take_profit = || {
        trade
            .is_take_profit(side.favorable_extreme(bar))
            .then(|| take_signal(trade))
            .flatten()
    };

    match tie_break {
        TieBreak::StopLossFirst => stop_loss().or_else(take_profit),
        TieBreak::OhlcPath => {
            if gapped_against(side, bar, prev_close) && trade.is_stop_loss(bar.open) {
                stop_signal(trade)
            } else if opened_at_adverse_extreme(side, bar) {
                take_profit().or_else(stop_loss)
            } else {
                stop_loss().or_else(take_profit)
            }
        }
    }
}

fn stop_signal(trade: &Trade) -> Option<ExitSignal> {
    trade.stop_loss().map(|price| ExitSignal {
        kind: ExitKind::StopLoss,
        price,
    })
}

fn take_signal(trade: &Trade) -> Option<ExitSignal> {
    trade.take_profit().map(|price| ExitSignal {
        kind: ExitKind::TakeProfit,
        price,
    })
}
