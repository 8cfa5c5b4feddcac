//! Ledger — cash equity, open positions and closed-trade history.
//!
//! Only cash is tracked directly. Opening a long debits the margin put up;
//! closing it credits the margin back plus the profit. A short never touches
//! equity at open (the sale proceeds are borrowed money) and books only its
//! profit at settlement. `undo_positions` mirrors that asymmetry.

use crate::domain::{ClosedTrade, ExitLevels, Trade, TradeError, TradeId, TradeSide};
use crate::fees::{
    hours_between, lower_by_fee, margin_fee, raise_by_fee, settle_total, to_quantity, to_total,
    FeeError, FeeSchedule,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

/// Errors from ledger operations. Every failing operation leaves the ledger untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("total must be positive, got {0}")]
    NonPositiveTotal(f64),

    #[error("price must be positive, got {0}")]
    NonPositivePrice(f64),

    #[error("initial equity must be positive and finite, got {0}")]
    InvalidEquity(f64),

    #[error("invalid fee schedule: {0}")]
    InvalidFeeSchedule(#[from] FeeError),

    #[error("trade {0} is not an open position")]
    TradeNotOpen(TradeId),

    #[error("trade {id} is {actual}, expected {expected}")]
    WrongSide {
        id: TradeId,
        expected: TradeSide,
        actual: TradeSide,
    },

    #[error(transparent)]
    Trade(#[from] TradeError),
}

/// Cash balance, open positions and closed history for one simulated account.
#[derive(Debug, Clone)]
pub struct Ledger {
    initial_equity: f64,
    equity: f64,
    fees: FeeSchedule,
    open_positions: Vec<Trade>,
    history: Vec<ClosedTrade>,
    next_id: TradeId,
}

impl Ledger {
    pub fn new(initial_equity: f64, fees: FeeSchedule) -> Result<Self, LedgerError> {
        if !initial_equity.is_finite() || initial_equity <= 0.0 {
            return Err(LedgerError::InvalidEquity(initial_equity));
        }
        fees.validate()?;
        Ok(Self {
            initial_equity,
            equity: initial_equity,
            fees,
            open_positions: Vec::new(),
            history: Vec::new(),
            next_id: TradeId(1),
        })
    }

    // ── Read interface ──

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn initial_equity(&self) -> f64 {
        self.initial_equity
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Open positions in open order.
    pub fn open_positions(&self) -> &[Trade] {
        &self.open_positions
    }

    /// Closed trades in close order.
    pub fn history(&self) -> &[ClosedTrade] {
        &self.history
    }

    pub fn position(&self, id: TradeId) -> Option<&Trade> {
        self.open_positions.iter().find(|t| t.id() == id)
    }

    pub fn is_flat(&self) -> bool {
        self.open_positions.is_empty()
    }

    // ── Opening ──

    /// Buy `total * leverage` worth of the asset; equity is debited by `total`.
    pub fn open_long(
        &mut self,
        price: f64,
        total: f64,
        open_time: DateTime<Utc>,
        fee: f64,
        leverage: f64,
        levels: ExitLevels,
    ) -> Result<Trade, LedgerError> {
        check_order(price, total)?;
        let leveraged_total = total * leverage;
        let leveraged_quantity = to_quantity(price, lower_by_fee(leveraged_total, fee));
        let trade = Trade::open_long(
            self.next_id,
            leveraged_quantity,
            leveraged_total,
            open_time,
            leverage,
            levels,
        )?;
        self.next_id = self.next_id.next();
        self.equity -= total;
        debug!(
            id = %trade.id(),
            price,
            total,
            leverage,
            quantity = leveraged_quantity,
            equity = self.equity,
            "opened long"
        );
        self.open_positions.push(trade.clone());
        Ok(trade)
    }

    /// Borrow and sell `total * leverage` worth of the asset; equity is untouched.
    pub fn open_short(
        &mut self,
        price: f64,
        total: f64,
        open_time: DateTime<Utc>,
        fee: f64,
        leverage: f64,
        levels: ExitLevels,
    ) -> Result<Trade, LedgerError> {
        check_order(price, total)?;
        let leveraged_quantity = to_quantity(price, total * leverage);
        let leveraged_total_sold = to_total(price, lower_by_fee(leveraged_quantity, fee));
        let trade = Trade::open_short(
            self.next_id,
            leveraged_quantity,
            leveraged_total_sold,
            open_time,
            leverage,
            levels,
        )?;
        self.next_id = self.next_id.next();
        debug!(
            id = %trade.id(),
            price,
            total,
            leverage,
            proceeds = leveraged_total_sold,
            "opened short"
        );
        self.open_positions.push(trade.clone());
        Ok(trade)
    }

    // ── Closing ──

    /// Sell the long's quantity at `price`; credits margin plus profit.
    pub fn close_long(
        &mut self,
        price: f64,
        id: TradeId,
        close_time: DateTime<Utc>,
        fee: f64,
    ) -> Result<ClosedTrade, LedgerError> {
        check_price(price)?;
        let index = self.open_index(id, TradeSide::Long)?;
        let trade = self.open_positions.remove(index);
        let sold = to_total(price, lower_by_fee(trade.leveraged_quantity(), fee));
        let closed = trade.close(sold, close_time);
        self.equity += closed.leveraged_total_bought / closed.leverage + closed.profit();
        Ok(self.record(closed, price))
    }

    /// Buy back the borrowed quantity plus margin fees at `price`; credits profit.
    pub fn close_short(
        &mut self,
        price: f64,
        id: TradeId,
        close_time: DateTime<Utc>,
        fee: f64,
    ) -> Result<ClosedTrade, LedgerError> {
        check_price(price)?;
        let index = self.open_index(id, TradeSide::Short)?;
        let trade = self.open_positions.remove(index);

        let leveraged_quantity = trade.leveraged_quantity();
        let borrowed = leveraged_quantity / trade.leverage();
        let hours = hours_between(trade.open_time(), close_time);
        let margin = margin_fee(
            hours,
            self.fees.margin_opening_fee,
            self.fees.margin_rollover,
        );
        let owed = raise_by_fee(borrowed, margin);
        let quantity_to_settle = leveraged_quantity + owed - borrowed;
        let bought = settle_total(price, quantity_to_settle, fee);

        let closed = trade.close(bought, close_time);
        self.equity += closed.profit();
        Ok(self.record(closed, price))
    }

    /// Close an open position of either side.
    pub fn close_trade(
        &mut self,
        price: f64,
        id: TradeId,
        close_time: DateTime<Utc>,
        fee: f64,
    ) -> Result<ClosedTrade, LedgerError> {
        let side = self
            .position(id)
            .map(Trade::side)
            .ok_or(LedgerError::TradeNotOpen(id))?;
        match side {
            TradeSide::Long => self.close_long(price, id, close_time, fee),
            TradeSide::Short => self.close_short(price, id, close_time, fee),
        }
    }

    // ── Bulk state ──

    /// Discard every open position as if it never existed.
    ///
    /// Longs get their margin refunded; shorts had no cash effect at open and
    /// refund nothing. History is left untouched.
    pub fn undo_positions(&mut self) -> Vec<Trade> {
        for trade in &self.open_positions {
            if let Some(bought) = trade.leveraged_total_bought() {
                self.equity += bought / trade.leverage();
            }
        }
        std::mem::take(&mut self.open_positions)
    }

    pub fn reset(&mut self) {
        self.equity = self.initial_equity;
        self.open_positions.clear();
        self.history.clear();
        self.next_id = TradeId(1);
    }

    fn open_index(&self, id: TradeId, expected: TradeSide) -> Result<usize, LedgerError> {
        let index = self
            .open_positions
            .iter()
            .position(|t| t.id() == id)
            .ok_or(LedgerError::TradeNotOpen(id))?;
        let actual = self.open_positions[index].side();
        if actual != expected {
            return Err(LedgerError::WrongSide {
                id,
                expected,
                actual,
            });
        }
        Ok(index)
    }

    fn record(&mut self, closed: ClosedTrade, price: f64) -> ClosedTrade {
        debug!(
            id = %closed.id,
            side = %closed.side,
            price,
            profit = closed.profit(),
            equity = self.equity,
            "closed trade"
        );
        self.history.push(closed.clone());
        closed
    }
}

impl Default for Ledger {
    /// 1000 units of quote currency under the default fee schedule.
    fn default() -> Self {
        Self {
            initial_equity: 1000.0,
            equity: 1000.0,
            fees: FeeSchedule::default(),
            open_positions: Vec::new(),
            history: Vec::new(),
            next_id: TradeId(1),
        }
    }
}

fn check_price(price: f64) -> Result<(), LedgerError> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::NonPositivePrice(price))
    }
}

fn check_order(price: f64, total: f64) -> Result<(), LedgerError> {
    check_price(price)?;
    if total.is_finite() && total > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::NonPositiveTotal(total))
    }
}
