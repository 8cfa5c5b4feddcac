//! Trade — a leveraged long or short position and its closed round-trip record.
//!
//! An open [`Trade`] holds the total of the side that was transacted at open
//! (bought for a long, sold for a short). Closing consumes it and yields a
//! [`ClosedTrade`] with both totals set, so a position can only ever be
//! closed once.

use super::bar::Bar;
use super::ids::TradeId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    /// The bar extreme a stop-loss is tested against (low for long, high for short).
    pub fn adverse_extreme(self, bar: &Bar) -> f64 {
        match self {
            TradeSide::Long => bar.low,
            TradeSide::Short => bar.high,
        }
    }

    /// The bar extreme a take-profit is tested against (high for long, low for short).
    pub fn favorable_extreme(self, bar: &Bar) -> f64 {
        match self {
            TradeSide::Long => bar.high,
            TradeSide::Short => bar.low,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Long => write!(f, "Long"),
            TradeSide::Short => write!(f, "Short"),
        }
    }
}

/// Errors raised when a trade would be constructed in an inconsistent state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeError {
    #[error("leverage must be a finite value >= 1, got {0}")]
    InvalidLeverage(f64),

    #[error("{level} must be a positive finite price, got {price}")]
    NonPositiveLevel { level: &'static str, price: f64 },

    #[error("invalid exit levels for {side} trade: stop_loss={stop_loss}, take_profit={take_profit}")]
    InvalidLevels {
        side: TradeSide,
        stop_loss: f64,
        take_profit: f64,
    },
}

/// Optional stop-loss and take-profit price levels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExitLevels {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl ExitLevels {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        Self {
            stop_loss,
            take_profit,
        }
    }

    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    /// Every set level must be a positive price. Long: take-profit must sit
    /// above stop-loss. Short: the other way round.
    pub fn validate(&self, side: TradeSide) -> Result<(), TradeError> {
        for (level, price) in [("stop_loss", self.stop_loss), ("take_profit", self.take_profit)] {
            if let Some(price) = price {
                if !price.is_finite() || price <= 0.0 {
                    return Err(TradeError::NonPositiveLevel { level, price });
                }
            }
        }
        let (Some(stop_loss), Some(take_profit)) = (self.stop_loss, self.take_profit) else {
            return Ok(());
        };
        let ordered = match side {
            TradeSide::Long => take_profit > stop_loss,
            TradeSide::Short => stop_loss > take_profit,
        };
        if ordered {
            Ok(())
        } else {
            Err(TradeError::InvalidLevels {
                side,
                stop_loss,
                take_profit,
            })
        }
    }
}

/// An open leveraged position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    id: TradeId,
    side: TradeSide,
    leveraged_quantity: f64,
    leverage: f64,
    /// Bought total for a long, sold total for a short.
    opening_total: f64,
    open_time: DateTime<Utc>,
    levels: ExitLevels,
}

impl Trade {
    pub fn open_long(
        id: TradeId,
        leveraged_quantity: f64,
        leveraged_total_bought: f64,
        open_time: DateTime<Utc>,
        leverage: f64,
        levels: ExitLevels,
    ) -> Result<Self, TradeError> {
        Self::open(
            id,
            TradeSide::Long,
            leveraged_quantity,
            leveraged_total_bought,
            open_time,
            leverage,
            levels,
        )
    }

    pub fn open_short(
        id: TradeId,
        leveraged_quantity: f64,
        leveraged_total_sold: f64,
        open_time: DateTime<Utc>,
        leverage: f64,
        levels: ExitLevels,
    ) -> Result<Self, TradeError> {
        Self::open(
            id,
            TradeSide::Short,
            leveraged_quantity,
            leveraged_total_sold,
            open_time,
            leverage,
            levels,
        )
    }

    fn open(
        id: TradeId,
        side: TradeSide,
        leveraged_quantity: f64,
        opening_total: f64,
        open_time: DateTime<Utc>,
        leverage: f64,
        levels: ExitLevels,
    ) -> Result<Self, TradeError> {
        if !leverage.is_finite() || leverage < 1.0 {
            return Err(TradeError::InvalidLeverage(leverage));
        }
        levels.validate(side)?;
        Ok(Self {
            id,
            side,
            leveraged_quantity,
            leverage,
            opening_total,
            open_time,
            levels,
        })
    }

    pub fn id(&self) -> TradeId {
        self.id
    }

    pub fn side(&self) -> TradeSide {
        self.side
    }

    pub fn leveraged_quantity(&self) -> f64 {
        self.leveraged_quantity
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    pub fn stop_loss(&self) -> Option<f64> {
        self.levels.stop_loss
    }

    pub fn take_profit(&self) -> Option<f64> {
        self.levels.take_profit
    }

    pub fn levels(&self) -> ExitLevels {
        self.levels
    }

    /// Set at open for a long; unknown until settlement for a short.
    pub fn leveraged_total_bought(&self) -> Option<f64> {
        match self.side {
            TradeSide::Long => Some(self.opening_total),
            TradeSide::Short => None,
        }
    }

    /// Set at open for a short; unknown until settlement for a long.
    pub fn leveraged_total_sold(&self) -> Option<f64> {
        match self.side {
            TradeSide::Long => None,
            TradeSide::Short => Some(self.opening_total),
        }
    }

    /// Always `None`: an open trade has not been closed.
    pub fn close_time(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Whether `extreme` breaches the stop-loss. False when no stop-loss is set.
    pub fn is_stop_loss(&self, extreme: f64) -> bool {
        match (self.side, self.levels.stop_loss) {
            (_, None) => false,
            (TradeSide::Long, Some(level)) => extreme <= level,
            (TradeSide::Short, Some(level)) => extreme >= level,
        }
    }

    /// Whether `extreme` reaches the take-profit. False when no take-profit is set.
    pub fn is_take_profit(&self, extreme: f64) -> bool {
        match (self.side, self.levels.take_profit) {
            (_, None) => false,
            (TradeSide::Long, Some(level)) => extreme >= level,
            (TradeSide::Short, Some(level)) => extreme <= level,
        }
    }

    /// Settle the position. A long records the sold total, a short the bought total.
    pub fn close(self, settlement_total: f64, close_time: DateTime<Utc>) -> ClosedTrade {
        let (leveraged_total_bought, leveraged_total_sold) = match self.side {
            TradeSide::Long => (self.opening_total, settlement_total),
            TradeSide::Short => (settlement_total, self.opening_total),
        };
        ClosedTrade {
            id: self.id,
            side: self.side,
            leveraged_quantity: self.leveraged_quantity,
            leverage: self.leverage,
            leveraged_total_bought,
            leveraged_total_sold,
            open_time: self.open_time,
            close_time,
            stop_loss: self.levels.stop_loss,
            take_profit: self.levels.take_profit,
        }
    }
}

/// A settled round-trip. Immutable once stored in the ledger history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: TradeId,
    pub side: TradeSide,
    pub leveraged_quantity: f64,
    pub leverage: f64,
    pub leveraged_total_bought: f64,
    pub leveraged_total_sold: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl ClosedTrade {
    /// Profit in the quote currency. Same formula for both sides.
    pub fn profit(&self) -> f64 {
        self.leveraged_total_sold - self.leveraged_total_bought
    }

    pub fn duration(&self) -> Duration {
        self.close_time - self.open_time
    }

    pub fn is_winner(&self) -> bool {
        self.profit() > 0.0
    }

    /// The un-leveraged stake behind the position.
    pub fn margin(&self) -> f64 {
        match self.side {
            TradeSide::Long => self.leveraged_total_bought / self.leverage,
            TradeSide::Short => self.leveraged_total_sold / self.leverage,
        }
    }

    /// Profit as a fraction of the stake.
    pub fn return_on_margin(&self) -> f64 {
        let margin = self.margin();
        if margin == 0.0 {
            return 0.0;
        }
        self.profit() / margin
    }
}
