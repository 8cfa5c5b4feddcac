//! Fee and margin math — pure functions, no state.
//!
//! Fees are fractions (0.0016 = 0.16%). Margin rollover accrues in discrete
//! steps of `period_hours`; a position held for less than one period pays the
//! opening fee only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fee schedule value outside its allowed range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeeError {
    #[error("{name} must be in [0, 1), got {value}")]
    FractionOutOfRange { name: &'static str, value: f64 },

    #[error("margin_rollover.period_hours must be positive, got {0}")]
    NonPositivePeriod(f64),
}

/// Rollover cost charged on borrowed margin per completed period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginRollover {
    /// Fee fraction charged per completed period.
    pub rate: f64,
    /// Length of one rollover period in hours.
    pub period_hours: f64,
}

impl MarginRollover {
    pub fn new(rate: f64, period_hours: f64) -> Self {
        Self { rate, period_hours }
    }
}

impl Default for MarginRollover {
    /// 0.01% per 4 hours.
    fn default() -> Self {
        Self::new(0.0001, 4.0)
    }
}

/// The fee schedule a ledger trades under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    pub maker_fee: f64,
    /// Kept as configuration; the close path charges `maker_fee`.
    pub taker_fee: f64,
    pub margin_opening_fee: f64,
    pub margin_rollover: MarginRollover,
}

impl FeeSchedule {
    pub fn zero() -> Self {
        Self {
            maker_fee: 0.0,
            taker_fee: 0.0,
            margin_opening_fee: 0.0,
            margin_rollover: MarginRollover::new(0.0, 4.0),
        }
    }

    /// Check every fee is a fraction in `[0, 1)` and the rollover period is positive.
    pub fn validate(&self) -> Result<(), FeeError> {
        let fractions = [
            ("maker_fee", self.maker_fee),
            ("taker_fee", self.taker_fee),
            ("margin_opening_fee", self.margin_opening_fee),
            ("margin_rollover.rate", self.margin_rollover.rate),
        ];
        for (name, value) in fractions {
            if !(0.0..1.0).contains(&value) {
                return Err(FeeError::FractionOutOfRange { name, value });
            }
        }
        let period = self.margin_rollover.period_hours;
        if !period.is_finite() || period <= 0.0 {
            return Err(FeeError::NonPositivePeriod(period));
        }
        Ok(())
    }
}

impl Default for FeeSchedule {
    /// BTC/USD spot-margin schedule: 0.16% maker, 0.26% taker,
    /// 0.01% margin opening, 0.01% rollover per 4 hours.
    fn default() -> Self {
        Self {
            maker_fee: 0.0016,
            taker_fee: 0.0026,
            margin_opening_fee: 0.0001,
            margin_rollover: MarginRollover::default(),
        }
    }
}

pub fn lower_by_fee(value: f64, fee: f64) -> f64 {
    value * (1.0 - fee)
}

pub fn raise_by_fee(value: f64, fee: f64) -> f64 {
    value * (1.0 + fee)
}

/// Base-asset quantity bought with `total` quote currency at `price`.
pub fn to_quantity(price: f64, total: f64) -> f64 {
    total / price
}

/// Quote-currency total for `quantity` of the base asset at `price`.
pub fn to_total(price: f64, quantity: f64) -> f64 {
    price * quantity
}

/// Margin fee fraction for a position borrowed over `hours`.
///
/// `opening_fee + rate * floor(hours / period_hours)`: with a 4h period,
/// `[0, 4)` pays no rollover, `[4, 8)` one unit, `[8, 12)` two units.
pub fn margin_fee(hours: f64, opening_fee: f64, rollover: MarginRollover) -> f64 {
    let periods = (hours / rollover.period_hours).floor();
    opening_fee + rollover.rate * periods
}

/// The quote total that, sold at `price` net of `fee`, buys exactly `quantity`.
pub fn settle_total(price: f64, quantity: f64, fee: f64) -> f64 {
    quantity / ((1.0 / price) * (1.0 - fee))
}

/// Elapsed hours between two instants, millisecond precision.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
