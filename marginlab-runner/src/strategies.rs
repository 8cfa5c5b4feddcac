//! Reference strategies and their serializable configuration.
//!
//! - `NullStrategy`: never trades. Useful for checking data and plumbing.
//! - `MaCrossover`: SMA fast/slow crossover, one position at a time, with
//!   percentage stop-loss and take-profit levels around the entry close.

use marginlab_core::engine::{Strategy, StrategyContext};
use marginlab_core::{ExitLevels, LedgerError, TradeSide};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Invalid strategy parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("fast period must be at least 1")]
    ZeroFastPeriod,

    #[error("slow period ({slow}) must be greater than fast period ({fast})")]
    SlowNotAboveFast { fast: usize, slow: usize },

    #[error("stake_fraction must be in (0, 1], got {0}")]
    StakeFraction(f64),

    #[error("leverage must be >= 1, got {0}")]
    Leverage(f64),

    #[error("{name} must be in [0, 1), got {value}")]
    Percentage { name: &'static str, value: f64 },
}

/// Strategy selection (the `[strategy]` config section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Never trades.
    None,
    MaCrossover(MaCrossoverParams),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::MaCrossover(MaCrossoverParams::default())
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ParamError> {
        match self {
            StrategyConfig::None => Ok(()),
            StrategyConfig::MaCrossover(params) => params.validate(),
        }
    }

    /// Instantiate a fresh strategy. Every run gets its own state.
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::None => Box::new(NullStrategy),
            StrategyConfig::MaCrossover(params) => Box::new(MaCrossover::new(params.clone())),
        }
    }
}

// ── Null ──

/// A strategy that never opens a position.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStrategy;

impl Strategy for NullStrategy {
    fn next(&mut self, _ctx: &mut StrategyContext<'_>) -> Result<(), LedgerError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "none"
    }
}

// ── MA crossover ──

/// Parameters for [`MaCrossover`]. Percentages are fractions; `0.0` disables a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaCrossoverParams {
    pub fast: usize,
    pub slow: usize,
    /// Fraction of current equity staked per position.
    pub stake_fraction: f64,
    pub leverage: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// Open shorts on a death cross. Longs only when false.
    pub allow_short: bool,
}

impl Default for MaCrossoverParams {
    fn default() -> Self {
        Self {
            fast: 10,
            slow: 30,
            stake_fraction: 0.5,
            leverage: 2.0,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            allow_short: true,
        }
    }
}

impl MaCrossoverParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.fast == 0 {
            return Err(ParamError::ZeroFastPeriod);
        }
        if self.slow <= self.fast {
            return Err(ParamError::SlowNotAboveFast {
                fast: self.fast,
                slow: self.slow,
            });
        }
        if !(self.stake_fraction > 0.0 && self.stake_fraction <= 1.0) {
            return Err(ParamError::StakeFraction(self.stake_fraction));
        }
        if !self.leverage.is_finite() || self.leverage < 1.0 {
            return Err(ParamError::Leverage(self.leverage));
        }
        for (name, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ParamError::Percentage { name, value });
            }
        }
        Ok(())
    }

    /// Exit levels around an entry at `price`.
    pub fn levels(&self, side: TradeSide, price: f64) -> ExitLevels {
        let (stop_loss, take_profit) = match side {
            TradeSide::Long => (
                price * (1.0 - self.stop_loss_pct),
                price * (1.0 + self.take_profit_pct),
            ),
            TradeSide::Short => (
                price * (1.0 + self.stop_loss_pct),
                price * (1.0 - self.take_profit_pct),
            ),
        };
        ExitLevels::new(
            (self.stop_loss_pct > 0.0).then_some(stop_loss),
            (self.take_profit_pct > 0.0).then_some(take_profit),
        )
    }
}

/// Simple moving average crossover.
///
/// Enters at the current close when the fast SMA crosses the slow SMA on this
/// bar, and only while no position is open.
#[derive(Debug, Clone)]
pub struct MaCrossover {
    params: MaCrossoverParams,
}

impl MaCrossover {
    pub fn new(params: MaCrossoverParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MaCrossoverParams {
        &self.params
    }

    /// Direction of a cross on the last bar of `closes`, if any.
    fn cross(&self, closes: &[f64]) -> Option<TradeSide> {
        let n = closes.len();
        if n < self.params.slow + 1 {
            return None;
        }
        let prev = &closes[..n - 1];
        let fast_now = sma(closes, self.params.fast)?;
        let slow_now = sma(closes, self.params.slow)?;
        let fast_prev = sma(prev, self.params.fast)?;
        let slow_prev = sma(prev, self.params.slow)?;

        if fast_prev <= slow_prev && fast_now > slow_now {
            Some(TradeSide::Long)
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Some(TradeSide::Short)
        } else {
            None
        }
    }
}

impl Strategy for MaCrossover {
    fn next(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), LedgerError> {
        if !ctx.open_positions().is_empty() {
            return Ok(());
        }
        let closes: Vec<f64> = ctx
            .bars()
            .iter()
            .rev()
            .take(self.params.slow + 1)
            .rev()
            .map(|b| b.close)
            .collect();
        let side = match self.cross(&closes) {
            Some(TradeSide::Short) if !self.params.allow_short => return Ok(()),
            Some(side) => side,
            None => return Ok(()),
        };

        let stake = ctx.equity() * self.params.stake_fraction;
        if stake <= 0.0 {
            debug!(index = ctx.index(), equity = ctx.equity(), "no equity left to stake");
            return Ok(());
        }
        let price = ctx.bar().close;
        let fee = ctx.fees().maker_fee;
        let levels = self.params.levels(side, price);
        let leverage = self.params.leverage;
        match side {
            TradeSide::Long => ctx.open_long(price, stake, fee, leverage, levels)?,
            TradeSide::Short => ctx.open_short(price, stake, fee, leverage, levels)?,
        };
        Ok(())
    }

    fn name(&self) -> &str {
        "ma_crossover"
    }
}

/// Mean of the last `period` values.
fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}
