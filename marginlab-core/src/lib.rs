//! MarginLab Core — leveraged position model, fee math, ledger and bar-resolution engine.
//!
//! This crate contains the heart of the backtester:
//! - Domain types (bars, trade ids, open and closed trades)
//! - Fee and margin-cost calculus
//! - Ledger with cash equity, open positions and closed history
//! - Bar-by-bar engine with a deterministic stop-loss / take-profit tie-break
//! - Strategy and exit-listener hooks

pub mod domain;
pub mod engine;
pub mod fees;
pub mod ledger;

pub use domain::{Bar, ClosedTrade, ExitLevels, Trade, TradeError, TradeId, TradeSide};
pub use engine::{Engine, EngineConfig, EngineError, RunPhase, RunReport};
pub use fees::{FeeError, FeeSchedule, MarginRollover};
pub use ledger::{Ledger, LedgerError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: core types are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::TradeId>();
        require_sync::<domain::TradeId>();
        require_send::<domain::Trade>();
        require_sync::<domain::Trade>();
        require_send::<domain::ClosedTrade>();
        require_sync::<domain::ClosedTrade>();
        require_send::<domain::ExitLevels>();
        require_sync::<domain::ExitLevels>();

        // Fees and ledger
        require_send::<fees::FeeSchedule>();
        require_sync::<fees::FeeSchedule>();
        require_send::<ledger::Ledger>();
        require_sync::<ledger::Ledger>();
        require_send::<ledger::LedgerError>();
        require_sync::<ledger::LedgerError>();

        // Engine types
        require_send::<engine::Engine>();
        require_sync::<engine::Engine>();
        require_send::<engine::EngineConfig>();
        require_sync::<engine::EngineConfig>();
        require_send::<engine::RunReport>();
        require_sync::<engine::RunReport>();
        require_send::<engine::ExitEvent>();
        require_sync::<engine::ExitEvent>();
        require_send::<engine::EngineError>();
        require_sync::<engine::EngineError>();
    }

    /// Boxed strategies drive the engine through `dyn Strategy`.
    #[test]
    fn boxed_strategy_runs_through_the_engine() {
        use chrono::{TimeZone, Utc};

        struct Calls(usize);

        impl engine::Strategy for Calls {
            fn next(&mut self, ctx: &mut engine::StrategyContext<'_>) -> Result<(), LedgerError> {
                self.0 += 1;
                assert_eq!(ctx.index() + 1, self.0);
                Ok(())
            }
        }

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = vec![
            Bar::new(t0, 10.0, 11.0, 9.0, 10.0),
            Bar::new(t0 + chrono::Duration::hours(1), 10.0, 11.0, 9.0, 10.0),
        ];
        let mut boxed: Box<dyn engine::Strategy> = Box::new(Calls(0));
        assert_eq!(boxed.name(), "strategy");

        let ledger = Ledger::new(100.0, FeeSchedule::zero()).unwrap();
        let mut engine = Engine::new(ledger, EngineConfig::default());
        let report = engine.run(&bars, boxed.as_mut(), &mut ()).unwrap();
        assert_eq!(report.bars_processed(), 2);
    }
}
