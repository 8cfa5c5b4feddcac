//! Domain types for MarginLab

pub mod bar;
pub mod ids;
pub mod trade;

pub use bar::Bar;
pub use ids::TradeId;
pub use trade::{ClosedTrade, ExitLevels, Trade, TradeError, TradeSide};
