use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger-assigned trade identifier.
///
/// Ids increase monotonically in open order and restart from 1 when the
/// ledger is reset, so two identical runs hand out identical ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub u64);

impl TradeId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for TradeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}
