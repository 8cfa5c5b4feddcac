//! Serializable backtest configuration.
//!
//! Loaded from TOML. Every section is optional and falls back to its default:
//!
//! ```toml
//! [ledger]
//! initial_equity = 1000.0
//! maker_fee = 0.0016
//! margin_rollover = { rate = 0.0001, period_hours = 4.0 }
//!
//! [engine]
//! enforce_stop_loss_first = true
//! allow_same_bar_exit = false
//!
//! [stats]
//! resample = "day"
//!
//! [strategy]
//! type = "ma_crossover"
//! fast = 10
//! slow = 30
//! ```

use marginlab_core::{EngineConfig, FeeError, FeeSchedule};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::stats::Timeframe;
use crate::strategies::{ParamError, StrategyConfig};

/// Unique identifier for a backtest configuration (content-addressable hash).
pub type RunId = String;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("ledger.initial_equity must be positive, got {0}")]
    InvalidEquity(f64),

    #[error("invalid ledger fees: {0}")]
    Fees(#[from] FeeError),

    #[error("invalid strategy: {0}")]
    Strategy(#[from] ParamError),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Account and fee settings (the `[ledger]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub initial_equity: f64,
    #[serde(flatten)]
    pub fees: FeeSchedule,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_equity: 1000.0,
            fees: FeeSchedule::default(),
        }
    }
}

/// Statistics settings (the `[stats]` section).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Resample the equity curve to this timeframe for display and export.
    pub resample: Option<Timeframe>,
}

/// Everything needed to reproduce a backtest, minus the bars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub ledger: LedgerConfig,
    pub engine: EngineConfig,
    pub stats: StatsConfig,
    pub strategy: StrategyConfig,
}

impl BacktestConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let equity = self.ledger.initial_equity;
        if !equity.is_finite() || equity <= 0.0 {
            return Err(ConfigError::InvalidEquity(equity));
        }
        self.ledger.fees.validate()?;
        self.strategy.validate()?;
        Ok(())
    }

    /// Computes a deterministic BLAKE3 id over the canonical JSON form.
    ///
    /// Two runs with identical configs share an id and an artifact directory.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::MaCrossoverParams;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = BacktestConfig::from_toml("").unwrap();
        assert_eq!(config, BacktestConfig::default());
        assert_eq!(config.ledger.initial_equity, 1000.0);
        assert_eq!(config.ledger.fees, FeeSchedule::default());
        assert!(config.engine.enforce_stop_loss_first);
        assert!(!config.engine.allow_same_bar_exit);
    }

    #[test]
    fn full_document_parses() {
        let toml = r#"
            [ledger]
            initial_equity = 5000.0
            maker_fee = 0.001
            taker_fee = 0.002
            margin_opening_fee = 0.0002
            margin_rollover = { rate = 0.0003, period_hours = 8.0 }

            [engine]
            enforce_stop_loss_first = false
            allow_same_bar_exit = true

            [stats]
            resample = "week"

            [strategy]
            type = "ma_crossover"
            fast = 5
            slow = 20
            stake_fraction = 0.25
            leverage = 3.0
            stop_loss_pct = 0.01
            take_profit_pct = 0.03
            allow_short = false
        "#;
        let config = BacktestConfig::from_toml(toml).unwrap();
        assert_eq!(config.ledger.initial_equity, 5000.0);
        assert_eq!(config.ledger.fees.maker_fee, 0.001);
        assert_eq!(config.ledger.fees.margin_rollover.period_hours, 8.0);
        assert!(config.engine.allow_same_bar_exit);
        assert_eq!(config.stats.resample, Some(Timeframe::Week));
        assert_eq!(
            config.strategy,
            StrategyConfig::MaCrossover(MaCrossoverParams {
                fast: 5,
                slow: 20,
                stake_fraction: 0.25,
                leverage: 3.0,
                stop_loss_pct: 0.01,
                take_profit_pct: 0.03,
                allow_short: false,
            })
        );
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = BacktestConfig::from_toml(
            r#"
            [ledger]
            maker_fee = 0.0

            [strategy]
            type = "ma_crossover"
            fast = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.ledger.initial_equity, 1000.0);
        assert_eq!(config.ledger.fees.taker_fee, 0.0026);
        let StrategyConfig::MaCrossover(params) = &config.strategy else {
            panic!("expected ma_crossover");
        };
        assert_eq!(params.fast, 3);
        assert_eq!(params.slow, 30);
    }

    #[test]
    fn null_strategy_parses() {
        let config = BacktestConfig::from_toml("[strategy]\ntype = \"none\"\n").unwrap();
        assert_eq!(config.strategy, StrategyConfig::None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = BacktestConfig::from_toml("[ledger]\ninitial_equity = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEquity(v) if v == -1.0));

        let err = BacktestConfig::from_toml("[ledger]\nmaker_fee = 2.0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Fees(FeeError::FractionOutOfRange { name: "maker_fee", .. })
        ));

        let err = BacktestConfig::from_toml(
            "[strategy]\ntype = \"ma_crossover\"\nfast = 30\nslow = 10\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Strategy(ParamError::SlowNotAboveFast { fast: 30, slow: 10 })
        ));
        assert!(err.to_string().contains("slow period"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = BacktestConfig::from_toml("[strategy]\ntype = \"martingale\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = BacktestConfig::from_toml("[ledger\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn run_id_is_deterministic() {
        let config = BacktestConfig::default();
        let id1 = config.run_id().unwrap();
        let id2 = config.run_id().unwrap();
        assert_eq!(id1, id2, "RunId should be deterministic");
        assert_eq!(id1.len(), 64);
    }

    #[test]
    fn run_id_changes_with_params() {
        let config1 = BacktestConfig::default();
        let mut config2 = config1.clone();
        config2.engine.allow_same_bar_exit = true;
        assert_ne!(config1.run_id().unwrap(), config2.run_id().unwrap());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = BacktestConfig::from_file(Path::new("/nonexistent/marginlab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = BacktestConfig {
            stats: StatsConfig {
                resample: Some(Timeframe::Day),
            },
            ..BacktestConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(BacktestConfig::from_toml(&text).unwrap(), config);
    }
}
