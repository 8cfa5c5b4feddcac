//! Bar loading for the runner.
//!
//! Two sources:
//! 1. CSV files with a `timestamp,open,high,low,close` header and RFC 3339
//!    timestamps. Rows must be sane and in non-decreasing time order.
//! 2. Deterministic synthetic bars (seeded random walk) for development.
//!    Results on synthetic data are tagged as such.

use chrono::{DateTime, Duration, Utc};
use marginlab_core::Bar;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("no bars found")]
    Empty,

    #[error("line {line}: invalid bar (open={open}, high={high}, low={low}, close={close})")]
    InsaneBar {
        line: u64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("line {line}: timestamp {timestamp} is earlier than the previous bar ({previous})")]
    OutOfOrder {
        line: u64,
        timestamp: DateTime<Utc>,
        previous: DateTime<Utc>,
    },
}

/// Bars plus provenance.
#[derive(Debug, Clone)]
pub struct LoadedBars {
    pub bars: Vec<Bar>,
    /// BLAKE3 over all bar data, for fingerprinting results.
    pub dataset_hash: String,
    pub synthetic: bool,
}

impl LoadedBars {
    fn new(bars: Vec<Bar>, synthetic: bool) -> Self {
        let dataset_hash = compute_dataset_hash(&bars);
        Self {
            bars,
            dataset_hash,
            synthetic,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// Load and validate bars from a CSV file.
pub fn load_bars_csv(path: &Path) -> Result<LoadedBars, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bars = read_bars_csv(file)?;
    info!(path = %path.display(), bars = bars.len(), "loaded bars");
    Ok(LoadedBars::new(bars, false))
}

/// Parse and validate bars from any CSV reader.
pub fn read_bars_csv<R: Read>(reader: R) -> Result<Vec<Bar>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut bars: Vec<Bar> = Vec::new();

    for result in rdr.deserialize::<CsvRow>() {
        let row = result?;
        // Header is line 1.
        let line = bars.len() as u64 + 2;
        let bar = Bar::new(row.timestamp, row.open, row.high, row.low, row.close);
        if !bar.is_sane() {
            return Err(LoadError::InsaneBar {
                line,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
            });
        }
        if let Some(prev) = bars.last() {
            if bar.timestamp < prev.timestamp {
                return Err(LoadError::OutOfOrder {
                    line,
                    timestamp: bar.timestamp,
                    previous: prev.timestamp,
                });
            }
        }
        bars.push(bar);
    }

    if bars.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(bars)
}

/// Write bars in the format `read_bars_csv` accepts.
pub fn write_bars_csv<W: std::io::Write>(writer: W, bars: &[Bar]) -> Result<(), LoadError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["timestamp", "open", "high", "low", "close"])?;
    for bar in bars {
        wtr.write_record([
            bar.timestamp.to_rfc3339(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
        ])?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Generate synthetic bars for testing/development.
///
/// A seeded random walk from 100.0. Same seed, same bars.
pub fn generate_synthetic_bars(
    seed: u64,
    count: usize,
    start: DateTime<Utc>,
    interval: Duration,
) -> LoadedBars {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::with_capacity(count);
    let mut price = 100.0_f64;
    let mut timestamp = start;

    for _ in 0..count {
        let step: f64 = rng.gen_range(-0.02..0.02);
        let open = price;
        let close = price * (1.0 + step);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        bars.push(Bar::new(timestamp, open, high, low, close));

        price = close;
        timestamp += interval;
    }

    debug!(seed, count, "generated synthetic bars");
    LoadedBars::new(bars, true)
}

/// Deterministic hash over timestamps and OHLC values.
pub fn compute_dataset_hash(bars: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    for bar in bars {
        hasher.update(&bar.timestamp.timestamp_millis().to_le_bytes());
        hasher.update(&bar.open.to_le_bytes());
        hasher.update(&bar.high.to_le_bytes());
        hasher.update(&bar.low.to_le_bytes());
        hasher.update(&bar.close.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
