//! Reporting and export — JSON and CSV artifact generation.
//!
//! A run's artifacts live in `<output_dir>/<run_id>/`:
//! - `result.json` — the full `BacktestResult`
//! - `trades.csv` — closed-trade tape
//! - `equity.csv` — equity curve (resampled when configured)
//!
//! Persisted JSON carries a `schema_version`. Unknown versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use marginlab_core::ClosedTrade;

use crate::runner::{BacktestResult, SCHEMA_VERSION};
use crate::stats::EquityPoint;

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export closed trades as CSV.
///
/// Columns: id, side, open_time, close_time, duration_secs, leverage,
/// leveraged_quantity, leveraged_total_bought, leveraged_total_sold, profit,
/// stop_loss, take_profit
pub fn export_trades_csv(trades: &[ClosedTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "id",
        "side",
        "open_time",
        "close_time",
        "duration_secs",
        "leverage",
        "leveraged_quantity",
        "leveraged_total_bought",
        "leveraged_total_sold",
        "profit",
        "stop_loss",
        "take_profit",
    ])?;

    for t in trades {
        wtr.write_record([
            t.id.0.to_string(),
            t.side.to_string(),
            t.open_time.to_rfc3339(),
            t.close_time.to_rfc3339(),
            t.duration().num_seconds().to_string(),
            format!("{:.2}", t.leverage),
            format!("{:.8}", t.leveraged_quantity),
            format!("{:.2}", t.leveraged_total_bought),
            format!("{:.2}", t.leveraged_total_sold),
            format!("{:.2}", t.profit()),
            t.stop_loss.map(|v| format!("{v:.6}")).unwrap_or_default(),
            t.take_profit.map(|v| format!("{v:.6}")).unwrap_or_default(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export an equity curve as CSV with timestamp and equity columns.
pub fn export_equity_csv(curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "equity"])?;
    for point in curve {
        wtr.write_record([point.timestamp.to_rfc3339(), format!("{:.2}", point.equity)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a run under `output_dir/<run_id>/`.
///
/// Returns the path to the created directory. Re-running an identical config
/// overwrites the previous artifacts.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(&result.run_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let json = export_json(result)?;
    write(&run_dir.join("result.json"), &json)?;

    let trades_csv = export_trades_csv(&result.trades)?;
    write(&run_dir.join("trades.csv"), &trades_csv)?;

    let equity_csv = export_equity_csv(result.stats.display_curve())?;
    write(&run_dir.join("equity.csv"), &equity_csv)?;

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory's result.json.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let path = dir.join("result.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
