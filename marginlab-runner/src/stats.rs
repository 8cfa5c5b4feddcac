//! Backtest statistics — aggregated from the ledger's closed-trade history.
//!
//! Reads only the bar slice of the run, `Ledger::history()`, `equity()` and
//! `initial_equity()`. Statistics over trades are `None` when nothing closed.

use chrono::{DateTime, Datelike, Duration, DurationRound, TimeZone, Utc};
use marginlab_core::{Bar, ClosedTrade, Ledger};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bucket size for equity curve resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Hour,
    Day,
    Week,
}

impl Timeframe {
    /// Start of the bucket containing `ts`. Weeks start on Monday 00:00 UTC.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let truncated = match self {
            Timeframe::Hour => ts.duration_trunc(Duration::hours(1)),
            Timeframe::Day => ts.duration_trunc(Duration::days(1)),
            Timeframe::Week => {
                let days_from_monday = i64::from(ts.weekday().num_days_from_monday());
                let monday = ts.date_naive() - Duration::days(days_from_monday);
                return monday
                    .and_hms_opt(0, 0, 0)
                    .map_or(ts, |midnight| Utc.from_utc_datetime(&midnight));
            }
        };
        truncated.unwrap_or(ts)
    }
}

/// Equity at the close of one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Realized-equity curve: one point per bar, `initial + Σ profit` of every
/// trade closed at or before the bar's timestamp.
pub fn equity_curve(bars: &[Bar], history: &[ClosedTrade], initial_equity: f64) -> Vec<EquityPoint> {
    let mut closes: Vec<(DateTime<Utc>, f64)> = history
        .iter()
        .map(|t| (t.close_time, t.profit()))
        .collect();
    closes.sort_by_key(|(close_time, _)| *close_time);

    let mut equity = initial_equity;
    let mut pending = closes.into_iter().peekable();
    bars.iter()
        .map(|bar| {
            while let Some((_, profit)) = pending.next_if(|(t, _)| *t <= bar.timestamp) {
                equity += profit;
            }
            EquityPoint {
                timestamp: bar.timestamp,
                equity,
            }
        })
        .collect()
}

/// Resample a curve to `timeframe` buckets, keeping the last value of each
/// bucket. Buckets without points are skipped.
pub fn resample(curve: &[EquityPoint], timeframe: Timeframe) -> Vec<EquityPoint> {
    let mut out: Vec<EquityPoint> = Vec::new();
    for point in curve {
        let bucket = timeframe.bucket_start(point.timestamp);
        match out.last_mut() {
            Some(last) if last.timestamp == bucket => last.equity = point.equity,
            _ => out.push(EquityPoint {
                timestamp: bucket,
                equity: point.equity,
            }),
        }
    }
    out
}

/// Summary statistics of one backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    /// Time between the first and last bar.
    #[serde(with = "duration_secs")]
    pub period: Option<Duration>,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub min_equity: Option<f64>,
    pub max_equity: Option<f64>,
    /// `(final − initial) / initial`, as a fraction.
    pub return_ratio: f64,
    pub win_rate: Option<f64>,
    #[serde(with = "duration_secs")]
    pub avg_trade_duration: Option<Duration>,
    #[serde(with = "duration_secs")]
    pub min_trade_duration: Option<Duration>,
    #[serde(with = "duration_secs")]
    pub max_trade_duration: Option<Duration>,
    pub trade_count: usize,
    pub avg_profit_per_trade: Option<f64>,
    pub equity_curve: Vec<EquityPoint>,
    pub resample: Option<Timeframe>,
    /// The curve resampled to `resample`, when set.
    pub resampled_curve: Option<Vec<EquityPoint>>,
}

impl BacktestStats {
    pub fn compute(bars: &[Bar], ledger: &Ledger, resample_to: Option<Timeframe>) -> Self {
        let history = ledger.history();
        let initial = ledger.initial_equity();
        let final_equity = ledger.equity();

        let period = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => {
                Some(round_to_second(last.timestamp - first.timestamp))
            }
            _ => None,
        };

        let curve = equity_curve(bars, history, initial);
        let min_equity = curve.iter().map(|p| p.equity).reduce(f64::min);
        let max_equity = curve.iter().map(|p| p.equity).reduce(f64::max);

        let durations = history.iter().map(ClosedTrade::duration);
        let trade_count = history.len();
        let (win_rate, avg_profit_per_trade, avg_trade_duration) = if trade_count == 0 {
            (None, None, None)
        } else {
            let n = trade_count as f64;
            let wins = history.iter().filter(|t| t.is_winner()).count();
            let total_profit: f64 = history.iter().map(ClosedTrade::profit).sum();
            let total_duration = durations.clone().fold(Duration::zero(), |acc, d| acc + d);
            (
                Some(wins as f64 / n),
                Some(total_profit / n),
                Some(round_to_second(total_duration / trade_count as i32)),
            )
        };

        Self {
            period,
            initial_equity: initial,
            final_equity,
            min_equity,
            max_equity,
            return_ratio: (final_equity - initial) / initial,
            win_rate,
            avg_trade_duration,
            min_trade_duration: durations.clone().min().map(round_to_second),
            max_trade_duration: durations.max().map(round_to_second),
            trade_count,
            avg_profit_per_trade,
            resampled_curve: resample_to.map(|tf| resample(&curve, tf)),
            resample: resample_to,
            equity_curve: curve,
        }
    }

    /// The curve to chart or export: resampled when requested, else per bar.
    pub fn display_curve(&self) -> &[EquityPoint] {
        self.resampled_curve.as_deref().unwrap_or(&self.equity_curve)
    }

    /// Label/value rows of the summary table.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Period", fmt_opt_duration(self.period)),
            ("Final Equity", format!("{:.2}", self.final_equity)),
            ("Min Equity", fmt_opt(self.min_equity, 1.0)),
            ("Max Equity", fmt_opt(self.max_equity, 1.0)),
            ("Return [%]", format!("{:.2}", self.return_ratio * 100.0)),
            ("Win rate [%]", fmt_opt(self.win_rate, 100.0)),
            ("Avg. Trade Duration", fmt_opt_duration(self.avg_trade_duration)),
            ("Min Trade Duration", fmt_opt_duration(self.min_trade_duration)),
            ("Max Trade Duration", fmt_opt_duration(self.max_trade_duration)),
            ("Trades", self.trade_count.to_string()),
            ("Avg. Profit Per Trade", fmt_opt(self.avg_profit_per_trade, 1.0)),
        ]
    }
}

impl fmt::Display for BacktestStats {
    /// Two columns: labels left-aligned, values right-aligned, 8 spaces apart.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.rows();
        let label_width = rows.iter().map(|(a, _)| a.len()).max().unwrap_or(0);
        let value_width = rows.iter().map(|(_, b)| b.len()).max().unwrap_or(0);
        for (i, (label, value)) in rows.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{label:<label_width$}        {value:>value_width$}")?;
        }
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>, scale: f64) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v * scale))
}

fn fmt_opt_duration(value: Option<Duration>) -> String {
    value.map_or_else(|| "N/A".to_string(), format_duration)
}

/// Round half away from zero to a whole number of seconds.
pub fn round_to_second(d: Duration) -> Duration {
    let secs = d.num_seconds();
    let nanos = d.subsec_nanos();
    let carry = if nanos >= 500_000_000 {
        1
    } else if nanos <= -500_000_000 {
        -1
    } else {
        0
    };
    Duration::seconds(secs + carry)
}

/// `"{days} days HH:MM:SS"`, rounded to the nearest second.
pub fn format_duration(d: Duration) -> String {
    let millis = d.num_milliseconds();
    let sign = if millis < 0 { "-" } else { "" };
    let total = (millis.abs() + 500) / 1000;
    let (days, rem) = (total / 86_400, total % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    format!("{sign}{days} days {hours:02}:{minutes:02}:{seconds:02}")
}

/// Serde adapter: `Option<Duration>` as whole seconds.
///
/// Statistics durations are rounded to seconds in `compute`, so this is lossless.
mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.num_seconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(Duration::seconds))
    }
}
