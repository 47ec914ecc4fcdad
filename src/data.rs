//! CSV boundary: bars in, trade ledger out
//!
//! Input columns: `time` (seconds since the Unix epoch), `open`, `high`, `low`,
//! `volume`, and optionally `close`. `time` may be written as an integer or a
//! float (`1700000000.0`, `1.7e9`) but must be a whole number of seconds.
//! A missing or empty `close` falls back to `open`. Extra columns are ignored.
//! Rows are sorted by time and then validated into a [`BarSeries`]; bad data
//! is rejected, never repaired.
//!
//! The trade ledger is written with a header row even when it is empty.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::{backtest::TradeRecord, Bar, BacktestError, BarSeries, Result};

const REQUIRED_COLUMNS: [&str; 5] = ["time", "open", "high", "low", "volume"];

/// Header of the ledger file, in `TradeRecord` field order
const TRADE_COLUMNS: [&str; 12] = [
    "entry_time",
    "side",
    "entry_price",
    "stop_loss",
    "take_profit",
    "exit_price",
    "exit_time",
    "profit",
    "exit_reason",
    "entry_index",
    "exit_index",
    "size",
];

#[derive(Debug, Deserialize)]
struct CsvBar {
    time: f64,
    open: f64,
    high: f64,
    low: f64,
    #[serde(default)]
    close: Option<f64>,
    volume: f64,
}

impl CsvBar {
    /// `index` is the data row, counted from 0 before sorting
    fn into_bar(self, index: usize) -> Result<Bar> {
        // i64::MAX is not exactly representable; stay strictly below 2^63
        const LIMIT: f64 = 9_223_372_036_854_775_808.0;
        if !self.time.is_finite() || self.time.fract() != 0.0 || self.time.abs() >= LIMIT {
            return Err(BacktestError::InvalidBar {
                index,
                reason: "time is not a whole number of seconds",
            });
        }
        Ok(Bar::new(
            self.time as i64,
            self.open,
            self.high,
            self.low,
            self.close.unwrap_or(self.open),
            self.volume,
        ))
    }
}

/// Load and validate bars from a CSV file
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<BarSeries> {
    let path = path.as_ref();
    let series = read_csv(File::open(path)?)?;
    info!(path = %path.display(), bars = series.len(), "loaded bars");
    Ok(series)
}

/// Read and validate bars from any CSV source
pub fn read_csv<R: Read>(reader: R) -> Result<BarSeries> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = rdr.headers()?.clone();
    let missing: Vec<&'static str> = REQUIRED_COLUMNS
        .into_iter()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        return Err(BacktestError::MissingColumns(missing));
    }

    let mut bars = rdr
        .deserialize::<CsvBar>()
        .enumerate()
        .map(|(index, row)| row?.into_bar(index))
        .collect::<Result<Vec<_>>>()?;
    bars.sort_by_key(|b| b.timestamp);

    BarSeries::new(bars)
}

/// Write the ledger as CSV, one row per trade, with a header row
pub fn write_trades_csv<W: Write>(writer: W, trades: &[TradeRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    if trades.is_empty() {
        wtr.write_record(TRADE_COLUMNS)?;
    }
    for trade in trades {
        wtr.serialize(trade)?;
    }
    wtr.flush()?;
    Ok(())
}
