//! # insidebar - inside-bar breakout backtesting
//!
//! Detects inside-bar setups (a bar contained in its predecessor, the "mother
//! bar") that are confirmed by a close beyond the mother bar's range, then
//! simulates one position at a time with a stop at the opposite side of the
//! mother bar and a take-profit at a fixed risk/reward multiple.
//!
//! ## Quick Start
//!
//! ```rust
//! use insidebar::prelude::*;
//!
//! let bars = vec![
//!     Bar::new(0, 100.0, 110.0, 90.0, 105.0, 1.0),
//!     Bar::new(1, 104.0, 106.0, 95.0, 100.0, 1.0), // inside the first bar
//!     Bar::new(2, 100.0, 113.0, 99.0, 112.0, 1.0), // closes above 110: long
//!     Bar::new(3, 112.0, 160.0, 111.0, 155.0, 1.0), // reaches the 156 target
//! ];
//! let series = BarSeries::new(bars).unwrap();
//!
//! let annotated = InsideBarDetector::default().detect(series.as_slice());
//! let backtester = BacktestBuilder::new()
//!     .risk_reward_ratio(2.0)
//!     .trade_size(1.0)
//!     .build()
//!     .unwrap();
//! let trades = backtester.run(&annotated);
//!
//! assert_eq!(trades.len(), 1);
//! assert_eq!(trades[0].exit_reason, ExitReason::TakeProfit);
//! ```

pub mod backtest;
pub mod config;
pub mod data;
pub mod detectors;
pub mod metrics;
pub mod params;

pub mod prelude {
    pub use crate::{
        // Simulator
        backtest::{
            run, BacktestBuilder, BacktestConfig, Backtester, EndOfData, ExitReason,
            SameBarPolicy, TradeRecord,
        },
        // Configuration
        config::RunConfig,
        // Detectors
        detectors::{AnnotatedBar, InsideBarDetector, ReferenceBar},
        // Metrics
        metrics::{Metrics, YearMonth},
        // Parameters
        params::{get_period, get_ratio, get_real, param_grid, ParamMeta, ParamType, Parameterized},
        // Parallel
        sweep_parallel,
        // Errors
        BacktestError,
        // Types
        Bar,
        BarSeries,
        // Core traits
        OHLCVExt,
        Period,
        Ratio,
        Result,
        SetupDetector,
        Side,
        SweepError,
        SweepParams,
        SweepResult,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, BacktestError>;

/// Errors surfaced by the bar boundary, the simulator configuration and I/O
#[derive(Debug, thiserror::Error)]
pub enum BacktestError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: &'static str },

    #[error("Timestamps not strictly increasing at index {index}: {previous} then {current}")]
    NonMonotonicTime {
        index: usize,
        previous: i64,
        current: i64,
    },

    #[error("Missing columns: {0:?}")]
    MissingColumns(Vec<&'static str>),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(BacktestError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(BacktestError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period in bars (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(BacktestError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// CORE TRAITS
// ============================================================

/// Read access to one OHLCV observation
pub trait OHLCV {
    /// Seconds since the Unix epoch
    fn timestamp(&self) -> i64;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// Validate OHLCV data consistency: finite values and
    /// `low <= min(open, close) <= max(open, close) <= high`
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) || self.volume().is_nan() {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) || self.volume().is_infinite() {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.low() {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "high < low",
            });
        }
        if self.open().min(self.close()) < self.low() {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "open or close below low",
            });
        }
        if self.open().max(self.close()) > self.high() {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "open or close above high",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => f.write_str("Long"),
            Side::Short => f.write_str("Short"),
        }
    }
}

// ============================================================
// BARS
// ============================================================

/// One OHLCV price bar. Immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Copy any OHLCV source into a concrete bar
    pub fn from_ohlcv<T: OHLCV + ?Sized>(bar: &T) -> Self {
        Self::new(
            bar.timestamp(),
            bar.open(),
            bar.high(),
            bar.low(),
            bar.close(),
            bar.volume(),
        )
    }
}

impl OHLCV for Bar {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Validated, strictly time-ordered sequence of bars.
///
/// Construction is the only place bar data is checked; detectors and the
/// simulator assume the ordering and OHLC invariants hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Validate every bar and the strictly increasing timestamp order.
    /// The error names the first offending index.
    pub fn new(bars: Vec<Bar>) -> Result<Self> {
        for (i, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|e| match e {
                BacktestError::InvalidBar { reason, .. } => {
                    BacktestError::InvalidBar { index: i, reason }
                }
                other => other,
            })?;
        }
        if let Some(i) = (1..bars.len()).find(|&i| bars[i].timestamp <= bars[i - 1].timestamp) {
            return Err(BacktestError::NonMonotonicTime {
                index: i,
                previous: bars[i - 1].timestamp,
                current: bars[i].timestamp,
            });
        }
        Ok(Self { bars })
    }

    #[inline]
    pub fn as_slice(&self) -> &[Bar] {
        &self.bars
    }
}

impl std::ops::Deref for BarSeries {
    type Target = [Bar];

    fn deref(&self) -> &[Bar] {
        &self.bars
    }
}

// ============================================================
// SETUP DETECTOR TRAIT
// ============================================================

/// A single left-to-right pass that annotates bars with confirmed setups.
///
/// Implementations must return one annotation per input bar, in input order,
/// and decide bar `i` from `bars[..=i]` only.
pub trait SetupDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect<T: OHLCV>(&self, bars: &[T]) -> Vec<detectors::AnnotatedBar>;

    /// Reject settings that bypassed validated construction
    fn validate_config(&self) -> Result<()>;
}

// ============================================================
// PARALLEL SWEEP
// ============================================================

use rayon::prelude::*;

/// One detector/simulator parameter combination
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SweepParams {
    pub detector: detectors::InsideBarDetector,
    pub backtest: backtest::BacktestConfig,
}

/// Result of one parameter combination
#[derive(Debug, Clone)]
pub struct SweepResult {
    pub params: SweepParams,
    pub trades: Vec<backtest::TradeRecord>,
    pub metrics: metrics::Metrics,
}

/// Error from one parameter combination
#[derive(Debug)]
pub struct SweepError {
    pub params: SweepParams,
    pub error: BacktestError,
}

/// Backtest many parameter sets in parallel over one shared bar slice.
///
/// Every run is independent; a failing combination is reported in the
/// error list and does not affect the others.
pub fn sweep_parallel<T, I>(
    bars: &[T],
    initial_capital: f64,
    params: I,
) -> (Vec<SweepResult>, Vec<SweepError>)
where
    T: OHLCV + Sync,
    I: IntoParallelIterator<Item = SweepParams>,
{
    let results: Vec<_> = params
        .into_par_iter()
        .map(|params| {
            run_one(bars, initial_capital, &params)
                .map(|(trades, metrics)| SweepResult {
                    params,
                    trades,
                    metrics,
                })
                .map_err(|error| SweepError { params, error })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

fn run_one<T: OHLCV>(
    bars: &[T],
    initial_capital: f64,
    params: &SweepParams,
) -> Result<(Vec<backtest::TradeRecord>, metrics::Metrics)> {
    params.detector.validate_config()?;
    let backtester = backtest::Backtester::new(params.backtest)?;
    let trades = backtester.run_with(&params.detector, bars);
    let metrics = metrics::Metrics::compute(&trades, initial_capital)?;
    Ok((trades, metrics))
}

// ============================================================
// TESTS
// ============================================================
