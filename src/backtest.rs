//! Bar-by-bar simulation of confirmed setups
//!
//! The simulator holds at most one position. A position opens at the close of
//! a confirming bar, with its stop on the far side of the reference bar and its
//! target at `risk_reward_ratio` times the risk. From the next bar on, each
//! bar's high/low is checked against both levels; the first bar that touches
//! one closes the position at that level and appends a [`TradeRecord`].
//!
//! Setups that confirm while a position is open are ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    detectors::{AnnotatedBar, ReferenceBar},
    params::{get_real, ParamMeta, Parameterized},
    Bar, BacktestError, Result, SetupDetector, Side, OHLCV,
};

// ============================================================
// CONFIGURATION
// ============================================================

/// Which level wins when a single bar touches both stop and target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameBarPolicy {
    /// Assume the stop traded first (conservative)
    #[default]
    StopFirst,
    /// Assume the target traded first (optimistic)
    TargetFirst,
}

/// What happens to a position still open after the last bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndOfData {
    /// Drop it; the ledger only holds stop and target exits
    #[default]
    Discard,
    /// Exit at the last bar's close
    CloseAtLast,
}

/// Simulator configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestConfig {
    /// Target distance as a multiple of the stop distance
    pub risk_reward_ratio: f64,
    /// Units per trade; profit is price difference times this
    pub trade_size: f64,
    pub same_bar: SameBarPolicy,
    pub end_of_data: EndOfData,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            risk_reward_ratio: 2.0,
            trade_size: 1.0,
            same_bar: SameBarPolicy::default(),
            end_of_data: EndOfData::default(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.risk_reward_ratio.is_finite() || self.risk_reward_ratio <= 0.0 {
            return Err(BacktestError::InvalidConfig(format!(
                "risk_reward_ratio must be positive and finite, got {}",
                self.risk_reward_ratio
            )));
        }
        if !self.trade_size.is_finite() || self.trade_size <= 0.0 {
            return Err(BacktestError::InvalidConfig(format!(
                "trade_size must be positive and finite, got {}",
                self.trade_size
            )));
        }
        Ok(())
    }
}

const BACKTEST_PARAMS: &[ParamMeta] = &[ParamMeta::real(
    "risk_reward_ratio",
    2.0,
    (1.0, 3.0, 0.5),
    "Target distance as a multiple of the stop distance",
)];

impl Parameterized for BacktestConfig {
    fn param_meta() -> &'static [ParamMeta] {
        BACKTEST_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            risk_reward_ratio: get_real(params, "risk_reward_ratio", 2.0)?,
            trade_size: get_real(params, "trade_size", 1.0)?,
            ..Self::default()
        })
    }

    fn current_params(&self) -> HashMap<&'static str, f64> {
        HashMap::from([
            ("risk_reward_ratio", self.risk_reward_ratio),
            ("trade_size", self.trade_size),
        ])
    }

    fn name() -> &'static str {
        "BACKTEST"
    }
}

// ============================================================
// LEDGER
// ============================================================

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    EndOfData,
}

/// One completed trade. Immutable once appended to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: i64,
    pub side: Side,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub exit_price: f64,
    pub exit_time: i64,
    /// Signed, in account currency
    pub profit: f64,
    pub exit_reason: ExitReason,
    pub entry_index: usize,
    pub exit_index: usize,
    pub size: f64,
}

impl TradeRecord {
    /// Distance from entry to stop
    #[inline]
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Distance from entry to target
    #[inline]
    pub fn reward(&self) -> f64 {
        (self.take_profit - self.entry_price).abs()
    }

    #[inline]
    pub fn is_win(&self) -> bool {
        self.profit > 0.0
    }
}

// ============================================================
// SIMULATOR STATE
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    side: Side,
    entry_index: usize,
    entry_time: i64,
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
    size: f64,
}

impl Position {
    /// Open at the confirming bar's close. `None` when the setup leaves no
    /// positive distance to the stop.
    fn open(
        index: usize,
        bar: &Bar,
        side: Side,
        reference: ReferenceBar,
        config: &BacktestConfig,
    ) -> Option<Self> {
        let entry_price = bar.close;
        let stop_loss = match side {
            Side::Long => reference.low,
            Side::Short => reference.high,
        };
        let risk = (entry_price - stop_loss) * side.sign();
        if risk.is_nan() || risk <= 0.0 {
            return None;
        }
        Some(Self {
            side,
            entry_index: index,
            entry_time: bar.timestamp,
            entry_price,
            stop_loss,
            take_profit: entry_price + side.sign() * config.risk_reward_ratio * risk,
            size: config.trade_size,
        })
    }

    fn check_exit(&self, bar: &Bar, policy: SameBarPolicy) -> Option<(f64, ExitReason)> {
        let (stop_hit, target_hit) = match self.side {
            Side::Long => (bar.low() <= self.stop_loss, bar.high() >= self.take_profit),
            Side::Short => (bar.high() >= self.stop_loss, bar.low() <= self.take_profit),
        };
        let stop = (self.stop_loss, ExitReason::StopLoss);
        let target = (self.take_profit, ExitReason::TakeProfit);

        match (stop_hit, target_hit) {
            (true, true) => match policy {
                SameBarPolicy::StopFirst => Some(stop),
                SameBarPolicy::TargetFirst => Some(target),
            },
            (true, false) => Some(stop),
            (false, true) => Some(target),
            (false, false) => None,
        }
    }

    fn close(self, index: usize, time: i64, price: f64, reason: ExitReason) -> TradeRecord {
        TradeRecord {
            entry_time: self.entry_time,
            side: self.side,
            entry_price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            exit_price: price,
            exit_time: time,
            profit: (price - self.entry_price) * self.side.sign() * self.size,
            exit_reason: reason,
            entry_index: self.entry_index,
            exit_index: index,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Flat,
    Open(Position),
}

impl State {
    fn enter(&mut self, position: Position) {
        match self {
            State::Flat => *self = State::Open(position),
            State::Open(live) => unreachable!(
                "position opened at bar {} while bar {} position is live",
                position.entry_index, live.entry_index
            ),
        }
    }
}

// ============================================================
// BACKTESTER
// ============================================================

/// Validated simulator. Stateless between runs.
#[derive(Debug, Clone)]
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    /// Reject a non-positive ratio or size before any bar is seen
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Simulate over annotated bars, returning the ledger ordered by exit time
    pub fn run(&self, bars: &[AnnotatedBar]) -> Vec<TradeRecord> {
        let mut state = State::Flat;
        let mut ledger = Vec::new();

        for (index, annotated) in bars.iter().enumerate() {
            let bar = &annotated.bar;

            if let State::Open(position) = state {
                if let Some((price, reason)) = position.check_exit(bar, self.config.same_bar) {
                    let trade = position.close(index, bar.timestamp, price, reason);
                    debug!(
                        index,
                        side = %trade.side,
                        ?reason,
                        exit = price,
                        profit = trade.profit,
                        "position closed"
                    );
                    ledger.push(trade);
                    state = State::Flat;
                }
            }

            if !annotated.is_setup {
                continue;
            }
            let (Some(side), Some(reference)) = (annotated.direction, annotated.reference) else {
                warn!(index, "setup without direction or reference, skipped");
                continue;
            };
            debug_assert!(reference.index < index, "reference bar must precede its setup");

            match state {
                State::Flat => match Position::open(index, bar, side, reference, &self.config) {
                    Some(position) => {
                        debug!(
                            index,
                            %side,
                            entry = position.entry_price,
                            stop = position.stop_loss,
                            target = position.take_profit,
                            "position opened"
                        );
                        state.enter(position);
                    }
                    None => warn!(index, %side, "setup has no room to its stop, skipped"),
                },
                State::Open(_) => trace!(index, "setup ignored while a position is open"),
            }
        }

        if let State::Open(position) = state {
            self.finish(position, bars, &mut ledger);
        }

        info!(
            bars = bars.len(),
            trades = ledger.len(),
            profit = ledger.iter().map(|t| t.profit).sum::<f64>(),
            "backtest complete"
        );
        ledger
    }

    /// Detect with `detector`, then simulate
    pub fn run_with<D: SetupDetector, T: OHLCV>(&self, detector: &D, bars: &[T]) -> Vec<TradeRecord> {
        debug!(detector = detector.name(), bars = bars.len(), "detecting setups");
        self.run(&detector.detect(bars))
    }

    fn finish(&self, position: Position, bars: &[AnnotatedBar], ledger: &mut Vec<TradeRecord>) {
        match self.config.end_of_data {
            EndOfData::Discard => {
                warn!(
                    entry_index = position.entry_index,
                    "position still open at end of data, discarded"
                );
            }
            EndOfData::CloseAtLast => {
                // An open position implies at least its entry bar
                let index = bars.len() - 1;
                let last = &bars[index].bar;
                let trade = position.close(index, last.timestamp, last.close, ExitReason::EndOfData);
                debug!(index, profit = trade.profit, "position closed at end of data");
                ledger.push(trade);
            }
        }
    }
}

/// Simulate with the given ratio and size and default policies
pub fn run(
    bars: &[AnnotatedBar],
    risk_reward_ratio: f64,
    trade_size: f64,
) -> Result<Vec<TradeRecord>> {
    let backtester = BacktestBuilder::new()
        .risk_reward_ratio(risk_reward_ratio)
        .trade_size(trade_size)
        .build()?;
    Ok(backtester.run(bars))
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating Backtester instances
#[derive(Debug, Clone, Default)]
pub struct BacktestBuilder {
    config: BacktestConfig,
}

impl BacktestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn risk_reward_ratio(mut self, ratio: f64) -> Self {
        self.config.risk_reward_ratio = ratio;
        self
    }

    pub fn trade_size(mut self, size: f64) -> Self {
        self.config.trade_size = size;
        self
    }

    pub fn same_bar(mut self, policy: SameBarPolicy) -> Self {
        self.config.same_bar = policy;
        self
    }

    pub fn end_of_data(mut self, policy: EndOfData) -> Self {
        self.config.end_of_data = policy;
        self
    }

    /// Build the backtester
    pub fn build(self) -> Result<Backtester> {
        Backtester::new(self.config)
    }
}

// ============================================================
// TESTS
// ============================================================
