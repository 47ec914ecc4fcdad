//! Summary statistics over a trade ledger
//!
//! Pure post-processing: nothing here feeds back into detection or simulation.
//! Equity is sampled once per closed trade, so drawdown is measured between
//! trade exits, not intrabar.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike};
use serde::{Serialize, Serializer};

use crate::{backtest::TradeRecord, BacktestError, Result};

/// Calendar month in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    /// Month containing `timestamp` (seconds since the Unix epoch)
    pub fn from_timestamp(timestamp: i64) -> Option<Self> {
        DateTime::from_timestamp(timestamp, 0).map(|dt| Self {
            year: dt.year(),
            month: dt.month(),
        })
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Performance of one backtest run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    /// Percentage of trades with positive profit
    pub win_rate: f64,
    pub total_profit: f64,
    pub avg_profit_per_trade: f64,
    pub max_drawdown: f64,
    /// Max drawdown as a percentage of peak equity
    pub max_drawdown_pct: f64,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub profit_percentage: f64,
    /// Profit per exit month as a percentage of initial capital
    pub monthly_profits: BTreeMap<YearMonth, f64>,
}

impl Metrics {
    pub fn compute(trades: &[TradeRecord], initial_capital: f64) -> Result<Self> {
        if !initial_capital.is_finite() || initial_capital <= 0.0 {
            return Err(BacktestError::InvalidConfig(format!(
                "initial_capital must be positive and finite, got {initial_capital}"
            )));
        }

        if trades.is_empty() {
            return Ok(Self {
                total_trades: 0,
                winning_trades: 0,
                win_rate: 0.0,
                total_profit: 0.0,
                avg_profit_per_trade: 0.0,
                max_drawdown: 0.0,
                max_drawdown_pct: 0.0,
                initial_capital,
                final_capital: initial_capital,
                profit_percentage: 0.0,
                monthly_profits: BTreeMap::new(),
            });
        }

        let total_trades = trades.len();
        let wins = trades.iter().filter(|t| t.is_win()).count();
        let total_profit: f64 = trades.iter().map(|t| t.profit).sum();

        let (max_drawdown, peak) = drawdown(trades, initial_capital);
        let max_drawdown_pct = if peak > 0.0 {
            max_drawdown / peak * 100.0
        } else {
            0.0
        };

        let mut monthly_profits = BTreeMap::new();
        for t in trades {
            let month = YearMonth::from_timestamp(t.exit_time)
                .ok_or(BacktestError::InvalidValue("exit time out of calendar range"))?;
            *monthly_profits.entry(month).or_insert(0.0) += t.profit;
        }
        for pct in monthly_profits.values_mut() {
            *pct = *pct / initial_capital * 100.0;
        }

        let final_capital = initial_capital + total_profit;
        Ok(Self {
            total_trades,
            winning_trades: wins,
            win_rate: wins as f64 / total_trades as f64 * 100.0,
            total_profit,
            avg_profit_per_trade: total_profit / total_trades as f64,
            max_drawdown,
            max_drawdown_pct,
            initial_capital,
            final_capital,
            profit_percentage: (final_capital - initial_capital) / initial_capital * 100.0,
            monthly_profits,
        })
    }
}

/// Equity after each trade, starting from `initial_capital`
pub fn equity_curve(trades: &[TradeRecord], initial_capital: f64) -> Vec<f64> {
    trades
        .iter()
        .scan(initial_capital, |equity, t| {
            *equity += t.profit;
            Some(*equity)
        })
        .collect()
}

/// (max drawdown, peak equity) over the per-trade equity curve.
/// The running peak starts at the first post-trade equity.
fn drawdown(trades: &[TradeRecord], initial_capital: f64) -> (f64, f64) {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd: f64 = 0.0;
    for equity in equity_curve(trades, initial_capital) {
        peak = peak.max(equity);
        max_dd = max_dd.max(peak - equity);
    }
    (max_dd, peak)
}
