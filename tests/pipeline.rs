//! Integration tests for the detect -> simulate -> measure pipeline.
//!
//! These tests drive the public API end to end, with a caller-defined bar type.

use insidebar::data::{read_csv, write_trades_csv};
use insidebar::prelude::*;

/// Simple test bar structure
#[derive(Debug, Clone, Copy)]
struct TestBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
}

impl TestBar {
    fn new(t: i64, o: f64, h: f64, l: f64, c: f64) -> Self {
        Self { t, o, h, l, c }
    }
}

impl OHLCV for TestBar {
    fn timestamp(&self) -> i64 {
        self.t
    }

    fn open(&self) -> f64 {
        self.o
    }

    fn high(&self) -> f64 {
        self.h
    }

    fn low(&self) -> f64 {
        self.l
    }

    fn close(&self) -> f64 {
        self.c
    }

    fn volume(&self) -> f64 {
        1000.0
    }
}

// 2024-01-15 00:00 UTC
const JAN: i64 = 1_705_276_800;
const HOUR: i64 = 3600;

/// Mother 90-110 followed by an inside bar 95-106
fn mother_and_inside() -> Vec<TestBar> {
    vec![
        TestBar::new(JAN, 100.0, 110.0, 90.0, 105.0),
        TestBar::new(JAN + HOUR, 104.0, 106.0, 95.0, 100.0),
    ]
}

/// Rising bars, none inside its predecessor
fn make_drift(start: i64, n: usize) -> Vec<TestBar> {
    (0..n)
        .map(|i| {
            let base = 130.0 + i as f64 * 4.0;
            TestBar::new(start + i as i64 * HOUR, base, base + 3.0, base - 1.0, base + 2.0)
        })
        .collect()
}

// ============================================================
// DETECTION
// ============================================================

#[test]
fn test_long_setup_from_custom_bar_type() {
    let mut bars = mother_and_inside();
    bars.push(TestBar::new(JAN + 2 * HOUR, 100.0, 113.0, 99.0, 112.0));

    let annotated = InsideBarDetector::default().detect(&bars);

    assert_eq!(annotated.len(), 3);
    assert!(annotated[1].is_inside);
    let setup = annotated[2];
    assert!(setup.is_setup);
    assert_eq!(setup.direction, Some(Side::Long));
    assert_eq!(setup.reference_high(), Some(110.0));
    assert_eq!(setup.reference_low(), Some(90.0));
    assert_eq!(setup.reference.map(|r| r.index), Some(0));
    assert_eq!(setup.bar.timestamp, JAN + 2 * HOUR);
}

#[test]
fn test_nested_inside_bars_use_latest_mother() {
    let mut bars = mother_and_inside();
    // Inside the inside bar: the 95-106 bar becomes the mother
    bars.push(TestBar::new(JAN + 2 * HOUR, 101.0, 105.0, 96.0, 102.0));
    // Closes above 106 but below the outer 110
    bars.push(TestBar::new(JAN + 3 * HOUR, 102.0, 108.0, 100.0, 107.0));

    let annotated = InsideBarDetector::default().detect(&bars);

    assert!(annotated[1].is_inside);
    assert!(annotated[2].is_inside);
    let setup = annotated[3];
    assert!(setup.is_setup);
    assert_eq!(setup.direction, Some(Side::Long));
    assert_eq!(setup.reference.map(|r| r.index), Some(1));
    assert_eq!(setup.reference_high(), Some(106.0));
}

#[test]
fn test_no_inside_bar_no_setup() {
    let bars = make_drift(JAN, 20);
    let annotated = InsideBarDetector::default().detect(&bars);
    assert!(annotated.iter().all(|a| !a.is_inside && !a.is_setup));
}

#[test]
fn test_detector_matches_on_validated_series() {
    let raw = mother_and_inside();
    let series = BarSeries::new(raw.iter().map(Bar::from_ohlcv).collect()).unwrap();
    let detector = InsideBarDetector::default();
    assert_eq!(detector.detect(series.as_slice()), detector.detect(&raw));
}

// ============================================================
// SIMULATION
// ============================================================

#[test]
fn test_long_round_trip_with_metrics() {
    let mut bars = mother_and_inside();
    bars.push(TestBar::new(JAN + 2 * HOUR, 100.0, 113.0, 99.0, 112.0));
    bars.push(TestBar::new(JAN + 3 * HOUR, 112.0, 160.0, 111.0, 155.0));

    let backtester = BacktestBuilder::new()
        .risk_reward_ratio(2.0)
        .trade_size(1.0)
        .build()
        .unwrap();
    let trades = backtester.run_with(&InsideBarDetector::default(), &bars);

    assert_eq!(trades.len(), 1);
    let t = trades[0];
    assert_eq!(t.side, Side::Long);
    assert_eq!(t.entry_price, 112.0);
    assert_eq!(t.stop_loss, 90.0);
    assert_eq!(t.take_profit, 156.0);
    assert_eq!(t.exit_reason, ExitReason::TakeProfit);
    assert_eq!(t.exit_time, JAN + 3 * HOUR);
    assert!((t.profit - 44.0).abs() < 1e-9);

    let m = Metrics::compute(&trades, 10_000.0).unwrap();
    assert_eq!(m.total_trades, 1);
    assert!((m.win_rate - 100.0).abs() < 1e-9);
    assert!((m.final_capital - 10_044.0).abs() < 1e-9);
    assert!((m.monthly_profits[&YearMonth { year: 2024, month: 1 }] - 0.44).abs() < 1e-9);
}

#[test]
fn test_short_stop_loss_round_trip() {
    let mut bars = mother_and_inside();
    bars.push(TestBar::new(JAN + 2 * HOUR, 96.0, 97.0, 85.0, 86.0)); // short at 86
    bars.push(TestBar::new(JAN + 3 * HOUR, 86.0, 88.0, 80.0, 87.0));
    bars.push(TestBar::new(JAN + 4 * HOUR, 87.0, 111.0, 86.0, 108.0)); // through 110

    let annotated = InsideBarDetector::default().detect(&bars);
    let trades = run(&annotated, 2.0, 1.0).unwrap();

    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].side, Side::Short);
    assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
    assert_eq!(trades[0].exit_price, 110.0);
    assert!((trades[0].profit + 24.0).abs() < 1e-9);
}

#[test]
fn test_empty_and_single_bar_inputs() {
    let detector = InsideBarDetector::default();
    let backtester = Backtester::new(BacktestConfig::default()).unwrap();

    let empty: Vec<TestBar> = Vec::new();
    assert!(detector.detect(&empty).is_empty());
    assert!(backtester.run_with(&detector, &empty).is_empty());

    let single = vec![TestBar::new(JAN, 1.0, 2.0, 0.5, 1.5)];
    assert_eq!(detector.detect(&single).len(), 1);
    assert!(backtester.run_with(&detector, &single).is_empty());

    let m = Metrics::compute(&[], 10_000.0).unwrap();
    assert_eq!(m.final_capital, 10_000.0);
}

#[test]
fn test_open_position_policy_at_end_of_data() {
    let mut bars = mother_and_inside();
    bars.push(TestBar::new(JAN + 2 * HOUR, 100.0, 113.0, 99.0, 112.0));
    bars.push(TestBar::new(JAN + 3 * HOUR, 112.0, 120.0, 108.0, 118.0));

    let detector = InsideBarDetector::default();
    let discard = BacktestBuilder::new().build().unwrap();
    assert!(discard.run_with(&detector, &bars).is_empty());

    let close = BacktestBuilder::new()
        .end_of_data(EndOfData::CloseAtLast)
        .build()
        .unwrap();
    let trades = close.run_with(&detector, &bars);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_reason, ExitReason::EndOfData);
    assert!((trades[0].profit - 6.0).abs() < 1e-9);
}

// ============================================================
// CSV AND CONFIG
// ============================================================

#[test]
fn test_csv_to_ledger() {
    let csv = format!(
        "time,open,high,low,close,volume\n\
         {},112,160,111,155,10\n\
         {},100,110,90,105,10\n\
         {},104,106,95,100,10\n\
         {},100,113,99,112,10\n",
        JAN + 3 * HOUR,
        JAN,
        JAN + HOUR,
        JAN + 2 * HOUR,
    );
    let series = read_csv(csv.as_bytes()).unwrap();
    let config = RunConfig::default();
    let backtester = Backtester::new(config.backtest).unwrap();
    let trades = backtester.run_with(&config.detector, series.as_slice());
    assert_eq!(trades.len(), 1);

    let mut out = Vec::new();
    write_trades_csv(&mut out, &trades).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().nth(1).unwrap().contains("TakeProfit"));
}

#[test]
fn test_config_drives_the_run() {
    let config = RunConfig::from_toml_str(
        r#"
        [backtest]
        risk_reward_ratio = 1.0
        trade_size = 2.0
        "#,
    )
    .unwrap();

    let mut bars = mother_and_inside();
    bars.push(TestBar::new(JAN + 2 * HOUR, 100.0, 113.0, 99.0, 112.0));
    bars.push(TestBar::new(JAN + 3 * HOUR, 112.0, 135.0, 111.0, 130.0)); // target 134

    let backtester = Backtester::new(config.backtest).unwrap();
    let trades = backtester.run_with(&config.detector, &bars);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].take_profit, 134.0);
    assert!((trades[0].profit - 44.0).abs() < 1e-9);
}

// ============================================================
// SWEEP
// ============================================================

#[test]
fn test_sweep_over_full_grid() {
    let mut bars = mother_and_inside();
    bars.push(TestBar::new(JAN + 2 * HOUR, 100.0, 113.0, 99.0, 112.0));
    bars.push(TestBar::new(JAN + 3 * HOUR, 112.0, 160.0, 111.0, 155.0));

    let detectors: Vec<InsideBarDetector> = param_grid().unwrap();
    let configs: Vec<BacktestConfig> = param_grid().unwrap();
    let grid: Vec<SweepParams> = detectors
        .iter()
        .flat_map(|&detector| {
            configs
                .iter()
                .map(move |&backtest| SweepParams { detector, backtest })
        })
        .collect();
    assert_eq!(grid.len(), 15 * 5);

    let (results, errors) = sweep_parallel(&bars, 10_000.0, grid);
    assert!(errors.is_empty());
    assert_eq!(results.len(), 75);

    // Bar 3 reaches every target up to rr = 48 / 22
    for r in &results {
        let expect_win = r.params.backtest.risk_reward_ratio * 22.0 <= 48.0;
        assert_eq!(r.trades.len(), usize::from(expect_win), "{:?}", r.params);
    }
}

#[test]
fn test_sweep_runs_are_independent() {
    let mut bars = mother_and_inside();
    bars.push(TestBar::new(JAN + 2 * HOUR, 100.0, 113.0, 99.0, 112.0));
    bars.push(TestBar::new(JAN + 3 * HOUR, 112.0, 160.0, 111.0, 155.0));
    bars.extend(make_drift(JAN + 4 * HOUR, 20));
    let params = vec![
        SweepParams {
            detector: InsideBarDetector::default(),
            backtest: BacktestConfig::default(),
        };
        8
    ];
    let (results, _) = sweep_parallel(&bars, 10_000.0, params);
    assert_eq!(results.len(), 8);
    assert_eq!(results[0].trades.len(), 1);
    assert!(results.windows(2).all(|w| w[0].trades == w[1].trades));
}
