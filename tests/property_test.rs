//! Property tests for the incremental indicators, the ledger and the
//! portfolio drawdown tracking.

mod common;

use approx::assert_relative_eq;
use common::*;
use market_tracker::domain::indicator::ema::Ema;
use market_tracker::domain::indicator::macd::Macd;
use market_tracker::domain::indicator::rsi::Rsi;
use market_tracker::domain::indicator::{IndicatorConfig, IndicatorKind, IndicatorReading};
use market_tracker::domain::ledger::{Side, TradeLedger, TradeRequest};
use market_tracker::domain::portfolio::PortfolioTracker;
use market_tracker::domain::tracker::MarketTracker;
use proptest::prelude::*;
use std::collections::HashMap;

fn closes() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0f64..1_000.0, 1..120)
}

fn request(side: Side, quantity: f64, price: f64) -> TradeRequest {
    TradeRequest {
        symbol: "AAPL".into(),
        side,
        quantity,
        price,
        timestamp: t0(),
    }
}

proptest! {
    #[test]
    fn rsi_stays_within_bounds(closes in closes()) {
        let mut rsi = Rsi::new(14);
        for close in closes {
            if let Some(value) = rsi.update(close) {
                prop_assert!((0.0..=100.0).contains(&value), "rsi out of range: {value}");
            }
        }
    }

    #[test]
    fn macd_line_is_fast_minus_slow(closes in closes()) {
        let mut fast = Ema::new(12);
        let mut slow = Ema::new(26);
        let mut macd = Macd::with_defaults();
        for close in closes {
            let expected = fast.update(close).zip(slow.update(close)).map(|(f, s)| f - s);
            prop_assert_eq!(macd.update(close).map(|o| o.line), expected);
        }
    }

    #[test]
    fn reapplying_a_bar_changes_nothing(closes in closes()) {
        let tracker = MarketTracker::new(IndicatorConfig::default(), 100_000.0);
        let bars: Vec<_> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| make_bar("AAPL", i as i64, c))
            .collect();
        for bar in &bars {
            tracker.ingest_bar(bar).unwrap();
        }
        let before = tracker.snapshot();

        let last = bars.last().unwrap();
        prop_assert!(tracker.ingest_bar(last).is_err());
        prop_assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn readings_wait_for_warmup(count in 1usize..40) {
        let tracker = MarketTracker::new(IndicatorConfig::default(), 100_000.0);
        for bar in generate_bars("AAPL", count, 100.0) {
            tracker.ingest_bar(&bar).unwrap();
        }
        let reading = tracker.latest("AAPL", IndicatorKind::Rsi, 14).unwrap();
        match reading {
            IndicatorReading::Value(_) => prop_assert!(count >= 15),
            IndicatorReading::InsufficientHistory { bars, required } => {
                prop_assert!(count < 15);
                prop_assert_eq!(bars, count);
                prop_assert_eq!(required, 15);
            }
        }
    }

    #[test]
    fn max_drawdown_never_decreases(marks in prop::collection::vec(1.0f64..500.0, 1..80)) {
        let mut ledger = TradeLedger::new();
        ledger.record(request(Side::Buy, 100.0, 100.0)).unwrap();
        let mut portfolio = PortfolioTracker::new(10_000.0);

        let mut previous = 0.0;
        for (i, mark) in marks.into_iter().enumerate() {
            let prices = HashMap::from([("AAPL".to_string(), mark)]);
            let state = portfolio.update(&ledger, &prices, minute(i as i64));
            prop_assert!(state.max_drawdown >= previous);
            prop_assert!(state.max_drawdown >= state.drawdown);
            prop_assert!(state.equity <= state.peak_equity);
            previous = state.max_drawdown;
        }
    }

    #[test]
    fn rising_marks_have_no_drawdown(steps in prop::collection::vec(0.0f64..5.0, 1..80)) {
        let mut ledger = TradeLedger::new();
        ledger.record(request(Side::Buy, 10.0, 100.0)).unwrap();
        let mut portfolio = PortfolioTracker::new(10_000.0);

        let mut mark = 100.0;
        for (i, step) in steps.into_iter().enumerate() {
            mark += step;
            let prices = HashMap::from([("AAPL".to_string(), mark)]);
            let state = portfolio.update(&ledger, &prices, minute(i as i64));
            prop_assert_eq!(state.max_drawdown, 0.0);
        }
    }

    #[test]
    fn over_close_leaves_position_unchanged(
        held in 1.0f64..1_000.0,
        extra in 0.01f64..1_000.0,
        price in 1.0f64..500.0,
    ) {
        let mut ledger = TradeLedger::new();
        ledger.record(request(Side::Buy, held, 100.0)).unwrap();
        let before = ledger.position("AAPL").cloned();

        prop_assert!(ledger.record(request(Side::Sell, held + extra, price)).is_err());
        prop_assert_eq!(ledger.position("AAPL").cloned(), before);
        prop_assert_eq!(ledger.trades().len(), 1);
        prop_assert_eq!(ledger.realized_pnl(), 0.0);
    }

    #[test]
    fn round_trip_realizes_price_difference(
        quantity in 1.0f64..1_000.0,
        entry in 1.0f64..500.0,
        exit in 1.0f64..500.0,
    ) {
        let mut ledger = TradeLedger::new();
        ledger.record(request(Side::Buy, quantity, entry)).unwrap();
        ledger.record(request(Side::Sell, quantity, exit)).unwrap();

        prop_assert!(ledger.position("AAPL").is_none());
        assert_relative_eq!(
            ledger.realized_pnl(),
            quantity * (exit - entry),
            epsilon = 1e-6,
            max_relative = 1e-9
        );
    }
}

#[test]
fn buy_then_sell_higher_realizes_profit() {
    let mut ledger = TradeLedger::new();
    ledger.record(request(Side::Buy, 10.0, 100.0)).unwrap();
    ledger.record(request(Side::Sell, 10.0, 110.0)).unwrap();
    assert_relative_eq!(ledger.realized_pnl(), 100.0);
}
