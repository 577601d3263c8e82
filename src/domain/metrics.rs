//! Trading performance statistics over closed trades and the equity curve.

use serde::Serialize;

use super::ledger::ClosedTrade;
use super::portfolio::EquityPoint;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub max_drawdown: f64,
    /// Longest run of equity points spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

/// Sum, count and extreme of one side (wins or losses) of the PnL column.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    count: usize,
    total: f64,
    largest: f64,
}

impl Tally {
    fn add(&mut self, magnitude: f64) {
        self.count += 1;
        self.total += magnitude;
        self.largest = self.largest.max(magnitude);
    }

    fn mean(&self) -> f64 {
        ratio(self.total, self.count as f64)
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

#[derive(Debug, Default)]
struct Drawdown {
    peak: Option<f64>,
    deepest: f64,
    run: usize,
    longest_run: usize,
}

impl Drawdown {
    fn observe(&mut self, equity: f64) {
        let peak = *self.peak.get_or_insert(equity);
        if equity >= peak {
            self.peak = Some(equity);
            self.run = 0;
            return;
        }
        if peak > 0.0 {
            self.deepest = self.deepest.max((peak - equity) / peak);
            self.run += 1;
            self.longest_run = self.longest_run.max(self.run);
        }
    }
}

fn drawdown(equity_curve: &[EquityPoint]) -> Drawdown {
    equity_curve.iter().fold(Drawdown::default(), |mut dd, p| {
        dd.observe(p.equity);
        dd
    })
}

impl Metrics {
    pub fn compute(
        closed_trades: &[ClosedTrade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
    ) -> Self {
        let final_equity = equity_curve.last().map_or(initial_capital, |p| p.equity);
        let dd = drawdown(equity_curve);

        let mut wins = Tally::default();
        let mut losses = Tally::default();
        let mut breakeven = 0;
        for trade in closed_trades {
            match trade.pnl.partial_cmp(&0.0) {
                Some(std::cmp::Ordering::Greater) => wins.add(trade.pnl),
                Some(std::cmp::Ordering::Less) => losses.add(-trade.pnl),
                _ => breakeven += 1,
            }
        }

        let profit_factor = match (wins.total > 0.0, losses.total > 0.0) {
            (_, true) => wins.total / losses.total,
            (true, false) => f64::INFINITY,
            (false, false) => 0.0,
        };

        Metrics {
            total_return: ratio(final_equity - initial_capital, initial_capital),
            max_drawdown: dd.deepest,
            max_drawdown_duration: dd.longest_run,
            trades_won: wins.count,
            trades_lost: losses.count,
            trades_breakeven: breakeven,
            win_rate: ratio(wins.count as f64, closed_trades.len() as f64),
            profit_factor,
            avg_win: wins.mean(),
            avg_loss: losses.mean(),
            largest_win: wins.largest,
            largest_loss: losses.largest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::Side;
    use approx::assert_relative_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn open() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 13, 30, 0).unwrap()
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        (0..values.len())
            .map(|i| EquityPoint {
                timestamp: open() + Duration::minutes(i as i64),
                equity: values[i],
            })
            .collect()
    }

    fn closed(pnl: f64) -> ClosedTrade {
        ClosedTrade {
            symbol: "NVDA".into(),
            side: Side::Buy,
            quantity: 10.0,
            entry_price: 50.0,
            exit_price: 50.0 + pnl / 10.0,
            entry_timestamp: open(),
            exit_timestamp: open() + Duration::hours(2),
            pnl,
        }
    }

    #[test]
    fn nothing_traded() {
        let m = Metrics::compute(&[], &[], 25_000.0);
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.max_drawdown_duration, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.profit_factor, 0.0);
    }

    #[test]
    fn return_uses_last_equity_point() {
        let m = Metrics::compute(&[], &curve(&[25_000.0, 24_000.0, 27_500.0]), 25_000.0);
        assert_relative_eq!(m.total_return, 0.1);

        let m = Metrics::compute(&[], &curve(&[25_000.0, 20_000.0]), 25_000.0);
        assert_relative_eq!(m.total_return, -0.2);
    }

    #[test]
    fn win_loss_breakdown() {
        let trades = [closed(30.0), closed(-20.0), closed(90.0), closed(-40.0), closed(0.0)];
        let m = Metrics::compute(&trades, &[], 25_000.0);

        assert_eq!((m.trades_won, m.trades_lost, m.trades_breakeven), (2, 2, 1));
        assert_relative_eq!(m.win_rate, 0.4);
        assert_relative_eq!(m.profit_factor, 2.0);
        assert_relative_eq!(m.avg_win, 60.0);
        assert_relative_eq!(m.avg_loss, 30.0);
        assert_relative_eq!(m.largest_win, 90.0);
        assert_relative_eq!(m.largest_loss, 40.0);
    }

    #[test]
    fn only_winners_give_infinite_profit_factor() {
        let m = Metrics::compute(&[closed(5.0), closed(1.0)], &[], 1_000.0);
        assert!(m.profit_factor.is_infinite());
        assert_eq!(m.avg_loss, 0.0);
    }

    #[test]
    fn deepest_drawdown_and_longest_run() {
        // peak 120, trough 84: 30%; the run below 120 lasts three points
        let m = Metrics::compute(
            &[],
            &curve(&[100.0, 120.0, 110.0, 84.0, 96.0, 125.0, 124.0]),
            100.0,
        );
        assert_relative_eq!(m.max_drawdown, 0.3);
        assert_eq!(m.max_drawdown_duration, 3);
    }

    #[test]
    fn flat_or_rising_curve_has_no_drawdown() {
        let dd = drawdown(&curve(&[50.0, 50.0, 51.0, 70.0]));
        assert_eq!(dd.deepest, 0.0);
        assert_eq!(dd.longest_run, 0);
    }
}
