//! Portfolio valuation: unrealized PnL, equity and drawdown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use super::ledger::TradeLedger;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortfolioState {
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub equity: f64,
    pub peak_equity: f64,
    pub drawdown: f64,
    pub max_drawdown: f64,
}

#[derive(Debug, Clone)]
pub struct PortfolioTracker {
    initial_capital: f64,
    marks: HashMap<String, f64>,
    state: PortfolioState,
    equity_curve: Vec<EquityPoint>,
}

impl PortfolioTracker {
    pub fn new(initial_capital: f64) -> Self {
        PortfolioTracker {
            initial_capital,
            marks: HashMap::new(),
            state: PortfolioState {
                realized_pnl: 0.0,
                unrealized_pnl: 0.0,
                equity: initial_capital,
                peak_equity: initial_capital,
                drawdown: 0.0,
                max_drawdown: 0.0,
            },
            equity_curve: Vec::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn state(&self) -> PortfolioState {
        self.state
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Last accepted mark for `symbol`.
    pub fn mark(&self, symbol: &str) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    /// Revalue open positions against the merged marks and advance the
    /// running peak and drawdown.
    pub fn update(
        &mut self,
        ledger: &TradeLedger,
        latest_prices: &HashMap<String, f64>,
        at: DateTime<Utc>,
    ) -> PortfolioState {
        for (symbol, &price) in latest_prices {
            if price.is_finite() && price > 0.0 {
                self.marks.insert(symbol.clone(), price);
            }
        }

        let unrealized_pnl: f64 = ledger
            .positions()
            .map(|pos| {
                let mark = self.marks.get(&pos.symbol).copied().unwrap_or(pos.avg_cost);
                pos.unrealized_pnl(mark)
            })
            .sum();
        let realized_pnl = ledger.realized_pnl();
        let equity = self.initial_capital + realized_pnl + unrealized_pnl;

        let peak_equity = self.state.peak_equity.max(equity);
        let drawdown = if peak_equity > 0.0 {
            ((peak_equity - equity) / peak_equity).max(0.0)
        } else {
            0.0
        };

        self.state = PortfolioState {
            realized_pnl,
            unrealized_pnl,
            equity,
            peak_equity,
            drawdown,
            max_drawdown: self.state.max_drawdown.max(drawdown),
        };
        self.equity_curve.push(EquityPoint {
            timestamp: at,
            equity,
        });
        self.state
    }

    /// Restart drawdown tracking from the current equity.
    pub fn reset(&mut self) {
        self.state.peak_equity = self.state.equity;
        self.state.drawdown = 0.0;
        self.state.max_drawdown = 0.0;
        self.equity_curve.clear();
    }
}
