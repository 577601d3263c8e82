//! Average True Range with Wilder smoothing.
//!
//! The first bar has no previous close, so its true range is high - low.
//! Seeded with the mean of the first n true ranges, then
//! ATR[t] = (ATR[t-1] * (n-1) + TR[t]) / n.

use serde::{Deserialize, Serialize};

use crate::domain::bar::Bar;

pub const DEFAULT_PERIOD: usize = 14;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    count: usize,
    tr_sum: f64,
    value: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            count: 0,
            tr_sum: 0.0,
            value: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let tr = match self.prev_close {
            Some(prev_close) => bar.true_range(prev_close),
            None => bar.high - bar.low,
        };
        self.prev_close = Some(bar.close);
        self.count += 1;

        let n = self.period as f64;
        self.value = match self.value {
            Some(prev) => Some((prev * (n - 1.0) + tr) / n),
            None => {
                self.tr_sum += tr;
                (self.count == self.period).then(|| self.tr_sum / n)
            }
        };
        self.value
    }
}
