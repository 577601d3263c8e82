//! Exponential Moving Average.
//!
//! k = 2/(n+1), EMA[t] = C[t]*k + EMA[t-1]*(1-k).
//! The series is seeded with the first raw close so that a restart from the
//! same first bar reproduces the same values. Output starts at bar n.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ema {
    period: usize,
    k: f64,
    value: Option<f64>,
    count: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            k: 2.0 / (period as f64 + 1.0),
            value: None,
            count: 0,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Feed one observation; returns the EMA once the warm-up is complete.
    pub fn update(&mut self, x: f64) -> Option<f64> {
        let next = match self.value {
            None => x,
            Some(prev) => x * self.k + prev * (1.0 - self.k),
        };
        self.value = Some(next);
        self.count += 1;
        self.is_warm().then_some(next)
    }

    pub fn is_warm(&self) -> bool {
        self.count >= self.period
    }

    /// Raw recurrence value, including during warm-up.
    pub fn current(&self) -> Option<f64> {
        self.value
    }
}
