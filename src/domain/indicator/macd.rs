//! MACD (Moving Average Convergence Divergence).
//!
//! MACD Line = EMA(fast) - EMA(slow), once both EMAs are warm
//! Signal Line = EMA(signal) of the MACD line, seeded with its first value
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9.
//! Warmup: slow bars for the line, slow + signal - 1 for signal and histogram.

use serde::{Deserialize, Serialize};

use crate::domain::indicator::ema::Ema;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdOutput {
    pub line: f64,
    pub signal: Option<f64>,
    pub histogram: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
    }

    pub fn update(&mut self, close: f64) -> Option<MacdOutput> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let (fast, slow) = fast.zip(slow)?;

        let line = fast - slow;
        let signal = self.signal.update(line);
        Some(MacdOutput {
            line,
            signal,
            histogram: signal.map(|s| line - s),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn macd_warmup_default() {
        let mut macd = Macd::with_defaults();
        let out: Vec<_> = rising(40).into_iter().map(|c| macd.update(c)).collect();

        for (i, o) in out.iter().enumerate().take(DEFAULT_SLOW - 1) {
            assert!(o.is_none(), "index {} should have no MACD", i);
        }
        let first = out[DEFAULT_SLOW - 1].expect("line at bar 26");
        assert!(first.signal.is_none());

        let signal_at = DEFAULT_SLOW + DEFAULT_SIGNAL - 2;
        assert!(out[signal_at - 1].unwrap().signal.is_none());
        assert!(out[signal_at].unwrap().signal.is_some());
    }

    #[test]
    fn macd_histogram_equals_line_minus_signal() {
        let mut macd = Macd::with_defaults();
        for c in rising(60) {
            if let Some(MacdOutput {
                line,
                signal: Some(signal),
                histogram: Some(histogram),
            }) = macd.update(c)
            {
                assert!((histogram - (line - signal)).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn macd_line_is_ema_fast_minus_ema_slow() {
        let closes = [10.0, 20.0, 30.0, 25.0, 50.0, 45.0, 70.0, 80.0, 60.0, 100.0];
        let mut macd = Macd::new(3, 5, 2);
        let mut fast = Ema::new(3);
        let mut slow = Ema::new(5);

        for c in closes {
            let f = fast.update(c);
            let s = slow.update(c);
            let out = macd.update(c);
            match (f, s) {
                (Some(f), Some(s)) => assert_eq!(out.unwrap().line, f - s),
                _ => assert!(out.is_none()),
            }
        }
    }

    #[test]
    fn macd_signal_seeded_with_first_line_value() {
        let mut macd = Macd::new(2, 3, 1);
        let outputs: Vec<_> = [10.0, 12.0, 15.0, 11.0]
            .into_iter()
            .filter_map(|c| macd.update(c))
            .collect();
        // period-1 signal EMA is the line itself
        for o in outputs {
            assert_eq!(o.signal, Some(o.line));
            assert_eq!(o.histogram, Some(0.0));
        }
    }

    #[test]
    fn macd_flat_prices_are_zero() {
        let mut macd = Macd::with_defaults();
        let last = (0..40).filter_map(|_| macd.update(100.0)).last().unwrap();
        assert!(last.line.abs() < 1e-9);
        assert!(last.signal.unwrap().abs() < 1e-9);
    }

    #[test]
    fn macd_default_constants() {
        assert_eq!(DEFAULT_FAST, 12);
        assert_eq!(DEFAULT_SLOW, 26);
        assert_eq!(DEFAULT_SIGNAL, 9);
    }

    #[test]
    fn macd_custom_parameters() {
        let mut macd = Macd::new(5, 10, 3);
        let out: Vec<_> = rising(20).into_iter().map(|c| macd.update(c)).collect();
        let warmup = 10 - 1 + 3 - 1;
        assert!(out[warmup - 1].unwrap().signal.is_none());
        assert!(out[warmup].unwrap().signal.is_some());
    }
}
