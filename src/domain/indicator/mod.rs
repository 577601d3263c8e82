//! Incremental technical indicators.
//!
//! Each indicator family keeps only the recurrence state it needs to extend
//! its series by one bar:
//! - [`ema::Ema`]: previous EMA value
//! - [`rsi::Rsi`]: previous close plus Wilder-smoothed average gain/loss
//! - [`macd::Macd`]: fast, slow and signal EMAs
//! - [`atr::Atr`]: previous close plus Wilder-smoothed true range
//!
//! `IndicatorKind` tags every emitted [`IndicatorValue`]; together with the
//! period it forms the [`IndicatorKey`] under which values are stored.

pub mod atr;
pub mod ema;
pub mod macd;
pub mod rsi;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Ema,
    Rsi,
    Macd,
    MacdSignal,
    MacdHistogram,
    Atr,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Ema => "ema",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Macd => "macd",
            IndicatorKind::MacdSignal => "macd_signal",
            IndicatorKind::MacdHistogram => "macd_histogram",
            IndicatorKind::Atr => "atr",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown indicator kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for IndicatorKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ema" => Ok(IndicatorKind::Ema),
            "rsi" => Ok(IndicatorKind::Rsi),
            "macd" => Ok(IndicatorKind::Macd),
            "macd_signal" | "signal" => Ok(IndicatorKind::MacdSignal),
            "macd_histogram" | "histogram" => Ok(IndicatorKind::MacdHistogram),
            "atr" => Ok(IndicatorKind::Atr),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// Identity of one indicator series for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndicatorKey {
    pub kind: IndicatorKind,
    pub period: usize,
}

impl IndicatorKey {
    pub fn new(kind: IndicatorKind, period: usize) -> Self {
        Self { kind, period }
    }
}

impl fmt::Display for IndicatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.period)
    }
}

/// One derived value, unique per (symbol, timestamp, kind, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub kind: IndicatorKind,
    pub period: usize,
    pub value: f64,
}

impl IndicatorValue {
    pub fn key(&self) -> IndicatorKey {
        IndicatorKey::new(self.kind, self.period)
    }
}

/// Result of asking for the latest value of a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndicatorReading {
    Value(IndicatorValue),
    InsufficientHistory { bars: usize, required: usize },
}

impl IndicatorReading {
    pub fn value(&self) -> Option<f64> {
        match self {
            IndicatorReading::Value(v) => Some(v.value),
            IndicatorReading::InsufficientHistory { .. } => None,
        }
    }
}

/// Which series the engine maintains for every symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub ema_periods: Vec<usize>,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            ema_periods: vec![9, 12, 21, 26, 50],
            rsi_period: rsi::DEFAULT_PERIOD,
            macd_fast: macd::DEFAULT_FAST,
            macd_slow: macd::DEFAULT_SLOW,
            macd_signal: macd::DEFAULT_SIGNAL,
            atr_period: atr::DEFAULT_PERIOD,
        }
    }
}

impl IndicatorConfig {
    /// Minimum number of applied bars before `(kind, period)` produces output,
    /// or `None` if the series is not maintained.
    pub fn warmup(&self, kind: IndicatorKind, period: usize) -> Option<usize> {
        match kind {
            IndicatorKind::Ema if self.ema_periods.contains(&period) => Some(period),
            IndicatorKind::Rsi if period == self.rsi_period => Some(period + 1),
            IndicatorKind::Macd if period == self.macd_slow => Some(self.macd_slow),
            IndicatorKind::MacdSignal | IndicatorKind::MacdHistogram
                if period == self.macd_signal =>
            {
                Some(self.macd_slow + self.macd_signal - 1)
            }
            IndicatorKind::Atr if period == self.atr_period => Some(period),
            _ => None,
        }
    }

    /// Every series key the engine emits, in a stable order.
    pub fn keys(&self) -> Vec<IndicatorKey> {
        let mut keys: Vec<IndicatorKey> = self
            .ema_periods
            .iter()
            .map(|&p| IndicatorKey::new(IndicatorKind::Ema, p))
            .collect();
        keys.push(IndicatorKey::new(IndicatorKind::Rsi, self.rsi_period));
        keys.push(IndicatorKey::new(IndicatorKind::Macd, self.macd_slow));
        keys.push(IndicatorKey::new(IndicatorKind::MacdSignal, self.macd_signal));
        keys.push(IndicatorKey::new(
            IndicatorKind::MacdHistogram,
            self.macd_signal,
        ));
        keys.push(IndicatorKey::new(IndicatorKind::Atr, self.atr_period));
        keys.sort();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_matches_storage_names() {
        assert_eq!(IndicatorKind::Ema.to_string(), "ema");
        assert_eq!(IndicatorKind::MacdSignal.to_string(), "macd_signal");
        assert_eq!(IndicatorKind::MacdHistogram.to_string(), "macd_histogram");
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("RSI".parse::<IndicatorKind>(), Ok(IndicatorKind::Rsi));
        assert_eq!(" atr ".parse::<IndicatorKind>(), Ok(IndicatorKind::Atr));
        assert_eq!(
            "signal".parse::<IndicatorKind>(),
            Ok(IndicatorKind::MacdSignal)
        );
        assert!("vwap".parse::<IndicatorKind>().is_err());
    }

    #[test]
    fn kind_round_trips_through_display() {
        for kind in [
            IndicatorKind::Ema,
            IndicatorKind::Rsi,
            IndicatorKind::Macd,
            IndicatorKind::MacdSignal,
            IndicatorKind::MacdHistogram,
            IndicatorKind::Atr,
        ] {
            assert_eq!(kind.to_string().parse::<IndicatorKind>(), Ok(kind));
        }
    }

    #[test]
    fn key_display() {
        assert_eq!(
            IndicatorKey::new(IndicatorKind::Rsi, 14).to_string(),
            "rsi(14)"
        );
    }

    #[test]
    fn default_warmups() {
        let cfg = IndicatorConfig::default();
        assert_eq!(cfg.warmup(IndicatorKind::Ema, 9), Some(9));
        assert_eq!(cfg.warmup(IndicatorKind::Rsi, 14), Some(15));
        assert_eq!(cfg.warmup(IndicatorKind::Macd, 26), Some(26));
        assert_eq!(cfg.warmup(IndicatorKind::MacdSignal, 9), Some(34));
        assert_eq!(cfg.warmup(IndicatorKind::MacdHistogram, 9), Some(34));
        assert_eq!(cfg.warmup(IndicatorKind::Atr, 14), Some(14));
    }

    #[test]
    fn untracked_series_has_no_warmup() {
        let cfg = IndicatorConfig::default();
        assert_eq!(cfg.warmup(IndicatorKind::Ema, 7), None);
        assert_eq!(cfg.warmup(IndicatorKind::Rsi, 9), None);
        assert_eq!(cfg.warmup(IndicatorKind::Macd, 12), None);
    }

    #[test]
    fn keys_cover_every_series() {
        let cfg = IndicatorConfig::default();
        let keys = cfg.keys();
        assert_eq!(keys.len(), 5 + 5);
        assert!(keys.contains(&IndicatorKey::new(IndicatorKind::Ema, 50)));
        assert!(keys.contains(&IndicatorKey::new(IndicatorKind::MacdHistogram, 9)));
    }

    #[test]
    fn reading_value_accessor() {
        let reading = IndicatorReading::InsufficientHistory {
            bars: 3,
            required: 15,
        };
        assert_eq!(reading.value(), None);
    }
}
