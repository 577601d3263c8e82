//! OHLCV bar representation and ingestion-boundary validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::TrackerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Bar {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    /// Checks the OHLC invariants. A bar failing them never reaches indicator state.
    pub fn validate(&self) -> Result<(), TrackerError> {
        let reason = if self.symbol.trim().is_empty() {
            Some("empty symbol".to_string())
        } else if let Some((name, value)) = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite() || *v <= 0.0)
        {
            Some(format!("{name} must be a positive finite price, got {value}"))
        } else if self.high < self.open.max(self.close) {
            Some(format!(
                "high {} below max(open, close) {}",
                self.high,
                self.open.max(self.close)
            ))
        } else if self.low > self.open.min(self.close) {
            Some(format!(
                "low {} above min(open, close) {}",
                self.low,
                self.open.min(self.close)
            ))
        } else if self.volume < 0 {
            Some(format!("negative volume {}", self.volume))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(TrackerError::MalformedBar {
                symbol: self.symbol.clone(),
                timestamp: self.timestamp,
                reason,
            }),
            None => Ok(()),
        }
    }
}
