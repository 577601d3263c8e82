#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use market_tracker::domain::bar::Bar;
use market_tracker::domain::error::TrackerError;
use market_tracker::ports::data_port::DataPort;
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
    pub calls: Mutex<Vec<(String, Option<DateTime<Utc>>)>>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    /// Ignores `since` on purpose so callers see the full at-least-once batch.
    fn fetch_bars(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, TrackerError> {
        self.calls.lock().push((symbol.to_string(), since));
        if let Some(reason) = self.errors.get(symbol) {
            return Err(TrackerError::Io(std::io::Error::other(reason.clone())));
        }
        Ok(self.data.get(symbol).cloned().unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, TrackerError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap()
}

pub fn minute(i: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(i)
}

pub fn make_bar(symbol: &str, i: i64, close: f64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        timestamp: minute(i),
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1_000,
    }
}

/// One-minute bars following a smooth oscillation around `start_price`.
pub fn generate_bars(symbol: &str, count: usize, start_price: f64) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let close = start_price + (i as f64 * 0.37).sin() * 2.0 + i as f64 * 0.05;
            Bar {
                symbol: symbol.to_string(),
                timestamp: minute(i as i64),
                open: close - 0.1,
                high: close + 0.6,
                low: close - 0.6,
                close,
                volume: 1_000 + i as i64,
            }
        })
        .collect()
}
