//! CSV directory bar source.
//!
//! One file per symbol, `<dir>/<SYMBOL>.csv`, with header
//! `timestamp,open,high,low,close,volume`. Timestamps are RFC 3339 or a bare
//! `YYYY-MM-DD` date (midnight UTC). Volume may be written as a float
//! (`1234.0`, `1.2e6`) as long as it is a whole, non-negative number.

use crate::domain::bar::Bar;
use crate::domain::error::TrackerError;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, Utc};
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol.to_uppercase()))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{raw}'"))
}

fn field<T: std::str::FromStr>(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    record
        .get(index)
        .ok_or_else(|| format!("missing {name} column"))?
        .trim()
        .parse()
        .map_err(|e| format!("invalid {name} value: {e}"))
}

fn volume(record: &csv::StringRecord) -> Result<i64, String> {
    if let Ok(whole) = field::<i64>(record, 5, "volume") {
        return if whole < 0 {
            Err(format!("volume must not be negative, got {whole}"))
        } else {
            Ok(whole)
        };
    }
    let value: f64 = field(record, 5, "volume")?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > i64::MAX as f64 {
        return Err(format!("volume must be a whole number, got {value}"));
    }
    Ok(value as i64)
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, TrackerError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "no bar file");
            TrackerError::NoData {
                symbol: symbol.to_uppercase(),
            }
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| TrackerError::Io(std::io::Error::other(e)))?;
            let parsed = (|| -> Result<Bar, String> {
                Ok(Bar {
                    symbol: symbol.to_uppercase(),
                    timestamp: parse_timestamp(record.get(0).ok_or("missing timestamp column")?)?,
                    open: field(&record, 1, "open")?,
                    high: field(&record, 2, "high")?,
                    low: field(&record, 3, "low")?,
                    close: field(&record, 4, "close")?,
                    volume: volume(&record)?,
                })
            })();

            match parsed {
                Ok(bar) if since.is_some_and(|s| bar.timestamp <= s) => {}
                Ok(bar) => bars.push(bar),
                Err(reason) => {
                    tracing::warn!(symbol, line = line + 2, %reason, "skipping unreadable row");
                }
            }
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, TrackerError> {
        let mut symbols = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    symbols.push(stem.to_string_lossy().to_uppercase());
                }
            }
        }
        symbols.sort();
        Ok(symbols)
    }
}
