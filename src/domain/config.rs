//! Tracker configuration and its validation.
//!
//! Every value is checked before any command runs; the first problem found
//! is reported as `ConfigMissing` or `ConfigInvalid`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::error::TrackerError;
use crate::domain::indicator::IndicatorConfig;
use crate::domain::indicator::{atr, macd, rsi};
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_SYMBOLS: [&str; 8] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META", "NVDA", "NFLX",
];
pub const DEFAULT_POOL_SIZE: i64 = 4;
pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub database_path: Option<String>,
    pub pool_size: u32,
    pub postgres_connection: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub symbols: Vec<String>,
    pub indicators: IndicatorConfig,
    pub initial_capital: f64,
    pub retention_days: u32,
}

impl TrackerConfig {
    /// Validate and read the full configuration.
    pub fn from_port(config: &dyn ConfigPort) -> Result<Self, TrackerError> {
        validate_config(config)?;
        Ok(TrackerConfig {
            database_path: non_empty(config.get_string("database", "path")),
            pool_size: pool_size(config)?,
            postgres_connection: non_empty(config.get_string("postgres", "connection_string")),
            source_dir: non_empty(config.get_string("ingest", "source_dir")).map(PathBuf::from),
            symbols: symbols(config)?,
            indicators: indicator_config(config)?,
            initial_capital: initial_capital(config)?,
            retention_days: retention_days(config)?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TrackerError {
    TrackerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Numeric value of `key`, or `default` when unset or blank. Text that does
/// not parse is `ConfigInvalid`.
fn number<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, TrackerError> {
    match non_empty(config.get_string(section, key)) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| invalid(section, key, format!("'{}' is not a number", raw.trim()))),
    }
}

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), TrackerError> {
    validate_pool_size(config)?;
    validate_symbols(config)?;
    validate_indicators(config)?;
    validate_initial_capital(config)?;
    validate_retention(config)?;
    Ok(())
}

fn pool_size(config: &dyn ConfigPort) -> Result<u32, TrackerError> {
    let value: i64 = number(config, "database", "pool_size", DEFAULT_POOL_SIZE)?;
    if !(1..=64).contains(&value) {
        return Err(invalid(
            "database",
            "pool_size",
            "pool_size must be between 1 and 64",
        ));
    }
    Ok(value as u32)
}

fn validate_pool_size(config: &dyn ConfigPort) -> Result<(), TrackerError> {
    pool_size(config).map(|_| ())
}

fn symbols(config: &dyn ConfigPort) -> Result<Vec<String>, TrackerError> {
    let Some(list) = config.get_list("ingest", "symbols") else {
        return Ok(DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect());
    };
    let mut seen = HashSet::new();
    let mut symbols = Vec::with_capacity(list.len());
    for raw in list {
        let symbol = raw.to_uppercase();
        if !symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='))
        {
            return Err(invalid(
                "ingest",
                "symbols",
                format!("invalid symbol '{raw}'"),
            ));
        }
        if !seen.insert(symbol.clone()) {
            return Err(invalid(
                "ingest",
                "symbols",
                format!("duplicate symbol '{symbol}'"),
            ));
        }
        symbols.push(symbol);
    }
    if symbols.is_empty() {
        return Err(invalid("ingest", "symbols", "symbol list is empty"));
    }
    Ok(symbols)
}

fn validate_symbols(config: &dyn ConfigPort) -> Result<(), TrackerError> {
    symbols(config).map(|_| ())
}

fn period(config: &dyn ConfigPort, key: &str, default: usize) -> Result<usize, TrackerError> {
    let value: i64 = number(config, "indicators", key, default as i64)?;
    if value < 1 {
        return Err(invalid(
            "indicators",
            key,
            format!("{key} must be at least 1"),
        ));
    }
    Ok(value as usize)
}

fn indicator_config(config: &dyn ConfigPort) -> Result<IndicatorConfig, TrackerError> {
    let defaults = IndicatorConfig::default();
    let ema_periods = match config.get_list("indicators", "ema_periods") {
        None => defaults.ema_periods,
        Some(list) => list
            .iter()
            .map(|raw| match raw.parse::<usize>() {
                Ok(p) if p >= 1 => Ok(p),
                _ => Err(invalid(
                    "indicators",
                    "ema_periods",
                    format!("invalid period '{raw}'"),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let indicators = IndicatorConfig {
        ema_periods,
        rsi_period: period(config, "rsi_period", rsi::DEFAULT_PERIOD)?,
        macd_fast: period(config, "macd_fast", macd::DEFAULT_FAST)?,
        macd_slow: period(config, "macd_slow", macd::DEFAULT_SLOW)?,
        macd_signal: period(config, "macd_signal", macd::DEFAULT_SIGNAL)?,
        atr_period: period(config, "atr_period", atr::DEFAULT_PERIOD)?,
    };
    if indicators.macd_fast >= indicators.macd_slow {
        return Err(invalid(
            "indicators",
            "macd_fast",
            "macd_fast must be less than macd_slow",
        ));
    }
    Ok(indicators)
}

fn validate_indicators(config: &dyn ConfigPort) -> Result<(), TrackerError> {
    indicator_config(config).map(|_| ())
}

fn initial_capital(config: &dyn ConfigPort) -> Result<f64, TrackerError> {
    let value: f64 = number(
        config,
        "portfolio",
        "initial_capital",
        DEFAULT_INITIAL_CAPITAL,
    )?;
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(
            "portfolio",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    Ok(value)
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), TrackerError> {
    initial_capital(config).map(|_| ())
}

fn retention_days(config: &dyn ConfigPort) -> Result<u32, TrackerError> {
    let value: i64 = number(config, "retention", "days", DEFAULT_RETENTION_DAYS)?;
    if !(1..=36_500).contains(&value) {
        return Err(invalid(
            "retention",
            "days",
            "days must be between 1 and 36500",
        ));
    }
    Ok(value as u32)
}

fn validate_retention(config: &dyn ConfigPort) -> Result<(), TrackerError> {
    retention_days(config).map(|_| ())
}

/// Path of the SQLite database, required by the default store.
pub fn require_database_path(config: &TrackerConfig) -> Result<&str, TrackerError> {
    config
        .database_path
        .as_deref()
        .ok_or_else(|| TrackerError::ConfigMissing {
            section: "database".to_string(),
            key: "path".to_string(),
        })
}

pub fn require_source_dir(config: &TrackerConfig) -> Result<&PathBuf, TrackerError> {
    config
        .source_dir
        .as_ref()
        .ok_or_else(|| TrackerError::ConfigMissing {
            section: "ingest".to_string(),
            key: "source_dir".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapConfig(HashMap<(String, String), String>);

    impl MapConfig {
        fn new(entries: &[(&str, &str, &str)]) -> Self {
            MapConfig(
                entries
                    .iter()
                    .map(|(s, k, v)| ((s.to_string(), k.to_string()), v.to_string()))
                    .collect(),
            )
        }
    }

    impl ConfigPort for MapConfig {
        fn get_string(&self, section: &str, key: &str) -> Option<String> {
            self.0.get(&(section.to_string(), key.to_string())).cloned()
        }
        fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
            self.get_string(section, key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
            self.get_string(section, key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn assert_invalid(entries: &[(&str, &str, &str)], expected_key: &str) {
        match validate_config(&MapConfig::new(entries)) {
            Err(TrackerError::ConfigInvalid { key, .. }) => assert_eq!(key, expected_key),
            other => panic!("expected ConfigInvalid({expected_key}), got {other:?}"),
        }
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = TrackerConfig::from_port(&MapConfig::new(&[])).unwrap();
        assert_eq!(cfg.symbols.len(), 8);
        assert_eq!(cfg.symbols[0], "AAPL");
        assert_eq!(cfg.indicators, IndicatorConfig::default());
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.retention_days, 30);
        assert!((cfg.initial_capital - 100_000.0).abs() < f64::EPSILON);
        assert!(cfg.database_path.is_none());
    }

    #[test]
    fn reads_all_sections() {
        let cfg = TrackerConfig::from_port(&MapConfig::new(&[
            ("database", "path", "/tmp/tracker.db"),
            ("ingest", "source_dir", "/data/bars"),
            ("ingest", "symbols", "aapl, msft"),
            ("indicators", "ema_periods", "5,20"),
            ("indicators", "rsi_period", "7"),
            ("portfolio", "initial_capital", "2500.5"),
            ("retention", "days", "7"),
        ]))
        .unwrap();
        assert_eq!(require_database_path(&cfg).unwrap(), "/tmp/tracker.db");
        assert_eq!(require_source_dir(&cfg).unwrap(), &PathBuf::from("/data/bars"));
        assert_eq!(cfg.symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(cfg.indicators.ema_periods, vec![5, 20]);
        assert_eq!(cfg.indicators.rsi_period, 7);
        assert!((cfg.initial_capital - 2500.5).abs() < f64::EPSILON);
        assert_eq!(cfg.retention_days, 7);
    }

    #[test]
    fn rejects_bad_values() {
        assert_invalid(&[("portfolio", "initial_capital", "0")], "initial_capital");
        assert_invalid(&[("portfolio", "initial_capital", "-5")], "initial_capital");
        assert_invalid(&[("retention", "days", "0")], "days");
        assert_invalid(&[("database", "pool_size", "0")], "pool_size");
        assert_invalid(&[("indicators", "rsi_period", "0")], "rsi_period");
        assert_invalid(&[("indicators", "ema_periods", "9,x")], "ema_periods");
        assert_invalid(&[("indicators", "ema_periods", "9,0")], "ema_periods");
        assert_invalid(
            &[("indicators", "macd_fast", "26"), ("indicators", "macd_slow", "12")],
            "macd_fast",
        );
    }

    #[test]
    fn rejects_non_numeric_values() {
        assert_invalid(&[("database", "pool_size", "four")], "pool_size");
        assert_invalid(&[("indicators", "rsi_period", "fourteen")], "rsi_period");
        assert_invalid(&[("indicators", "atr_period", "14.5")], "atr_period");
        assert_invalid(&[("portfolio", "initial_capital", "lots")], "initial_capital");
        assert_invalid(&[("retention", "days", "thirty")], "days");
    }

    #[test]
    fn blank_numbers_fall_back_to_defaults() {
        let cfg = TrackerConfig::from_port(&MapConfig::new(&[
            ("database", "pool_size", "  "),
            ("retention", "days", ""),
        ]))
        .unwrap();
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.retention_days, 30);
    }

    #[test]
    fn rejects_bad_symbol_lists() {
        assert_invalid(&[("ingest", "symbols", "AAPL,aapl")], "symbols");
        assert_invalid(&[("ingest", "symbols", "AAPL,MS FT")], "symbols");
        assert_invalid(&[("ingest", "symbols", " , ")], "symbols");
    }

    #[test]
    fn missing_paths_are_reported() {
        let cfg = TrackerConfig::from_port(&MapConfig::new(&[])).unwrap();
        assert!(matches!(
            require_database_path(&cfg),
            Err(TrackerError::ConfigMissing { .. })
        ));
        assert!(matches!(
            require_source_dir(&cfg),
            Err(TrackerError::ConfigMissing { .. })
        ));
    }
}
