//! Domain error types.

use chrono::{DateTime, Utc};

use crate::domain::indicator::IndicatorKind;

/// Top-level error type for market-tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("stale bar for {symbol} at {timestamp}: last applied bar is {last}")]
    StaleBar {
        symbol: String,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("malformed bar for {symbol} at {timestamp}: {reason}")]
    MalformedBar {
        symbol: String,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    #[error("invalid trade: {reason}")]
    InvalidTrade { reason: String },

    #[error("over-close on {symbol}: requested {requested}, open position is {open}")]
    OverClose {
        symbol: String,
        requested: f64,
        open: f64,
    },

    #[error("indicator {kind}({period}) is not tracked")]
    UnknownIndicator { kind: IndicatorKind, period: usize },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// Bar rejections are expected under at-least-once delivery and never abort a cycle.
    pub fn is_bar_rejection(&self) -> bool {
        matches!(
            self,
            TrackerError::StaleBar { .. } | TrackerError::MalformedBar { .. }
        )
    }
}

impl From<&TrackerError> for std::process::ExitCode {
    fn from(err: &TrackerError) -> Self {
        let code: u8 = match err {
            TrackerError::Io(_) => 1,
            TrackerError::ConfigParse { .. }
            | TrackerError::ConfigMissing { .. }
            | TrackerError::ConfigInvalid { .. } => 2,
            TrackerError::Database { .. } | TrackerError::DatabaseQuery { .. } => 3,
            TrackerError::StaleBar { .. } | TrackerError::MalformedBar { .. } => 4,
            TrackerError::NoData { .. } | TrackerError::UnknownIndicator { .. } => 5,
            TrackerError::InvalidTrade { .. } | TrackerError::OverClose { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stale_bar_message_names_both_timestamps() {
        let err = TrackerError::StaleBar {
            symbol: "MSFT".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            last: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("MSFT"));
        assert!(msg.contains("2024-03-01"));
        assert!(msg.contains("2024-03-02"));
    }

    #[test]
    fn bar_rejections_are_classified() {
        let stale = TrackerError::StaleBar {
            symbol: "A".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        assert!(stale.is_bar_rejection());
        assert!(
            !TrackerError::InvalidTrade {
                reason: "x".into()
            }
            .is_bar_rejection()
        );
    }

    #[test]
    fn over_close_message() {
        let err = TrackerError::OverClose {
            symbol: "AAPL".into(),
            requested: 15.0,
            open: 10.0,
        };
        assert_eq!(
            err.to_string(),
            "over-close on AAPL: requested 15, open position is 10"
        );
    }

    #[test]
    fn unknown_indicator_message() {
        let err = TrackerError::UnknownIndicator {
            kind: IndicatorKind::Ema,
            period: 7,
        };
        assert_eq!(err.to_string(), "indicator ema(7) is not tracked");
    }
}
