//! Market data ingestion port.

use chrono::{DateTime, Utc};

use crate::domain::bar::Bar;
use crate::domain::error::TrackerError;

/// Source of OHLCV bars. Each call returns a finite batch; retries and
/// backoff are the implementation's concern.
pub trait DataPort {
    /// Bars for `symbol` strictly after `since` (all bars when `None`),
    /// in ascending time order.
    fn fetch_bars(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, TrackerError>;

    fn list_symbols(&self) -> Result<Vec<String>, TrackerError>;
}
