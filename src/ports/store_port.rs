//! Persistence port for bars, indicator values and trades.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::bar::Bar;
use crate::domain::error::TrackerError;
use crate::domain::indicator::{IndicatorKind, IndicatorValue};
use crate::domain::ledger::Trade;

/// Result of an idempotent upsert keyed on (symbol, timestamp[, kind, period]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Unchanged,
    /// Conflicting data for the same key; the new row wins.
    Replaced,
}

/// Time-range query over stored indicator values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndicatorQuery {
    pub symbol: String,
    pub kind: Option<IndicatorKind>,
    pub period: Option<usize>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` rows.
    pub limit: Option<usize>,
}

impl IndicatorQuery {
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        IndicatorQuery {
            symbol: symbol.into(),
            ..Default::default()
        }
    }
}

/// Time-range query over stored bars.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BarQuery {
    pub symbol: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` bars.
    pub limit: Option<usize>,
}

impl BarQuery {
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        BarQuery {
            symbol: symbol.into(),
            ..Default::default()
        }
    }
}

/// One accepted input, as stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Bar(Bar),
    Trade(Trade),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PurgeCounts {
    pub bars: usize,
    pub indicators: usize,
}

pub trait StorePort {
    fn upsert_bar(&self, bar: &Bar) -> Result<UpsertOutcome, TrackerError>;

    fn upsert_indicator(&self, value: &IndicatorValue) -> Result<UpsertOutcome, TrackerError>;

    /// All stored bars for `symbol` in ascending time order.
    fn load_bars(&self, symbol: &str) -> Result<Vec<Bar>, TrackerError>;

    /// Matching bars in ascending time order.
    fn query_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, TrackerError>;

    /// Matching values in ascending time order.
    fn query_indicators(&self, query: &IndicatorQuery)
    -> Result<Vec<IndicatorValue>, TrackerError>;

    /// Most recent stored value of every series of `symbol`.
    fn latest_indicators(&self, symbol: &str) -> Result<Vec<IndicatorValue>, TrackerError>;

    fn insert_trade(&self, trade: &Trade) -> Result<(), TrackerError>;

    /// All stored trades in id order.
    fn load_trades(&self) -> Result<Vec<Trade>, TrackerError>;

    /// Stored bars of `symbols` and every stored trade, in the order the
    /// rows were first written. Replacing a bar keeps its original place.
    fn load_journal(&self, symbols: &[String]) -> Result<Vec<Recorded>, TrackerError>;

    /// Symbols that have at least one stored bar.
    fn list_symbols(&self) -> Result<Vec<String>, TrackerError>;

    /// Delete bars and indicator values strictly older than `cutoff`.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts, TrackerError>;
}
