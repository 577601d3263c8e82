//! Per-symbol indicator state.
//!
//! `SymbolState` is the only place recurrence state lives. Applying a bar is
//! all-or-nothing: the bar is validated and checked against the last applied
//! timestamp before any recurrence is touched.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::bar::Bar;
use crate::domain::error::TrackerError;
use crate::domain::indicator::atr::Atr;
use crate::domain::indicator::ema::Ema;
use crate::domain::indicator::macd::Macd;
use crate::domain::indicator::rsi::Rsi;
use crate::domain::indicator::{
    IndicatorConfig, IndicatorKey, IndicatorKind, IndicatorReading, IndicatorValue,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolState {
    symbol: String,
    last_timestamp: Option<DateTime<Utc>>,
    last_close: Option<f64>,
    bars_applied: usize,
    emas: Vec<Ema>,
    rsi: Rsi,
    macd: Macd,
    macd_slow: usize,
    macd_signal: usize,
    atr: Atr,
    latest: BTreeMap<IndicatorKey, IndicatorValue>,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, config: &IndicatorConfig) -> Self {
        let mut periods = config.ema_periods.clone();
        periods.sort_unstable();
        periods.dedup();

        Self {
            symbol: symbol.into(),
            last_timestamp: None,
            last_close: None,
            bars_applied: 0,
            emas: periods.into_iter().map(Ema::new).collect(),
            rsi: Rsi::new(config.rsi_period),
            macd: Macd::new(config.macd_fast, config.macd_slow, config.macd_signal),
            macd_slow: config.macd_slow,
            macd_signal: config.macd_signal,
            atr: Atr::new(config.atr_period),
            latest: BTreeMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn last_close(&self) -> Option<f64> {
        self.last_close
    }

    pub fn bars_applied(&self) -> usize {
        self.bars_applied
    }

    /// Latest emitted value of every series that has produced one.
    pub fn latest(&self) -> &BTreeMap<IndicatorKey, IndicatorValue> {
        &self.latest
    }

    /// Checks whether `bar` could be applied without touching any state.
    pub fn check(&self, bar: &Bar) -> Result<(), TrackerError> {
        if bar.symbol != self.symbol {
            return Err(TrackerError::MalformedBar {
                symbol: bar.symbol.clone(),
                timestamp: bar.timestamp,
                reason: format!("bar routed to state of {}", self.symbol),
            });
        }
        bar.validate()?;
        match self.last_timestamp {
            Some(last) if bar.timestamp <= last => Err(TrackerError::StaleBar {
                symbol: bar.symbol.clone(),
                timestamp: bar.timestamp,
                last,
            }),
            _ => Ok(()),
        }
    }

    /// Extend every series by one bar and return the values it produced.
    pub fn apply(&mut self, bar: &Bar) -> Result<Vec<IndicatorValue>, TrackerError> {
        self.check(bar)?;

        let mut emitted = Vec::with_capacity(self.emas.len() + 5);
        let close = bar.close;

        for ema in &mut self.emas {
            if let Some(v) = ema.update(close) {
                emitted.push((IndicatorKey::new(IndicatorKind::Ema, ema.period()), v));
            }
        }
        if let Some(v) = self.rsi.update(close) {
            emitted.push((IndicatorKey::new(IndicatorKind::Rsi, self.rsi.period()), v));
        }
        if let Some(out) = self.macd.update(close) {
            emitted.push((IndicatorKey::new(IndicatorKind::Macd, self.macd_slow), out.line));
            if let Some(signal) = out.signal {
                emitted.push((
                    IndicatorKey::new(IndicatorKind::MacdSignal, self.macd_signal),
                    signal,
                ));
            }
            if let Some(histogram) = out.histogram {
                emitted.push((
                    IndicatorKey::new(IndicatorKind::MacdHistogram, self.macd_signal),
                    histogram,
                ));
            }
        }
        if let Some(v) = self.atr.update(bar) {
            emitted.push((IndicatorKey::new(IndicatorKind::Atr, self.atr.period()), v));
        }

        self.last_timestamp = Some(bar.timestamp);
        self.last_close = Some(close);
        self.bars_applied += 1;

        let values: Vec<IndicatorValue> = emitted
            .into_iter()
            .map(|(key, value)| IndicatorValue {
                symbol: self.symbol.clone(),
                timestamp: bar.timestamp,
                kind: key.kind,
                period: key.period,
                value,
            })
            .collect();
        for v in &values {
            self.latest.insert(v.key(), v.clone());
        }
        Ok(values)
    }

    /// Latest value of a series, or how far it is from producing one.
    pub fn reading(&self, key: IndicatorKey, required: usize) -> IndicatorReading {
        match self.latest.get(&key) {
            Some(v) => IndicatorReading::Value(v.clone()),
            None => IndicatorReading::InsufficientHistory {
                bars: self.bars_applied,
                required,
            },
        }
    }
}
