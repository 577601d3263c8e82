//! `MarketTracker`: indicator engine, trade ledger and portfolio behind one
//! published snapshot.
//!
//! Writers update their own state and publish while still holding it, in the
//! fixed lock order symbol slot → account → snapshot. Readers only ever take
//! the snapshot read lock, so everything they see belongs to one sequence
//! point.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::domain::bar::Bar;
use crate::domain::engine::IndicatorEngine;
use crate::domain::error::TrackerError;
use crate::domain::indicator::{
    IndicatorConfig, IndicatorKey, IndicatorKind, IndicatorReading, IndicatorValue,
};
use crate::domain::ledger::{
    ClosedTrade, OpenPosition, Trade, TradeId, TradeLedger, TradeRequest,
};
use crate::domain::metrics::Metrics;
use crate::domain::portfolio::{PortfolioState, PortfolioTracker};
use crate::domain::symbol_state::SymbolState;

/// Published view of one symbol's indicator state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolView {
    pub last_timestamp: Option<DateTime<Utc>>,
    pub last_close: Option<f64>,
    pub bars_applied: usize,
    pub indicators: Vec<IndicatorValue>,
}

impl SymbolView {
    fn from_state(state: &SymbolState) -> Self {
        SymbolView {
            last_timestamp: state.last_timestamp(),
            last_close: state.last_close(),
            bars_applied: state.bars_applied(),
            indicators: state.latest().values().cloned().collect(),
        }
    }

    pub fn value(&self, key: IndicatorKey) -> Option<&IndicatorValue> {
        self.indicators.iter().find(|v| v.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub symbols: BTreeMap<String, SymbolView>,
    pub portfolio: PortfolioState,
    pub open_positions: usize,
    pub trade_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedReading {
    pub kind: IndicatorKind,
    pub period: usize,
    #[serde(flatten)]
    pub reading: IndicatorReading,
}

/// Everything known about one symbol at a single sequence point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSnapshot {
    pub sequence: u64,
    pub symbol: String,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub last_close: Option<f64>,
    pub bars_applied: usize,
    pub readings: Vec<KeyedReading>,
    pub position: Option<OpenPosition>,
}

struct Account {
    ledger: TradeLedger,
    portfolio: PortfolioTracker,
    positions: BTreeMap<String, OpenPosition>,
}

impl Account {
    fn revalue(&mut self, prices: &HashMap<String, f64>, at: DateTime<Utc>) -> PortfolioState {
        self.portfolio.update(&self.ledger, prices, at)
    }

    fn sync_positions(&mut self) {
        self.positions = self
            .ledger
            .positions()
            .map(|p| (p.symbol.clone(), p.clone()))
            .collect();
    }
}

pub struct MarketTracker {
    engine: IndicatorEngine,
    account: Mutex<Account>,
    published: RwLock<Published>,
}

struct Published {
    snapshot: Snapshot,
    positions: BTreeMap<String, OpenPosition>,
}

impl MarketTracker {
    pub fn new(config: IndicatorConfig, initial_capital: f64) -> Self {
        let portfolio = PortfolioTracker::new(initial_capital);
        let snapshot = Snapshot {
            sequence: 0,
            symbols: BTreeMap::new(),
            portfolio: portfolio.state(),
            open_positions: 0,
            trade_count: 0,
        };
        MarketTracker {
            engine: IndicatorEngine::new(config),
            account: Mutex::new(Account {
                ledger: TradeLedger::new(),
                portfolio,
                positions: BTreeMap::new(),
            }),
            published: RwLock::new(Published {
                snapshot,
                positions: BTreeMap::new(),
            }),
        }
    }

    pub fn indicator_config(&self) -> &IndicatorConfig {
        self.engine.config()
    }

    /// Caller must hold the account lock (and the symbol slot, if any).
    fn publish(&self, account: &Account, view: Option<(&str, SymbolView)>) -> u64 {
        let mut published = self.published.write();
        let snapshot = &mut published.snapshot;
        snapshot.sequence += 1;
        if let Some((symbol, view)) = view {
            snapshot.symbols.insert(symbol.to_string(), view);
        }
        snapshot.portfolio = account.portfolio.state();
        snapshot.open_positions = account.positions.len();
        snapshot.trade_count = account.ledger.trades().len();
        let sequence = snapshot.sequence;
        published.positions = account.positions.clone();
        sequence
    }

    /// Apply one bar, revalue the portfolio at its close and publish.
    pub fn ingest_bar(&self, bar: &Bar) -> Result<Vec<IndicatorValue>, TrackerError> {
        self.engine.apply_then(bar, |state, values| {
            let mut account = self.account.lock();
            let prices = HashMap::from([(bar.symbol.clone(), bar.close)]);
            account.revalue(&prices, bar.timestamp);
            let sequence = self.publish(
                &account,
                Some((state.symbol(), SymbolView::from_state(state))),
            );
            tracing::debug!(
                symbol = %bar.symbol,
                timestamp = %bar.timestamp,
                emitted = values.len(),
                sequence,
                "bar applied"
            );
            values
        })
    }

    pub fn submit_trade(&self, request: TradeRequest) -> Result<Trade, TrackerError> {
        self.commit_trade(|ledger| ledger.record(request))
    }

    /// Re-apply a stored trade under its stored id.
    pub fn replay_trade(&self, trade: &Trade) -> Result<Trade, TrackerError> {
        self.commit_trade(|ledger| ledger.replay(trade))
    }

    fn commit_trade(
        &self,
        apply: impl FnOnce(&mut TradeLedger) -> Result<Trade, TrackerError>,
    ) -> Result<Trade, TrackerError> {
        let mut account = self.account.lock();
        let trade = match apply(&mut account.ledger) {
            Ok(trade) => trade,
            Err(e) => {
                tracing::warn!(error = %e, "trade rejected");
                return Err(e);
            }
        };
        account.sync_positions();
        account.revalue(&HashMap::new(), trade.timestamp);
        let sequence = self.publish(&account, None);
        tracing::info!(
            id = %trade.id,
            symbol = %trade.symbol,
            side = %trade.side,
            quantity = trade.quantity,
            price = trade.price,
            sequence,
            "trade recorded"
        );
        Ok(trade)
    }

    /// Id the next submitted trade will be recorded under.
    pub fn next_trade_id(&self) -> TradeId {
        self.account.lock().ledger.next_id()
    }

    /// Revalue against externally supplied marks.
    pub fn mark_prices(&self, prices: &HashMap<String, f64>, at: DateTime<Utc>) -> PortfolioState {
        let mut account = self.account.lock();
        let state = account.revalue(prices, at);
        self.publish(&account, None);
        state
    }

    /// Latest value of one tracked series, or how far it is from warm.
    pub fn latest(
        &self,
        symbol: &str,
        kind: IndicatorKind,
        period: usize,
    ) -> Result<IndicatorReading, TrackerError> {
        let required = self
            .engine
            .warmup(kind, period)
            .ok_or(TrackerError::UnknownIndicator { kind, period })?;
        let key = IndicatorKey::new(kind, period);
        let published = self.published.read();
        let reading = match published.snapshot.symbols.get(symbol) {
            Some(view) => match view.value(key) {
                Some(v) => IndicatorReading::Value(v.clone()),
                None => IndicatorReading::InsufficientHistory {
                    bars: view.bars_applied,
                    required,
                },
            },
            None => IndicatorReading::InsufficientHistory { bars: 0, required },
        };
        Ok(reading)
    }

    pub fn symbol_snapshot(&self, symbol: &str) -> Result<SymbolSnapshot, TrackerError> {
        let config = self.engine.config();
        let published = self.published.read();
        let view = published
            .snapshot
            .symbols
            .get(symbol)
            .ok_or_else(|| TrackerError::NoData {
                symbol: symbol.to_string(),
            })?;

        let readings = config
            .keys()
            .into_iter()
            .filter_map(|key| {
                let required = config.warmup(key.kind, key.period)?;
                let reading = match view.value(key) {
                    Some(v) => IndicatorReading::Value(v.clone()),
                    None => IndicatorReading::InsufficientHistory {
                        bars: view.bars_applied,
                        required,
                    },
                };
                Some(KeyedReading {
                    kind: key.kind,
                    period: key.period,
                    reading,
                })
            })
            .collect();

        Ok(SymbolSnapshot {
            sequence: published.snapshot.sequence,
            symbol: symbol.to_string(),
            last_timestamp: view.last_timestamp,
            last_close: view.last_close,
            bars_applied: view.bars_applied,
            readings,
            position: published.positions.get(symbol).cloned(),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        self.published.read().snapshot.clone()
    }

    pub fn portfolio(&self) -> PortfolioState {
        self.published.read().snapshot.portfolio
    }

    pub fn positions(&self) -> Vec<OpenPosition> {
        self.published.read().positions.values().cloned().collect()
    }

    pub fn last_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.published
            .read()
            .snapshot
            .symbols
            .get(symbol)
            .and_then(|v| v.last_timestamp)
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.account.lock().ledger.trades().to_vec()
    }

    pub fn closed_trades(&self) -> Vec<ClosedTrade> {
        self.account.lock().ledger.closed_trades().to_vec()
    }

    pub fn metrics(&self) -> Metrics {
        let account = self.account.lock();
        Metrics::compute(
            account.ledger.closed_trades(),
            account.portfolio.equity_curve(),
            account.portfolio.initial_capital(),
        )
    }

    /// Restart drawdown tracking from the current equity.
    pub fn reset_portfolio(&self) -> PortfolioState {
        let mut account = self.account.lock();
        account.portfolio.reset();
        self.publish(&account, None);
        account.portfolio.state()
    }
}
