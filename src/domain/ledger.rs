//! Trade ledger: open positions at average cost and realized PnL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::TrackerError;

/// Quantities closer to zero than this are treated as flat.
pub const QUANTITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

impl FromStr for Side {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(TrackerError::InvalidTrade {
                reason: format!("side must be buy or sell, got '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A trade as submitted, before the ledger accepts it.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    pub fn request(&self) -> TradeRequest {
        TradeRequest {
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.quantity,
            price: self.price,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenPosition {
    pub symbol: String,
    /// Positive for long, negative for short.
    pub quantity: f64,
    pub avg_cost: f64,
    pub opened_at: DateTime<Utc>,
}

impl OpenPosition {
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn side(&self) -> Side {
        if self.is_short() { Side::Sell } else { Side::Buy }
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity.abs() * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.avg_cost)
    }
}

/// Realized result of closing all or part of a position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub symbol: String,
    /// Side of the position that was closed.
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub exit_timestamp: DateTime<Utc>,
    pub pnl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TradeLedger {
    trades: Vec<Trade>,
    positions: HashMap<String, OpenPosition>,
    closed: Vec<ClosedTrade>,
    realized_pnl: f64,
    /// Highest id issued or replayed so far.
    last_id: u64,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(request: &TradeRequest) -> Result<(), TrackerError> {
        let reason = if request.symbol.trim().is_empty() {
            Some("symbol must not be empty".to_string())
        } else if !request.quantity.is_finite() || request.quantity <= 0.0 {
            Some(format!("quantity must be positive, got {}", request.quantity))
        } else if !request.price.is_finite() || request.price <= 0.0 {
            Some(format!("price must be positive, got {}", request.price))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(TrackerError::InvalidTrade { reason }),
            None => Ok(()),
        }
    }

    /// Record a trade under the next free id. Rejected trades leave the
    /// ledger untouched and consume no id.
    pub fn record(&mut self, request: TradeRequest) -> Result<Trade, TrackerError> {
        let id = TradeId(self.last_id + 1);
        let trade = self.apply(request, id)?;
        self.last_id = id.0;
        Ok(trade)
    }

    /// Re-apply a previously stored trade under its stored id.
    ///
    /// The id is reserved even when the trade is rejected, so later
    /// trades never collide with a row that is already persisted.
    pub fn replay(&mut self, trade: &Trade) -> Result<Trade, TrackerError> {
        self.last_id = self.last_id.max(trade.id.0);
        self.apply(trade.request(), trade.id)
    }

    /// Id the next recorded trade will get.
    pub fn next_id(&self) -> TradeId {
        TradeId(self.last_id + 1)
    }

    fn apply(&mut self, request: TradeRequest, id: TradeId) -> Result<Trade, TrackerError> {
        Self::validate(&request)?;

        let signed = request.side.sign() * request.quantity;
        match self.positions.get_mut(&request.symbol) {
            None => {
                self.positions.insert(
                    request.symbol.clone(),
                    OpenPosition {
                        symbol: request.symbol.clone(),
                        quantity: signed,
                        avg_cost: request.price,
                        opened_at: request.timestamp,
                    },
                );
            }
            Some(pos) if pos.side() == request.side => {
                let total = pos.quantity.abs() + request.quantity;
                pos.avg_cost =
                    (pos.avg_cost * pos.quantity.abs() + request.price * request.quantity) / total;
                pos.quantity += signed;
            }
            Some(pos) => {
                let open = pos.quantity.abs();
                if request.quantity > open + QUANTITY_EPSILON {
                    return Err(TrackerError::OverClose {
                        symbol: request.symbol.clone(),
                        requested: request.quantity,
                        open,
                    });
                }
                let direction = pos.side().sign();
                let pnl = (request.price - pos.avg_cost) * request.quantity * direction;
                self.closed.push(ClosedTrade {
                    symbol: request.symbol.clone(),
                    side: pos.side(),
                    quantity: request.quantity,
                    entry_price: pos.avg_cost,
                    exit_price: request.price,
                    entry_timestamp: pos.opened_at,
                    exit_timestamp: request.timestamp,
                    pnl,
                });
                self.realized_pnl += pnl;
                pos.quantity += signed;
                if pos.quantity.abs() <= QUANTITY_EPSILON {
                    self.positions.remove(&request.symbol);
                }
            }
        }

        let trade = Trade {
            id,
            symbol: request.symbol,
            side: request.side,
            quantity: request.quantity,
            price: request.price,
            timestamp: request.timestamp,
        };
        self.trades.push(trade.clone());
        Ok(trade)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn position(&self, symbol: &str) -> Option<&OpenPosition> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.values()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn realized_pnl_for(&self, symbol: &str) -> f64 {
        self.closed
            .iter()
            .filter(|c| c.symbol == symbol)
            .map(|c| c.pnl)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn req(symbol: &str, side: Side, quantity: f64, price: f64, minute: i64) -> TradeRequest {
        TradeRequest {
            symbol: symbol.into(),
            side,
            quantity,
            price,
            timestamp: at(minute),
        }
    }

    #[test]
    fn side_parses_and_displays() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!(" sell".parse::<Side>().unwrap(), Side::Sell);
        assert!(matches!(
            "hold".parse::<Side>(),
            Err(TrackerError::InvalidTrade { .. })
        ));
        assert_eq!(Side::Sell.to_string(), "sell");
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn round_trip_realizes_pnl() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("AAPL", Side::Buy, 10.0, 100.0, 0)).unwrap();
        ledger.record(req("AAPL", Side::Sell, 10.0, 110.0, 1)).unwrap();

        assert!((ledger.realized_pnl() - 100.0).abs() < f64::EPSILON);
        assert!(ledger.position("AAPL").is_none());
        assert_eq!(ledger.closed_trades().len(), 1);
        assert_eq!(ledger.trades().len(), 2);
    }

    #[test]
    fn trade_ids_increase() {
        let mut ledger = TradeLedger::new();
        let a = ledger.record(req("AAPL", Side::Buy, 1.0, 100.0, 0)).unwrap();
        let b = ledger.record(req("MSFT", Side::Buy, 1.0, 300.0, 1)).unwrap();
        assert_eq!(a.id, TradeId(1));
        assert_eq!(b.id, TradeId(2));
        assert_eq!(b.symbol, "MSFT");
    }

    #[test]
    fn rejected_trade_consumes_no_id() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("AAPL", Side::Buy, 1.0, 100.0, 0)).unwrap();
        assert!(ledger.record(req("AAPL", Side::Sell, 5.0, 100.0, 1)).is_err());
        let next = ledger.record(req("AAPL", Side::Buy, 1.0, 100.0, 2)).unwrap();
        assert_eq!(next.id, TradeId(2));
    }

    #[test]
    fn replay_keeps_stored_ids_and_continues_after_the_highest() {
        let stored = |id: u64, side: Side, quantity: f64, minute: i64| Trade {
            id: TradeId(id),
            ..TradeLedger::new()
                .record(req("AAPL", side, quantity, 100.0, minute))
                .unwrap()
        };

        let mut ledger = TradeLedger::new();
        ledger.replay(&stored(3, Side::Buy, 10.0, 0)).unwrap();
        ledger.replay(&stored(7, Side::Buy, 5.0, 1)).unwrap();
        // a stored row the ledger can no longer accept still reserves its id
        assert!(ledger.replay(&stored(9, Side::Sell, 50.0, 2)).is_err());

        let ids: Vec<_> = ledger.trades().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![TradeId(3), TradeId(7)]);
        assert_eq!(ledger.next_id(), TradeId(10));
        let next = ledger.record(req("AAPL", Side::Sell, 1.0, 100.0, 3)).unwrap();
        assert_eq!(next.id, TradeId(10));
    }

    #[test]
    fn adding_to_position_averages_cost() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("AAPL", Side::Buy, 10.0, 100.0, 0)).unwrap();
        ledger.record(req("AAPL", Side::Buy, 30.0, 120.0, 1)).unwrap();

        let pos = ledger.position("AAPL").unwrap();
        assert!((pos.quantity - 40.0).abs() < f64::EPSILON);
        assert!((pos.avg_cost - 115.0).abs() < 1e-12);
        assert_eq!(pos.opened_at, at(0));
    }

    #[test]
    fn partial_close_keeps_average_cost() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("AAPL", Side::Buy, 10.0, 100.0, 0)).unwrap();
        ledger.record(req("AAPL", Side::Sell, 4.0, 105.0, 1)).unwrap();

        let pos = ledger.position("AAPL").unwrap();
        assert!((pos.quantity - 6.0).abs() < f64::EPSILON);
        assert!((pos.avg_cost - 100.0).abs() < f64::EPSILON);
        assert!((ledger.realized_pnl() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn over_close_rejected_and_position_unchanged() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("AAPL", Side::Buy, 10.0, 100.0, 0)).unwrap();
        let before = ledger.position("AAPL").cloned();

        match ledger.record(req("AAPL", Side::Sell, 15.0, 110.0, 1)) {
            Err(TrackerError::OverClose {
                requested, open, ..
            }) => {
                assert_eq!(requested, 15.0);
                assert_eq!(open, 10.0);
            }
            other => panic!("expected OverClose, got {other:?}"),
        }
        assert_eq!(ledger.position("AAPL").cloned(), before);
        assert_eq!(ledger.trades().len(), 1);
        assert_eq!(ledger.realized_pnl(), 0.0);
    }

    #[test]
    fn sell_without_position_opens_short() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("TSLA", Side::Sell, 5.0, 200.0, 0)).unwrap();
        let pos = ledger.position("TSLA").unwrap();
        assert!(pos.is_short());
        assert!((pos.unrealized_pnl(190.0) - 50.0).abs() < f64::EPSILON);
        assert!((pos.market_value(190.0) - 950.0).abs() < f64::EPSILON);
    }

    #[test]
    fn covering_short_realizes_inverse_pnl() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("TSLA", Side::Sell, 5.0, 200.0, 0)).unwrap();
        ledger.record(req("TSLA", Side::Buy, 5.0, 210.0, 1)).unwrap();
        assert!((ledger.realized_pnl() - (-50.0)).abs() < f64::EPSILON);
        let closed = &ledger.closed_trades()[0];
        assert_eq!(closed.side, Side::Sell);
        assert_eq!(closed.entry_timestamp, at(0));
        assert_eq!(closed.exit_timestamp, at(1));
    }

    #[test]
    fn invalid_trades_rejected() {
        let mut ledger = TradeLedger::new();
        for bad in [
            req("AAPL", Side::Buy, 0.0, 100.0, 0),
            req("AAPL", Side::Buy, -1.0, 100.0, 0),
            req("AAPL", Side::Buy, 1.0, 0.0, 0),
            req("AAPL", Side::Buy, 1.0, f64::NAN, 0),
            req("", Side::Buy, 1.0, 100.0, 0),
        ] {
            assert!(matches!(
                ledger.record(bad),
                Err(TrackerError::InvalidTrade { .. })
            ));
        }
        assert!(ledger.trades().is_empty());
        assert_eq!(ledger.position_count(), 0);
    }

    #[test]
    fn fractional_closes_flatten_cleanly() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("BTC", Side::Buy, 0.3, 100.0, 0)).unwrap();
        ledger.record(req("BTC", Side::Sell, 0.1, 100.0, 1)).unwrap();
        ledger.record(req("BTC", Side::Sell, 0.2, 100.0, 2)).unwrap();
        assert!(ledger.position("BTC").is_none());
    }

    #[test]
    fn realized_pnl_per_symbol() {
        let mut ledger = TradeLedger::new();
        ledger.record(req("AAPL", Side::Buy, 1.0, 100.0, 0)).unwrap();
        ledger.record(req("AAPL", Side::Sell, 1.0, 90.0, 1)).unwrap();
        ledger.record(req("MSFT", Side::Buy, 2.0, 300.0, 2)).unwrap();
        ledger.record(req("MSFT", Side::Sell, 2.0, 310.0, 3)).unwrap();
        assert!((ledger.realized_pnl_for("AAPL") - (-10.0)).abs() < f64::EPSILON);
        assert!((ledger.realized_pnl_for("MSFT") - 20.0).abs() < f64::EPSILON);
        assert!((ledger.realized_pnl() - 10.0).abs() < f64::EPSILON);
    }
}
