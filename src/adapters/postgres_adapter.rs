//! PostgreSQL store adapter.
//!
//! Price and trade rows draw `seq` from the shared `journal_seq` sequence on
//! insert, recording the order they were first written.

use crate::domain::bar::Bar;
use crate::domain::config::TrackerConfig;
use crate::domain::error::TrackerError;
use crate::domain::indicator::{IndicatorKind, IndicatorValue};
use crate::domain::ledger::{Side, Trade, TradeId};
use crate::ports::store_port::{
    BarQuery, IndicatorQuery, PurgeCounts, Recorded, StorePort, UpsertOutcome,
};
use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::{NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

type Manager = PostgresConnectionManager<NoTls>;

pub struct PostgresAdapter {
    pool: Pool<Manager>,
}

fn pool_err(e: r2d2::Error) -> TrackerError {
    TrackerError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: postgres::Error) -> TrackerError {
    TrackerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn bar_from_row(row: &Row) -> Bar {
    Bar {
        symbol: row.get(0),
        timestamp: row.get(1),
        open: row.get(2),
        high: row.get(3),
        low: row.get(4),
        close: row.get(5),
        volume: row.get(6),
    }
}

fn indicator_from_row(row: &Row) -> Result<IndicatorValue, TrackerError> {
    let kind: String = row.get(2);
    let period: i32 = row.get(3);
    Ok(IndicatorValue {
        symbol: row.get(0),
        timestamp: row.get(1),
        kind: kind
            .parse::<IndicatorKind>()
            .map_err(|e| TrackerError::DatabaseQuery {
                reason: e.to_string(),
            })?,
        period: period as usize,
        value: row.get(4),
    })
}

fn trade_from_row(row: &Row) -> Result<Trade, TrackerError> {
    let id: i64 = row.get(0);
    let side: String = row.get(2);
    Ok(Trade {
        id: TradeId(id as u64),
        symbol: row.get(1),
        side: side.parse::<Side>()?,
        quantity: row.get(3),
        price: row.get(4),
        timestamp: row.get::<_, DateTime<Utc>>(5),
    })
}

impl PostgresAdapter {
    pub fn from_config(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let connection_string =
            config
                .postgres_connection
                .as_deref()
                .ok_or_else(|| TrackerError::ConfigMissing {
                    section: "postgres".into(),
                    key: "connection_string".into(),
                })?;
        let pg_config = connection_string
            .parse::<postgres::Config>()
            .map_err(|e| TrackerError::ConfigInvalid {
                section: "postgres".into(),
                key: "connection_string".into(),
                reason: e.to_string(),
            })?;

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .build(manager)
            .map_err(pool_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<Manager>, TrackerError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), TrackerError> {
        self.conn()?
            .batch_execute(
                "CREATE SEQUENCE IF NOT EXISTS journal_seq;
                CREATE TABLE IF NOT EXISTS prices (
                    symbol TEXT NOT NULL,
                    ts TIMESTAMPTZ NOT NULL,
                    open DOUBLE PRECISION NOT NULL,
                    high DOUBLE PRECISION NOT NULL,
                    low DOUBLE PRECISION NOT NULL,
                    close DOUBLE PRECISION NOT NULL,
                    volume BIGINT NOT NULL,
                    seq BIGINT NOT NULL DEFAULT nextval('journal_seq'),
                    PRIMARY KEY (symbol, ts)
                );
                CREATE INDEX IF NOT EXISTS idx_prices_ts ON prices(ts);
                CREATE TABLE IF NOT EXISTS indicators (
                    symbol TEXT NOT NULL,
                    ts TIMESTAMPTZ NOT NULL,
                    kind TEXT NOT NULL,
                    period INTEGER NOT NULL,
                    value DOUBLE PRECISION NOT NULL,
                    PRIMARY KEY (symbol, ts, kind, period)
                );
                CREATE INDEX IF NOT EXISTS idx_indicators_ts ON indicators(ts);
                CREATE TABLE IF NOT EXISTS trades (
                    id BIGINT PRIMARY KEY,
                    symbol TEXT NOT NULL,
                    side TEXT NOT NULL,
                    quantity DOUBLE PRECISION NOT NULL,
                    price DOUBLE PRECISION NOT NULL,
                    ts TIMESTAMPTZ NOT NULL,
                    seq BIGINT NOT NULL DEFAULT nextval('journal_seq')
                );",
            )
            .map_err(query_err)
    }
}

impl StorePort for PostgresAdapter {
    fn upsert_bar(&self, bar: &Bar) -> Result<UpsertOutcome, TrackerError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;
        let existing = tx
            .query_opt(
                "SELECT symbol, ts, open, high, low, close, volume
                 FROM prices WHERE symbol = $1 AND ts = $2",
                &[&bar.symbol, &bar.timestamp],
            )
            .map_err(query_err)?
            .map(|row| bar_from_row(&row));

        let outcome = match existing {
            Some(stored) if stored == *bar => UpsertOutcome::Unchanged,
            found => {
                tx.execute(
                    "INSERT INTO prices (symbol, ts, open, high, low, close, volume)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (symbol, ts) DO UPDATE SET
                        open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low,
                        close = EXCLUDED.close, volume = EXCLUDED.volume",
                    &[
                        &bar.symbol,
                        &bar.timestamp,
                        &bar.open,
                        &bar.high,
                        &bar.low,
                        &bar.close,
                        &bar.volume,
                    ],
                )
                .map_err(query_err)?;
                if found.is_some() {
                    UpsertOutcome::Replaced
                } else {
                    UpsertOutcome::Inserted
                }
            }
        };
        tx.commit().map_err(query_err)?;
        Ok(outcome)
    }

    fn upsert_indicator(&self, value: &IndicatorValue) -> Result<UpsertOutcome, TrackerError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;
        let kind = value.kind.as_str();
        let period = value.period as i32;
        let existing: Option<f64> = tx
            .query_opt(
                "SELECT value FROM indicators
                 WHERE symbol = $1 AND ts = $2 AND kind = $3 AND period = $4",
                &[&value.symbol, &value.timestamp, &kind, &period],
            )
            .map_err(query_err)?
            .map(|row| row.get(0));

        let outcome = match existing {
            Some(stored) if stored == value.value => UpsertOutcome::Unchanged,
            found => {
                tx.execute(
                    "INSERT INTO indicators (symbol, ts, kind, period, value)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (symbol, ts, kind, period) DO UPDATE SET value = EXCLUDED.value",
                    &[&value.symbol, &value.timestamp, &kind, &period, &value.value],
                )
                .map_err(query_err)?;
                if found.is_some() {
                    UpsertOutcome::Replaced
                } else {
                    UpsertOutcome::Inserted
                }
            }
        };
        tx.commit().map_err(query_err)?;
        Ok(outcome)
    }

    fn load_bars(&self, symbol: &str) -> Result<Vec<Bar>, TrackerError> {
        let rows = self
            .conn()?
            .query(
                "SELECT symbol, ts, open, high, low, close, volume
                 FROM prices WHERE symbol = $1 ORDER BY ts ASC",
                &[&symbol],
            )
            .map_err(query_err)?;
        Ok(rows.iter().map(bar_from_row).collect())
    }

    fn query_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, TrackerError> {
        let limit = query.limit.map(|l| l as i64);

        let mut sql = String::from(
            "SELECT symbol, ts, open, high, low, close, volume FROM prices WHERE symbol = $1",
        );
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&query.symbol];
        if let Some(start) = &query.start {
            params.push(start);
            sql.push_str(&format!(" AND ts >= ${}", params.len()));
        }
        if let Some(end) = &query.end {
            params.push(end);
            sql.push_str(&format!(" AND ts <= ${}", params.len()));
        }
        sql.push_str(" ORDER BY ts DESC");
        if let Some(limit) = &limit {
            params.push(limit);
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        let rows = self.conn()?.query(&sql, &params).map_err(query_err)?;
        let mut bars: Vec<Bar> = rows.iter().map(bar_from_row).collect();
        bars.reverse();
        Ok(bars)
    }

    fn query_indicators(
        &self,
        query: &IndicatorQuery,
    ) -> Result<Vec<IndicatorValue>, TrackerError> {
        let kind = query.kind.map(|k| k.as_str().to_string());
        let period = query.period.map(|p| p as i32);
        let limit = query.limit.map(|l| l as i64);

        let mut sql = String::from(
            "SELECT symbol, ts, kind, period, value FROM indicators WHERE symbol = $1",
        );
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&query.symbol];
        if let Some(kind) = &kind {
            params.push(kind);
            sql.push_str(&format!(" AND kind = ${}", params.len()));
        }
        if let Some(period) = &period {
            params.push(period);
            sql.push_str(&format!(" AND period = ${}", params.len()));
        }
        if let Some(start) = &query.start {
            params.push(start);
            sql.push_str(&format!(" AND ts >= ${}", params.len()));
        }
        if let Some(end) = &query.end {
            params.push(end);
            sql.push_str(&format!(" AND ts <= ${}", params.len()));
        }
        sql.push_str(" ORDER BY ts DESC, kind DESC, period DESC");
        if let Some(limit) = &limit {
            params.push(limit);
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        let rows = self.conn()?.query(&sql, &params).map_err(query_err)?;
        let mut values = rows
            .iter()
            .map(indicator_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        values.reverse();
        Ok(values)
    }

    fn latest_indicators(&self, symbol: &str) -> Result<Vec<IndicatorValue>, TrackerError> {
        let rows = self
            .conn()?
            .query(
                "SELECT DISTINCT ON (kind, period) symbol, ts, kind, period, value
                 FROM indicators WHERE symbol = $1
                 ORDER BY kind, period, ts DESC",
                &[&symbol],
            )
            .map_err(query_err)?;
        rows.iter().map(indicator_from_row).collect()
    }

    fn insert_trade(&self, trade: &Trade) -> Result<(), TrackerError> {
        self.conn()?
            .execute(
                "INSERT INTO trades (id, symbol, side, quantity, price, ts)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &(trade.id.0 as i64),
                    &trade.symbol,
                    &trade.side.to_string(),
                    &trade.quantity,
                    &trade.price,
                    &trade.timestamp,
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn load_trades(&self) -> Result<Vec<Trade>, TrackerError> {
        let rows = self
            .conn()?
            .query(
                "SELECT id, symbol, side, quantity, price, ts FROM trades ORDER BY id ASC",
                &[],
            )
            .map_err(query_err)?;
        rows.iter().map(trade_from_row).collect()
    }

    fn load_journal(&self, symbols: &[String]) -> Result<Vec<Recorded>, TrackerError> {
        let mut conn = self.conn()?;
        let mut journal: Vec<(i64, Recorded)> = Vec::new();

        let symbols = symbols.to_vec();
        let rows = conn
            .query(
                "SELECT symbol, ts, open, high, low, close, volume, seq
                 FROM prices WHERE symbol = ANY($1)",
                &[&symbols],
            )
            .map_err(query_err)?;
        journal.extend(
            rows.iter()
                .map(|row| (row.get::<_, i64>(7), Recorded::Bar(bar_from_row(row)))),
        );

        let rows = conn
            .query(
                "SELECT id, symbol, side, quantity, price, ts, seq FROM trades",
                &[],
            )
            .map_err(query_err)?;
        for row in &rows {
            journal.push((row.get::<_, i64>(6), Recorded::Trade(trade_from_row(row)?)));
        }

        journal.sort_by_key(|(seq, _)| *seq);
        Ok(journal.into_iter().map(|(_, recorded)| recorded).collect())
    }

    fn list_symbols(&self) -> Result<Vec<String>, TrackerError> {
        let rows = self
            .conn()?
            .query("SELECT DISTINCT symbol FROM prices ORDER BY symbol", &[])
            .map_err(query_err)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts, TrackerError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;
        let bars = tx
            .execute("DELETE FROM prices WHERE ts < $1", &[&cutoff])
            .map_err(query_err)?;
        let indicators = tx
            .execute("DELETE FROM indicators WHERE ts < $1", &[&cutoff])
            .map_err(query_err)?;
        tx.commit().map_err(query_err)?;
        Ok(PurgeCounts {
            bars: bars as usize,
            indicators: indicators as usize,
        })
    }
}
