//! SQLite store adapter.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`), so
//! lexical order in SQL is chronological order. Price and trade rows share
//! one `seq` counter recording the order they were first written.

use crate::domain::bar::Bar;
use crate::domain::config::{TrackerConfig, require_database_path};
use crate::domain::error::TrackerError;
use crate::domain::indicator::{IndicatorKind, IndicatorValue};
use crate::domain::ledger::{Side, Trade, TradeId};
use crate::ports::store_port::{
    BarQuery, IndicatorQuery, PurgeCounts, Recorded, StorePort, UpsertOutcome,
};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use std::time::Duration;

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

/// Next value of the write-order counter shared by `prices` and `trades`.
const NEXT_SEQ: &str = "(SELECT COALESCE(MAX(seq), 0) + 1 FROM (
    SELECT MAX(seq) AS seq FROM prices UNION ALL SELECT MAX(seq) FROM trades))";

fn pool_err(e: r2d2::Error) -> TrackerError {
    TrackerError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> TrackerError {
    TrackerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn ts_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn bar_from_row(row: &Row<'_>) -> rusqlite::Result<Bar> {
    Ok(Bar {
        symbol: row.get(0)?,
        timestamp: ts_column(row, 1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
    })
}

fn indicator_from_row(row: &Row<'_>) -> rusqlite::Result<IndicatorValue> {
    let kind: String = row.get(2)?;
    let period: i64 = row.get(3)?;
    Ok(IndicatorValue {
        symbol: row.get(0)?,
        timestamp: ts_column(row, 1)?,
        kind: kind.parse::<IndicatorKind>().map_err(|e| conversion_err(2, e))?,
        period: period as usize,
        value: row.get(4)?,
    })
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
    let id: i64 = row.get(0)?;
    let side: String = row.get(2)?;
    Ok(Trade {
        id: TradeId(id as u64),
        symbol: row.get(1)?,
        side: side.parse::<Side>().map_err(|e| conversion_err(2, e))?,
        quantity: row.get(3)?,
        price: row.get(4)?,
        timestamp: ts_column(row, 5)?,
    })
}

impl SqliteAdapter {
    pub fn from_config(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let db_path = require_database_path(config)?;
        Self::open(db_path, config.pool_size)
    }

    pub fn open(db_path: &str, pool_size: u32) -> Result<Self, TrackerError> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|c| c.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, TrackerError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, TrackerError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), TrackerError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS prices (
                symbol TEXT NOT NULL,
                ts TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                PRIMARY KEY (symbol, ts)
            );
            CREATE INDEX IF NOT EXISTS idx_prices_ts ON prices(ts);
            CREATE INDEX IF NOT EXISTS idx_prices_seq ON prices(seq);
            CREATE TABLE IF NOT EXISTS indicators (
                symbol TEXT NOT NULL,
                ts TEXT NOT NULL,
                kind TEXT NOT NULL,
                period INTEGER NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (symbol, ts, kind, period)
            );
            CREATE INDEX IF NOT EXISTS idx_indicators_series ON indicators(symbol, kind, period, ts);
            CREATE INDEX IF NOT EXISTS idx_indicators_ts ON indicators(ts);
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                price REAL NOT NULL,
                ts TEXT NOT NULL,
                seq INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_seq ON trades(seq);",
        )
        .map_err(query_err)?;

        Ok(())
    }
}

impl StorePort for SqliteAdapter {
    fn upsert_bar(&self, bar: &Bar) -> Result<UpsertOutcome, TrackerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let ts = ts_text(bar.timestamp);

        let existing = tx
            .query_row(
                "SELECT symbol, ts, open, high, low, close, volume
                 FROM prices WHERE symbol = ?1 AND ts = ?2",
                params![bar.symbol, ts],
                bar_from_row,
            )
            .optional()
            .map_err(query_err)?;

        let outcome = match existing {
            Some(stored) if stored == *bar => UpsertOutcome::Unchanged,
            found => {
                tx.execute(
                    &format!(
                        "INSERT INTO prices (symbol, ts, open, high, low, close, volume, seq)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, {NEXT_SEQ})
                         ON CONFLICT (symbol, ts) DO UPDATE SET
                            open = excluded.open, high = excluded.high, low = excluded.low,
                            close = excluded.close, volume = excluded.volume"
                    ),
                    params![
                        bar.symbol, ts, bar.open, bar.high, bar.low, bar.close, bar.volume
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
        let tx = conn.transaction().map_err(query_err)?;
        let ts = ts_text(value.timestamp);
        let kind = value.kind.as_str();
        let period = value.period as i64;

        let existing: Option<f64> = tx
            .query_row(
                "SELECT value FROM indicators
                 WHERE symbol = ?1 AND ts = ?2 AND kind = ?3 AND period = ?4",
                params![value.symbol, ts, kind, period],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;

        let outcome = match existing {
            Some(stored) if stored == value.value => UpsertOutcome::Unchanged,
            found => {
                tx.execute(
                    "INSERT INTO indicators (symbol, ts, kind, period, value)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (symbol, ts, kind, period) DO UPDATE SET value = excluded.value",
                    params![value.symbol, ts, kind, period, value.value],
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
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, ts, open, high, low, close, volume
                 FROM prices WHERE symbol = ?1 ORDER BY ts ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![symbol], bar_from_row)
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn query_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, TrackerError> {
        let mut sql = String::from(
            "SELECT symbol, ts, open, high, low, close, volume FROM prices WHERE symbol = ?",
        );
        let mut args: Vec<Value> = vec![Value::Text(query.symbol.clone())];
        if let Some(start) = query.start {
            sql.push_str(" AND ts >= ?");
            args.push(Value::Text(ts_text(start)));
        }
        if let Some(end) = query.end {
            sql.push_str(" AND ts <= ?");
            args.push(Value::Text(ts_text(end)));
        }
        sql.push_str(" ORDER BY ts DESC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), bar_from_row)
            .map_err(query_err)?;
        let mut bars = rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?;
        bars.reverse();
        Ok(bars)
    }

    fn query_indicators(
        &self,
        query: &IndicatorQuery,
    ) -> Result<Vec<IndicatorValue>, TrackerError> {
        let mut sql = String::from(
            "SELECT symbol, ts, kind, period, value FROM indicators WHERE symbol = ?",
        );
        let mut args: Vec<Value> = vec![Value::Text(query.symbol.clone())];
        if let Some(kind) = query.kind {
            sql.push_str(" AND kind = ?");
            args.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(period) = query.period {
            sql.push_str(" AND period = ?");
            args.push(Value::Integer(period as i64));
        }
        if let Some(start) = query.start {
            sql.push_str(" AND ts >= ?");
            args.push(Value::Text(ts_text(start)));
        }
        if let Some(end) = query.end {
            sql.push_str(" AND ts <= ?");
            args.push(Value::Text(ts_text(end)));
        }
        sql.push_str(" ORDER BY ts DESC, kind DESC, period DESC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(params_from_iter(args), indicator_from_row)
            .map_err(query_err)?;
        let mut values = rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?;
        values.reverse();
        Ok(values)
    }

    fn latest_indicators(&self, symbol: &str) -> Result<Vec<IndicatorValue>, TrackerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT i.symbol, i.ts, i.kind, i.period, i.value
                 FROM indicators i
                 JOIN (SELECT kind, period, MAX(ts) AS ts FROM indicators
                       WHERE symbol = ?1 GROUP BY kind, period) m
                   ON i.kind = m.kind AND i.period = m.period AND i.ts = m.ts
                 WHERE i.symbol = ?1
                 ORDER BY i.kind, i.period",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![symbol], indicator_from_row)
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn insert_trade(&self, trade: &Trade) -> Result<(), TrackerError> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO trades (id, symbol, side, quantity, price, ts, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, {NEXT_SEQ})"
            ),
            params![
                trade.id.0 as i64,
                trade.symbol,
                trade.side.to_string(),
                trade.quantity,
                trade.price,
                ts_text(trade.timestamp)
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn load_trades(&self) -> Result<Vec<Trade>, TrackerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, symbol, side, quantity, price, ts FROM trades ORDER BY id ASC")
            .map_err(query_err)?;
        let rows = stmt.query_map([], trade_from_row).map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn load_journal(&self, symbols: &[String]) -> Result<Vec<Recorded>, TrackerError> {
        let conn = self.conn()?;
        let mut journal: Vec<(i64, Recorded)> = Vec::new();

        let mut stmt = conn
            .prepare(
                "SELECT symbol, ts, open, high, low, close, volume, seq
                 FROM prices WHERE symbol = ?1",
            )
            .map_err(query_err)?;
        for symbol in symbols {
            let rows = stmt
                .query_map(params![symbol], |row| {
                    Ok((row.get::<_, i64>(7)?, Recorded::Bar(bar_from_row(row)?)))
                })
                .map_err(query_err)?;
            for row in rows {
                journal.push(row.map_err(query_err)?);
            }
        }

        let mut stmt = conn
            .prepare("SELECT id, symbol, side, quantity, price, ts, seq FROM trades")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(6)?, Recorded::Trade(trade_from_row(row)?)))
            })
            .map_err(query_err)?;
        for row in rows {
            journal.push(row.map_err(query_err)?);
        }

        journal.sort_by_key(|(seq, _)| *seq);
        Ok(journal.into_iter().map(|(_, recorded)| recorded).collect())
    }

    fn list_symbols(&self) -> Result<Vec<String>, TrackerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM prices ORDER BY symbol")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts, TrackerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let cutoff = ts_text(cutoff);
        let bars = tx
            .execute("DELETE FROM prices WHERE ts < ?1", params![cutoff])
            .map_err(query_err)?;
        let indicators = tx
            .execute("DELETE FROM indicators WHERE ts < ?1", params![cutoff])
            .map_err(query_err)?;
        tx.commit().map_err(query_err)?;
        Ok(PurgeCounts { bars, indicators })
    }
}
