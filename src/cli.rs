//! CLI definition and dispatch.
//!
//! Every command loads and validates the config, opens the store and
//! restores tracker state from it before doing its own work.

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::bar::Bar;
use crate::domain::config::{TrackerConfig, require_source_dir};
use crate::domain::error::TrackerError;
use crate::domain::indicator::{IndicatorKind, IndicatorReading};
use crate::domain::ingest::{self, IngestReport, SymbolOutcome};
use crate::domain::ledger::{Side, TradeRequest};
use crate::domain::tracker::{MarketTracker, Snapshot, SymbolSnapshot};
use crate::ports::store_port::{BarQuery, IndicatorQuery, StorePort};

#[derive(Parser, Debug)]
#[command(
    name = "market-tracker",
    about = "Incremental indicators, trade ledger and portfolio tracking"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one ingestion cycle from the CSV source directory
    Ingest {
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated symbols overriding [ingest] symbols
        #[arg(long)]
        symbols: Option<String>,
    },
    /// Record a trade
    Trade {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
        /// buy or sell
        #[arg(long)]
        side: String,
        #[arg(long)]
        quantity: f64,
        #[arg(long)]
        price: f64,
        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print the current snapshot
    Snapshot {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Query stored indicator values
    Indicators {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        kind: Option<IndicatorKind>,
        #[arg(long)]
        period: Option<usize>,
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Query stored price bars, or the latest bar of each symbol
    Quotes {
        #[arg(short, long)]
        config: PathBuf,
        /// Bars of one symbol; without it, the latest bar of every stored symbol
        #[arg(long)]
        symbol: Option<String>,
        /// Comma-separated filter for the latest-bar listing
        #[arg(long, conflicts_with = "symbol")]
        symbols: Option<String>,
        #[arg(long, conflicts_with = "hours")]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        /// Only bars from the last N hours
        #[arg(long)]
        hours: Option<u32>,
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..=1000))]
        limit: u64,
        #[arg(long)]
        json: bool,
    },
    /// List recorded trades and performance statistics
    Trades {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Delete bars and indicator values past the retention window
    Cleanup {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Ingest { config, symbols } => run_ingest(&config, symbols.as_deref()),
        Command::Trade {
            config,
            symbol,
            side,
            quantity,
            price,
            at,
        } => run_trade(&config, &symbol, &side, quantity, price, at),
        Command::Snapshot {
            config,
            symbol,
            json,
        } => run_snapshot(&config, symbol.as_deref(), json),
        Command::Indicators {
            config,
            symbol,
            kind,
            period,
            start,
            end,
            limit,
            json,
        } => run_indicators(
            &config,
            IndicatorQuery {
                symbol: symbol.trim().to_uppercase(),
                kind,
                period,
                start,
                end,
                limit,
            },
            json,
        ),
        Command::Quotes {
            config,
            symbol,
            symbols,
            start,
            end,
            hours,
            limit,
            json,
        } => match symbol {
            Some(symbol) => run_quotes(
                &config,
                BarQuery {
                    symbol: symbol.trim().to_uppercase(),
                    start: hours
                        .map(|h| Utc::now() - Duration::hours(i64::from(h)))
                        .or(start),
                    end,
                    limit: Some(limit as usize),
                },
                json,
            ),
            None => run_latest_quotes(&config, symbols.as_deref(), json),
        },
        Command::Trades { config, json } => run_trades(&config, json),
        Command::Cleanup { config, days } => run_cleanup(&config, days),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(err: TrackerError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path)
        .map(FileConfigAdapter::with_env)
        .map_err(|e| {
            fail(TrackerError::ConfigParse {
                file: path.display().to_string(),
                reason: e.to_string(),
            })
        })
}

pub fn load_tracker_config(path: &PathBuf) -> Result<TrackerConfig, ExitCode> {
    let adapter = load_config(path)?;
    TrackerConfig::from_port(&adapter).map_err(fail)
}

#[cfg(feature = "sqlite")]
fn open_default_store(config: &TrackerConfig) -> Result<Box<dyn StorePort>, TrackerError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;

    let store = SqliteAdapter::from_config(config)?;
    store.initialize_schema()?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "sqlite"))]
fn open_default_store(_config: &TrackerConfig) -> Result<Box<dyn StorePort>, TrackerError> {
    Err(TrackerError::ConfigMissing {
        section: "postgres".into(),
        key: "connection_string".into(),
    })
}

/// Postgres when a connection string is configured and compiled in,
/// otherwise the SQLite file.
pub fn open_store(config: &TrackerConfig) -> Result<Box<dyn StorePort>, TrackerError> {
    #[cfg(feature = "postgres")]
    {
        use crate::adapters::postgres_adapter::PostgresAdapter;

        if config.postgres_connection.is_some() {
            let store = PostgresAdapter::from_config(config)?;
            store.initialize_schema()?;
            return Ok(Box::new(store));
        }
    }
    open_default_store(config)
}

/// Build a tracker and replay everything the store holds into it.
pub fn restore_tracker(
    config: &TrackerConfig,
    store: &dyn StorePort,
) -> Result<MarketTracker, TrackerError> {
    let tracker = MarketTracker::new(config.indicators.clone(), config.initial_capital);
    let symbols: BTreeSet<String> = store
        .list_symbols()?
        .into_iter()
        .chain(config.symbols.iter().cloned())
        .collect();
    let symbols: Vec<String> = symbols.into_iter().collect();
    ingest::restore(&tracker, store, &symbols)?;
    Ok(tracker)
}

struct Session {
    config: TrackerConfig,
    store: Box<dyn StorePort>,
    tracker: MarketTracker,
}

fn open_session(config_path: &PathBuf) -> Result<Session, ExitCode> {
    let config = load_tracker_config(config_path)?;
    let store = open_store(&config).map_err(fail)?;
    let tracker = restore_tracker(&config, store.as_ref()).map_err(fail)?;
    Ok(Session {
        config,
        store,
        tracker,
    })
}

fn run_ingest(config_path: &PathBuf, symbols_override: Option<&str>) -> ExitCode {
    let session = match open_session(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let source_dir = match require_source_dir(&session.config) {
        Ok(dir) => dir.clone(),
        Err(e) => return fail(e),
    };
    let symbols: Vec<String> = match symbols_override {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => session.config.symbols.clone(),
    };

    eprintln!(
        "Ingesting {} symbols from {}",
        symbols.len(),
        source_dir.display()
    );
    let source = CsvAdapter::new(source_dir);
    let cancel = AtomicBool::new(false);
    let report = ingest::run_cycle(
        &session.tracker,
        &source,
        session.store.as_ref(),
        &symbols,
        &cancel,
    );
    print_ingest_report(&report);

    if report.failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_ingest_report(report: &IngestReport) {
    println!("Ingestion complete:");
    println!("  Total symbols: {}", report.total_symbols);
    println!("  Successful: {}", report.successful);
    println!("  Failed: {}", report.failed);
    println!("  Bars upserted: {}", report.bars_upserted);
    println!("  Indicators upserted: {}", report.indicators_upserted);
    if report.stale + report.malformed > 0 {
        println!(
            "  Skipped: {} stale, {} malformed",
            report.stale, report.malformed
        );
    }
    for (symbol, outcome) in &report.symbols {
        if let SymbolOutcome::Failed { error } = outcome {
            println!("  {symbol}: {error}");
        }
    }
}

fn run_trade(
    config_path: &PathBuf,
    symbol: &str,
    side: &str,
    quantity: f64,
    price: f64,
    at: Option<DateTime<Utc>>,
) -> ExitCode {
    let side: Side = match side.parse() {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let session = match open_session(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let request = TradeRequest {
        symbol: symbol.trim().to_uppercase(),
        side,
        quantity,
        price,
        timestamp: at.unwrap_or_else(Utc::now),
    };
    let trade = match session.tracker.submit_trade(request) {
        Ok(t) => t,
        Err(e) => return fail(e),
    };
    if let Err(e) = session.store.insert_trade(&trade) {
        return fail(e);
    }

    println!(
        "Trade {}: {} {} {} @ {:.4}",
        trade.id, trade.side, trade.quantity, trade.symbol, trade.price
    );
    let portfolio = session.tracker.portfolio();
    println!(
        "Realized PnL: {:.2}  Unrealized PnL: {:.2}  Equity: {:.2}",
        portfolio.realized_pnl, portfolio.unrealized_pnl, portfolio.equity
    );
    ExitCode::SUCCESS
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{s}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(TrackerError::Io(std::io::Error::other(e))),
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("Snapshot #{}", snapshot.sequence);
    for (symbol, view) in &snapshot.symbols {
        let close = view
            .last_close
            .map_or_else(|| "-".to_string(), |c| format!("{c:.4}"));
        let values: Vec<String> = view
            .indicators
            .iter()
            .map(|v| format!("{}={:.4}", v.key(), v.value))
            .collect();
        println!(
            "  {symbol:<8} bars={:<6} close={close:<12} {}",
            view.bars_applied,
            values.join(" ")
        );
    }
    let p = &snapshot.portfolio;
    println!(
        "Portfolio: equity={:.2} realized={:.2} unrealized={:.2} drawdown={:.2}% max_drawdown={:.2}%",
        p.equity,
        p.realized_pnl,
        p.unrealized_pnl,
        p.drawdown * 100.0,
        p.max_drawdown * 100.0
    );
    println!(
        "Open positions: {}  Trades: {}",
        snapshot.open_positions, snapshot.trade_count
    );
}

fn print_symbol_snapshot(snap: &SymbolSnapshot) {
    println!("{} (snapshot #{})", snap.symbol, snap.sequence);
    println!("  bars applied: {}", snap.bars_applied);
    for r in &snap.readings {
        match &r.reading {
            IndicatorReading::Value(v) => {
                println!("  {}({}) = {:.4} at {}", r.kind, r.period, v.value, v.timestamp)
            }
            IndicatorReading::InsufficientHistory { bars, required } => {
                println!("  {}({}) insufficient history ({bars}/{required})", r.kind, r.period)
            }
        }
    }
    if let Some(pos) = &snap.position {
        println!(
            "  position: {} @ {:.4} since {}",
            pos.quantity, pos.avg_cost, pos.opened_at
        );
    }
}

fn run_snapshot(config_path: &PathBuf, symbol: Option<&str>, json: bool) -> ExitCode {
    let session = match open_session(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    match symbol {
        Some(symbol) => {
            let snap = match session.tracker.symbol_snapshot(&symbol.trim().to_uppercase()) {
                Ok(s) => s,
                Err(e) => return fail(e),
            };
            if json {
                return print_json(&snap);
            }
            print_symbol_snapshot(&snap);
        }
        None => {
            let snapshot = session.tracker.snapshot();
            if json {
                return print_json(&snapshot);
            }
            print_snapshot(&snapshot);
        }
    }
    ExitCode::SUCCESS
}

fn run_indicators(config_path: &PathBuf, query: IndicatorQuery, json: bool) -> ExitCode {
    let config = match load_tracker_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    if let (Some(kind), Some(period)) = (query.kind, query.period) {
        if config.indicators.warmup(kind, period).is_none() {
            return fail(TrackerError::UnknownIndicator { kind, period });
        }
    }

    let values = match store.query_indicators(&query) {
        Ok(v) => v,
        Err(e) => return fail(e),
    };
    if values.is_empty() {
        return fail(TrackerError::NoData {
            symbol: query.symbol,
        });
    }
    if json {
        return print_json(&values);
    }
    for v in &values {
        println!("{}\t{}\t{}\t{:.6}", v.timestamp, v.kind, v.period, v.value);
    }
    eprintln!("{} values", values.len());
    ExitCode::SUCCESS
}

fn print_bars(bars: &[Bar]) {
    for b in bars {
        println!(
            "{}\t{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{}",
            b.symbol, b.timestamp, b.open, b.high, b.low, b.close, b.volume
        );
    }
    eprintln!("{} bars", bars.len());
}

fn run_quotes(config_path: &PathBuf, query: BarQuery, json: bool) -> ExitCode {
    let config = match load_tracker_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    let bars = match store.query_bars(&query) {
        Ok(b) => b,
        Err(e) => return fail(e),
    };
    if bars.is_empty() {
        return fail(TrackerError::NoData {
            symbol: query.symbol,
        });
    }
    if json {
        return print_json(&bars);
    }
    print_bars(&bars);
    ExitCode::SUCCESS
}

fn run_latest_quotes(config_path: &PathBuf, filter: Option<&str>, json: bool) -> ExitCode {
    let config = match load_tracker_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let wanted: Option<BTreeSet<String>> = filter.map(|list| {
        list.split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    });

    let symbols = match store.list_symbols() {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let mut bars = Vec::new();
    for symbol in symbols {
        if wanted.as_ref().is_some_and(|w| !w.contains(&symbol)) {
            continue;
        }
        let query = BarQuery {
            limit: Some(1),
            ..BarQuery::for_symbol(symbol)
        };
        match store.query_bars(&query) {
            Ok(found) => bars.extend(found),
            Err(e) => return fail(e),
        }
    }
    if bars.is_empty() {
        return fail(TrackerError::NoData {
            symbol: filter.unwrap_or("any symbol").to_string(),
        });
    }
    if json {
        return print_json(&bars);
    }
    print_bars(&bars);
    ExitCode::SUCCESS
}

fn run_trades(config_path: &PathBuf, json: bool) -> ExitCode {
    let session = match open_session(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let trades = session.tracker.trades();
    let metrics = session.tracker.metrics();

    if json {
        return print_json(&serde_json::json!({
            "trades": trades,
            "positions": session.tracker.positions(),
            "metrics": metrics,
        }));
    }

    for t in &trades {
        println!(
            "{:>6}  {}  {:<4} {:<8} {:>12} @ {:.4}",
            t.id, t.timestamp, t.side, t.symbol, t.quantity, t.price
        );
    }
    println!("Trades: {}", trades.len());
    println!(
        "Won/Lost/Breakeven: {}/{}/{}  Win rate: {:.1}%  Profit factor: {:.2}",
        metrics.trades_won,
        metrics.trades_lost,
        metrics.trades_breakeven,
        metrics.win_rate * 100.0,
        metrics.profit_factor
    );
    println!(
        "Total return: {:.2}%  Max drawdown: {:.2}%",
        metrics.total_return * 100.0,
        metrics.max_drawdown * 100.0
    );
    ExitCode::SUCCESS
}

fn run_cleanup(config_path: &PathBuf, days: Option<u32>) -> ExitCode {
    let config = match load_tracker_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let days = days.unwrap_or(config.retention_days);
    if days == 0 {
        return fail(TrackerError::ConfigInvalid {
            section: "retention".into(),
            key: "days".into(),
            reason: "days must be at least 1".into(),
        });
    }
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    match ingest::purge_expired(store.as_ref(), Utc::now(), days) {
        Ok(counts) => {
            println!(
                "Deleted {} bars and {} indicator values older than {} days",
                counts.bars, counts.indicators, days
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let config = match load_tracker_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    println!("Config is valid.");
    println!("  Symbols: {}", config.symbols.join(", "));
    println!(
        "  Indicators: {}",
        config
            .indicators
            .keys()
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Initial capital: {:.2}", config.initial_capital);
    println!("  Retention: {} days", config.retention_days);
    ExitCode::SUCCESS
}
