//! Ingestion cycle, warm restart and retention.
//!
//! A cycle pulls new bars per symbol from a [`DataPort`], persists them,
//! feeds them to the [`MarketTracker`] and persists the indicator values they
//! produce. Failures are isolated per symbol; stale and malformed bars are
//! counted and skipped.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::error::TrackerError;
use crate::domain::tracker::MarketTracker;
use crate::ports::data_port::DataPort;
use crate::ports::store_port::{PurgeCounts, Recorded, StorePort, UpsertOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolOutcome {
    Processed {
        bars: usize,
        indicators: usize,
        stale: usize,
        malformed: usize,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct IngestReport {
    pub total_symbols: usize,
    pub successful: usize,
    pub failed: usize,
    pub bars_upserted: usize,
    pub indicators_upserted: usize,
    pub stale: usize,
    pub malformed: usize,
    pub cancelled: bool,
    pub symbols: BTreeMap<String, SymbolOutcome>,
}

#[derive(Debug, Default)]
struct SymbolTally {
    bars: usize,
    indicators: usize,
    stale: usize,
    malformed: usize,
}

fn changed(outcome: UpsertOutcome) -> bool {
    !matches!(outcome, UpsertOutcome::Unchanged)
}

/// Returns `true` when the symbol ran to completion, `false` when cancelled.
fn process_symbol(
    tracker: &MarketTracker,
    source: &dyn DataPort,
    store: &dyn StorePort,
    symbol: &str,
    cancel: &AtomicBool,
    tally: &mut SymbolTally,
) -> Result<bool, TrackerError> {
    let since = tracker.last_timestamp(symbol);
    let mut bars = source.fetch_bars(symbol, since)?;
    bars.sort_by_key(|b| b.timestamp);
    tracing::debug!(symbol, fetched = bars.len(), ?since, "fetched bars");

    for mut bar in bars {
        if cancel.load(Ordering::Relaxed) {
            return Ok(false);
        }
        bar.symbol = symbol.to_string();

        if let Err(e) = bar.validate() {
            tracing::warn!(error = %e, "skipping malformed bar");
            tally.malformed += 1;
            continue;
        }
        if tracker
            .last_timestamp(symbol)
            .is_some_and(|last| bar.timestamp <= last)
        {
            tracing::debug!(symbol, timestamp = %bar.timestamp, "skipping stale bar");
            tally.stale += 1;
            continue;
        }

        if changed(store.upsert_bar(&bar)?) {
            tally.bars += 1;
        }
        let values = match tracker.ingest_bar(&bar) {
            Ok(values) => values,
            Err(e) if e.is_bar_rejection() => {
                tracing::debug!(error = %e, "bar rejected by engine");
                tally.stale += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        for value in &values {
            if changed(store.upsert_indicator(value)?) {
                tally.indicators += 1;
            }
        }
    }
    Ok(true)
}

/// Run one ingestion cycle over `symbols`.
pub fn run_cycle(
    tracker: &MarketTracker,
    source: &dyn DataPort,
    store: &dyn StorePort,
    symbols: &[String],
    cancel: &AtomicBool,
) -> IngestReport {
    tracing::info!(symbols = symbols.len(), "starting ingestion cycle");
    let mut report = IngestReport {
        total_symbols: symbols.len(),
        ..Default::default()
    };

    for raw in symbols {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        let symbol = raw.trim().to_uppercase();
        let mut tally = SymbolTally::default();
        let result = process_symbol(tracker, source, store, &symbol, cancel, &mut tally);

        report.bars_upserted += tally.bars;
        report.indicators_upserted += tally.indicators;
        report.stale += tally.stale;
        report.malformed += tally.malformed;

        let outcome = match result {
            Ok(completed) => {
                report.successful += 1;
                report.cancelled |= !completed;
                SymbolOutcome::Processed {
                    bars: tally.bars,
                    indicators: tally.indicators,
                    stale: tally.stale,
                    malformed: tally.malformed,
                }
            }
            Err(e) => {
                tracing::error!(symbol = %symbol, error = %e, "failed to process symbol");
                report.failed += 1;
                SymbolOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        report.symbols.insert(symbol, outcome);
        if report.cancelled {
            break;
        }
    }

    tracing::info!(
        successful = report.successful,
        failed = report.failed,
        bars = report.bars_upserted,
        indicators = report.indicators_upserted,
        cancelled = report.cancelled,
        "ingestion cycle complete"
    );
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RestoreSummary {
    pub bars_replayed: usize,
    pub trades_replayed: usize,
    pub bars_skipped: usize,
    pub trades_rejected: usize,
}

/// Rebuild indicator, ledger and portfolio state from the store.
///
/// Rows are replayed in the order they were first written, which is the
/// order the live tracker accepted them. Trades keep their stored ids.
pub fn restore(
    tracker: &MarketTracker,
    store: &dyn StorePort,
    symbols: &[String],
) -> Result<RestoreSummary, TrackerError> {
    let mut summary = RestoreSummary::default();
    for recorded in store.load_journal(symbols)? {
        match recorded {
            Recorded::Bar(bar) => match tracker.ingest_bar(&bar) {
                Ok(_) => summary.bars_replayed += 1,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping stored bar");
                    summary.bars_skipped += 1;
                }
            },
            Recorded::Trade(trade) => match tracker.replay_trade(&trade) {
                Ok(_) => summary.trades_replayed += 1,
                Err(e) => {
                    tracing::warn!(id = %trade.id, error = %e, "stored trade rejected on replay");
                    summary.trades_rejected += 1;
                }
            },
        }
    }
    tracing::info!(
        bars = summary.bars_replayed,
        trades = summary.trades_replayed,
        next_trade_id = %tracker.next_trade_id(),
        "state restored"
    );
    Ok(summary)
}

/// Delete bars and indicator values older than `days` before `now`.
pub fn purge_expired(
    store: &dyn StorePort,
    now: DateTime<Utc>,
    days: u32,
) -> Result<PurgeCounts, TrackerError> {
    let cutoff = now - Duration::days(i64::from(days));
    let counts = store.purge_before(cutoff)?;
    tracing::info!(
        %cutoff,
        bars = counts.bars,
        indicators = counts.indicators,
        "purged expired rows"
    );
    Ok(counts)
}
