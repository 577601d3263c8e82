//! market-tracker: incremental technical indicators, a trade ledger and
//! portfolio tracking over streamed OHLCV bars.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
