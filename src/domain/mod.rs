//! Core domain types and logic.

pub mod bar;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicator;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod portfolio;
pub mod symbol_state;
pub mod tracker;
