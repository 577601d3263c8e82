//! Indicator engine: one exclusively-locked [`SymbolState`] per symbol.
//!
//! Bars of different symbols are applied in parallel; bars of one symbol are
//! serialized by that symbol's slot mutex. The map of slots itself is only
//! write-locked when a new symbol appears.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::bar::Bar;
use crate::domain::error::TrackerError;
use crate::domain::indicator::{IndicatorConfig, IndicatorKind, IndicatorValue};
use crate::domain::symbol_state::SymbolState;

type Slot = Arc<Mutex<SymbolState>>;

pub struct IndicatorEngine {
    config: IndicatorConfig,
    slots: RwLock<HashMap<String, Slot>>,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    pub fn warmup(&self, kind: IndicatorKind, period: usize) -> Option<usize> {
        self.config.warmup(kind, period)
    }

    fn slot(&self, symbol: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(symbol) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SymbolState::new(symbol, &self.config)))),
        )
    }

    pub fn apply(&self, bar: &Bar) -> Result<Vec<IndicatorValue>, TrackerError> {
        self.apply_then(bar, |_, values| values)
    }

    /// Apply `bar` and run `then` while the symbol's slot is still held, so
    /// that whatever `then` publishes is ordered exactly like the applies.
    pub fn apply_then<R>(
        &self,
        bar: &Bar,
        then: impl FnOnce(&SymbolState, Vec<IndicatorValue>) -> R,
    ) -> Result<R, TrackerError> {
        // Reject malformed input before a slot is created for it.
        bar.validate()?;
        let slot = self.slot(&bar.symbol);
        let mut state = slot.lock();
        let values = state.apply(bar)?;
        Ok(then(&state, values))
    }

    /// Copy of the current state for `symbol`.
    pub fn state(&self, symbol: &str) -> Option<SymbolState> {
        let slot = self.slots.read().get(symbol).cloned()?;
        let state = slot.lock().clone();
        Some(state)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.slots.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}
