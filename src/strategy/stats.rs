//! Per-symbol adaptive statistics.
//!
//! Slippage and spread are exponentially weighted per symbol. The drag
//! coefficient models how quickly an entry's initial velocity decays:
//! a trade entered at velocity `v0` that peaked at favorable move `best`
//! implies `g = v0² / (2·best)`, and a new entry at `v0` can expect about
//! `v0² / (2·g)` of runway.

use crate::utils::decimal::ewma;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

pub const EWMA_ALPHA: Decimal = dec!(0.2);
pub const DEFAULT_DRAG: Decimal = dec!(8);
pub const MIN_DRAG: Decimal = dec!(0.000001);
/// Favorable excursions retained per symbol.
const EXCURSION_HISTORY: usize = 50;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolStats {
    pub slippage_bps: Option<Decimal>,
    pub spread_bps: Option<Decimal>,
    drag: Option<Decimal>,
    pub favorable_excursions: VecDeque<Decimal>,
}

impl SymbolStats {
    pub fn record_spread(&mut self, spread_bps: Decimal) {
        self.spread_bps = Some(ewma(self.spread_bps, spread_bps, EWMA_ALPHA));
    }

    pub fn record_slippage(&mut self, slippage_bps: Decimal) {
        self.slippage_bps = Some(ewma(self.slippage_bps, slippage_bps, EWMA_ALPHA));
    }

    /// Fold one observed trade outcome into the drag estimate. Ignored
    /// unless both the entry velocity and the best excursion are positive.
    pub fn record_excursion(&mut self, v0: Decimal, best: Decimal) -> bool {
        if v0 <= Decimal::ZERO || best <= Decimal::ZERO {
            return false;
        }
        let sample = v0 * v0 / (dec!(2) * best);
        self.drag = Some(ewma(self.drag, sample, EWMA_ALPHA));
        self.favorable_excursions.push_back(best);
        if self.favorable_excursions.len() > EXCURSION_HISTORY {
            self.favorable_excursions.pop_front();
        }
        true
    }

    pub fn drag(&self) -> Decimal {
        self.drag.unwrap_or(DEFAULT_DRAG).max(MIN_DRAG)
    }

    /// Expected favorable move for an entry at velocity `v0`, in price units.
    pub fn runway(&self, v0: Decimal) -> Decimal {
        if v0 <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        v0 * v0 / (dec!(2) * self.drag())
    }
}

/// Outcomes bucketed by UTC hour of the fill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HourStats {
    pub trades: u32,
    pub hits: u32,
}

/// Shared statistics for every symbol. Never reset while the process lives.
pub struct StatsBook {
    symbols: RwLock<HashMap<String, SymbolStats>>,
    hours: RwLock<[HourStats; 24]>,
}

impl Default for StatsBook {
    fn default() -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
            hours: RwLock::new([HourStats::default(); 24]),
        }
    }
}

impl StatsBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, symbol: &str) -> SymbolStats {
        self.symbols
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn record_spread(&self, symbol: &str, spread_bps: Decimal) {
        self.symbols
            .write()
            .await
            .entry(symbol.to_string())
            .or_default()
            .record_spread(spread_bps);
    }

    pub async fn record_slippage(&self, symbol: &str, slippage_bps: Decimal) {
        self.symbols
            .write()
            .await
            .entry(symbol.to_string())
            .or_default()
            .record_slippage(slippage_bps);
    }

    /// Record a finished outcome window. `needed` is the move the entry
    /// required, used for the per-hour hit rate.
    pub async fn record_outcome(
        &self,
        symbol: &str,
        v0: Decimal,
        best: Decimal,
        needed: Decimal,
        hour: usize,
    ) {
        let recorded = self
            .symbols
            .write()
            .await
            .entry(symbol.to_string())
            .or_default()
            .record_excursion(v0, best);
        if !recorded {
            return;
        }
        let mut hours = self.hours.write().await;
        let bucket = &mut hours[hour % 24];
        bucket.trades += 1;
        if best >= needed {
            bucket.hits += 1;
        }
    }

    pub async fn hour(&self, hour: usize) -> HourStats {
        self.hours.read().await[hour % 24]
    }
}
