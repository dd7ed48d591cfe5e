//! Entry scan scheduler.
//!
//! Each scan pages through the equity and crypto universes, evaluates every
//! symbol on the page against fresh quotes and attempts entries for the ready
//! ones, subject to the portfolio guards. Scans never overlap: a tick that
//! arrives while one is running is dropped.

use crate::config::Settings;
use crate::events::{EventKind, EventLog};
use crate::exchange::{AccountSnapshot, TradingVenue};
use crate::market::clock::MarketClockCache;
use crate::market::instrument::{AssetClass, Instrument, Universe};
use crate::market::quotes::{FreshnessPolicy, QuoteBook};
use crate::risk::{
    check_concurrency, concurrency_cap, open_entry_count, pdt_blocked, size_entry, AccountMonitor, EntrySize,
    GuardBlock, RiskManager, TradeState,
};
use crate::strategy::executor::{BuyExecutor, BuyOutcome, BuyRequest};
use crate::strategy::fees::{required_profit_bps, FeeSchedule};
use crate::strategy::outcome::{spawn_outcome_watch, OutcomeWatch};
use crate::strategy::signal::{evaluate, EntryDecision, EntryInputs, EntrySignal};
use crate::strategy::stats::StatsBook;
use crate::utils::decimal::{safe_div, to_basis_points};
use chrono::{Timelike, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// One-minute closes fetched per symbol for the momentum rule.
const MOMENTUM_BARS: usize = 6;

/// Per-scan counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    pub evaluated: usize,
    pub ready: usize,
    pub attempted: usize,
    pub filled: usize,
    /// Skips keyed by reason label.
    pub skipped: BTreeMap<String, usize>,
    pub avg_spread_bps: Option<Decimal>,
    pub cap: usize,
}

impl ScanStats {
    fn skip(&mut self, reason: &str) {
        self.skip_n(reason, 1);
    }

    fn skip_n(&mut self, reason: &str, n: usize) {
        if n > 0 {
            *self.skipped.entry(reason.to_string()).or_default() += n;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum EntryOutcome {
    Filled,
    Unfilled,
    Failed,
    Skipped(&'static str),
}

/// Clears the in-progress flag when a scan ends, however it ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Round-robin window of `size` items starting at `*cursor`.
fn next_page(list: &[Instrument], cursor: &mut usize, size: usize) -> Vec<Instrument> {
    if list.is_empty() || size == 0 {
        return Vec::new();
    }
    let start = *cursor % list.len();
    let take = size.min(list.len());
    *cursor = (start + take) % list.len();
    list.iter().cycle().skip(start).take(take).cloned().collect()
}

/// Average of the spread samples from one scan.
fn average(samples: &[Decimal]) -> Option<Decimal> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<Decimal>() / Decimal::from(samples.len()))
}

pub struct ScanScheduler {
    venue: Arc<dyn TradingVenue>,
    quotes: Arc<QuoteBook>,
    clock: Arc<MarketClockCache>,
    stats: Arc<StatsBook>,
    account: Arc<AccountMonitor>,
    risk: Arc<RiskManager>,
    executor: BuyExecutor,
    events: EventLog,
    universe: RwLock<Universe>,
    /// Page cursors for equities and crypto.
    cursors: Mutex<(usize, usize)>,
    in_progress: AtomicBool,
    avg_spread_bps: RwLock<Option<Decimal>>,
}

impl ScanScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        venue: Arc<dyn TradingVenue>,
        quotes: Arc<QuoteBook>,
        clock: Arc<MarketClockCache>,
        stats: Arc<StatsBook>,
        account: Arc<AccountMonitor>,
        risk: Arc<RiskManager>,
        events: EventLog,
        universe: Universe,
    ) -> Self {
        let executor = BuyExecutor::new(venue.clone(), quotes.clone(), events.clone());
        Self {
            venue,
            quotes,
            clock,
            stats,
            account,
            risk,
            executor,
            events,
            universe: RwLock::new(universe),
            cursors: Mutex::new((0, 0)),
            in_progress: AtomicBool::new(false),
            avg_spread_bps: RwLock::new(None),
        }
    }

    pub async fn universe(&self) -> Universe {
        self.universe.read().await.clone()
    }

    pub async fn avg_spread_bps(&self) -> Option<Decimal> {
        *self.avg_spread_bps.read().await
    }

    /// Rebuild the crypto universe from the venue's active assets. Keeps the
    /// current universe when the venue call fails or returns nothing usable.
    pub async fn refresh_universe(&self) -> usize {
        let assets = match self.venue.crypto_assets().await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(error = %e, "Crypto asset list unavailable, keeping current universe");
                return self.universe.read().await.len();
            }
        };
        let symbols: Vec<String> = assets
            .into_iter()
            .filter(|a| a.tradable && a.status == "active" && a.symbol.ends_with("USD"))
            .map(|a| a.symbol)
            .collect();
        if symbols.is_empty() {
            warn!("No tradable crypto assets reported, keeping current universe");
            return self.universe.read().await.len();
        }

        let universe = Universe::from_crypto_symbols(symbols);
        info!(
            equities = universe.equities.len(),
            crypto = universe.crypto.len(),
            "Universe refreshed"
        );
        let len = universe.len();
        *self.universe.write().await = universe;
        len
    }

    fn pages(&self, universe: &Universe, size: usize) -> (Vec<Instrument>, Vec<Instrument>) {
        let mut cursors = match self.cursors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let equities = next_page(&universe.equities, &mut cursors.0, size);
        let crypto = next_page(&universe.crypto, &mut cursors.1, size);
        (equities, crypto)
    }

    /// Run one scan. Returns `None` when another scan is still running.
    #[instrument(skip(self, settings))]
    pub async fn scan(&self, settings: &Settings) -> Option<ScanStats> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            debug!("Scan already in progress, skipping tick");
            return None;
        }
        let _guard = ScanGuard(&self.in_progress);
        let mut stats = ScanStats::default();

        let account = self.account.snapshot(settings).await;
        let pdt = account.as_ref().is_some_and(|a| pdt_blocked(settings, a));
        let market_open = self.clock.is_open().await;

        let universe = self.universe.read().await.clone();
        let (equities, crypto) = self.pages(&universe, settings.page_size);

        let mut instruments = crypto;
        if !market_open {
            stats.skip_n("market_closed", equities.len());
        } else if pdt {
            stats.skip_n(GuardBlock::Pdt.as_str(), equities.len());
        } else {
            instruments.extend(equities);
        }

        let policy = FreshnessPolicy::from(settings);
        let quotes = self.quotes.get_quotes(&instruments, &policy).await;
        let quoted: Vec<Instrument> = instruments
            .iter()
            .filter(|i| quotes.contains_key(&i.symbol))
            .cloned()
            .collect();
        let closes = self.quotes.minute_closes(&quoted, MOMENTUM_BARS).await;

        let mut spreads = Vec::new();
        let mut ready: Vec<(Instrument, EntrySignal)> = Vec::new();
        for instrument in &instruments {
            stats.evaluated += 1;
            let quote = quotes.get(&instrument.symbol);
            if let Some(q) = quote.filter(|q| q.is_valid()) {
                let spread = q.spread_bps();
                spreads.push(spread);
                self.stats.record_spread(&instrument.symbol, spread).await;
            }
            let symbol_stats = self.stats.get(&instrument.symbol).await;
            let decision = evaluate(
                settings,
                EntryInputs {
                    instrument,
                    quote,
                    market_open,
                    closes: closes.get(&instrument.symbol).map(Vec::as_slice).unwrap_or(&[]),
                    stats: &symbol_stats,
                },
            );
            match decision {
                EntryDecision::Ready(signal) => ready.push((instrument.clone(), signal)),
                EntryDecision::Rejected { reason, spread_bps } => {
                    debug!(symbol = %instrument.symbol, %reason, spread_bps = ?spread_bps, "Entry rejected");
                    stats.skip(reason.as_str());
                }
            }
        }
        stats.ready = ready.len();

        stats.avg_spread_bps = average(&spreads);
        if stats.avg_spread_bps.is_some() {
            *self.avg_spread_bps.write().await = stats.avg_spread_bps;
        }
        let avg_spread = *self.avg_spread_bps.read().await;
        stats.cap = concurrency_cap(settings.max_concurrent_positions, avg_spread);

        if !ready.is_empty() {
            self.attempt_entries(ready, account, settings, &mut stats).await;
        }

        info!(
            evaluated = stats.evaluated,
            ready = stats.ready,
            attempted = stats.attempted,
            filled = stats.filled,
            cap = stats.cap,
            "Scan complete"
        );
        self.events.emit(
            EventKind::ScanSummary,
            None,
            serde_json::to_value(&stats).unwrap_or_default(),
        );
        Some(stats)
    }

    fn guard_blocked(&self, symbol: &str, block: &GuardBlock, stats: &mut ScanStats) {
        info!(%symbol, guard = block.as_str(), "Entry blocked by guard");
        self.events.emit(
            EventKind::Guard,
            Some(symbol),
            json!({ "guard": block.as_str(), "detail": block.to_string() }),
        );
        stats.skip(block.as_str());
    }

    async fn attempt_entries(
        &self,
        mut ready: Vec<(Instrument, EntrySignal)>,
        account: Option<AccountSnapshot>,
        settings: &Settings,
        stats: &mut ScanStats,
    ) {
        if let Err(block) = self.account.halt_check().await {
            for (instrument, _) in &ready {
                self.guard_blocked(&instrument.symbol, &block, stats);
            }
            return;
        }
        let Some(account) = account else {
            stats.skip_n("no_account", ready.len());
            return;
        };
        let positions = match self.venue.positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Positions unavailable, skipping entries");
                stats.skip_n("no_positions", ready.len());
                return;
            }
        };

        match self.risk.cancel_stale_buys().await {
            Ok(n) if n > 0 => debug!(cancelled = n, "Stale buys cleared before entries"),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Stale buy cleanup failed"),
        }

        // Tightest spreads first.
        ready.sort_by(|a, b| a.1.spread_bps.cmp(&b.1.spread_bps));

        let open = open_entry_count(&positions);
        let mut chosen = Vec::new();
        for (instrument, signal) in ready {
            let held = positions
                .iter()
                .any(|p| p.symbol == instrument.symbol && p.qty > Decimal::ZERO)
                || self.risk.trades().read().await.contains_key(&instrument.symbol);
            if held {
                self.guard_blocked(&instrument.symbol, &GuardBlock::AlreadyHeld, stats);
                continue;
            }
            if let Err(block) = check_concurrency(open + chosen.len(), stats.cap) {
                self.guard_blocked(&instrument.symbol, &block, stats);
                continue;
            }
            chosen.push((instrument, signal));
        }

        stats.attempted = chosen.len();
        // Sized one at a time against what earlier entries in the batch left over.
        let mut budget = account.buying_power;
        let mut sized = Vec::with_capacity(chosen.len());
        for (instrument, signal) in chosen {
            let remaining = AccountSnapshot {
                buying_power: budget,
                ..account.clone()
            };
            match self.size(&instrument, &signal, &remaining, settings).await {
                Ok(size) => {
                    budget -= size.notional;
                    sized.push((instrument, signal, size));
                }
                Err(reason) => stats.skip(reason),
            }
        }

        let outcomes = join_all(
            sized
                .iter()
                .map(|(instrument, signal, size)| self.enter(instrument, signal, size, settings)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                EntryOutcome::Filled => stats.filled += 1,
                EntryOutcome::Unfilled => stats.skip("unfilled"),
                EntryOutcome::Failed => stats.skip("failed"),
                EntryOutcome::Skipped(reason) => stats.skip(reason),
            }
        }
    }

    /// Size an entry at the ask against `account`.
    async fn size(
        &self,
        instrument: &Instrument,
        signal: &EntrySignal,
        account: &AccountSnapshot,
        settings: &Settings,
    ) -> Result<EntrySize, &'static str> {
        let symbol = instrument.symbol.as_str();
        let fractionable = match instrument.class {
            AssetClass::Crypto => true,
            AssetClass::Equity => match self.venue.asset(symbol).await {
                Ok(Some(asset)) => asset.fractionable,
                Ok(None) => false,
                Err(e) => {
                    debug!(%symbol, error = %e, "Asset lookup failed, sizing whole shares");
                    false
                }
            },
        };

        size_entry(settings, account, instrument, signal.quote.ask, fractionable).map_err(|e| {
            info!(%symbol, error = %e, "Entry skipped by sizing");
            self.events.emit(EventKind::Skip, Some(symbol), json!({ "reason": e.kind(), "detail": e.to_string() }));
            e.kind()
        })
    }

    /// Execute a sized entry and start tracking it.
    async fn enter(
        &self,
        instrument: &Instrument,
        signal: &EntrySignal,
        size: &EntrySize,
        settings: &Settings,
    ) -> EntryOutcome {
        let symbol = instrument.symbol.as_str();
        let Some(_lock) = self.risk.locks().try_acquire(symbol) else {
            return EntryOutcome::Skipped("busy");
        };
        // Another loop may have filled this symbol since positions were listed.
        if let Ok(Some(position)) = self.venue.position(symbol).await {
            if position.qty > Decimal::ZERO {
                return EntryOutcome::Skipped(GuardBlock::AlreadyHeld.as_str());
            }
        }

        let request = BuyRequest {
            instrument: instrument.clone(),
            qty: size.qty,
            camp: Duration::from_secs(settings.maker_camp_secs),
            taker_flip: settings.enable_taker_flip,
            freshness: FreshnessPolicy::from(settings),
        };
        let fill = match self.executor.execute(&request).await {
            BuyOutcome::Filled(fill) => fill,
            BuyOutcome::Unfilled => return EntryOutcome::Unfilled,
            BuyOutcome::Failed(_) => return EntryOutcome::Failed,
        };

        let signal_mid = signal.quote.mid();
        let slippage_bps = to_basis_points(safe_div(fill.price - signal.quote.bid, signal_mid)).max(Decimal::ZERO);
        self.stats.record_slippage(symbol, slippage_bps).await;

        let fees = FeeSchedule::for_instrument(instrument);
        let slip_ewma = self.stats.get(symbol).await.slippage_bps;
        let required = required_profit_bps(&fees, settings.risk_level, slip_ewma, settings.net_min_profit_bps);
        let state = TradeState::opened(
            instrument.clone(),
            fill.price,
            fill.qty,
            required,
            signal.runway,
            settings,
            Utc::now(),
        );
        info!(
            %symbol,
            entry = %fill.price,
            qty = %fill.qty,
            %slippage_bps,
            take_profit = %state.take_profit,
            fee_floor = %state.fee_floor,
            "Position opened"
        );
        let needed = state.take_profit - fill.price;
        self.risk.track_fill(state, settings).await;

        spawn_outcome_watch(
            self.quotes.clone(),
            self.stats.clone(),
            OutcomeWatch {
                instrument: instrument.clone(),
                entry_price: fill.price,
                v0: signal.v0,
                needed,
                hour: Utc::now().hour() as usize,
            },
        );
        EntryOutcome::Filled
    }
}
