//! Position risk manager.
//!
//! Runs on the maintenance cadence, independent of scanning. Each tick polls
//! positions and open orders, reconciles local trade state against them and
//! drives every held position through [`TradeState::on_tick`]. Every sell is
//! sized from a fresh position poll, never from local state.

use super::guards::dust_candidates;
use super::locks::SymbolLocks;
use super::trade_state::{ExitReason, Phase, RestingSell, RiskAction, RiskNote, Tick, TradeState};
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventKind, EventLog};
use crate::exchange::{NewOrder, Order, OrderSide, Position, TradingVenue};
use crate::market::instrument::Instrument;
use crate::market::quotes::{FreshnessPolicy, QuoteBook};
use crate::strategy::executor::time_in_force_for;
use crate::strategy::fees::{required_profit_bps, FeeSchedule};
use crate::strategy::stats::StatsBook;
use crate::utils::decimal::truncate_dp;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Open buys older than this, for symbols not held, are cancelled.
pub const STALE_BUY_SECS: i64 = 30;

/// Live trade states keyed by canonical symbol.
pub type TradeBook = Arc<RwLock<HashMap<String, TradeState>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionOutcome {
    Busy,
    NoQuote,
    Held,
    Kept,
    Posted,
    Exited,
    Failed,
}

/// Counters for one maintenance tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceSummary {
    pub positions: usize,
    pub busy: usize,
    pub no_quote: usize,
    pub take_profits_posted: usize,
    pub take_profits_kept: usize,
    pub exits: usize,
    pub failures: usize,
    pub orphans_cancelled: usize,
    pub closed: usize,
}

pub struct RiskManager {
    venue: Arc<dyn TradingVenue>,
    quotes: Arc<QuoteBook>,
    stats: Arc<StatsBook>,
    trades: TradeBook,
    locks: SymbolLocks,
    events: EventLog,
}

fn is_managed(position: &Position, settings: &Settings) -> bool {
    position.qty > Decimal::ZERO
        && position.market_value >= settings.dust_max_usd
        && !Instrument::parse(&position.symbol).is_stablecoin()
}

impl RiskManager {
    pub fn new(
        venue: Arc<dyn TradingVenue>,
        quotes: Arc<QuoteBook>,
        stats: Arc<StatsBook>,
        trades: TradeBook,
        locks: SymbolLocks,
        events: EventLog,
    ) -> Self {
        Self {
            venue,
            quotes,
            stats,
            trades,
            locks,
            events,
        }
    }

    pub fn trades(&self) -> &TradeBook {
        &self.trades
    }

    pub fn locks(&self) -> &SymbolLocks {
        &self.locks
    }

    /// Start tracking a confirmed fill and post its take-profit right away.
    /// The caller holds the symbol lock.
    pub async fn track_fill(&self, mut state: TradeState, settings: &Settings) {
        let outcome = self.advance(&mut state, None, settings, Utc::now()).await;
        debug!(symbol = state.symbol(), ?outcome, "Initial maintenance after fill");
        self.trades
            .write()
            .await
            .insert(state.symbol().to_string(), state);
    }

    /// One maintenance pass over every held position.
    pub async fn tick(&self, settings: &Settings) -> EngineResult<MaintenanceSummary> {
        let polled_at = Utc::now();
        let positions = self.venue.positions().await?;
        let orders = self.venue.open_orders().await?;
        let held: HashSet<String> = positions
            .iter()
            .filter(|p| p.qty > Decimal::ZERO)
            .map(|p| p.symbol.clone())
            .collect();

        let mut summary = MaintenanceSummary {
            positions: held.len(),
            ..MaintenanceSummary::default()
        };
        summary.orphans_cancelled = self.cancel_orphan_sells(&orders, &held).await;
        summary.closed = self.forget_closed(&held, polled_at).await;

        let resting = resting_sells(&orders);
        let selling: HashSet<&str> = orders
            .iter()
            .filter(|o| o.side == OrderSide::Sell)
            .map(|o| o.symbol.as_str())
            .collect();
        let now = Utc::now();
        let outcomes = join_all(
            positions
                .iter()
                .filter(|p| is_managed(p, settings))
                .map(|p| {
                    let resting = resting.get(&p.symbol).cloned();
                    self.manage(p, resting, selling.contains(p.symbol.as_str()), settings, now)
                }),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                PositionOutcome::Busy => summary.busy += 1,
                PositionOutcome::NoQuote => summary.no_quote += 1,
                PositionOutcome::Posted => summary.take_profits_posted += 1,
                PositionOutcome::Kept => summary.take_profits_kept += 1,
                PositionOutcome::Exited => summary.exits += 1,
                PositionOutcome::Failed => summary.failures += 1,
                PositionOutcome::Held => {}
            }
        }

        debug!(?summary, "Maintenance tick complete");
        Ok(summary)
    }

    /// Resting sells for symbols no longer held can never fill.
    async fn cancel_orphan_sells(&self, orders: &[Order], held: &HashSet<String>) -> usize {
        let orphans: Vec<&Order> = orders
            .iter()
            .filter(|o| o.side == OrderSide::Sell && !held.contains(&o.symbol))
            .collect();
        let results = join_all(orphans.iter().map(|o| self.venue.cancel_order(&o.id))).await;

        let mut cancelled = 0;
        for (order, result) in orphans.iter().zip(results) {
            match result {
                Ok(()) => {
                    cancelled += 1;
                    self.events.emit(
                        EventKind::Reconcile,
                        Some(&order.symbol),
                        json!({ "action": "cancel_orphan_sell", "order_id": order.id }),
                    );
                }
                Err(e) => warn!(symbol = %order.symbol, order_id = %order.id, error = %e, "Failed to cancel orphan sell"),
            }
        }
        cancelled
    }

    /// Drop trade state for positions that are gone. States created after the
    /// poll started are left for the next tick.
    async fn forget_closed(&self, held: &HashSet<String>, polled_at: DateTime<Utc>) -> usize {
        let gone: Vec<String> = self
            .trades
            .read()
            .await
            .iter()
            .filter(|(symbol, state)| !held.contains(*symbol) && state.entered_at <= polled_at)
            .map(|(symbol, _)| symbol.clone())
            .collect();

        let mut closed = 0;
        for symbol in gone {
            let Some(_guard) = self.locks.try_acquire(&symbol) else {
                continue;
            };
            let Some(state) = self.trades.write().await.remove(&symbol) else {
                continue;
            };
            let reason = match &state.phase {
                Phase::Exiting { reason, .. } => reason.as_str(),
                _ => "position_gone",
            };
            info!(%symbol, reason, entry = %state.entry_price, "Position closed");
            self.events.emit(
                EventKind::Closed,
                Some(&symbol),
                json!({ "reason": reason, "entry": state.entry_price, "qty": state.qty }),
            );
            closed += 1;
        }
        closed
    }

    async fn manage(
        &self,
        position: &Position,
        mut resting: Option<RestingSell>,
        sell_working: bool,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> PositionOutcome {
        let symbol = position.symbol.as_str();
        let Some(_guard) = self.locks.try_acquire(symbol) else {
            debug!(%symbol, "Symbol busy, skipping maintenance");
            return PositionOutcome::Busy;
        };

        let existing = self.trades.read().await.get(symbol).cloned();
        let mut state = match existing {
            Some(state) => state,
            None => {
                let state = TradeState::adopted(position, settings, now);
                info!(%symbol, qty = %position.qty, basis = %position.basis_price, "Adopting untracked position");
                self.events.emit(
                    EventKind::Reconcile,
                    Some(symbol),
                    json!({ "action": "adopt", "qty": position.qty, "entry": state.entry_price }),
                );
                state
            }
        };

        if let Some(previous) = state.reconcile_qty(position.qty, settings) {
            let mismatch = EngineError::ReconciliationMismatch {
                symbol: symbol.to_string(),
                detail: format!("tracked qty {previous}, venue qty {}", position.qty),
            };
            warn!(error = %mismatch, "Overwriting local quantity");
            self.events.emit(
                EventKind::Reconcile,
                Some(symbol),
                json!({ "action": "qty", "tracked": previous, "venue": position.qty }),
            );
        }

        if let Some(abandoned) = state.retry_stalled_exit(now, sell_working) {
            warn!(%symbol, reason = abandoned.as_str(), qty = %position.qty, "Exit did not complete, re-evaluating");
            self.events.emit(
                EventKind::Reconcile,
                Some(symbol),
                json!({ "action": "exit_retry", "reason": abandoned, "qty": position.qty }),
            );
            if sell_working {
                if let Err(e) = self.cancel_sells(symbol).await {
                    warn!(%symbol, error = %e, "Failed to cancel stalled exit");
                }
                resting = None;
            }
        }

        let outcome = self.advance(&mut state, resting, settings, now).await;
        self.trades.write().await.insert(symbol.to_string(), state);
        outcome
    }

    async fn advance(
        &self,
        state: &mut TradeState,
        resting: Option<RestingSell>,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> PositionOutcome {
        let instrument = state.instrument.clone();
        let symbol = instrument.symbol.as_str();

        let Some(quote) = self
            .quotes
            .fresh_quote(&instrument, &FreshnessPolicy::from(settings))
            .await
        else {
            debug!(%symbol, "No fresh quote, holding");
            return PositionOutcome::NoQuote;
        };

        let stats = self.stats.get(symbol).await;
        let required_bps = required_profit_bps(
            &FeeSchedule::for_instrument(&instrument),
            settings.risk_level,
            stats.slippage_bps,
            settings.net_min_profit_bps,
        );
        let tick = Tick {
            bid: quote.bid,
            bid_size: quote.bid_size,
            now,
            required_bps,
        };

        let plan = state.on_tick(&tick, resting.as_ref(), settings);
        self.emit_notes(state, &plan.notes);

        match plan.action {
            RiskAction::Hold => PositionOutcome::Held,
            RiskAction::KeepTakeProfit => PositionOutcome::Kept,
            RiskAction::MarketExit { reason } => {
                state.mark_exiting(reason, now);
                match self.market_exit(&instrument).await {
                    Ok(order) => {
                        state.record_exit_order(&order.id);
                        self.emit_exit(state, reason, quote.bid, &order);
                        PositionOutcome::Exited
                    }
                    Err(e) => {
                        warn!(%symbol, reason = reason.as_str(), error = %e, "Market exit failed");
                        self.events.emit(
                            EventKind::Error,
                            Some(symbol),
                            json!({ "action": "market_exit", "reason": reason, "error": e.to_string() }),
                        );
                        state.resume();
                        PositionOutcome::Failed
                    }
                }
            }
            RiskAction::PostTakeProfit { limit, replace } => {
                match self.post_take_profit(&instrument, limit, replace.is_some()).await {
                    Ok(Some(qty)) => {
                        state.record_post(now);
                        self.events.emit(
                            EventKind::TakeProfitPosted,
                            Some(symbol),
                            json!({
                                "limit": limit,
                                "qty": qty,
                                "fee_floor": state.fee_floor,
                                "replaced": replace,
                            }),
                        );
                        PositionOutcome::Posted
                    }
                    Ok(None) => {
                        debug!(%symbol, "Nothing available to post a take-profit for");
                        PositionOutcome::Held
                    }
                    Err(e) => {
                        warn!(%symbol, %limit, error = %e, "Take-profit post failed");
                        PositionOutcome::Failed
                    }
                }
            }
        }
    }

    fn emit_notes(&self, state: &TradeState, notes: &[RiskNote]) {
        let symbol = Some(state.symbol());
        for note in notes {
            match note {
                RiskNote::StopsArmed { stop, hard_stop } => self.events.emit(
                    EventKind::StopArmed,
                    symbol,
                    json!({ "entry": state.entry_price, "stop": stop, "hard_stop": hard_stop }),
                ),
                RiskNote::TrailArmed { peak } => self.events.emit(
                    EventKind::TrailArmed,
                    symbol,
                    json!({ "entry": state.entry_price, "peak": peak }),
                ),
                RiskNote::Touch { count } => {
                    debug!(symbol = state.symbol(), count, limit = %state.final_limit(), "Take-profit touched")
                }
                RiskNote::TakerBlocked { bid } => self.events.emit(
                    EventKind::TakerBlocked,
                    symbol,
                    json!({ "bid": bid, "fee_floor": state.fee_floor, "guard": "profit" }),
                ),
            }
        }
    }

    fn emit_exit(&self, state: &TradeState, reason: ExitReason, bid: Decimal, order: &Order) {
        let qty = order.qty.unwrap_or_default();
        let kind = match reason {
            r if r.is_stop() => EventKind::StopExit,
            ExitReason::TimeExit => EventKind::TimeExit,
            ExitReason::Dust => EventKind::DustSweep,
            _ => EventKind::TakerFlip,
        };
        info!(symbol = state.symbol(), reason = reason.as_str(), %bid, %qty, order_id = %order.id, "Market exit submitted");
        self.events.emit(
            kind,
            Some(state.symbol()),
            json!({
                "reason": reason,
                "order_id": order.id,
                "bid": bid,
                "qty": qty,
                "entry": state.entry_price,
                "stop": state.phase.stop(),
            }),
        );
    }

    /// Cancel every resting sell for `symbol`.
    async fn cancel_sells(&self, symbol: &str) -> EngineResult<usize> {
        let ids: Vec<String> = self
            .venue
            .open_orders()
            .await?
            .into_iter()
            .filter(|o| o.symbol == symbol && o.side == OrderSide::Sell)
            .map(|o| o.id)
            .collect();
        let results = join_all(ids.iter().map(|id| self.venue.cancel_order(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(%symbol, order_id = %id, error = %e, "Failed to cancel resting sell");
            }
        }
        Ok(ids.len())
    }

    /// Sellable quantity from a fresh poll, truncated to the class precision.
    async fn available_qty(&self, instrument: &Instrument) -> EngineResult<Decimal> {
        let position = self.venue.position(&instrument.symbol).await?;
        Ok(position
            .map(|p| truncate_dp(p.available_qty, instrument.class.qty_decimals()))
            .unwrap_or_default())
    }

    /// Cancel resting sells, re-poll, then market-sell what is available.
    async fn market_exit(&self, instrument: &Instrument) -> EngineResult<Order> {
        self.cancel_sells(&instrument.symbol).await?;
        let qty = self.available_qty(instrument).await?;
        if qty <= Decimal::ZERO {
            return Err(EngineError::ReconciliationMismatch {
                symbol: instrument.symbol.clone(),
                detail: "no available quantity to sell".into(),
            });
        }
        let order = NewOrder::market(
            &instrument.venue_symbol(),
            OrderSide::Sell,
            qty,
            time_in_force_for(instrument.class),
        );
        self.venue.submit_order(&order).await
    }

    /// Post the take-profit limit. Returns the quantity posted, or `None` when
    /// nothing was available.
    async fn post_take_profit(
        &self,
        instrument: &Instrument,
        limit: Decimal,
        replace: bool,
    ) -> EngineResult<Option<Decimal>> {
        if replace {
            self.cancel_sells(&instrument.symbol).await?;
        }
        let qty = self.available_qty(instrument).await?;
        if qty <= Decimal::ZERO {
            return Ok(None);
        }
        let order = NewOrder::limit(
            &instrument.venue_symbol(),
            OrderSide::Sell,
            qty,
            limit,
            time_in_force_for(instrument.class),
        );
        self.venue.submit_order(&order).await?;
        Ok(Some(qty))
    }

    /// Cancel open buys older than [`STALE_BUY_SECS`] for symbols not held.
    /// Symbols with an entry in flight are left alone.
    pub async fn cancel_stale_buys(&self) -> EngineResult<usize> {
        let held: HashSet<String> = self
            .venue
            .positions()
            .await?
            .into_iter()
            .filter(|p| p.qty > Decimal::ZERO)
            .map(|p| p.symbol)
            .collect();
        let cutoff = Utc::now() - ChronoDuration::seconds(STALE_BUY_SECS);
        let stale: Vec<Order> = self
            .venue
            .open_orders()
            .await?
            .into_iter()
            .filter(|o| o.side == OrderSide::Buy && !held.contains(&o.symbol))
            .filter(|o| o.placed_at().is_some_and(|at| at < cutoff))
            .filter(|o| !self.locks.is_busy(&o.symbol))
            .collect();

        let results = join_all(stale.iter().map(|o| self.venue.cancel_order(&o.id))).await;
        let mut cancelled = 0;
        for (order, result) in stale.iter().zip(results) {
            match result {
                Ok(()) => {
                    cancelled += 1;
                    debug!(symbol = %order.symbol, order_id = %order.id, "Cancelled stale buy");
                }
                Err(e) => warn!(symbol = %order.symbol, order_id = %order.id, error = %e, "Failed to cancel stale buy"),
            }
        }
        Ok(cancelled)
    }

    /// Market-sell positions below the dust threshold that have no resting sell.
    pub async fn sweep_dust(&self, settings: &Settings) -> EngineResult<usize> {
        let positions = self.venue.positions().await?;
        let resting: HashSet<String> = self
            .venue
            .open_orders()
            .await?
            .into_iter()
            .filter(|o| o.side == OrderSide::Sell)
            .map(|o| o.symbol)
            .collect();

        let mut swept = 0;
        for position in dust_candidates(&positions, &resting, settings.dust_max_usd) {
            let Some(_guard) = self.locks.try_acquire(&position.symbol) else {
                continue;
            };
            let instrument = Instrument::parse(&position.symbol);
            let qty = truncate_dp(position.available_qty, instrument.class.qty_decimals());
            if qty <= Decimal::ZERO {
                continue;
            }
            let order = NewOrder::market(
                &instrument.venue_symbol(),
                OrderSide::Sell,
                qty,
                time_in_force_for(instrument.class),
            );
            match self.venue.submit_order(&order).await {
                Ok(_) => {
                    swept += 1;
                    if let Some(state) = self.trades.write().await.get_mut(&position.symbol) {
                        state.mark_exiting(ExitReason::Dust, Utc::now());
                    }
                    self.events.emit(
                        EventKind::DustSweep,
                        Some(&position.symbol),
                        json!({ "qty": qty, "market_value": position.market_value }),
                    );
                }
                Err(e) => warn!(symbol = %position.symbol, error = %e, "Dust sweep sell failed"),
            }
        }
        if swept > 0 {
            info!(swept, "Dust sweep complete");
        }
        Ok(swept)
    }
}

/// Newest resting limit sell per symbol.
fn resting_sells(orders: &[Order]) -> HashMap<String, RestingSell> {
    let mut newest: HashMap<String, (&Order, Decimal)> = HashMap::new();
    for order in orders {
        let (OrderSide::Sell, Some(limit)) = (order.side, order.limit_price) else {
            continue;
        };
        let replace = newest
            .get(&order.symbol)
            .map_or(true, |(current, _)| order.placed_at() > current.placed_at());
        if replace {
            newest.insert(order.symbol.clone(), (order, limit));
        }
    }
    newest
        .into_iter()
        .map(|(symbol, (order, limit))| {
            (
                symbol,
                RestingSell {
                    order_id: order.id.clone(),
                    limit,
                },
            )
        })
        .collect()
}
