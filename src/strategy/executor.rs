//! Buy-side order execution.
//!
//! Entries camp a maker limit just inside the spread and follow the book
//! until filled or the camp window closes. If enabled, an unfilled camp
//! falls back to a market buy. Fills are only ever confirmed from the
//! venue's position, never assumed from an order response.
//!
//! ```text
//! Idle -> Camping -> Filled
//!                 -> Unfilled -> TakerAttempt -> Filled
//!                                             -> Failed
//! ```

use crate::error::EngineResult;
use crate::events::{EventKind, EventLog};
use crate::exchange::{NewOrder, OrderSide, TimeInForce, TradingVenue};
use crate::market::instrument::{AssetClass, Instrument};
use crate::market::quotes::{FreshnessPolicy, QuoteBook};
use crate::strategy::fees::FeeSchedule;
use crate::utils::decimal::{relative_diff, round_to_tick};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Delay between camping iterations.
pub const CAMP_POLL: Duration = Duration::from_millis(1200);
/// Delay before retrying when no fresh quote is available.
pub const NO_QUOTE_WAIT: Duration = Duration::from_millis(500);
/// Relative price change that forces a cancel-and-replace.
pub const REQUOTE_THRESHOLD: Decimal = dec!(0.0001);
/// Position polls after a market buy before giving up on confirmation.
const TAKER_CONFIRM_POLLS: u32 = 5;
const TAKER_CONFIRM_WAIT: Duration = Duration::from_millis(500);

/// Quantity and average price observed on the venue after a fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub qty: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionState {
    Idle,
    Camping {
        order_id: Option<String>,
        limit: Option<Decimal>,
    },
    Unfilled,
    TakerAttempt,
    Filled(Fill),
    Failed(String),
}

impl ExecutionState {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Camping { .. } => "camping",
            ExecutionState::Unfilled => "unfilled",
            ExecutionState::TakerAttempt => "taker_attempt",
            ExecutionState::Filled(_) => "filled",
            ExecutionState::Failed(_) => "failed",
        }
    }

    /// Resting order id while camping.
    fn resting(&self) -> Option<(&str, Decimal)> {
        match self {
            ExecutionState::Camping {
                order_id: Some(id),
                limit: Some(limit),
            } => Some((id.as_str(), *limit)),
            _ => None,
        }
    }
}

/// Terminal result of one entry attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Filled(Fill),
    Unfilled,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct BuyRequest {
    pub instrument: Instrument,
    pub qty: Decimal,
    pub camp: Duration,
    pub taker_flip: bool,
    pub freshness: FreshnessPolicy,
}

/// Non-crossing join price one tick inside the spread.
pub fn join_price(bid: Decimal, ask: Decimal, tick: Decimal) -> Decimal {
    let join = round_to_tick((ask - tick).min(bid + tick), tick);
    if join > Decimal::ZERO {
        join
    } else {
        bid
    }
}

/// Market orders and exit limits: day orders for equities, good-till-canceled for crypto.
pub fn time_in_force_for(class: AssetClass) -> TimeInForce {
    match class {
        AssetClass::Equity => TimeInForce::Day,
        AssetClass::Crypto => TimeInForce::Gtc,
    }
}

/// Drives one buy from `Idle` to a terminal state.
pub struct BuyExecutor {
    venue: Arc<dyn TradingVenue>,
    quotes: Arc<QuoteBook>,
    events: EventLog,
}

impl BuyExecutor {
    pub fn new(venue: Arc<dyn TradingVenue>, quotes: Arc<QuoteBook>, events: EventLog) -> Self {
        Self {
            venue,
            quotes,
            events,
        }
    }

    fn transition(&self, symbol: &str, state: &mut ExecutionState, next: ExecutionState) {
        debug!(%symbol, from = state.name(), to = next.name(), "Execution transition");
        *state = next;
    }

    /// Held quantity and basis for `symbol`. Errors read as "unknown".
    async fn held(&self, symbol: &str) -> Option<(Decimal, Decimal)> {
        match self.venue.position(symbol).await {
            Ok(Some(p)) => Some((p.qty, p.basis_price)),
            Ok(None) => Some((Decimal::ZERO, Decimal::ZERO)),
            Err(e) => {
                debug!(%symbol, error = %e, "Position poll failed");
                None
            }
        }
    }

    /// A fill is a held quantity above what was held before the attempt.
    async fn detect_fill(&self, symbol: &str, baseline: Decimal) -> Option<Fill> {
        let (qty, basis) = self.held(symbol).await?;
        (qty > baseline).then_some(Fill {
            qty: qty - baseline,
            price: basis,
        })
    }

    /// Cancel every open buy for `symbol`.
    pub async fn cancel_open_buys(&self, symbol: &str) -> EngineResult<usize> {
        let orders = self.venue.open_orders().await?;
        let ids: Vec<String> = orders
            .into_iter()
            .filter(|o| o.symbol == symbol && o.side == OrderSide::Buy)
            .map(|o| o.id)
            .collect();
        let results = join_all(ids.iter().map(|id| self.venue.cancel_order(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(%symbol, order_id = %id, error = %e, "Failed to cancel stale buy");
            }
        }
        Ok(ids.len())
    }

    async fn cancel_resting(&self, symbol: &str, state: &ExecutionState) {
        if let Some((id, _)) = state.resting() {
            if let Err(e) = self.venue.cancel_order(id).await {
                warn!(%symbol, order_id = %id, error = %e, "Failed to cancel camped order");
            }
        }
    }

    fn filled(&self, symbol: &str, fill: Fill, via: &str) -> BuyOutcome {
        info!(%symbol, qty = %fill.qty, price = %fill.price, via, "Entry filled");
        self.events.emit(
            EventKind::Filled,
            Some(symbol),
            json!({ "qty": fill.qty, "price": fill.price, "via": via }),
        );
        BuyOutcome::Filled(fill)
    }

    pub async fn execute(&self, request: &BuyRequest) -> BuyOutcome {
        let instrument = &request.instrument;
        let symbol = instrument.symbol.as_str();
        let venue_symbol = instrument.venue_symbol();
        let tick = FeeSchedule::for_instrument(instrument).tick;
        let mut state = ExecutionState::Idle;

        if let Err(e) = self.cancel_open_buys(symbol).await {
            debug!(%symbol, error = %e, "Could not list open orders before camping");
        }
        let baseline = match self.held(symbol).await {
            Some((qty, _)) => qty,
            None => {
                let reason = "position unavailable".to_string();
                self.events
                    .emit(EventKind::Failed, Some(symbol), json!({ "reason": reason }));
                return BuyOutcome::Failed(reason);
            }
        };

        self.transition(
            symbol,
            &mut state,
            ExecutionState::Camping {
                order_id: None,
                limit: None,
            },
        );
        let deadline = Instant::now() + request.camp;

        while Instant::now() < deadline {
            let Some(quote) = self.quotes.fresh_quote(instrument, &request.freshness).await else {
                sleep(NO_QUOTE_WAIT).await;
                continue;
            };

            if let Some(fill) = self.detect_fill(symbol, baseline).await {
                self.cancel_resting(symbol, &state).await;
                self.transition(symbol, &mut state, ExecutionState::Filled(fill));
                return self.filled(symbol, fill, "maker");
            }

            let join = join_price(quote.bid, quote.ask, tick);
            let needs_post = match state.resting() {
                Some((_, limit)) => relative_diff(join, limit) > REQUOTE_THRESHOLD,
                None => true,
            };

            if needs_post {
                let previous = state.resting().map(|(id, limit)| (id.to_string(), limit));
                if let Some((old_id, _)) = &previous {
                    if let Err(e) = self.venue.cancel_order(old_id).await {
                        warn!(%symbol, order_id = %old_id, error = %e, "Cancel before re-quote failed");
                    }
                }

                let order = NewOrder::limit(&venue_symbol, OrderSide::Buy, request.qty, join, TimeInForce::Gtc);
                match self.venue.submit_order(&order).await {
                    Ok(placed) => {
                        let (kind, from) = match &previous {
                            Some((_, limit)) => (EventKind::Replaced, Some(*limit)),
                            None => (EventKind::Camped, None),
                        };
                        self.events.emit(
                            kind,
                            Some(symbol),
                            json!({ "order_id": placed.id, "limit": join, "from": from, "qty": request.qty }),
                        );
                        self.transition(
                            symbol,
                            &mut state,
                            ExecutionState::Camping {
                                order_id: Some(placed.id),
                                limit: Some(join),
                            },
                        );
                    }
                    Err(e) => {
                        warn!(%symbol, limit = %join, error = %e, "Camp order rejected");
                        self.transition(
                            symbol,
                            &mut state,
                            ExecutionState::Camping {
                                order_id: None,
                                limit: None,
                            },
                        );
                    }
                }
            }

            sleep(CAMP_POLL).await;
        }

        self.cancel_resting(symbol, &state).await;
        // The order may have filled between the last poll and the cancel.
        if let Some(fill) = self.detect_fill(symbol, baseline).await {
            self.transition(symbol, &mut state, ExecutionState::Filled(fill));
            return self.filled(symbol, fill, "maker");
        }

        self.transition(symbol, &mut state, ExecutionState::Unfilled);
        self.events.emit(
            EventKind::Unfilled,
            Some(symbol),
            json!({ "camp_secs": request.camp.as_secs() }),
        );
        if !request.taker_flip {
            return BuyOutcome::Unfilled;
        }

        self.transition(symbol, &mut state, ExecutionState::TakerAttempt);
        match self.take(request, &venue_symbol, baseline).await {
            Ok(fill) => {
                self.transition(symbol, &mut state, ExecutionState::Filled(fill));
                self.filled(symbol, fill, "taker")
            }
            Err(reason) => {
                warn!(%symbol, %reason, "Taker entry failed");
                self.events
                    .emit(EventKind::Failed, Some(symbol), json!({ "reason": reason }));
                self.transition(symbol, &mut state, ExecutionState::Failed(reason.clone()));
                BuyOutcome::Failed(reason)
            }
        }
    }

    async fn take(&self, request: &BuyRequest, venue_symbol: &str, baseline: Decimal) -> Result<Fill, String> {
        let instrument = &request.instrument;
        let symbol = instrument.symbol.as_str();
        let quote = self
            .quotes
            .fresh_quote(instrument, &request.freshness)
            .await
            .ok_or_else(|| "no live quote".to_string())?;

        self.events.emit(
            EventKind::TakerAttempt,
            Some(symbol),
            json!({ "ask": quote.ask, "qty": request.qty }),
        );
        let order = NewOrder::market(
            venue_symbol,
            OrderSide::Buy,
            request.qty,
            time_in_force_for(instrument.class),
        );
        self.venue
            .submit_order(&order)
            .await
            .map_err(|e| e.to_string())?;

        for attempt in 0..TAKER_CONFIRM_POLLS {
            if let Some(fill) = self.detect_fill(symbol, baseline).await {
                return Ok(fill);
            }
            if attempt + 1 < TAKER_CONFIRM_POLLS {
                sleep(TAKER_CONFIRM_WAIT).await;
            }
        }
        Err("fill not observed on venue".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{LimitFillMode, MockVenue, OrderType};

    fn policy() -> FreshnessPolicy {
        FreshnessPolicy {
            require_timestamp: true,
            max_age_crypto_ms: 60_000,
            max_age_equity_ms: 15_000,
        }
    }

    fn executor(venue: &MockVenue) -> (BuyExecutor, EventLog) {
        let events = EventLog::new(50);
        let quotes = Arc::new(QuoteBook::new(Arc::new(venue.clone()), vec!["us".into()]));
        (BuyExecutor::new(Arc::new(venue.clone()), quotes, events.clone()), events)
    }

    fn request(instrument: Instrument, taker_flip: bool) -> BuyRequest {
        BuyRequest {
            instrument,
            qty: dec!(0.5),
            camp: Duration::from_secs(5),
            taker_flip,
            freshness: policy(),
        }
    }

    #[test]
    fn test_join_price_stays_inside_spread() {
        assert_eq!(join_price(dec!(100), dec!(100.1), dec!(0.01)), dec!(100.01));
        // One-tick spread: ask - tick wins, never crossing
        assert_eq!(join_price(dec!(100), dec!(100.01), dec!(0.01)), dec!(100.00));
    }

    #[tokio::test]
    async fn test_camped_order_fills_as_maker() {
        tokio::time::pause();
        let venue = MockVenue::default();
        venue.state_mut().await.limit_fill = LimitFillMode::Immediate;
        venue.set_quote("BTCUSD", dec!(100), dec!(100.1)).await;
        let (executor, events) = executor(&venue);

        let outcome = executor.execute(&request(Instrument::crypto("BTCUSD"), true)).await;

        assert_eq!(
            outcome,
            BuyOutcome::Filled(Fill {
                qty: dec!(0.5),
                price: dec!(100.00001)
            })
        );
        let submitted = venue.submitted().await;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].order_type, OrderType::Limit);
        assert_eq!(submitted[0].symbol, "BTC/USD");
        let kinds: Vec<EventKind> = events.recent(10).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Camped, EventKind::Filled]);
    }

    #[tokio::test]
    async fn test_requotes_when_book_moves() {
        tokio::time::pause();
        let venue = MockVenue::default();
        venue.set_quote("ETHUSD", dec!(2000), dec!(2001)).await;
        let (executor, events) = executor(&venue);

        let mover = venue.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1500)).await;
            mover.set_quote("ETHUSD", dec!(2005), dec!(2006)).await;
        });

        let outcome = executor.execute(&request(Instrument::crypto("ETHUSD"), false)).await;
        assert_eq!(outcome, BuyOutcome::Unfilled);

        let limits: Vec<Decimal> = venue
            .submitted()
            .await
            .iter()
            .filter_map(|o| o.limit_price)
            .collect();
        assert_eq!(limits, vec![dec!(2000.00001), dec!(2005.00001)]);
        assert!(events.recent(20).iter().any(|e| e.kind == EventKind::Replaced));
        // Nothing left resting after the camp window.
        assert!(venue.open_order_list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unfilled_camp_flips_to_taker() {
        tokio::time::pause();
        let venue = MockVenue::default();
        venue.set_quote("AAPL", dec!(190), dec!(190.05)).await;
        let (executor, events) = executor(&venue);

        let outcome = executor.execute(&request(Instrument::equity("AAPL"), true)).await;

        assert_eq!(
            outcome,
            BuyOutcome::Filled(Fill {
                qty: dec!(0.5),
                price: dec!(190.05)
            })
        );
        let submitted = venue.submitted().await;
        let taker = submitted.last().unwrap();
        assert_eq!(taker.order_type, OrderType::Market);
        assert_eq!(taker.time_in_force, TimeInForce::Day);
        let kinds: Vec<EventKind> = events.recent(10).iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::Unfilled));
        assert!(kinds.contains(&EventKind::TakerAttempt));
    }

    #[tokio::test]
    async fn test_taker_rejection_is_terminal() {
        tokio::time::pause();
        let venue = MockVenue::default();
        venue.set_quote("SOLUSD", dec!(150), dec!(150.2)).await;
        let (executor, events) = executor(&venue);

        let flipper = venue.clone();
        tokio::spawn(async move {
            // After the camp window, before the taker order.
            sleep(Duration::from_millis(5100)).await;
            flipper.state_mut().await.reject_next_submit = Some(403);
        });

        let outcome = executor.execute(&request(Instrument::crypto("SOLUSD"), true)).await;
        assert!(matches!(outcome, BuyOutcome::Failed(_)));
        assert!(venue.position("SOLUSD").await.unwrap().is_none());
        assert_eq!(events.recent(10).last().map(|e| e.kind), Some(EventKind::Failed));
    }

    #[tokio::test]
    async fn test_stale_buys_cancelled_before_camping() {
        tokio::time::pause();
        let venue = MockVenue::default();
        venue.set_quote("LTCUSD", dec!(80), dec!(80.5)).await;
        venue
            .submit_order(&NewOrder::limit("LTC/USD", OrderSide::Buy, dec!(1), dec!(70), TimeInForce::Gtc))
            .await
            .unwrap();
        let (executor, _) = executor(&venue);

        assert_eq!(executor.cancel_open_buys("LTCUSD").await.unwrap(), 1);
        assert!(venue.open_order_list().await.is_empty());
    }
}
