//! Per-position exit state machine.
//!
//! A [`TradeState`] is created when an entry fills (or an untracked venue
//! position is adopted) and moves through
//!
//! ```text
//! Entered -> Armed -> Trailing -> Exiting -> Closed
//!               \___________________/^
//! ```
//!
//! [`TradeState::on_tick`] is pure apart from mutating the state itself: it
//! takes the current bid and returns the single [`RiskAction`] the manager
//! should carry out. Venue calls and events live in the manager.

use crate::config::{ExitGuard, Settings};
use crate::exchange::Position;
use crate::market::instrument::Instrument;
use crate::strategy::fees::{clears_fee_floor, meets_min_profit, min_exit_price, projected_net_pnl, FeeSchedule, ProfitFloor};
use crate::strategy::signal::MIN_EQUITY_BID_SIZE;
use crate::utils::decimal::{ceil_to_tick, from_basis_points, relative_diff};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;

/// Bid within this many bps of the take-profit counts as a touch.
pub const TOUCH_EPSILON_BPS: Decimal = dec!(0.2);
/// A gap longer than this between touches starts a new touch sequence.
pub const TOUCH_RESET_GAP_SECS: i64 = 10;
/// An exit whose sell is no longer working is retried after this long.
pub const EXIT_RECHECK_SECS: i64 = 3;
/// An exit still held after this long is retried even with a sell working.
pub const EXIT_GRACE_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    HardStop,
    TrailingStop,
    SoftStop,
    TimeExit,
    TouchFlip,
    /// Touch persisted past the flip timeout.
    ForcedTouchFlip,
    Dust,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::HardStop => "hard_stop",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::SoftStop => "soft_stop",
            ExitReason::TimeExit => "time_exit",
            ExitReason::TouchFlip => "touch_flip",
            ExitReason::ForcedTouchFlip => "forced_touch_flip",
            ExitReason::Dust => "dust",
        }
    }

    pub fn is_stop(self) -> bool {
        matches!(self, ExitReason::HardStop | ExitReason::TrailingStop | ExitReason::SoftStop)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// Held, stops not armed yet.
    Entered,
    Armed { stop: Decimal, hard_stop: Decimal },
    Trailing {
        stop: Decimal,
        hard_stop: Decimal,
        peak: Decimal,
    },
    /// Market sell submitted, waiting for the position to clear.
    Exiting {
        reason: ExitReason,
        order_id: Option<String>,
        since: DateTime<Utc>,
    },
    Closed,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Entered => "entered",
            Phase::Armed { .. } => "armed",
            Phase::Trailing { .. } => "trailing",
            Phase::Exiting { .. } => "exiting",
            Phase::Closed => "closed",
        }
    }

    pub fn stop(&self) -> Option<Decimal> {
        match self {
            Phase::Armed { stop, .. } | Phase::Trailing { stop, .. } => Some(*stop),
            _ => None,
        }
    }
}

/// Consecutive take-profit touches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TouchMemo {
    pub count: u32,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

impl TouchMemo {
    fn start(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            first_at: now,
            last_at: now,
        }
    }

    fn touched(memo: Option<Self>, now: DateTime<Utc>) -> Self {
        match memo {
            Some(m) if now - m.last_at <= Duration::seconds(TOUCH_RESET_GAP_SECS) => Self {
                count: m.count + 1,
                first_at: m.first_at,
                last_at: now,
            },
            _ => Self::start(now),
        }
    }

    fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.first_at).num_seconds()
    }
}

/// Resting limit sell as last polled from the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct RestingSell {
    pub order_id: String,
    pub limit: Decimal,
}

/// Market inputs for one maintenance tick.
#[derive(Debug, Clone)]
pub struct Tick {
    pub bid: Decimal,
    pub bid_size: Option<Decimal>,
    pub now: DateTime<Utc>,
    /// Required profit margin from the current fee model and statistics.
    pub required_bps: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskAction {
    Hold,
    MarketExit { reason: ExitReason },
    /// Post a limit sell, cancelling `replace` first when set.
    PostTakeProfit { limit: Decimal, replace: Option<String> },
    KeepTakeProfit,
}

/// Things worth an event that happened during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskNote {
    StopsArmed { stop: Decimal, hard_stop: Decimal },
    TrailArmed { peak: Decimal },
    Touch { count: u32 },
    TakerBlocked { bid: Decimal },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickPlan {
    pub action: RiskAction,
    pub notes: Vec<RiskNote>,
}

/// Take-profit bounded by the expected runway, never below the fee floor.
pub fn target_take_profit(entry: Decimal, required_bps: Decimal, runway: Decimal, fee_floor: Decimal) -> Decimal {
    let base = entry * (Decimal::ONE + from_basis_points(required_bps));
    base.min(entry + runway).max(fee_floor)
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeState {
    pub instrument: Instrument,
    pub entry_price: Decimal,
    pub qty: Decimal,
    pub take_profit: Decimal,
    pub fee_floor: Decimal,
    pub runway: Decimal,
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
    pub last_limit_post: Option<DateTime<Utc>>,
    pub touch: Option<TouchMemo>,
    /// Found on the venue rather than opened by this process.
    pub adopted: bool,
}

impl TradeState {
    /// State for a confirmed fill.
    pub fn opened(
        instrument: Instrument,
        entry_price: Decimal,
        qty: Decimal,
        required_bps: Decimal,
        runway: Decimal,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Self {
        let fees = FeeSchedule::for_instrument(&instrument);
        let fee_floor = min_exit_price(entry_price, qty, &fees, &ProfitFloor::from(settings));
        Self {
            instrument,
            entry_price,
            qty,
            take_profit: target_take_profit(entry_price, required_bps, runway, fee_floor),
            fee_floor,
            runway,
            phase: Phase::Entered,
            entered_at: now,
            last_limit_post: None,
            touch: None,
            adopted: false,
        }
    }

    /// State for a venue position this process did not open. Entry is the
    /// venue basis and the hold clock starts now.
    pub fn adopted(position: &Position, settings: &Settings, now: DateTime<Utc>) -> Self {
        let instrument = Instrument::parse(&position.symbol);
        let entry = if position.basis_price > Decimal::ZERO {
            position.basis_price
        } else {
            position.mark_price.unwrap_or_default()
        };
        let mut state = Self::opened(instrument, entry, position.qty, Decimal::ZERO, Decimal::ZERO, settings, now);
        state.adopted = true;
        state
    }

    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    pub fn is_exiting(&self) -> bool {
        matches!(self.phase, Phase::Exiting { .. } | Phase::Closed)
    }

    /// Adopt the venue's quantity. Returns the local quantity it replaced
    /// when the two disagreed.
    pub fn reconcile_qty(&mut self, venue_qty: Decimal, settings: &Settings) -> Option<Decimal> {
        if venue_qty == self.qty {
            return None;
        }
        let previous = self.qty;
        self.qty = venue_qty;
        self.refresh_fee_floor(settings);
        Some(previous)
    }

    fn refresh_fee_floor(&mut self, settings: &Settings) {
        let fees = FeeSchedule::for_instrument(&self.instrument);
        self.fee_floor = min_exit_price(self.entry_price, self.qty, &fees, &ProfitFloor::from(settings));
        self.take_profit = self.take_profit.max(self.fee_floor);
    }

    /// Limit price a take-profit order is posted at.
    pub fn final_limit(&self) -> Decimal {
        let tick = FeeSchedule::for_instrument(&self.instrument).tick;
        ceil_to_tick(self.take_profit.max(self.fee_floor), tick)
    }

    pub fn mark_exiting(&mut self, reason: ExitReason, now: DateTime<Utc>) {
        self.phase = Phase::Exiting {
            reason,
            order_id: None,
            since: now,
        };
        self.touch = None;
    }

    pub fn record_exit_order(&mut self, id: &str) {
        if let Phase::Exiting { order_id, .. } = &mut self.phase {
            *order_id = Some(id.to_string());
        }
    }

    /// Re-open an exit the venue did not complete. Called while the position
    /// is still held; `sell_working` is whether any sell for the symbol is
    /// still open. Returns the abandoned exit's reason when the state resumed.
    pub fn retry_stalled_exit(&mut self, now: DateTime<Utc>, sell_working: bool) -> Option<ExitReason> {
        let Phase::Exiting { reason, since, .. } = self.phase else {
            return None;
        };
        let waited = now - since;
        let stalled = waited >= Duration::seconds(EXIT_GRACE_SECS)
            || (!sell_working && waited >= Duration::seconds(EXIT_RECHECK_SECS));
        if !stalled {
            return None;
        }
        self.resume();
        Some(reason)
    }

    /// An exit that did not go through. Stops re-arm from entry on the next tick.
    pub fn resume(&mut self) {
        if matches!(self.phase, Phase::Exiting { .. }) {
            self.phase = Phase::Entered;
        }
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.touch = None;
    }

    pub fn record_post(&mut self, now: DateTime<Utc>) {
        self.last_limit_post = Some(now);
    }

    fn arm_stops(&mut self, settings: &Settings) -> Option<RiskNote> {
        if self.phase != Phase::Entered {
            return None;
        }
        let stop = self.entry_price * (Decimal::ONE - from_basis_points(settings.stop_loss_bps));
        let hard_stop = self.entry_price * (Decimal::ONE - settings.hard_stop_loss_pct / dec!(100));
        self.phase = Phase::Armed { stop, hard_stop };
        Some(RiskNote::StopsArmed { stop, hard_stop })
    }

    /// Arm or advance the trailing stop. Returns true when the bid is at or
    /// below the trailing stop.
    fn update_trailing(&mut self, bid: Decimal, settings: &Settings, notes: &mut Vec<RiskNote>) -> bool {
        let trail = Decimal::ONE - from_basis_points(settings.trailing_stop_bps);
        match self.phase.clone() {
            Phase::Armed { stop, hard_stop } => {
                let arm_at = self.entry_price * (Decimal::ONE + from_basis_points(settings.trail_start_bps));
                if bid < arm_at {
                    return false;
                }
                let trail_stop = bid * trail;
                self.phase = Phase::Trailing {
                    stop: stop.max(trail_stop),
                    hard_stop,
                    peak: bid,
                };
                notes.push(RiskNote::TrailArmed { peak: bid });
                bid <= trail_stop
            }
            Phase::Trailing { stop, hard_stop, peak } => {
                let peak = peak.max(bid);
                let trail_stop = peak * trail;
                self.phase = Phase::Trailing {
                    stop: stop.max(trail_stop),
                    hard_stop,
                    peak,
                };
                bid <= trail_stop
            }
            _ => false,
        }
    }

    fn profit_guard(&self, bid: Decimal, settings: &Settings) -> bool {
        match settings.taker_exit_guard {
            ExitGuard::Fee => clears_fee_floor(bid, self.fee_floor),
            ExitGuard::Min => meets_min_profit(
                self.entry_price,
                self.qty,
                bid,
                &FeeSchedule::for_instrument(&self.instrument),
                &ProfitFloor::from(settings),
            ),
        }
    }

    /// Run one maintenance tick. Steps run in order and the first exit wins.
    pub fn on_tick(&mut self, tick: &Tick, resting: Option<&RestingSell>, settings: &Settings) -> TickPlan {
        let mut notes = Vec::new();
        let plan = |action, notes| TickPlan { action, notes };

        if self.is_exiting() {
            return plan(RiskAction::Hold, notes);
        }
        let bid = tick.bid;

        if settings.enable_stops {
            notes.extend(self.arm_stops(settings));

            if let Phase::Armed { hard_stop, .. } | Phase::Trailing { hard_stop, .. } = self.phase {
                if bid <= hard_stop {
                    return plan(RiskAction::MarketExit { reason: ExitReason::HardStop }, notes);
                }
            }

            if settings.enable_trailing && self.update_trailing(bid, settings, &mut notes) {
                return plan(RiskAction::MarketExit { reason: ExitReason::TrailingStop }, notes);
            }

            if let Some(stop) = self.phase.stop() {
                if bid <= stop {
                    return plan(RiskAction::MarketExit { reason: ExitReason::SoftStop }, notes);
                }
            }
        }

        let fees = FeeSchedule::for_instrument(&self.instrument);
        if tick.now - self.entered_at >= Duration::minutes(settings.max_hold_min as i64) {
            let net = projected_net_pnl(self.entry_price, self.qty, bid, &fees);
            if net >= settings.max_time_loss_usd {
                return plan(RiskAction::MarketExit { reason: ExitReason::TimeExit }, notes);
            }
        }

        self.refresh_fee_floor(settings);
        self.take_profit = target_take_profit(self.entry_price, tick.required_bps, self.runway, self.fee_floor);
        let limit = self.final_limit();

        if settings.taker_exit_on_touch {
            let touch_at = limit * (Decimal::ONE - from_basis_points(TOUCH_EPSILON_BPS));
            if bid >= touch_at {
                let memo = TouchMemo::touched(self.touch, tick.now);
                self.touch = Some(memo);
                notes.push(RiskNote::Touch { count: memo.count });

                let size_ok = self.instrument.is_crypto()
                    || tick.bid_size.map_or(true, |s| s >= MIN_EQUITY_BID_SIZE);
                let ticks_ready = memo.count >= settings.touch_ticks_required && size_ok;
                let timed_out = memo.age_secs(tick.now) >= settings.touch_flip_timeout_secs as i64;

                if ticks_ready || timed_out {
                    if self.profit_guard(bid, settings) {
                        let reason = if ticks_ready {
                            ExitReason::TouchFlip
                        } else {
                            ExitReason::ForcedTouchFlip
                        };
                        return plan(RiskAction::MarketExit { reason }, notes);
                    }
                    notes.push(RiskNote::TakerBlocked { bid });
                }
            } else {
                self.touch = None;
            }
        }

        let action = match resting {
            None => RiskAction::PostTakeProfit { limit, replace: None },
            Some(order) => {
                let drifted = relative_diff(order.limit, limit) > settings.tp_replace_drift_pct / dec!(100);
                let aged = self
                    .last_limit_post
                    .map_or(true, |at| tick.now - at > Duration::seconds(settings.tp_replace_interval_secs as i64));
                if drifted || aged {
                    RiskAction::PostTakeProfit {
                        limit,
                        replace: Some(order.order_id.clone()),
                    }
                } else {
                    RiskAction::KeepTakeProfit
                }
            }
        };
        plan(action, notes)
    }
}
