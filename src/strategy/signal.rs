//! Entry evaluation.
//!
//! [`evaluate`] is a pure function of the current inputs. Gates run in a
//! fixed order and the first failing gate names the rejection.

use super::fees::{required_profit_bps, FeeSchedule};
use super::stats::SymbolStats;
use crate::config::Settings;
use crate::exchange::Quote;
use crate::market::instrument::Instrument;
use crate::utils::decimal::from_basis_points;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;

/// Absorbs quote jitter at the spread ceiling.
pub const SPREAD_EPSILON_BPS: Decimal = dec!(0.3);
/// Take-profit must clear the bid by more than this fraction.
pub const EDGE_EPSILON: Decimal = dec!(0.00005);
/// Crypto below this price trades on too coarse a tick.
pub const MIN_CRYPTO_PRICE: Decimal = dec!(1);
/// Minimum equity best-bid size.
pub const MIN_EQUITY_BID_SIZE: Decimal = dec!(1);
/// EMA period for the momentum slope.
const EMA_PERIOD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NoLiveQuote,
    MarketClosed,
    Blacklisted,
    CoarseTick,
    Spread,
    NoMomentum,
    Illiquid,
    NoEdge,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::NoLiveQuote => "no_live_quote",
            RejectReason::MarketClosed => "market_closed",
            RejectReason::Blacklisted => "blacklist",
            RejectReason::CoarseTick => "coarse_tick",
            RejectReason::Spread => "spread",
            RejectReason::NoMomentum => "no_momentum",
            RejectReason::Illiquid => "illiquid",
            RejectReason::NoEdge => "no_edge",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the evaluator looks at for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct EntryInputs<'a> {
    pub instrument: &'a Instrument,
    /// Already through the freshness gate. `None` means no usable quote.
    pub quote: Option<&'a Quote>,
    /// Equity session state. Ignored for crypto.
    pub market_open: bool,
    /// Recent one-minute closes, oldest first.
    pub closes: &'a [Decimal],
    pub stats: &'a SymbolStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySignal {
    pub quote: Quote,
    pub spread_bps: Decimal,
    pub required_profit_bps: Decimal,
    pub take_profit: Decimal,
    /// Last close-to-close move.
    pub v0: Decimal,
    /// Expected favorable move in price units.
    pub runway: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    Ready(EntrySignal),
    Rejected {
        reason: RejectReason,
        spread_bps: Option<Decimal>,
    },
}

impl EntryDecision {
    fn reject(reason: RejectReason) -> Self {
        EntryDecision::Rejected {
            reason,
            spread_bps: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, EntryDecision::Ready(_))
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            EntryDecision::Ready(_) => None,
            EntryDecision::Rejected { reason, .. } => Some(*reason),
        }
    }
}

fn ema(values: &[Decimal], period: u32) -> Vec<Decimal> {
    let k = dec!(2) / Decimal::from(period + 1);
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        let next = match out.last() {
            Some(prev) => *v * k + *prev * (Decimal::ONE - k),
            None => *v,
        };
        out.push(next);
    }
    out
}

/// Momentum rule: the last three closes strictly rising, or an upward
/// EMA(5) slope over the last six closes. Too little history passes.
pub fn momentum_ok(closes: &[Decimal]) -> bool {
    let n = closes.len();
    if n < 2 {
        return true;
    }
    let rising = n >= 3 && closes[n - 3] < closes[n - 2] && closes[n - 2] < closes[n - 1];
    if rising {
        return true;
    }
    let window = &closes[n.saturating_sub(6)..];
    let line = ema(window, EMA_PERIOD);
    line[line.len() - 1] > line[line.len() - 2]
}

fn last_move(closes: &[Decimal]) -> Decimal {
    match closes {
        [.., prev, last] => *last - *prev,
        _ => Decimal::ZERO,
    }
}

pub fn evaluate(settings: &Settings, inputs: EntryInputs<'_>) -> EntryDecision {
    let instrument = inputs.instrument;

    let quote = match inputs.quote {
        Some(q) if q.is_valid() => q,
        _ => return EntryDecision::reject(RejectReason::NoLiveQuote),
    };

    if !instrument.is_crypto() && !inputs.market_open {
        return EntryDecision::reject(RejectReason::MarketClosed);
    }

    if instrument.is_excluded() {
        return EntryDecision::reject(RejectReason::Blacklisted);
    }
    let mid = quote.mid();
    if instrument.is_crypto() && mid < MIN_CRYPTO_PRICE {
        return EntryDecision::reject(RejectReason::CoarseTick);
    }

    let spread_bps = quote.spread_bps();
    let rejected = |reason| EntryDecision::Rejected {
        reason,
        spread_bps: Some(spread_bps),
    };
    if spread_bps > settings.spread_max_bps + SPREAD_EPSILON_BPS {
        return rejected(RejectReason::Spread);
    }

    if settings.enforce_momentum && !momentum_ok(inputs.closes) {
        return rejected(RejectReason::NoMomentum);
    }

    if !instrument.is_crypto() {
        if let Some(size) = quote.bid_size {
            if size < MIN_EQUITY_BID_SIZE {
                return rejected(RejectReason::Illiquid);
            }
        }
    }

    let fees = FeeSchedule::for_instrument(instrument);
    let required = required_profit_bps(
        &fees,
        settings.risk_level,
        inputs.stats.slippage_bps,
        settings.net_min_profit_bps,
    );
    let take_profit = quote.bid * (Decimal::ONE + from_basis_points(required));
    if take_profit <= quote.bid * (Decimal::ONE + EDGE_EPSILON) {
        return rejected(RejectReason::NoEdge);
    }

    let v0 = last_move(inputs.closes);
    EntryDecision::Ready(EntrySignal {
        quote: quote.clone(),
        spread_bps,
        required_profit_bps: required,
        take_profit,
        v0,
        runway: inputs.stats.runway(v0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: Decimal, ask: Decimal) -> Quote {
        Quote {
            bid,
            ask,
            bid_size: Some(dec!(10)),
            ask_size: Some(dec!(10)),
            timestamp_ms: Some(0),
        }
    }

    fn run(settings: &Settings, instrument: &Instrument, q: Option<&Quote>, closes: &[Decimal]) -> EntryDecision {
        let stats = SymbolStats::default();
        evaluate(
            settings,
            EntryInputs {
                instrument,
                quote: q,
                market_open: true,
                closes,
                stats: &stats,
            },
        )
    }

    const RISING: &[Decimal] = &[dec!(99), dec!(99.5), dec!(100)];

    #[test]
    fn test_wide_spread_rejected() {
        let settings = Settings {
            spread_max_bps: dec!(26),
            ..Settings::default()
        };
        let q = quote(dec!(100), dec!(100.5));
        let decision = run(&settings, &Instrument::crypto("BTCUSD"), Some(&q), RISING);

        match decision {
            EntryDecision::Rejected { reason, spread_bps } => {
                assert_eq!(reason.as_str(), "spread");
                let bps = spread_bps.unwrap();
                assert!(bps > dec!(49) && bps < dec!(50), "{bps}");
            }
            other => panic!("expected spread rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_spread_epsilon_absorbs_boundary() {
        let settings = Settings {
            spread_max_bps: dec!(10),
            ..Settings::default()
        };
        // Exactly 10.2 bps: within ceiling + 0.3
        let q = quote(dec!(1000), dec!(1001.02));
        assert!(q.spread_bps() > dec!(10));
        assert!(run(&settings, &Instrument::crypto("ETHUSD"), Some(&q), RISING).is_ready());
    }

    #[test]
    fn test_gate_order() {
        let settings = Settings::default();
        let btc = Instrument::crypto("BTCUSD");
        let aapl = Instrument::equity("AAPL");
        let stats = SymbolStats::default();

        assert_eq!(run(&settings, &btc, None, RISING).reason(), Some(RejectReason::NoLiveQuote));
        let crossed = quote(Decimal::ZERO, dec!(1));
        assert_eq!(
            run(&settings, &btc, Some(&crossed), RISING).reason(),
            Some(RejectReason::NoLiveQuote)
        );

        let q = quote(dec!(100), dec!(100.01));
        let closed = evaluate(
            &settings,
            EntryInputs {
                instrument: &aapl,
                quote: Some(&q),
                market_open: false,
                closes: RISING,
                stats: &stats,
            },
        );
        assert_eq!(closed.reason(), Some(RejectReason::MarketClosed));

        let shib = Instrument::crypto("SHIBUSD");
        assert_eq!(run(&settings, &shib, Some(&q), RISING).reason(), Some(RejectReason::Blacklisted));

        let penny = quote(dec!(0.25), dec!(0.2501));
        assert_eq!(
            run(&settings, &Instrument::crypto("DOGEUSD"), Some(&penny), RISING).reason(),
            Some(RejectReason::CoarseTick)
        );
    }

    #[test]
    fn test_closed_market_does_not_gate_crypto() {
        let settings = Settings::default();
        let stats = SymbolStats::default();
        let q = quote(dec!(100), dec!(100.01));
        let decision = evaluate(
            &settings,
            EntryInputs {
                instrument: &Instrument::crypto("SOLUSD"),
                quote: Some(&q),
                market_open: false,
                closes: RISING,
                stats: &stats,
            },
        );
        assert!(decision.is_ready());
    }

    #[test]
    fn test_momentum_gate() {
        let falling = [dec!(101), dec!(100.5), dec!(100)];
        let q = quote(dec!(100), dec!(100.01));
        let btc = Instrument::crypto("BTCUSD");

        let strict = Settings::default();
        assert_eq!(run(&strict, &btc, Some(&q), &falling).reason(), Some(RejectReason::NoMomentum));

        let loose = Settings {
            enforce_momentum: false,
            ..Settings::default()
        };
        assert!(run(&loose, &btc, Some(&q), &falling).is_ready());
    }

    #[test]
    fn test_momentum_rule() {
        assert!(momentum_ok(&[]));
        assert!(momentum_ok(&[dec!(5)]));
        assert!(momentum_ok(&[dec!(1), dec!(2), dec!(3)]));
        // Not three rising, but the EMA still turns up on the last close
        assert!(momentum_ok(&[dec!(1), dec!(3), dec!(2)]));
        // Bounce that stays under the EMA
        assert!(!momentum_ok(&[dec!(3), dec!(1), dec!(2)]));
        assert!(!momentum_ok(&[dec!(3), dec!(2), dec!(1)]));
        assert!(!momentum_ok(&[dec!(1), dec!(2), dec!(3), dec!(4), dec!(5), dec!(1)]));
    }

    #[test]
    fn test_illiquid_equity() {
        let settings = Settings::default();
        let mut q = quote(dec!(50), dec!(50.01));
        q.bid_size = Some(dec!(0.5));
        assert_eq!(
            run(&settings, &Instrument::equity("AAPL"), Some(&q), RISING).reason(),
            Some(RejectReason::Illiquid)
        );
        // Crypto has no size gate
        assert!(run(&settings, &Instrument::crypto("ETHUSD"), Some(&q), RISING).is_ready());
    }

    #[test]
    fn test_ready_signal_carries_take_profit_and_runway() {
        let settings = Settings::default();
        let q = quote(dec!(100), dec!(100.01));
        let EntryDecision::Ready(signal) = run(&settings, &Instrument::crypto("BTCUSD"), Some(&q), RISING) else {
            panic!("expected ready");
        };
        // Crypto risk 1: 40 + 0.5 + 4
        assert_eq!(signal.required_profit_bps, dec!(44.5));
        assert_eq!(signal.take_profit, dec!(100.445));
        assert_eq!(signal.v0, dec!(0.5));
        // 0.5² / (2·8)
        assert_eq!(signal.runway, dec!(0.015625));
    }
}
