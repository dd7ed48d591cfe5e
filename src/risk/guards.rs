//! Portfolio-level entry guards.
//!
//! A guard that fires is a normal outcome, not a failure: callers log it and
//! emit a `guard` event, then move on to the next symbol.

use crate::config::Settings;
use crate::exchange::{AccountSnapshot, Position};
use crate::market::instrument::Instrument;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};

/// Positions worth less than this are not counted against the cap.
const MIN_COUNTED_VALUE_USD: Decimal = dec!(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    DailyLoss,
    DailyProfit,
}

impl HaltReason {
    pub fn as_str(self) -> &'static str {
        match self {
            HaltReason::DailyLoss => "daily_loss",
            HaltReason::DailyProfit => "daily_profit",
        }
    }
}

/// Why an otherwise-ready entry was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardBlock {
    #[error("entries halted ({})", .0.as_str())]
    Halted(HaltReason),
    #[error("pattern day trader protection")]
    Pdt,
    #[error("concurrency cap reached ({open}/{cap})")]
    ConcurrencyCap { open: usize, cap: usize },
    #[error("position already held")]
    AlreadyHeld,
}

impl GuardBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardBlock::Halted(_) => "halt",
            GuardBlock::Pdt => "pdt",
            GuardBlock::ConcurrencyCap { .. } => "concurrency_cap",
            GuardBlock::AlreadyHeld => "held",
        }
    }
}

/// Base cap widened for tight markets and narrowed for wide ones.
pub fn concurrency_cap(base: usize, avg_spread_bps: Option<Decimal>) -> usize {
    let Some(avg) = avg_spread_bps else {
        return base;
    };
    if avg < dec!(6) {
        base + 4
    } else if avg < dec!(10) {
        base + 2
    } else if avg < dec!(16) {
        base
    } else {
        base.saturating_sub(2).max(2)
    }
}

/// Positions that count against the concurrency cap.
pub fn open_entry_count(positions: &[Position]) -> usize {
    positions
        .iter()
        .filter(|p| p.qty > Decimal::ZERO && p.market_value > MIN_COUNTED_VALUE_USD)
        .filter(|p| !Instrument::parse(&p.symbol).is_stablecoin())
        .count()
}

pub fn check_concurrency(open: usize, cap: usize) -> Result<(), GuardBlock> {
    if open >= cap {
        return Err(GuardBlock::ConcurrencyCap { open, cap });
    }
    Ok(())
}

/// True when new equity entries must be skipped to avoid PDT flags.
pub fn pdt_blocked(settings: &Settings, account: &AccountSnapshot) -> bool {
    settings.avoid_pdt
        && (account.pattern_day_trader
            || account.equity < settings.pdt_equity_threshold_usd
            || account.daytrade_count >= settings.pdt_max_day_trades)
}

/// Sticky daily halt, re-evaluated only when a new account snapshot arrives.
#[derive(Debug, Default)]
pub struct DailyHalt {
    reason: Option<HaltReason>,
}

impl DailyHalt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reason(&self) -> Option<HaltReason> {
        self.reason
    }

    pub fn check(&self) -> Result<(), GuardBlock> {
        match self.reason {
            Some(reason) => Err(GuardBlock::Halted(reason)),
            None => Ok(()),
        }
    }

    /// Evaluate a fresh snapshot. Returns the new halt reason when it changed.
    pub fn update(&mut self, settings: &Settings, account: &AccountSnapshot) -> Option<Option<HaltReason>> {
        let next = account.daily_change_pct.and_then(|change| {
            if settings.halt_on_daily_loss && change <= -settings.daily_max_loss_pct.abs() {
                Some(HaltReason::DailyLoss)
            } else if settings.halt_on_daily_profit && change >= settings.daily_profit_target_pct {
                Some(HaltReason::DailyProfit)
            } else {
                None
            }
        });

        if next == self.reason {
            return None;
        }
        match next {
            Some(reason) => warn!(
                reason = reason.as_str(),
                change_pct = ?account.daily_change_pct,
                "Entries halted for the session"
            ),
            None => info!(change_pct = ?account.daily_change_pct, "Daily halt cleared"),
        }
        self.reason = next;
        Some(next)
    }
}

/// Positions small enough to sweep: below `max_usd`, nothing resting to sell them.
pub fn dust_candidates<'a>(
    positions: &'a [Position],
    resting_sell_symbols: &HashSet<String>,
    max_usd: Decimal,
) -> Vec<&'a Position> {
    positions
        .iter()
        .filter(|p| p.qty > Decimal::ZERO && p.market_value < max_usd)
        .filter(|p| !resting_sell_symbols.contains(&p.symbol))
        .collect()
}
