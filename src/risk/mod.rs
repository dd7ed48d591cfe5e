//! Exit management and portfolio protection.
//!
//! - Per-position exit state machine (stops, trailing, time exit, take-profit)
//! - Risk manager driving it on the maintenance cadence
//! - Portfolio guards: concurrency cap, PDT gate, daily halt, dust sweep
//! - Entry sizing and the throttled account monitor

mod account;
mod guards;
mod locks;
mod manager;
mod sizing;
pub mod trade_state;

pub use account::{AccountMonitor, ACCOUNT_REFRESH};
pub use guards::{
    check_concurrency, concurrency_cap, dust_candidates, open_entry_count, pdt_blocked, DailyHalt,
    GuardBlock, HaltReason,
};
pub use locks::SymbolLocks;
pub use manager::{MaintenanceSummary, RiskManager, TradeBook, STALE_BUY_SECS};
pub use sizing::{size_entry, EntrySize};
pub use trade_state::{ExitReason, Phase, TradeState};
