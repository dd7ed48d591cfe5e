//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Fee and profit-floor arithmetic
//! - Per-symbol spread, slippage and drag statistics
//! - Entry evaluation and the paged scan scheduler
//! - Maker-camping buy execution with taker fallback
//! - Post-fill outcome sampling

pub mod executor;
pub mod fees;
mod outcome;
mod scanner;
pub mod signal;
pub mod stats;

pub use executor::{
    join_price, time_in_force_for, BuyExecutor, BuyOutcome, BuyRequest, ExecutionState, Fill,
};
pub use fees::{required_profit_bps, FeeSchedule, ProfitFloor};
pub use outcome::{spawn_outcome_watch, watch_outcome, OutcomeWatch, OUTCOME_HORIZON, OUTCOME_STEP};
pub use scanner::{ScanScheduler, ScanStats};
pub use signal::{evaluate, EntryDecision, EntryInputs, EntrySignal, RejectReason};
pub use stats::{HourStats, StatsBook, SymbolStats};
