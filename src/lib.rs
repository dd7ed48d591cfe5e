//! # Bullish Engine
//!
//! An autonomous, fee-aware trading engine for crypto and US equities on
//! Alpaca. It scans for tight-spread symbols with upward momentum, enters by
//! camping a maker bid with a taker fallback, and manages every position
//! with a take-profit above the fee floor plus stops, trailing and time exits.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading, settings bounds and presets
//! - `error`: Typed error taxonomy
//! - `events`: Structured event stream
//! - `exchange`: Resilient HTTP client, Alpaca trading and market data clients
//! - `market`: Instruments, universe, quote cache and market clock
//! - `strategy`: Fee model, entry evaluation, buy execution, scan scheduling
//! - `risk`: Trade state machine, risk manager, portfolio guards, sizing
//! - `engine`: Wiring, periodic loops with clean shutdown, health check
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod exchange;
pub mod market;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
