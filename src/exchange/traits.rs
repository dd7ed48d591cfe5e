//! Venue seams.
//!
//! The engine talks to the brokerage and the market data service only
//! through these traits, so the live Alpaca clients and the in-memory mock
//! are interchangeable.

use super::types::{
    AccountSnapshot, AssetInfo, Bar, MarketClock, NewOrder, Order, Position, Quote, Trade,
};
use crate::error::EngineResult;
use crate::market::instrument::AssetClass;
use async_trait::async_trait;
use std::collections::HashMap;

/// Brokerage operations. Every read is authoritative; every write is
/// confirmed by a later read rather than by trusting the response.
#[async_trait]
pub trait TradingVenue: Send + Sync {
    async fn account(&self) -> EngineResult<AccountSnapshot>;

    async fn open_orders(&self) -> EngineResult<Vec<Order>>;

    async fn submit_order(&self, order: &NewOrder) -> EngineResult<Order>;

    async fn cancel_order(&self, order_id: &str) -> EngineResult<()>;

    async fn positions(&self) -> EngineResult<Vec<Position>>;

    /// `None` when the venue holds nothing for `symbol`.
    async fn position(&self, symbol: &str) -> EngineResult<Option<Position>>;

    async fn asset(&self, symbol: &str) -> EngineResult<Option<AssetInfo>>;

    async fn clock(&self) -> EngineResult<MarketClock>;

    async fn crypto_assets(&self) -> EngineResult<Vec<AssetInfo>>;
}

/// Market data operations. Maps are keyed by venue-format symbol.
///
/// `location` selects the crypto data region and is ignored for equities.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn latest_quotes(
        &self,
        class: AssetClass,
        location: Option<String>,
        symbols: Vec<String>,
    ) -> EngineResult<HashMap<String, Quote>>;

    async fn latest_trades(
        &self,
        class: AssetClass,
        location: Option<String>,
        symbols: Vec<String>,
    ) -> EngineResult<HashMap<String, Trade>>;

    /// One-minute bars, oldest first.
    async fn minute_bars(
        &self,
        class: AssetClass,
        location: Option<String>,
        symbols: Vec<String>,
        limit: usize,
    ) -> EngineResult<HashMap<String, Vec<Bar>>>;
}
