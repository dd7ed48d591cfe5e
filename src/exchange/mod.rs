//! Venue integrations.
//!
//! ## Alpaca
//! - Trading API: account, orders, positions, assets, market clock
//! - Market data API: latest quotes and trades, minute bars, for crypto
//!   (per data location) and equities
//!
//! All calls go through [`http::ResilientClient`], the single retry layer.

mod client;
mod data;
pub mod http;
#[cfg(test)]
pub mod mock;
mod traits;
mod types;

pub use client::{auth_headers, AlpacaClient};
pub use data::AlpacaDataClient;
pub use http::{HttpRequest, ResilientClient, RetryPolicy};
#[cfg(test)]
pub use mock::{LimitFillMode, MockVenue};
pub use traits::{MarketData, TradingVenue};
#[cfg(test)]
pub use traits::MockMarketData;
pub use types::*;
