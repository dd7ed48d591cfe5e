//! Market model: instruments, the tradable universe, quote and clock caches.

pub mod clock;
pub mod instrument;
pub mod quotes;

pub use clock::MarketClockCache;
pub use instrument::{AssetClass, Instrument, Universe};
pub use quotes::{FreshnessPolicy, QuoteBook};
