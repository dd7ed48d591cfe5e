//! Cached equity market clock.

use crate::exchange::TradingVenue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

pub const CLOCK_TTL: Duration = Duration::from_secs(30);

pub struct MarketClockCache {
    venue: Arc<dyn TradingVenue>,
    cached: RwLock<Option<(bool, Instant)>>,
}

impl MarketClockCache {
    pub fn new(venue: Arc<dyn TradingVenue>) -> Self {
        Self {
            venue,
            cached: RwLock::new(None),
        }
    }

    /// Whether the equity session is open. A failed lookup reads as closed
    /// and is not cached, so the next call retries.
    pub async fn is_open(&self) -> bool {
        if let Some((open, at)) = *self.cached.read().await {
            if at.elapsed() < CLOCK_TTL {
                return open;
            }
        }

        match self.venue.clock().await {
            Ok(clock) => {
                *self.cached.write().await = Some((clock.is_open, Instant::now()));
                clock.is_open
            }
            Err(e) => {
                warn!(error = %e, "Market clock unavailable, treating equities as closed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockVenue;

    #[tokio::test]
    async fn test_clock_is_cached_for_ttl() {
        tokio::time::pause();
        let venue = MockVenue::default();
        let clock = MarketClockCache::new(Arc::new(venue.clone()));
        assert!(clock.is_open().await);

        venue.state_mut().await.clock_open = false;
        assert!(clock.is_open().await, "cached value still served");

        tokio::time::advance(CLOCK_TTL + Duration::from_secs(1)).await;
        assert!(!clock.is_open().await);
    }
}
