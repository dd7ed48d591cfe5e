//! Throttled account snapshot and the daily halt it drives.

use super::guards::{DailyHalt, GuardBlock, HaltReason};
use crate::config::Settings;
use crate::events::{EventKind, EventLog};
use crate::exchange::{AccountSnapshot, TradingVenue};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Minimum age before the account summary is fetched again.
pub const ACCOUNT_REFRESH: Duration = Duration::from_secs(30);

pub struct AccountMonitor {
    venue: Arc<dyn TradingVenue>,
    events: EventLog,
    cached: RwLock<Option<(AccountSnapshot, Instant)>>,
    halt: RwLock<DailyHalt>,
}

impl AccountMonitor {
    pub fn new(venue: Arc<dyn TradingVenue>, events: EventLog) -> Self {
        Self {
            venue,
            events,
            cached: RwLock::new(None),
            halt: RwLock::new(DailyHalt::new()),
        }
    }

    /// Current snapshot, fetched at most once per [`ACCOUNT_REFRESH`]. A failed
    /// fetch falls back to the last good snapshot.
    pub async fn snapshot(&self, settings: &Settings) -> Option<AccountSnapshot> {
        if let Some((snapshot, at)) = self.cached.read().await.as_ref() {
            if at.elapsed() < ACCOUNT_REFRESH {
                return Some(snapshot.clone());
            }
        }
        self.refresh(settings).await
    }

    /// Fetch unconditionally and re-evaluate the daily halt.
    pub async fn refresh(&self, settings: &Settings) -> Option<AccountSnapshot> {
        match self.venue.account().await {
            Ok(snapshot) => {
                debug!(
                    equity = %snapshot.equity,
                    buying_power = %snapshot.buying_power,
                    change_pct = ?snapshot.daily_change_pct,
                    "Account refreshed"
                );
                self.apply_halt(settings, &snapshot).await;
                *self.cached.write().await = Some((snapshot.clone(), Instant::now()));
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Account refresh failed");
                self.cached.read().await.as_ref().map(|(s, _)| s.clone())
            }
        }
    }

    async fn apply_halt(&self, settings: &Settings, snapshot: &AccountSnapshot) {
        let changed = self.halt.write().await.update(settings, snapshot);
        if let Some(reason) = changed {
            self.events.emit(
                EventKind::Halt,
                None,
                json!({
                    "halted": reason.is_some(),
                    "reason": reason.map(HaltReason::as_str),
                    "daily_change_pct": snapshot.daily_change_pct,
                }),
            );
        }
    }

    pub async fn halt_check(&self) -> Result<(), GuardBlock> {
        self.halt.read().await.check()
    }

    pub async fn halt_reason(&self) -> Option<HaltReason> {
        self.halt.read().await.reason()
    }
}
