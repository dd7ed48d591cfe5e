//! Engine wiring and the periodic loops.
//!
//! Four loops run as separate tasks against shared state:
//! - scan: entry evaluation and execution
//! - maintenance: exits, take-profits, reconciliation
//! - dust: sweeps positions too small to manage
//! - universe: hourly crypto universe refresh
//!
//! Each loop sleeps for its interval after a tick completes and checks the
//! shutdown signal only between ticks, so in-flight venue calls always run
//! to their own timeout.

pub mod health;

pub use health::{check_health, HealthReport, HEALTH_SYMBOLS};

use crate::config::{Config, Settings, SettingsHandle};
use crate::events::EventLog;
use crate::exchange::{auth_headers, AlpacaClient, AlpacaDataClient, MarketData, ResilientClient, TradingVenue};
use crate::market::clock::MarketClockCache;
use crate::market::instrument::Universe;
use crate::market::quotes::{FreshnessPolicy, QuoteBook};
use crate::risk::{AccountMonitor, RiskManager, SymbolLocks};
use crate::strategy::{ScanScheduler, StatsBook};
use anyhow::{Context, Result};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Recent events kept for inspection.
pub const EVENT_BUFFER: usize = 200;

pub const UNIVERSE_REFRESH: Duration = Duration::from_secs(3600);

/// Fully wired engine. Cheap to share behind an `Arc`.
pub struct Engine {
    settings: SettingsHandle,
    venue: Arc<dyn TradingVenue>,
    quotes: Arc<QuoteBook>,
    account: Arc<AccountMonitor>,
    risk: Arc<RiskManager>,
    scanner: Arc<ScanScheduler>,
    events: EventLog,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Wire the live Alpaca clients. Both share one resilient HTTP client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = Arc::new(
            ResilientClient::new(&config.http, &auth_headers(&config.venue))
                .context("Failed to build HTTP client")?,
        );
        let venue: Arc<dyn TradingVenue> =
            Arc::new(AlpacaClient::with_http(http.clone(), &config.venue.trading_url));
        let data: Arc<dyn MarketData> = Arc::new(AlpacaDataClient::with_http(http, &config.venue.data_url));

        Ok(Self::with_venue(
            venue,
            data,
            config.venue.crypto_locations.clone(),
            config.settings.clone(),
        ))
    }

    /// Wire the engine around any venue and data source.
    pub fn with_venue(
        venue: Arc<dyn TradingVenue>,
        data: Arc<dyn MarketData>,
        locations: Vec<String>,
        settings: Settings,
    ) -> Self {
        let events = EventLog::new(EVENT_BUFFER);
        let quotes = Arc::new(QuoteBook::new(data, locations));
        let stats = Arc::new(StatsBook::new());
        let account = Arc::new(AccountMonitor::new(venue.clone(), events.clone()));
        let risk = Arc::new(RiskManager::new(
            venue.clone(),
            quotes.clone(),
            stats.clone(),
            Arc::new(RwLock::new(HashMap::new())),
            SymbolLocks::new(),
            events.clone(),
        ));
        let scanner = Arc::new(ScanScheduler::new(
            venue.clone(),
            quotes.clone(),
            Arc::new(MarketClockCache::new(venue.clone())),
            stats,
            account.clone(),
            risk.clone(),
            events.clone(),
            Universe::fallback(),
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            settings: SettingsHandle::new(settings),
            venue,
            quotes,
            account,
            risk,
            scanner,
            events,
            shutdown,
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn scanner(&self) -> &Arc<ScanScheduler> {
        &self.scanner
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn account(&self) -> &Arc<AccountMonitor> {
        &self.account
    }

    /// Ask every loop to stop after its current tick.
    pub fn shutdown(&self) {
        info!("🛑 Shutdown requested");
        self.shutdown.send_replace(true);
    }

    pub async fn health(&self) -> HealthReport {
        let policy = FreshnessPolicy::from(&self.settings.snapshot().await);
        check_health(self.venue.as_ref(), &self.quotes, &policy).await
    }

    /// Start every loop and wait until all of them have stopped.
    pub async fn run(&self) {
        info!("🚀 Starting engine loops");
        let handles = self.spawn_loops();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Engine loop panicked");
            }
        }
        info!("Engine stopped");
    }

    fn spawn_loops(&self) -> Vec<JoinHandle<()>> {
        let scanner = self.scanner.clone();
        let scan = spawn_loop(
            "scan",
            self.settings.clone(),
            self.shutdown.subscribe(),
            |s| Duration::from_millis(s.scan_interval_ms),
            move |settings| {
                let scanner = scanner.clone();
                async move {
                    scanner.scan(&settings).await;
                }
            },
        );

        let risk = self.risk.clone();
        let account = self.account.clone();
        let maintenance = spawn_loop(
            "maintenance",
            self.settings.clone(),
            self.shutdown.subscribe(),
            |s| Duration::from_millis(s.maintenance_interval_ms),
            move |settings| {
                let risk = risk.clone();
                let account = account.clone();
                async move {
                    // Keeps the daily halt current between scans.
                    account.snapshot(&settings).await;
                    match risk.tick(&settings).await {
                        Ok(summary) => debug!(?summary, "Maintenance tick"),
                        Err(e) => warn!(error = %e, kind = e.kind(), "Maintenance tick failed"),
                    }
                }
            },
        );

        let risk = self.risk.clone();
        let dust = spawn_loop(
            "dust",
            self.settings.clone(),
            self.shutdown.subscribe(),
            |s| Duration::from_secs(s.dust_sweep_minutes * 60),
            move |settings| {
                let risk = risk.clone();
                async move {
                    match risk.sweep_dust(&settings).await {
                        Ok(0) => {}
                        Ok(n) => info!(swept = n, "Dust sweep complete"),
                        Err(e) => warn!(error = %e, "Dust sweep failed"),
                    }
                }
            },
        );

        let scanner = self.scanner.clone();
        let universe = spawn_loop(
            "universe",
            self.settings.clone(),
            self.shutdown.subscribe(),
            |_| UNIVERSE_REFRESH,
            move |_| {
                let scanner = scanner.clone();
                async move {
                    scanner.refresh_universe().await;
                }
            },
        );

        vec![scan, maintenance, dust, universe]
    }
}

/// Run `tick` until shutdown, sleeping `interval` after each tick. The
/// settings record is re-read every tick so replacements take effect on
/// the next one.
fn spawn_loop<I, F, Fut>(
    name: &'static str,
    settings: SettingsHandle,
    mut shutdown: watch::Receiver<bool>,
    interval: I,
    mut tick: F,
) -> JoinHandle<()>
where
    I: Fn(&Settings) -> Duration + Send + 'static,
    F: FnMut(Settings) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, "Loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let snapshot = settings.snapshot().await;
            let wait = interval(&snapshot);
            tick(snapshot).await;

            tokio::select! {
                _ = sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(task = name, "Loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::exchange::MockVenue;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine(venue: &MockVenue) -> Arc<Engine> {
        Arc::new(Engine::with_venue(
            Arc::new(venue.clone()),
            Arc::new(venue.clone()),
            vec!["us".into()],
            Settings {
                maker_camp_secs: 5,
                ..Settings::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_loop_ticks_until_shutdown() {
        tokio::time::pause();
        let (tx, rx) = watch::channel(false);
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let handle = spawn_loop(
            "test",
            SettingsHandle::default(),
            rx,
            |_| Duration::from_secs(1),
            move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        sleep(Duration::from_millis(3500)).await;
        tx.send_replace(true);
        handle.await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_engine_runs_scans_and_stops() {
        tokio::time::pause();
        let venue = MockVenue::default();
        venue.state_mut().await.clock_open = false;
        let engine = engine(&venue);

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };
        sleep(Duration::from_secs(5)).await;
        engine.shutdown();
        runner.await.unwrap();

        let scans = engine
            .events()
            .recent(EVENT_BUFFER)
            .into_iter()
            .filter(|e| e.kind == EventKind::ScanSummary)
            .count();
        assert!(scans >= 2);
    }

    #[tokio::test]
    async fn test_settings_replace_is_clamped() {
        let venue = MockVenue::default();
        let engine = engine(&venue);
        let stored = engine
            .settings()
            .replace(Settings {
                spread_max_bps: dec!(100000),
                ..Settings::default()
            })
            .await;
        assert!(stored.spread_max_bps < dec!(100000));
        assert_eq!(engine.settings().snapshot().await, stored);
    }

    #[tokio::test]
    async fn test_health_reports_missing_quotes() {
        let venue = MockVenue::default();
        let report = engine(&venue).health().await;
        assert!(report.account.reachable);
        assert!(!report.ok);
    }
}
