//! Quote and bar cache with a freshness gate.
//!
//! Quotes are fetched in batches per asset class. Crypto requests are
//! chunked and tried against each configured data location in order; the
//! first location returning a non-empty payload wins. Quotes that are too
//! old (or untimed, under the strict live-data policy) never leave this
//! module.

use super::instrument::{AssetClass, Instrument};
use crate::config::Settings;
use crate::error::EngineError;
use crate::exchange::{MarketData, Quote, Trade};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Symbols per crypto quote request.
pub const CRYPTO_CHUNK: usize = 6;
/// How long a fetched quote is reused within a scan pass.
pub const QUOTE_TTL: Duration = Duration::from_secs(4);
/// How long a rejected symbol is skipped.
pub const UNSUPPORTED_COOLDOWN: Duration = Duration::from_secs(120 * 60);
/// Mid prices retained per symbol as a momentum fallback.
const MID_HISTORY: usize = 12;

/// Max quote age per asset class and whether a timestamp is mandatory.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    pub require_timestamp: bool,
    pub max_age_crypto_ms: i64,
    pub max_age_equity_ms: i64,
}

impl FreshnessPolicy {
    pub fn max_age_ms(&self, class: AssetClass) -> i64 {
        match class {
            AssetClass::Crypto => self.max_age_crypto_ms,
            AssetClass::Equity => self.max_age_equity_ms,
        }
    }

    pub fn accepts(&self, quote: &Quote, class: AssetClass, now_ms: i64) -> bool {
        quote.is_valid() && quote.is_fresh(now_ms, self.max_age_ms(class), self.require_timestamp)
    }
}

impl From<&Settings> for FreshnessPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            require_timestamp: settings.live_require_quote,
            max_age_crypto_ms: settings.live_fresh_ms_crypto,
            max_age_equity_ms: settings.live_fresh_ms_stock,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedQuote {
    quote: Quote,
    fetched_at: Instant,
}

/// Shared quote cache. Keys are canonical symbols.
pub struct QuoteBook {
    source: Arc<dyn MarketData>,
    locations: Vec<String>,
    cache: RwLock<HashMap<String, CachedQuote>>,
    unsupported: RwLock<HashMap<String, Instant>>,
    mids: RwLock<HashMap<String, VecDeque<Decimal>>>,
}

impl QuoteBook {
    pub fn new(source: Arc<dyn MarketData>, locations: Vec<String>) -> Self {
        Self {
            source,
            locations,
            cache: RwLock::new(HashMap::new()),
            unsupported: RwLock::new(HashMap::new()),
            mids: RwLock::new(HashMap::new()),
        }
    }

    fn locations_for(&self, class: AssetClass) -> Vec<Option<String>> {
        match class {
            AssetClass::Crypto if !self.locations.is_empty() => {
                self.locations.iter().cloned().map(Some).collect()
            }
            AssetClass::Crypto => vec![Some("us".to_string())],
            AssetClass::Equity => vec![None],
        }
    }

    pub async fn is_unsupported(&self, symbol: &str) -> bool {
        let mut unsupported = self.unsupported.write().await;
        match unsupported.get(symbol) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                unsupported.remove(symbol);
                false
            }
            None => false,
        }
    }

    pub async fn mark_unsupported(&self, symbol: &str) {
        info!(%symbol, cooldown_min = UNSUPPORTED_COOLDOWN.as_secs() / 60, "Symbol rejected by data service, skipping");
        self.unsupported
            .write()
            .await
            .insert(symbol.to_string(), Instant::now() + UNSUPPORTED_COOLDOWN);
    }

    /// Fresh quotes for as many of `instruments` as possible. Missing
    /// entries mean no usable data this tick.
    pub async fn get_quotes(
        &self,
        instruments: &[Instrument],
        policy: &FreshnessPolicy,
    ) -> HashMap<String, Quote> {
        let now_ms = Utc::now().timestamp_millis();
        let mut result = HashMap::new();
        let mut misses: Vec<&Instrument> = Vec::new();

        {
            let cache = self.cache.read().await;
            for instrument in instruments {
                match cache.get(&instrument.symbol) {
                    Some(entry)
                        if entry.fetched_at.elapsed() < QUOTE_TTL
                            && policy.accepts(&entry.quote, instrument.class, now_ms) =>
                    {
                        result.insert(instrument.symbol.clone(), entry.quote.clone());
                    }
                    _ => misses.push(instrument),
                }
            }
        }

        let mut wanted = Vec::with_capacity(misses.len());
        for instrument in misses {
            if !self.is_unsupported(&instrument.symbol).await {
                wanted.push(instrument);
            }
        }

        let (crypto, equities): (Vec<&Instrument>, Vec<&Instrument>) =
            wanted.into_iter().partition(|i| i.is_crypto());

        let mut fetched = HashMap::new();
        for chunk in crypto.chunks(CRYPTO_CHUNK) {
            fetched.extend(self.fetch_batch(AssetClass::Crypto, chunk, true).await);
        }
        if !equities.is_empty() {
            fetched.extend(self.fetch_batch(AssetClass::Equity, &equities, false).await);
        }

        let now_ms = Utc::now().timestamp_millis();
        let mut cache = self.cache.write().await;
        let mut mids = self.mids.write().await;
        for (instrument, quote) in fetched {
            if !policy.accepts(&quote, instrument.class, now_ms) {
                debug!(
                    symbol = %instrument.symbol,
                    age_ms = ?quote.age_ms(now_ms),
                    "Discarding stale quote"
                );
                continue;
            }
            let history = mids.entry(instrument.symbol.clone()).or_default();
            history.push_back(quote.mid());
            if history.len() > MID_HISTORY {
                history.pop_front();
            }
            cache.insert(
                instrument.symbol.clone(),
                CachedQuote {
                    quote: quote.clone(),
                    fetched_at: Instant::now(),
                },
            );
            result.insert(instrument.symbol.clone(), quote);
        }

        result
    }

    /// Single-symbol convenience over [`get_quotes`](Self::get_quotes).
    pub async fn get_quote(&self, instrument: &Instrument, policy: &FreshnessPolicy) -> Option<Quote> {
        self.get_quotes(std::slice::from_ref(instrument), policy)
            .await
            .remove(&instrument.symbol)
    }

    /// Like [`get_quote`](Self::get_quote) but always goes to the data
    /// service. Order repricing loops use this.
    pub async fn fresh_quote(&self, instrument: &Instrument, policy: &FreshnessPolicy) -> Option<Quote> {
        self.cache.write().await.remove(&instrument.symbol);
        self.get_quote(instrument, policy).await
    }

    /// Fetch one batch. A rejected crypto chunk is retried per symbol so the
    /// offending symbol can be negatively cached.
    async fn fetch_batch(
        &self,
        class: AssetClass,
        batch: &[&Instrument],
        split_on_reject: bool,
    ) -> Vec<(Instrument, Quote)> {
        match self.fetch_with_fallback(class, batch).await {
            Ok(quotes) => quotes,
            Err(e) if e.is_rejection() && batch.len() == 1 => {
                self.mark_unsupported(&batch[0].symbol).await;
                Vec::new()
            }
            Err(e) if e.is_rejection() && split_on_reject => {
                debug!(error = %e, size = batch.len(), "Batch rejected, retrying per symbol");
                let mut quotes = Vec::new();
                for instrument in batch {
                    match self.fetch_with_fallback(class, &[*instrument]).await {
                        Ok(found) => quotes.extend(found),
                        Err(e) if e.is_rejection() => {
                            self.mark_unsupported(&instrument.symbol).await
                        }
                        Err(e) => warn!(symbol = %instrument.symbol, error = %e, "Quote fetch failed"),
                    }
                }
                quotes
            }
            Err(e) => {
                warn!(%class, size = batch.len(), error = %e, "Quote batch failed, no data this tick");
                Vec::new()
            }
        }
    }

    async fn fetch_with_fallback(
        &self,
        class: AssetClass,
        batch: &[&Instrument],
    ) -> Result<Vec<(Instrument, Quote)>, EngineError> {
        let by_venue: HashMap<String, &Instrument> =
            batch.iter().map(|i| (i.venue_symbol(), *i)).collect();
        let symbols: Vec<String> = by_venue.keys().cloned().collect();

        let mut last_err = None;
        for location in self.locations_for(class) {
            match self
                .source
                .latest_quotes(class, location.clone(), symbols.clone())
                .await
            {
                Ok(quotes) if !quotes.is_empty() => {
                    return Ok(quotes
                        .into_iter()
                        .filter_map(|(venue_symbol, q)| {
                            by_venue.get(&venue_symbol).map(|i| ((*i).clone(), q))
                        })
                        .collect());
                }
                Ok(_) => debug!(?location, %class, "Empty quote payload, trying next location"),
                Err(e) => {
                    debug!(?location, %class, error = %e, "Quote location failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    /// Recent one-minute closes, oldest first. Falls back to mids observed
    /// by this cache when bars are unavailable.
    pub async fn minute_closes(
        &self,
        instruments: &[Instrument],
        limit: usize,
    ) -> HashMap<String, Vec<Decimal>> {
        let mut closes = HashMap::new();
        let (crypto, equities): (Vec<&Instrument>, Vec<&Instrument>) =
            instruments.iter().partition(|i| i.is_crypto());

        let mut batches: Vec<(AssetClass, Vec<&Instrument>)> = crypto
            .chunks(CRYPTO_CHUNK)
            .map(|c| (AssetClass::Crypto, c.to_vec()))
            .collect();
        if !equities.is_empty() {
            batches.push((AssetClass::Equity, equities));
        }

        for (class, batch) in batches {
            let by_venue: HashMap<String, &Instrument> =
                batch.iter().map(|i| (i.venue_symbol(), *i)).collect();
            let symbols: Vec<String> = by_venue.keys().cloned().collect();
            for location in self.locations_for(class) {
                match self
                    .source
                    .minute_bars(class, location.clone(), symbols.clone(), limit)
                    .await
                {
                    Ok(bars) if !bars.is_empty() => {
                        for (venue_symbol, series) in bars {
                            if let Some(instrument) = by_venue.get(&venue_symbol) {
                                closes.insert(
                                    instrument.symbol.clone(),
                                    series.into_iter().map(|b| b.close).collect(),
                                );
                            }
                        }
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => debug!(?location, %class, error = %e, "Bar fetch failed"),
                }
            }
        }

        let mids = self.mids.read().await;
        for instrument in instruments {
            let have = closes.get(&instrument.symbol).map(Vec::len).unwrap_or(0);
            if have < 2 {
                if let Some(history) = mids.get(&instrument.symbol) {
                    let skip = history.len().saturating_sub(limit);
                    closes.insert(
                        instrument.symbol.clone(),
                        history.iter().skip(skip).copied().collect(),
                    );
                }
            }
        }
        closes
    }

    /// Latest trade print, trying each data location in order.
    pub async fn latest_trade(&self, instrument: &Instrument) -> Option<Trade> {
        let venue_symbol = instrument.venue_symbol();
        for location in self.locations_for(instrument.class) {
            match self
                .source
                .latest_trades(instrument.class, location, vec![venue_symbol.clone()])
                .await
            {
                Ok(mut trades) => {
                    if let Some(trade) = trades.remove(&venue_symbol) {
                        return Some(trade);
                    }
                }
                Err(e) => debug!(symbol = %instrument.symbol, error = %e, "Trade fetch failed"),
            }
        }
        None
    }
}
