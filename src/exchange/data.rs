//! Alpaca market data client.

use super::http::{HttpRequest, ResilientClient};
use super::traits::MarketData;
use super::types::*;
use crate::config::{HttpConfig, VenueConfig};
use crate::error::EngineResult;
use crate::exchange::client::auth_headers;
use crate::market::instrument::AssetClass;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Latest quotes, trades and minute bars for both asset classes.
pub struct AlpacaDataClient {
    http: Arc<ResilientClient>,
    base_url: String,
}

#[derive(Clone, Copy)]
enum Feed {
    Quotes,
    Trades,
}

impl AlpacaDataClient {
    pub fn new(venue: &VenueConfig, http: &HttpConfig) -> Result<Self> {
        let client = ResilientClient::new(http, &auth_headers(venue))?;
        Ok(Self::with_http(Arc::new(client), &venue.data_url))
    }

    pub fn with_http(http: Arc<ResilientClient>, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn symbols_param(symbols: &[String]) -> String {
        urlencoding::encode(&symbols.join(",")).into_owned()
    }

    fn latest_url(&self, class: AssetClass, location: Option<&str>, feed: Feed, symbols: &[String]) -> String {
        let kind = match feed {
            Feed::Quotes => "quotes",
            Feed::Trades => "trades",
        };
        match class {
            AssetClass::Crypto => format!(
                "{}/v1beta3/crypto/{}/latest/{}?symbols={}",
                self.base_url,
                location.unwrap_or("us"),
                kind,
                Self::symbols_param(symbols)
            ),
            AssetClass::Equity => format!(
                "{}/v2/stocks/{}/latest?symbols={}",
                self.base_url,
                kind,
                Self::symbols_param(symbols)
            ),
        }
    }

    fn bars_url(&self, class: AssetClass, location: Option<&str>, symbols: &[String], limit: usize) -> String {
        // Batched bar limits apply across symbols, so window by start time instead.
        let start = (Utc::now() - ChronoDuration::minutes(limit as i64 + 3))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let query = format!(
            "timeframe=1Min&start={}&limit=10000&symbols={}",
            urlencoding::encode(&start),
            Self::symbols_param(symbols)
        );
        match class {
            AssetClass::Crypto => format!(
                "{}/v1beta3/crypto/{}/bars?{}",
                self.base_url,
                location.unwrap_or("us"),
                query
            ),
            AssetClass::Equity => format!("{}/v2/stocks/bars?{}", self.base_url, query),
        }
    }
}

#[async_trait]
impl MarketData for AlpacaDataClient {
    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    async fn latest_quotes(
        &self,
        class: AssetClass,
        location: Option<String>,
        symbols: Vec<String>,
    ) -> EngineResult<HashMap<String, Quote>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.latest_url(class, location.as_deref(), Feed::Quotes, &symbols);
        let response: QuotesResponse = self.http.json(&HttpRequest::get(url)).await?;
        Ok(response
            .quotes
            .into_iter()
            .filter_map(|(symbol, raw)| raw.into_quote().map(|q| (symbol, q)))
            .collect())
    }

    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    async fn latest_trades(
        &self,
        class: AssetClass,
        location: Option<String>,
        symbols: Vec<String>,
    ) -> EngineResult<HashMap<String, Trade>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.latest_url(class, location.as_deref(), Feed::Trades, &symbols);
        let response: TradesResponse = self.http.json(&HttpRequest::get(url)).await?;
        Ok(response
            .trades
            .into_iter()
            .filter_map(|(symbol, raw)| raw.into_trade().map(|t| (symbol, t)))
            .collect())
    }

    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    async fn minute_bars(
        &self,
        class: AssetClass,
        location: Option<String>,
        symbols: Vec<String>,
        limit: usize,
    ) -> EngineResult<HashMap<String, Vec<Bar>>> {
        if symbols.is_empty() || limit == 0 {
            return Ok(HashMap::new());
        }
        let url = self.bars_url(class, location.as_deref(), &symbols, limit);
        let response: BarsResponse = self.http.json(&HttpRequest::get(url)).await?;
        Ok(response
            .bars
            .into_iter()
            .map(|(symbol, raw)| {
                let mut bars: Vec<Bar> = raw.into_iter().filter_map(RawBar::into_bar).collect();
                bars.sort_by_key(|b| b.timestamp_ms.unwrap_or_default());
                let skip = bars.len().saturating_sub(limit);
                (symbol, bars.split_off(skip))
            })
            .collect())
    }
}
