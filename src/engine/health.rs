//! Connectivity and data-freshness report.

use crate::exchange::TradingVenue;
use crate::market::instrument::Instrument;
use crate::market::quotes::{FreshnessPolicy, QuoteBook};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

/// Symbols whose quotes the health check inspects.
pub const HEALTH_SYMBOLS: [&str; 4] = ["AAPL", "MSFT", "BTC/USD", "ETH/USD"];

#[derive(Debug, Clone, Serialize)]
pub struct AccountHealth {
    pub reachable: bool,
    pub equity: Option<Decimal>,
    pub buying_power: Option<Decimal>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteHealth {
    pub symbol: String,
    pub present: bool,
    pub fresh: bool,
    pub age_ms: Option<i64>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub checked_at: DateTime<Utc>,
    pub account: AccountHealth,
    pub quotes: Vec<QuoteHealth>,
}

/// Check the account endpoint and the quote feed for [`HEALTH_SYMBOLS`].
/// Healthy means the account answered and every checked quote is fresh.
pub async fn check_health(venue: &dyn TradingVenue, quotes: &QuoteBook, policy: &FreshnessPolicy) -> HealthReport {
    let account = match venue.account().await {
        Ok(snapshot) => AccountHealth {
            reachable: true,
            equity: Some(snapshot.equity),
            buying_power: Some(snapshot.buying_power),
            error: None,
        },
        Err(e) => {
            warn!(error = %e, "Health check: account unreachable");
            AccountHealth {
                reachable: false,
                equity: None,
                buying_power: None,
                error: Some(e.to_string()),
            }
        }
    };

    // Fetch without the age filter so stale quotes can be told apart from missing ones.
    let any_age = FreshnessPolicy {
        require_timestamp: false,
        max_age_crypto_ms: i64::MAX,
        max_age_equity_ms: i64::MAX,
    };
    let mut checked = Vec::with_capacity(HEALTH_SYMBOLS.len());
    for raw in HEALTH_SYMBOLS {
        let instrument = Instrument::parse(raw);
        let quote = quotes.fresh_quote(&instrument, &any_age).await;
        let now_ms = Utc::now().timestamp_millis();
        checked.push(QuoteHealth {
            symbol: instrument.symbol.clone(),
            present: quote.is_some(),
            fresh: quote
                .as_ref()
                .is_some_and(|q| policy.accepts(q, instrument.class, now_ms)),
            age_ms: quote.as_ref().and_then(|q| q.age_ms(now_ms)),
            bid: quote.as_ref().map(|q| q.bid),
            ask: quote.as_ref().map(|q| q.ask),
        });
    }

    let ok = account.reachable && checked.iter().all(|p| p.fresh);
    info!(ok, account = account.reachable, "Health check complete");
    HealthReport {
        ok,
        checked_at: Utc::now(),
        account,
        quotes: checked,
    }
}
