//! Post-fill outcome sampling.
//!
//! After each fill the latest trade is sampled for a fixed horizon and the
//! best favorable excursion is folded into the symbol's drag estimate.

use crate::market::instrument::Instrument;
use crate::market::quotes::QuoteBook;
use crate::strategy::stats::StatsBook;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

pub const OUTCOME_HORIZON: Duration = Duration::from_secs(180);
pub const OUTCOME_STEP: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OutcomeWatch {
    pub instrument: Instrument,
    pub entry_price: Decimal,
    /// Entry velocity the runway estimate was based on.
    pub v0: Decimal,
    /// Move the take-profit needed, in price units.
    pub needed: Decimal,
    /// UTC hour of the fill.
    pub hour: usize,
}

/// Sample for the full horizon and record the result. Returns the best
/// favorable move seen.
pub async fn watch_outcome(quotes: Arc<QuoteBook>, stats: Arc<StatsBook>, watch: OutcomeWatch) -> Decimal {
    let steps = OUTCOME_HORIZON.as_secs() / OUTCOME_STEP.as_secs();
    let mut best = Decimal::ZERO;

    for _ in 0..steps {
        sleep(OUTCOME_STEP).await;
        if let Some(trade) = quotes.latest_trade(&watch.instrument).await {
            best = best.max(trade.price - watch.entry_price);
        }
    }

    debug!(
        symbol = %watch.instrument.symbol,
        %best,
        needed = %watch.needed,
        v0 = %watch.v0,
        "Outcome window closed"
    );
    stats
        .record_outcome(&watch.instrument.symbol, watch.v0, best, watch.needed, watch.hour)
        .await;
    best
}

pub fn spawn_outcome_watch(quotes: Arc<QuoteBook>, stats: Arc<StatsBook>, watch: OutcomeWatch) -> JoinHandle<Decimal> {
    tokio::spawn(watch_outcome(quotes, stats, watch))
}
