//! In-memory brokerage for tests.
//!
//! Orders fill against quotes set by the caller: market orders fill at the
//! touch, marketable limits fill at their limit, everything else rests until
//! a later quote crosses it.

use super::traits::{MarketData, TradingVenue};
use super::types::*;
use crate::error::{EngineError, EngineResult};
use crate::market::instrument::{to_canonical_symbol, AssetClass};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// How resting limit orders behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitFillMode {
    /// Fill only when a quote crosses the limit.
    #[default]
    OnCross,
    /// Fill every limit order as soon as it is posted.
    Immediate,
}

#[derive(Debug, Clone, Default)]
pub struct MockHolding {
    pub qty: Decimal,
    pub basis: Decimal,
}

#[derive(Debug)]
pub struct MockVenueState {
    pub cash: Decimal,
    pub last_equity: Decimal,
    pub pattern_day_trader: bool,
    pub daytrade_count: u32,
    pub clock_open: bool,
    pub holdings: HashMap<String, MockHolding>,
    pub open_orders: Vec<Order>,
    pub filled_orders: Vec<Order>,
    pub canceled: Vec<String>,
    pub submitted: Vec<NewOrder>,
    pub quotes: HashMap<String, Quote>,
    pub trades: HashMap<String, Trade>,
    pub bars: HashMap<String, Vec<Bar>>,
    pub assets: HashMap<String, AssetInfo>,
    pub limit_fill: LimitFillMode,
    /// Status to reject the next submit with.
    pub reject_next_submit: Option<u16>,
}

impl Default for MockVenueState {
    fn default() -> Self {
        Self {
            cash: dec!(10000),
            last_equity: dec!(10000),
            pattern_day_trader: false,
            daytrade_count: 0,
            clock_open: true,
            holdings: HashMap::new(),
            open_orders: Vec::new(),
            filled_orders: Vec::new(),
            canceled: Vec::new(),
            submitted: Vec::new(),
            quotes: HashMap::new(),
            trades: HashMap::new(),
            bars: HashMap::new(),
            assets: HashMap::new(),
            limit_fill: LimitFillMode::OnCross,
            reject_next_submit: None,
        }
    }
}

impl MockVenueState {
    fn equity(&self) -> Decimal {
        self.cash
            + self
                .holdings
                .iter()
                .map(|(symbol, h)| {
                    let mark = self.quotes.get(symbol).map(|q| q.bid).unwrap_or(h.basis);
                    h.qty * mark
                })
                .sum::<Decimal>()
    }

    fn reserved_sell_qty(&self, symbol: &str) -> Decimal {
        self.open_orders
            .iter()
            .filter(|o| o.symbol == symbol && o.side == OrderSide::Sell)
            .filter_map(|o| o.qty)
            .sum()
    }

    fn apply_fill(&mut self, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) {
        let holding = self.holdings.entry(symbol.to_string()).or_default();
        match side {
            OrderSide::Buy => {
                let cost = holding.qty * holding.basis + qty * price;
                holding.qty += qty;
                holding.basis = if holding.qty > Decimal::ZERO {
                    cost / holding.qty
                } else {
                    Decimal::ZERO
                };
                self.cash -= qty * price;
            }
            OrderSide::Sell => {
                holding.qty -= qty;
                self.cash += qty * price;
            }
        }
        if holding.qty <= Decimal::ZERO {
            self.holdings.remove(symbol);
        }
    }

    /// Fill resting orders the current quote crosses.
    fn cross_resting(&mut self, symbol: &str) {
        let Some(quote) = self.quotes.get(symbol).cloned() else {
            return;
        };
        let mut remaining = Vec::new();
        let orders = std::mem::take(&mut self.open_orders);
        for mut order in orders {
            let limit = order.limit_price.unwrap_or_default();
            let crosses = order.symbol == symbol
                && match order.side {
                    OrderSide::Buy => quote.ask <= limit,
                    OrderSide::Sell => quote.bid >= limit,
                };
            if crosses {
                let qty = order.qty.unwrap_or_default();
                self.apply_fill(symbol, order.side, qty, limit);
                order.status = "filled".into();
                order.filled_qty = Some(qty);
                order.filled_avg_price = Some(limit);
                self.filled_orders.push(order);
            } else {
                remaining.push(order);
            }
        }
        self.open_orders = remaining;
    }
}

/// Simulated brokerage and data feed sharing one state.
#[derive(Clone)]
pub struct MockVenue {
    state: Arc<RwLock<MockVenueState>>,
    next_id: Arc<AtomicU64>,
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new(dec!(10000))
    }
}

impl MockVenue {
    pub fn new(cash: Decimal) -> Self {
        let state = MockVenueState {
            cash,
            last_equity: cash,
            ..MockVenueState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn state(&self) -> tokio::sync::RwLockReadGuard<'_, MockVenueState> {
        self.state.read().await
    }

    pub async fn state_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, MockVenueState> {
        self.state.write().await
    }

    /// Set a quote stamped now and fill anything it crosses.
    pub async fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.set_quote_at(symbol, bid, ask, Utc::now().timestamp_millis()).await;
    }

    pub async fn set_quote_at(&self, symbol: &str, bid: Decimal, ask: Decimal, timestamp_ms: i64) {
        let symbol = to_canonical_symbol(symbol);
        let mut state = self.state.write().await;
        state.quotes.insert(
            symbol.clone(),
            Quote {
                bid,
                ask,
                bid_size: Some(dec!(100)),
                ask_size: Some(dec!(100)),
                timestamp_ms: Some(timestamp_ms),
            },
        );
        state.cross_resting(&symbol);
    }

    pub async fn set_trade(&self, symbol: &str, price: Decimal) {
        self.state.write().await.trades.insert(
            to_canonical_symbol(symbol),
            Trade {
                price,
                size: None,
                timestamp_ms: Some(Utc::now().timestamp_millis()),
            },
        );
    }

    pub async fn set_closes(&self, symbol: &str, closes: &[Decimal]) {
        let now = Utc::now().timestamp_millis();
        let n = closes.len() as i64;
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: dec!(1),
                timestamp_ms: Some(now - (n - i as i64) * 60_000),
            })
            .collect();
        self.state.write().await.bars.insert(to_canonical_symbol(symbol), bars);
    }

    /// Seed a holding without going through an order.
    pub async fn set_holding(&self, symbol: &str, qty: Decimal, basis: Decimal) {
        let symbol = to_canonical_symbol(symbol);
        let mut state = self.state.write().await;
        if qty > Decimal::ZERO {
            state.holdings.insert(symbol, MockHolding { qty, basis });
        } else {
            state.holdings.remove(&symbol);
        }
    }

    pub async fn set_asset(&self, symbol: &str, fractionable: bool) {
        let symbol = to_canonical_symbol(symbol);
        self.state.write().await.assets.insert(
            symbol.clone(),
            AssetInfo {
                symbol,
                asset_class: "us_equity".into(),
                status: "active".into(),
                tradable: true,
                fractionable,
            },
        );
    }

    /// Age an open order so cleanup logic treats it as stale.
    pub async fn backdate_order(&self, order_id: &str, secs: i64) {
        let mut state = self.state.write().await;
        if let Some(order) = state.open_orders.iter_mut().find(|o| o.id == order_id) {
            let at = Utc::now() - ChronoDuration::seconds(secs);
            order.created_at = Some(at);
            order.submitted_at = Some(at);
        }
    }

    pub async fn submitted(&self) -> Vec<NewOrder> {
        self.state.read().await.submitted.clone()
    }

    pub async fn open_order_list(&self) -> Vec<Order> {
        self.state.read().await.open_orders.clone()
    }

    fn reject(endpoint: &str, status: u16, body: &str) -> EngineError {
        EngineError::VenueRejection {
            endpoint: endpoint.to_string(),
            status,
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl TradingVenue for MockVenue {
    async fn account(&self) -> EngineResult<AccountSnapshot> {
        let state = self.state.read().await;
        let equity = state.equity();
        let change = if state.last_equity > Decimal::ZERO {
            Some((equity - state.last_equity) / state.last_equity * dec!(100))
        } else {
            None
        };
        Ok(AccountSnapshot {
            equity,
            buying_power: state.cash.max(Decimal::ZERO),
            daily_change_pct: change,
            pattern_day_trader: state.pattern_day_trader,
            daytrade_count: state.daytrade_count,
            as_of: Utc::now(),
        })
    }

    async fn open_orders(&self) -> EngineResult<Vec<Order>> {
        Ok(self.state.read().await.open_orders.clone())
    }

    async fn submit_order(&self, request: &NewOrder) -> EngineResult<Order> {
        let mut state = self.state.write().await;
        state.submitted.push(request.clone());

        if let Some(status) = state.reject_next_submit.take() {
            return Err(Self::reject("/v2/orders", status, "rejected by mock"));
        }
        if request.qty <= Decimal::ZERO {
            return Err(Self::reject("/v2/orders", 422, "qty must be > 0"));
        }

        let symbol = to_canonical_symbol(&request.symbol);
        if request.side == OrderSide::Sell {
            let held = state.holdings.get(&symbol).map(|h| h.qty).unwrap_or_default();
            let available = held - state.reserved_sell_qty(&symbol);
            if request.qty > available {
                return Err(Self::reject("/v2/orders", 403, "insufficient qty available for order"));
            }
        }

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let mut order = Order {
            id: id.clone(),
            client_order_id: Some(request.client_order_id.clone()),
            symbol: symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            qty: Some(request.qty),
            limit_price: request.limit_price,
            filled_qty: None,
            filled_avg_price: None,
            status: "new".into(),
            created_at: Some(now),
            submitted_at: Some(now),
        };

        let quote = state.quotes.get(&symbol).cloned();
        let fill_price = match request.order_type {
            OrderType::Market => {
                let quote = quote.ok_or_else(|| Self::reject("/v2/orders", 422, "no quote for market order"))?;
                Some(match request.side {
                    OrderSide::Buy => quote.ask,
                    OrderSide::Sell => quote.bid,
                })
            }
            _ => {
                let limit = request.limit_price.unwrap_or_default();
                let marketable = quote.map(|q| match request.side {
                    OrderSide::Buy => q.ask <= limit,
                    OrderSide::Sell => q.bid >= limit,
                });
                (state.limit_fill == LimitFillMode::Immediate || marketable == Some(true))
                    .then_some(limit)
            }
        };

        match fill_price {
            Some(price) => {
                state.apply_fill(&symbol, request.side, request.qty, price);
                order.status = "filled".into();
                order.filled_qty = Some(request.qty);
                order.filled_avg_price = Some(price);
                state.filled_orders.push(order.clone());
                debug!(%symbol, order_id = %id, %price, "Mock order filled");
            }
            None => {
                state.open_orders.push(order.clone());
                debug!(%symbol, order_id = %id, "Mock order resting");
            }
        }
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> EngineResult<()> {
        let mut state = self.state.write().await;
        state.open_orders.retain(|o| o.id != order_id);
        state.canceled.push(order_id.to_string());
        Ok(())
    }

    async fn positions(&self) -> EngineResult<Vec<Position>> {
        let state = self.state.read().await;
        let mut positions: Vec<Position> = state
            .holdings
            .iter()
            .map(|(symbol, h)| {
                let mark = state.quotes.get(symbol).map(|q| q.bid);
                Position {
                    symbol: symbol.clone(),
                    qty: h.qty,
                    available_qty: (h.qty - state.reserved_sell_qty(symbol)).max(Decimal::ZERO),
                    basis_price: h.basis,
                    mark_price: mark,
                    market_value: h.qty * mark.unwrap_or(h.basis),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn position(&self, symbol: &str) -> EngineResult<Option<Position>> {
        let symbol = to_canonical_symbol(symbol);
        Ok(self
            .positions()
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol))
    }

    async fn asset(&self, symbol: &str) -> EngineResult<Option<AssetInfo>> {
        Ok(self
            .state
            .read()
            .await
            .assets
            .get(&to_canonical_symbol(symbol))
            .cloned())
    }

    async fn clock(&self) -> EngineResult<MarketClock> {
        Ok(MarketClock {
            is_open: self.state.read().await.clock_open,
            next_open: None,
            next_close: None,
        })
    }

    async fn crypto_assets(&self) -> EngineResult<Vec<AssetInfo>> {
        Ok(self
            .state
            .read()
            .await
            .assets
            .values()
            .filter(|a| a.asset_class == "crypto")
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MarketData for MockVenue {
    async fn latest_quotes(
        &self,
        _class: AssetClass,
        _location: Option<String>,
        symbols: Vec<String>,
    ) -> EngineResult<HashMap<String, Quote>> {
        let state = self.state.read().await;
        Ok(symbols
            .into_iter()
            .filter_map(|s| state.quotes.get(&to_canonical_symbol(&s)).cloned().map(|q| (s, q)))
            .collect())
    }

    async fn latest_trades(
        &self,
        _class: AssetClass,
        _location: Option<String>,
        symbols: Vec<String>,
    ) -> EngineResult<HashMap<String, Trade>> {
        let state = self.state.read().await;
        Ok(symbols
            .into_iter()
            .filter_map(|s| state.trades.get(&to_canonical_symbol(&s)).cloned().map(|t| (s, t)))
            .collect())
    }

    async fn minute_bars(
        &self,
        _class: AssetClass,
        _location: Option<String>,
        symbols: Vec<String>,
        limit: usize,
    ) -> EngineResult<HashMap<String, Vec<Bar>>> {
        let state = self.state.read().await;
        Ok(symbols
            .into_iter()
            .filter_map(|s| {
                state.bars.get(&to_canonical_symbol(&s)).map(|bars| {
                    let skip = bars.len().saturating_sub(limit);
                    (s, bars[skip..].to_vec())
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_market_buy_fills_at_ask() {
        let venue = MockVenue::new(dec!(1000));
        venue.set_quote("BTCUSD", dec!(100), dec!(101)).await;

        let order = venue
            .submit_order(&NewOrder::market("BTC/USD", OrderSide::Buy, dec!(2), TimeInForce::Gtc))
            .await
            .unwrap();
        assert_eq!(order.status, "filled");

        let position = venue.position("BTCUSD").await.unwrap().unwrap();
        assert_eq!(position.qty, dec!(2));
        assert_eq!(position.basis_price, dec!(101));
        assert_eq!(venue.account().await.unwrap().buying_power, dec!(798));
    }

    #[tokio::test]
    async fn test_resting_limit_fills_when_crossed() {
        let venue = MockVenue::default();
        venue.set_quote("ETHUSD", dec!(100), dec!(101)).await;
        venue
            .submit_order(&NewOrder::limit("ETH/USD", OrderSide::Buy, dec!(1), dec!(100.5), TimeInForce::Gtc))
            .await
            .unwrap();
        assert_eq!(venue.open_order_list().await.len(), 1);
        assert!(venue.position("ETHUSD").await.unwrap().is_none());

        venue.set_quote("ETHUSD", dec!(100.1), dec!(100.4)).await;
        assert!(venue.open_order_list().await.is_empty());
        let position = venue.position("ETHUSD").await.unwrap().unwrap();
        assert_eq!(position.basis_price, dec!(100.5));
    }

    #[tokio::test]
    async fn test_resting_sell_reserves_available_qty() {
        let venue = MockVenue::default();
        venue.set_holding("AAPL", dec!(3), dec!(190)).await;
        venue.set_quote("AAPL", dec!(190), dec!(190.02)).await;
        venue
            .submit_order(&NewOrder::limit("AAPL", OrderSide::Sell, dec!(3), dec!(195), TimeInForce::Day))
            .await
            .unwrap();

        let position = venue.position("AAPL").await.unwrap().unwrap();
        assert_eq!(position.available_qty, Decimal::ZERO);

        let err = venue
            .submit_order(&NewOrder::market("AAPL", OrderSide::Sell, dec!(1), TimeInForce::Day))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
    }
}
