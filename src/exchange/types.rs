//! Type definitions for Alpaca trading and market data payloads.
//!
//! The venue is loose about shapes: numbers arrive as JSON numbers or
//! strings, quote fields have short and long names, and timestamps come as
//! RFC 3339 strings or epoch values in seconds, milliseconds, microseconds
//! or nanoseconds. Everything is decoded here into one typed form.

use crate::market::instrument::to_canonical_symbol;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

// ==================== Decoding helpers ====================

/// Convert an epoch value of unknown unit to milliseconds.
///
/// The unit is inferred from magnitude, which is unambiguous for any instant
/// between 1973 and 5138.
pub fn normalize_epoch_ms(n: f64) -> Option<i64> {
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    let ms = if n >= 1e17 {
        n / 1e6 // nanoseconds
    } else if n >= 1e14 {
        n / 1e3 // microseconds
    } else if n >= 1e11 {
        n // milliseconds
    } else {
        n * 1e3 // seconds
    };
    Some(ms.round() as i64)
}

/// Parse any timestamp representation the venue emits into epoch millis.
pub fn parse_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            s.parse::<f64>().ok().and_then(normalize_epoch_ms)
        }
        Value::Number(n) => n.as_f64().and_then(normalize_epoch_ms),
        _ => None,
    }
}

/// Decimal from a JSON number or numeric string.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(Decimal::from_f64)
            }
        }
        _ => None,
    }
}

/// Serde adapters built on the helpers above.
pub(crate) mod flex {
    use super::*;
    use serde::de::{Deserializer, Error};

    pub fn opt_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Decimal>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.as_ref().and_then(decimal_from_value))
    }

    pub fn decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Decimal, D::Error> {
        opt_decimal(d)?.ok_or_else(|| D::Error::custom("expected a decimal number or string"))
    }

    pub fn opt_timestamp_ms<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.as_ref().and_then(parse_timestamp_ms))
    }
}

// ==================== Market Data ====================

/// Top of book for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_size: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    /// Venue-reported quote time. Absent when the payload omitted it.
    pub timestamp_ms: Option<i64>,
}

impl Quote {
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }

    /// `(ask - bid) / mid` in basis points.
    pub fn spread_bps(&self) -> Decimal {
        let mid = self.mid();
        if mid <= Decimal::ZERO {
            return Decimal::MAX;
        }
        (self.ask - self.bid) / mid * dec!(10000)
    }

    /// Fresh when `now - timestamp <= max_age`. A quote without a timestamp
    /// is fresh only when the caller does not require one.
    pub fn is_fresh(&self, now_ms: i64, max_age_ms: i64, require_timestamp: bool) -> bool {
        match self.timestamp_ms {
            Some(ts) => now_ms - ts <= max_age_ms,
            None => !require_timestamp,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> Option<i64> {
        self.timestamp_ms.map(|ts| now_ms - ts)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawQuote {
    #[serde(default, rename = "bp", alias = "bid_price", deserialize_with = "flex::opt_decimal")]
    pub bid: Option<Decimal>,
    #[serde(default, rename = "ap", alias = "ask_price", deserialize_with = "flex::opt_decimal")]
    pub ask: Option<Decimal>,
    #[serde(default, rename = "bs", alias = "bid_size", deserialize_with = "flex::opt_decimal")]
    pub bid_size: Option<Decimal>,
    #[serde(default, rename = "as", alias = "ask_size", deserialize_with = "flex::opt_decimal")]
    pub ask_size: Option<Decimal>,
    #[serde(default, rename = "t", alias = "timestamp", deserialize_with = "flex::opt_timestamp_ms")]
    pub timestamp_ms: Option<i64>,
}

impl RawQuote {
    /// Typed quote, or `None` when either side of the book is missing or non-positive.
    pub fn into_quote(self) -> Option<Quote> {
        let quote = Quote {
            bid: self.bid?,
            ask: self.ask?,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
            timestamp_ms: self.timestamp_ms,
        };
        quote.is_valid().then_some(quote)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub price: Decimal,
    pub size: Option<Decimal>,
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    #[serde(default, rename = "p", alias = "price", deserialize_with = "flex::opt_decimal")]
    pub price: Option<Decimal>,
    #[serde(default, rename = "s", alias = "size", deserialize_with = "flex::opt_decimal")]
    pub size: Option<Decimal>,
    #[serde(default, rename = "t", alias = "timestamp", deserialize_with = "flex::opt_timestamp_ms")]
    pub timestamp_ms: Option<i64>,
}

impl RawTrade {
    pub fn into_trade(self) -> Option<Trade> {
        let price = self.price.filter(|p| *p > Decimal::ZERO)?;
        Some(Trade {
            price,
            size: self.size,
            timestamp_ms: self.timestamp_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBar {
    #[serde(default, rename = "o", deserialize_with = "flex::opt_decimal")]
    pub open: Option<Decimal>,
    #[serde(default, rename = "h", deserialize_with = "flex::opt_decimal")]
    pub high: Option<Decimal>,
    #[serde(default, rename = "l", deserialize_with = "flex::opt_decimal")]
    pub low: Option<Decimal>,
    #[serde(default, rename = "c", alias = "close", deserialize_with = "flex::opt_decimal")]
    pub close: Option<Decimal>,
    #[serde(default, rename = "v", deserialize_with = "flex::opt_decimal")]
    pub volume: Option<Decimal>,
    #[serde(default, rename = "t", deserialize_with = "flex::opt_timestamp_ms")]
    pub timestamp_ms: Option<i64>,
}

impl RawBar {
    pub fn into_bar(self) -> Option<Bar> {
        let close = self.close.filter(|c| *c > Decimal::ZERO)?;
        Some(Bar {
            open: self.open.unwrap_or(close),
            high: self.high.unwrap_or(close),
            low: self.low.unwrap_or(close),
            close,
            volume: self.volume.unwrap_or_default(),
            timestamp_ms: self.timestamp_ms,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QuotesResponse {
    #[serde(default)]
    pub quotes: HashMap<String, RawQuote>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TradesResponse {
    #[serde(default)]
    pub trades: HashMap<String, RawTrade>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: HashMap<String, Vec<RawBar>>,
}

// ==================== Trading ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
    Opg,
    Cls,
}

/// Order request payload for `POST /v2/orders`.
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    /// Venue-format symbol
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::str_option"
    )]
    pub limit_price: Option<Decimal>,
    /// Assigned once per request. A resend of the same request carries the
    /// same id, so the venue accepts it at most once.
    pub client_order_id: String,
}

static ORDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Fresh client order id, unique by sequence within a process and by pid
/// and clock across processes.
pub fn next_client_order_id() -> String {
    format!(
        "be-{}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_millis(),
        ORDER_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

impl NewOrder {
    pub fn limit(symbol: &str, side: OrderSide, qty: Decimal, price: Decimal, tif: TimeInForce) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty,
            side,
            order_type: OrderType::Limit,
            time_in_force: tif,
            limit_price: Some(price),
            client_order_id: next_client_order_id(),
        }
    }

    pub fn market(symbol: &str, side: OrderSide, qty: Decimal, tif: TimeInForce) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty,
            side,
            order_type: OrderType::Market,
            time_in_force: tif,
            limit_price: None,
            client_order_id: next_client_order_id(),
        }
    }
}

/// Order as reported by the venue. Symbol is canonicalized on decode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(deserialize_with = "canonical_symbol")]
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub qty: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub limit_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub filled_qty: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub filled_avg_price: Option<Decimal>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Submission time, falling back to creation time.
    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at.or(self.created_at)
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status.as_str(),
            "new" | "accepted" | "pending_new" | "partially_filled" | "held" | "accepted_for_bidding"
        )
    }
}

fn canonical_symbol<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let raw = String::deserialize(d)?;
    Ok(to_canonical_symbol(&raw))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPosition {
    pub symbol: String,
    #[serde(deserialize_with = "flex::decimal")]
    pub qty: Decimal,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub qty_available: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub avg_entry_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub current_price: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub market_value: Option<Decimal>,
}

/// Venue-reported holding. The only source of truth for quantities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub available_qty: Decimal,
    pub basis_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub market_value: Decimal,
}

impl From<RawPosition> for Position {
    fn from(raw: RawPosition) -> Self {
        let basis_price = raw.avg_entry_price.unwrap_or_default();
        let mark = raw.current_price;
        let market_value = raw
            .market_value
            .unwrap_or_else(|| raw.qty * mark.unwrap_or(basis_price));
        Self {
            symbol: to_canonical_symbol(&raw.symbol),
            qty: raw.qty,
            available_qty: raw.qty_available.unwrap_or(raw.qty),
            basis_price,
            mark_price: mark,
            market_value,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAccount {
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub equity: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub last_equity: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub equity_previous_close: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub buying_power: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub crypto_buying_power: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub non_marginable_buying_power: Option<Decimal>,
    #[serde(default, deserialize_with = "flex::opt_decimal")]
    pub cash: Option<Decimal>,
    #[serde(default)]
    pub pattern_day_trader: bool,
    #[serde(default)]
    pub daytrade_count: u32,
}

/// Account summary the guards read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub buying_power: Decimal,
    /// Percent change against the previous close. `None` without a reference.
    pub daily_change_pct: Option<Decimal>,
    pub pattern_day_trader: bool,
    pub daytrade_count: u32,
    pub as_of: DateTime<Utc>,
}

impl RawAccount {
    pub fn into_snapshot(self, as_of: DateTime<Utc>) -> AccountSnapshot {
        let buying_power = [
            self.buying_power,
            self.crypto_buying_power,
            self.non_marginable_buying_power,
            self.cash,
        ]
        .into_iter()
        .flatten()
        .find(|v| *v > Decimal::ZERO)
        .unwrap_or_default();

        let equity = self.equity.unwrap_or_default();
        let reference = self
            .equity_previous_close
            .filter(|v| *v > Decimal::ZERO)
            .or(self.last_equity.filter(|v| *v > Decimal::ZERO));
        let daily_change_pct = reference.map(|r| (equity - r) / r * dec!(100));

        AccountSnapshot {
            equity,
            buying_power,
            daily_change_pct,
            pattern_day_trader: self.pattern_day_trader,
            daytrade_count: self.daytrade_count,
            as_of,
        }
    }
}

/// Tradable asset metadata from `GET /v2/assets`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetInfo {
    #[serde(deserialize_with = "canonical_symbol")]
    pub symbol: String,
    #[serde(default, rename = "class")]
    pub asset_class: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tradable: bool,
    #[serde(default)]
    pub fractionable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketClock {
    pub is_open: bool,
    #[serde(default)]
    pub next_open: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_close: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    // =========================================================================
    // Timestamp normalization
    // =========================================================================

    #[test]
    fn test_timestamp_unit_sweep() {
        // Walk instants from 1990 to 2090 in irregular steps and present each
        // one in every unit the venue uses.
        let start = Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap().timestamp_millis();
        let end = Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap().timestamp_millis();
        let mut ms = start;
        let mut step: i64 = 7_919_000_123;
        while ms < end {
            let secs = ms as f64 / 1e3;
            let micros = ms as f64 * 1e3;
            let nanos = ms as f64 * 1e6;

            assert_eq!(normalize_epoch_ms(ms as f64), Some(ms));
            assert!((normalize_epoch_ms(secs).unwrap() - ms).abs() <= 1, "seconds {secs}");
            assert!((normalize_epoch_ms(micros).unwrap() - ms).abs() <= 1, "micros {micros}");
            assert!((normalize_epoch_ms(nanos).unwrap() - ms).abs() <= 1, "nanos {nanos}");

            assert_eq!(parse_timestamp_ms(&json!(ms)), Some(ms));
            assert_eq!(parse_timestamp_ms(&json!(ms.to_string())), Some(ms));
            let rfc = Utc.timestamp_millis_opt(ms).unwrap().to_rfc3339();
            assert_eq!(parse_timestamp_ms(&json!(rfc)), Some(ms));

            ms += step;
            step = step * 31 / 29 + 1_000_003;
        }
    }

    #[test]
    fn test_timestamp_rfc3339_nanos() {
        let parsed = parse_timestamp_ms(&json!("2024-06-10T14:30:00.123456789Z")).unwrap();
        let expected = Utc
            .with_ymd_and_hms(2024, 6, 10, 14, 30, 0)
            .unwrap()
            .timestamp_millis()
            + 123;
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp_ms(&json!("not a time")), None);
        assert_eq!(parse_timestamp_ms(&json!(null)), None);
        assert_eq!(parse_timestamp_ms(&json!(-5)), None);
        assert_eq!(parse_timestamp_ms(&json!({"t": 1})), None);
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    #[test]
    fn test_quote_field_aliases() {
        let short: RawQuote =
            serde_json::from_value(json!({"bp": 100.0, "ap": 100.5, "bs": 2, "as": 3, "t": "2024-06-10T14:30:00Z"}))
                .unwrap();
        let long: RawQuote = serde_json::from_value(
            json!({"bid_price": "100", "ask_price": "100.5", "bid_size": "2", "ask_size": "3", "timestamp": 1718029800000i64}),
        )
        .unwrap();

        let a = short.into_quote().unwrap();
        let b = long.into_quote().unwrap();
        assert_eq!(a.bid, dec!(100));
        assert_eq!(a.ask, dec!(100.5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_quote_invalid_when_side_missing_or_zero() {
        let missing: RawQuote = serde_json::from_value(json!({"bp": 1.0})).unwrap();
        assert!(missing.into_quote().is_none());
        let zero: RawQuote = serde_json::from_value(json!({"bp": 0, "ap": 1.0})).unwrap();
        assert!(zero.into_quote().is_none());
    }

    #[test]
    fn test_spread_bps() {
        let quote = Quote {
            bid: dec!(100),
            ask: dec!(100.5),
            bid_size: None,
            ask_size: None,
            timestamp_ms: None,
        };
        let spread = quote.spread_bps();
        assert!(spread > dec!(49.87) && spread < dec!(49.88), "{spread}");
    }

    #[test]
    fn test_quote_freshness() {
        let quote = Quote {
            bid: dec!(1),
            ask: dec!(1.01),
            bid_size: None,
            ask_size: None,
            timestamp_ms: Some(1_000_000),
        };
        assert!(quote.is_fresh(1_015_000, 15_000, true));
        assert!(!quote.is_fresh(1_015_001, 15_000, true));

        let untimed = Quote {
            timestamp_ms: None,
            ..quote
        };
        assert!(!untimed.is_fresh(0, 15_000, true));
        assert!(untimed.is_fresh(0, 15_000, false));
    }

    // =========================================================================
    // Trading payloads
    // =========================================================================

    #[test]
    fn test_account_snapshot_derivation() {
        let raw: RawAccount = serde_json::from_value(json!({
            "equity": "950",
            "last_equity": "1000",
            "buying_power": "0",
            "non_marginable_buying_power": "400",
            "cash": "500",
            "pattern_day_trader": false,
            "daytrade_count": 1
        }))
        .unwrap();

        let snapshot = raw.into_snapshot(Utc::now());
        assert_eq!(snapshot.buying_power, dec!(400));
        assert_eq!(snapshot.daily_change_pct, Some(dec!(-5)));
        assert_eq!(snapshot.daytrade_count, 1);
    }

    #[test]
    fn test_position_decoding_canonicalizes_symbol() {
        let raw: RawPosition = serde_json::from_value(json!({
            "symbol": "BTC/USD",
            "qty": "0.0015",
            "qty_available": "0.0015",
            "avg_entry_price": "60000",
            "current_price": "60100",
            "market_value": "90.15"
        }))
        .unwrap();
        let position = Position::from(raw);
        assert_eq!(position.symbol, "BTCUSD");
        assert_eq!(position.available_qty, dec!(0.0015));
        assert_eq!(position.market_value, dec!(90.15));
    }

    #[test]
    fn test_order_decoding() {
        let order: Order = serde_json::from_value(json!({
            "id": "abc",
            "client_order_id": "x",
            "symbol": "ETH/USD",
            "side": "sell",
            "type": "limit",
            "qty": "0.5",
            "limit_price": "3500.1",
            "status": "new",
            "submitted_at": "2024-06-10T14:30:00Z"
        }))
        .unwrap();
        assert_eq!(order.symbol, "ETHUSD");
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.limit_price, Some(dec!(3500.1)));
        assert!(order.is_open());
        assert!(order.placed_at().is_some());
    }

    #[test]
    fn test_new_order_serializes_strings() {
        let order = NewOrder::limit("BTC/USD", OrderSide::Buy, dec!(0.001), dec!(60000.5), TimeInForce::Gtc);
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["qty"], "0.001");
        assert_eq!(value["limit_price"], "60000.5");
        assert_eq!(value["type"], "limit");
        assert_eq!(value["time_in_force"], "gtc");

        let market = NewOrder::market("AAPL", OrderSide::Sell, dec!(1), TimeInForce::Day);
        let value = serde_json::to_value(&market).unwrap();
        assert!(value.get("limit_price").is_none());
        assert_eq!(value["client_order_id"], market.client_order_id.as_str());
    }

    #[test]
    fn test_client_order_ids_are_distinct_and_stable() {
        let first = NewOrder::market("AAPL", OrderSide::Buy, dec!(1), TimeInForce::Day);
        let second = NewOrder::market("AAPL", OrderSide::Buy, dec!(1), TimeInForce::Day);
        assert_ne!(first.client_order_id, second.client_order_id);
        assert!(first.client_order_id.len() <= 48);

        let resend = first.clone();
        assert_eq!(
            serde_json::to_value(&first).unwrap()["client_order_id"],
            serde_json::to_value(&resend).unwrap()["client_order_id"]
        );
    }
}
