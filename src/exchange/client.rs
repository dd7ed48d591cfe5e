//! Alpaca trading API client.

use super::http::{HttpRequest, ResilientClient};
use super::traits::TradingVenue;
use super::types::*;
use crate::config::{HttpConfig, VenueConfig};
use crate::error::{EngineError, EngineResult};
use crate::market::instrument::to_venue_symbol;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Alpaca REST client for account, order, position and asset endpoints.
pub struct AlpacaClient {
    http: Arc<ResilientClient>,
    base_url: String,
}

/// Alpaca authentication headers.
pub fn auth_headers(config: &VenueConfig) -> [(&'static str, &str); 2] {
    [
        ("APCA-API-KEY-ID", config.api_key.as_str()),
        ("APCA-API-SECRET-KEY", config.secret_key.as_str()),
    ]
}

impl AlpacaClient {
    /// Create a new trading client from configuration.
    pub fn new(venue: &VenueConfig, http: &HttpConfig) -> Result<Self> {
        let client = ResilientClient::new(http, &auth_headers(venue))?;
        Ok(Self::with_http(Arc::new(client), &venue.trading_url))
    }

    /// Share an existing HTTP client.
    pub fn with_http(http: Arc<ResilientClient>, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2{}", self.base_url, path)
    }

    async fn order_by_client_id(&self, client_order_id: &str) -> EngineResult<Option<Order>> {
        let request = HttpRequest::get(self.url(&format!(
            "/orders:by_client_order_id?client_order_id={}",
            urlencoding::encode(client_order_id)
        )));
        self.http.json_opt(&request).await
    }

    /// Path segment for a symbol. Crypto pairs keep their slash, encoded.
    fn symbol_segment(symbol: &str) -> String {
        urlencoding::encode(&to_venue_symbol(symbol)).into_owned()
    }
}

fn is_duplicate_client_id(e: &EngineError) -> bool {
    matches!(e, EngineError::VenueRejection { status: 422, body, .. } if body.contains("client_order_id"))
}

#[async_trait]
impl TradingVenue for AlpacaClient {
    #[instrument(skip(self))]
    async fn account(&self) -> EngineResult<AccountSnapshot> {
        let raw: RawAccount = self.http.json(&HttpRequest::get(self.url("/account"))).await?;
        Ok(raw.into_snapshot(Utc::now()))
    }

    #[instrument(skip(self))]
    async fn open_orders(&self) -> EngineResult<Vec<Order>> {
        self.http
            .json(&HttpRequest::get(
                self.url("/orders?status=open&nested=false&limit=500"),
            ))
            .await
    }

    #[instrument(skip(self))]
    async fn submit_order(&self, order: &NewOrder) -> EngineResult<Order> {
        let body = serde_json::to_value(order).map_err(|e| EngineError::decode("order", e))?;
        let placed: Order = match self.http.json(&HttpRequest::post(self.url("/orders"), body)).await {
            Ok(placed) => placed,
            // A resend after the first attempt had already landed.
            Err(e) if is_duplicate_client_id(&e) => match self.order_by_client_id(&order.client_order_id).await? {
                Some(existing) => {
                    warn!(
                        symbol = %order.symbol,
                        client_order_id = %order.client_order_id,
                        order_id = %existing.id,
                        "Order already accepted, using the existing one"
                    );
                    existing
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        };
        info!(
            symbol = %order.symbol,
            order_id = %placed.id,
            side = ?order.side,
            order_type = ?order.order_type,
            qty = %order.qty,
            limit = ?order.limit_price,
            "Order submitted"
        );
        Ok(placed)
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> EngineResult<()> {
        let request = HttpRequest::delete(self.url(&format!("/orders/{order_id}")));
        match self.http.execute(&request).await {
            Ok(()) => Ok(()),
            // Already gone or already filled: nothing left to cancel.
            Err(EngineError::VenueRejection { status: 404 | 422, .. }) => {
                debug!(%order_id, "Order no longer cancelable");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn positions(&self) -> EngineResult<Vec<Position>> {
        let raw: Vec<RawPosition> = self.http.json(&HttpRequest::get(self.url("/positions"))).await?;
        Ok(raw.into_iter().map(Position::from).collect())
    }

    #[instrument(skip(self))]
    async fn position(&self, symbol: &str) -> EngineResult<Option<Position>> {
        let request = HttpRequest::get(self.url(&format!(
            "/positions/{}",
            urlencoding::encode(&symbol.replace('/', ""))
        )));
        let raw: Option<RawPosition> = self.http.json_opt(&request).await?;
        Ok(raw.map(Position::from))
    }

    #[instrument(skip(self))]
    async fn asset(&self, symbol: &str) -> EngineResult<Option<AssetInfo>> {
        let request = HttpRequest::get(self.url(&format!("/assets/{}", Self::symbol_segment(symbol))));
        self.http.json_opt(&request).await
    }

    #[instrument(skip(self))]
    async fn clock(&self) -> EngineResult<MarketClock> {
        self.http.json(&HttpRequest::get(self.url("/clock"))).await
    }

    #[instrument(skip(self))]
    async fn crypto_assets(&self) -> EngineResult<Vec<AssetInfo>> {
        self.http
            .json(&HttpRequest::get(
                self.url("/assets?asset_class=crypto&status=active"),
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tokio_test::assert_ok;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AlpacaClient {
        let venue = VenueConfig {
            api_key: "key".into(),
            secret_key: "secret".into(),
            trading_url: server.uri(),
            ..VenueConfig::default()
        };
        let http = HttpConfig {
            timeout_ms: 500,
            max_retries: 1,
            status_backoff_ms: 1,
            transport_backoff_ms: 1,
        };
        AlpacaClient::new(&venue, &http).unwrap()
    }

    #[tokio::test]
    async fn test_account_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/account"))
            .and(header("APCA-API-KEY-ID", "key"))
            .and(header("APCA-API-SECRET-KEY", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "equity": "1010",
                "last_equity": "1000",
                "buying_power": "500",
                "pattern_day_trader": false,
                "daytrade_count": 0
            })))
            .mount(&server)
            .await;

        let snapshot = client_for(&server).account().await.unwrap();
        assert_eq!(snapshot.equity, dec!(1010));
        assert_eq!(snapshot.daily_change_pct, Some(dec!(1)));
    }

    #[tokio::test]
    async fn test_submit_order_posts_venue_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .and(body_partial_json(json!({
                "symbol": "BTC/USD",
                "side": "buy",
                "type": "limit",
                "time_in_force": "gtc",
                "limit_price": "60000"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "o-1",
                "symbol": "BTC/USD",
                "side": "buy",
                "type": "limit",
                "qty": "0.001",
                "limit_price": "60000",
                "status": "new"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let order = NewOrder::limit("BTC/USD", OrderSide::Buy, dec!(0.001), dec!(60000), TimeInForce::Gtc);
        let placed = client_for(&server).submit_order(&order).await.unwrap();
        assert_eq!(placed.id, "o-1");
        assert_eq!(placed.symbol, "BTCUSD");
    }

    #[tokio::test]
    async fn test_duplicate_client_id_returns_existing_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": 40010001,
                "message": "client_order_id must be unique"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let order = NewOrder::market("ETH/USD", OrderSide::Sell, dec!(0.5), TimeInForce::Gtc);
        Mock::given(method("GET"))
            .and(path("/v2/orders:by_client_order_id"))
            .and(query_param("client_order_id", order.client_order_id.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "o-7",
                "client_order_id": order.client_order_id,
                "symbol": "ETH/USD",
                "side": "sell",
                "type": "market",
                "qty": "0.5",
                "status": "filled"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let placed = assert_ok!(client_for(&server).submit_order(&order).await);
        assert_eq!(placed.id, "o-7");
        assert_eq!(placed.client_order_id.as_deref(), Some(order.client_order_id.as_str()));
    }

    #[tokio::test]
    async fn test_cancel_tolerates_already_filled() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/orders/o-9"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        assert_ok!(client_for(&server).cancel_order("o-9").await);
    }

    #[tokio::test]
    async fn test_missing_position_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions/ETHUSD"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "position does not exist"})))
            .mount(&server)
            .await;

        assert!(client_for(&server).position("ETH/USD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crypto_assets_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/assets"))
            .and(query_param("asset_class", "crypto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTC/USD", "class": "crypto", "status": "active", "tradable": true, "fractionable": true}
            ])))
            .mount(&server)
            .await;

        let assets = client_for(&server).crypto_assets().await.unwrap();
        assert_eq!(assets[0].symbol, "BTCUSD");
        assert!(assets[0].tradable);
    }
}
