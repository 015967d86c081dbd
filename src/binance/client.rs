// =============================================================================
// Binance USDⓈ-M Futures REST Client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the relay and Binance servers.
//
// Every request carries a 10 s hard timeout; the decision core performs no
// retries of its own, so a hung call must fail fast.
// =============================================================================

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::exchange::{Candle, Exchange, FilledOrder, OrderAck, Position, SymbolFilters};

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Binance USDⓈ-M futures REST client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct BinanceFutures {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFutures {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key` — Binance API key (sent as a header, never in query params).
    /// * `secret`  — Binance secret key used exclusively for HMAC signing.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        // The API key header is required for all signed endpoints.
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceFutures initialised (base_url=https://fapi.binance.com)");

        Self {
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
        }
    }

    /// Build a client from `BINANCE_API_KEY` / `BINANCE_API_SECRET`.
    ///
    /// Missing or empty credentials are fatal: nothing may execute without
    /// signing material.
    pub fn from_env() -> Result<Self, RelayError> {
        let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        let secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();

        if api_key.is_empty() || secret.is_empty() {
            return Err(RelayError::MissingCredentials(
                "BINANCE_API_KEY / BINANCE_API_SECRET not set".to_string(),
            ));
        }

        Ok(Self::new(api_key, secret))
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// Send a request and decode JSON, surfacing exchange error bodies.
    async fn dispatch(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<serde_json::Value, RelayError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::Order(format!("{what} request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Order(format!("{what} response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(RelayError::Order(format!(
                "{what} returned {status}: {body}"
            )));
        }

        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn json_f64(val: &serde_json::Value) -> f64 {
        if let Some(s) = val.as_str() {
            s.parse().unwrap_or(0.0)
        } else {
            val.as_f64().unwrap_or(0.0)
        }
    }

    fn parse_order_ack(symbol: &str, body: &serde_json::Value) -> OrderAck {
        OrderAck {
            order_id: body["orderId"].as_u64().unwrap_or(0),
            client_order_id: body["clientOrderId"].as_str().unwrap_or("").to_string(),
            symbol: symbol.to_string(),
            side: body["side"].as_str().unwrap_or("").to_string(),
            order_type: body["type"].as_str().unwrap_or("").to_string(),
            avg_price: Self::json_f64(&body["avgPrice"]),
            executed_qty: Self::json_f64(&body["executedQty"]),
        }
    }

    /// Submit one order via POST /fapi/v1/order with a fresh client order id.
    async fn submit_order(&self, symbol: &str, params: String) -> Result<OrderAck, RelayError> {
        let client_order_id = format!("helios-{}", Uuid::new_v4().simple());
        let params = format!("{params}&newClientOrderId={client_order_id}");

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let body = self
            .dispatch(self.client.post(&url), "POST /fapi/v1/order")
            .await?;

        debug!(symbol, client_order_id, "order accepted");
        Ok(Self::parse_order_ack(symbol, &body))
    }
}

// =============================================================================
// Exchange implementation
// =============================================================================

#[async_trait]
impl Exchange for BinanceFutures {
    /// GET /fapi/v2/positionRisk (signed).
    #[instrument(skip(self), name = "binance::positions")]
    async fn positions(&self, symbol: &str) -> Result<Vec<Position>, RelayError> {
        let qs = self.signed_query(&format!("symbol={symbol}"));
        let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, qs);

        let body = self
            .dispatch(self.client.get(&url), "GET /fapi/v2/positionRisk")
            .await?;

        let raw = body
            .as_array()
            .ok_or_else(|| RelayError::Order("positionRisk response is not an array".to_string()))?;

        let positions: Vec<Position> = raw
            .iter()
            .filter(|p| p["symbol"].as_str() == Some(symbol))
            .map(|p| Position {
                symbol: symbol.to_string(),
                quantity: Self::json_f64(&p["positionAmt"]),
                entry_price: Self::json_f64(&p["entryPrice"]),
                mark_price: Self::json_f64(&p["markPrice"]),
                unrealized_pnl: Self::json_f64(&p["unRealizedProfit"]),
                liquidation_price: Self::json_f64(&p["liquidationPrice"]),
                isolated_margin: Self::json_f64(&p["isolatedMargin"]),
                notional: Self::json_f64(&p["notional"]),
                update_time: p["updateTime"].as_i64().unwrap_or(0),
            })
            .collect();

        debug!(symbol, count = positions.len(), "position risk retrieved");
        Ok(positions)
    }

    /// GET /fapi/v2/balance (signed) — available USDT.
    #[instrument(skip(self), name = "binance::balance")]
    async fn balance(&self) -> Result<f64, RelayError> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/balance?{}", self.base_url, qs);

        let body = self
            .dispatch(self.client.get(&url), "GET /fapi/v2/balance")
            .await
            .map_err(|e| RelayError::Calculation(e.to_string()))?;

        let entries = body
            .as_array()
            .ok_or_else(|| RelayError::Calculation("balance response is not an array".to_string()))?;

        for entry in entries {
            if entry["asset"].as_str() == Some("USDT") {
                let available = Self::json_f64(&entry["availableBalance"]);
                debug!(available, "USDT balance retrieved");
                return Ok(available);
            }
        }

        warn!("USDT not found in balance response — returning 0.0");
        Ok(0.0)
    }

    /// GET /fapi/v1/exchangeInfo filtered by symbol.
    #[instrument(skip(self), name = "binance::symbol_filters")]
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, RelayError> {
        let url = format!("{}/fapi/v1/exchangeInfo?symbol={}", self.base_url, symbol);

        let body = self
            .dispatch(self.client.get(&url), "GET /fapi/v1/exchangeInfo")
            .await
            .map_err(|e| RelayError::Calculation(e.to_string()))?;

        let info = body["symbols"]
            .as_array()
            .and_then(|arr| arr.iter().find(|s| s["symbol"].as_str() == Some(symbol)))
            .ok_or_else(|| {
                RelayError::Calculation(format!("symbol {symbol} not found in exchangeInfo"))
            })?;

        let filters = SymbolFilters {
            price_precision: info["pricePrecision"].as_u64().unwrap_or(2) as u32,
            quantity_precision: info["quantityPrecision"].as_u64().unwrap_or(3) as u32,
        };

        debug!(
            symbol,
            price_precision = filters.price_precision,
            quantity_precision = filters.quantity_precision,
            "symbol filters retrieved"
        );
        Ok(filters)
    }

    /// GET /fapi/v1/ticker/price (public).
    #[instrument(skip(self), name = "binance::market_price")]
    async fn market_price(&self, symbol: &str) -> Result<f64, RelayError> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol);

        let body = self
            .dispatch(self.client.get(&url), "GET /fapi/v1/ticker/price")
            .await
            .map_err(|e| RelayError::Calculation(e.to_string()))?;

        let price = Self::json_f64(&body["price"]);
        if price <= 0.0 {
            return Err(RelayError::Calculation(format!(
                "no valid ticker price for {symbol}"
            )));
        }

        debug!(symbol, price, "ticker price retrieved");
        Ok(price)
    }

    /// GET /fapi/v1/klines (public — no signature required).
    ///
    /// Array indices follow Binance's array-of-arrays format:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, ...
    #[instrument(skip(self), name = "binance::klines")]
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, RelayError> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let body = self
            .dispatch(self.client.get(&url), "GET /fapi/v1/klines")
            .await
            .map_err(|e| RelayError::Calculation(e.to_string()))?;

        let raw = body
            .as_array()
            .ok_or_else(|| RelayError::Calculation("klines response is not an array".to_string()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 7 => a,
                _ => {
                    warn!("skipping malformed kline entry");
                    continue;
                }
            };

            candles.push(Candle {
                open_time: arr[0].as_i64().unwrap_or(0),
                open: Self::json_f64(&arr[1]),
                high: Self::json_f64(&arr[2]),
                low: Self::json_f64(&arr[3]),
                close: Self::json_f64(&arr[4]),
                volume: Self::json_f64(&arr[5]),
                close_time: arr[6].as_i64().unwrap_or(0),
            });
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// POST /fapi/v1/order (signed) — MARKET.
    #[instrument(skip(self), name = "binance::market_order")]
    async fn market_order(
        &self,
        symbol: &str,
        side: &str,
        quantity: f64,
    ) -> Result<OrderAck, RelayError> {
        let params = format!("symbol={symbol}&side={side}&type=MARKET&quantity={quantity}");
        self.submit_order(symbol, params).await
    }

    /// POST /fapi/v1/order (signed) — STOP_MARKET with closePosition.
    #[instrument(skip(self), name = "binance::stop_market_order")]
    async fn stop_market_order(
        &self,
        symbol: &str,
        side: &str,
        stop_price: f64,
        quantity: f64,
    ) -> Result<OrderAck, RelayError> {
        let params = format!(
            "symbol={symbol}&side={side}&type=STOP_MARKET&stopPrice={stop_price}\
             &quantity={quantity}&closePosition=true"
        );
        self.submit_order(symbol, params).await
    }

    /// POST /fapi/v1/order (signed) — TAKE_PROFIT_MARKET with closePosition.
    #[instrument(skip(self), name = "binance::take_profit_market_order")]
    async fn take_profit_market_order(
        &self,
        symbol: &str,
        side: &str,
        stop_price: f64,
        quantity: f64,
    ) -> Result<OrderAck, RelayError> {
        let params = format!(
            "symbol={symbol}&side={side}&type=TAKE_PROFIT_MARKET&stopPrice={stop_price}\
             &quantity={quantity}&closePosition=true"
        );
        self.submit_order(symbol, params).await
    }

    /// DELETE /fapi/v1/allOpenOrders (signed).
    #[instrument(skip(self), name = "binance::cancel_all_orders")]
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), RelayError> {
        let qs = self.signed_query(&format!("symbol={symbol}"));
        let url = format!("{}/fapi/v1/allOpenOrders?{}", self.base_url, qs);

        self.dispatch(self.client.delete(&url), "DELETE /fapi/v1/allOpenOrders")
            .await?;

        debug!(symbol, "open orders cancelled");
        Ok(())
    }

    /// POST /fapi/v1/leverage (signed).
    #[instrument(skip(self), name = "binance::set_leverage")]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), RelayError> {
        let qs = self.signed_query(&format!("symbol={symbol}&leverage={leverage}"));
        let url = format!("{}/fapi/v1/leverage?{}", self.base_url, qs);

        self.dispatch(self.client.post(&url), "POST /fapi/v1/leverage")
            .await?;

        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    /// GET /fapi/v1/allOrders (signed) — recent order history.
    #[instrument(skip(self), name = "binance::filled_orders")]
    async fn filled_orders(&self, symbol: &str) -> Result<Vec<FilledOrder>, RelayError> {
        let qs = self.signed_query(&format!("symbol={symbol}&limit=50"));
        let url = format!("{}/fapi/v1/allOrders?{}", self.base_url, qs);

        let body = self
            .dispatch(self.client.get(&url), "GET /fapi/v1/allOrders")
            .await?;

        let raw = body
            .as_array()
            .ok_or_else(|| RelayError::Order("allOrders response is not an array".to_string()))?;

        let orders: Vec<FilledOrder> = raw
            .iter()
            .map(|o| FilledOrder {
                order_id: o["orderId"].as_u64().unwrap_or(0),
                side: o["side"].as_str().unwrap_or("").to_string(),
                order_type: o["type"].as_str().unwrap_or("").to_string(),
                status: o["status"].as_str().unwrap_or("").to_string(),
                executed_qty: Self::json_f64(&o["executedQty"]),
                avg_price: Self::json_f64(&o["avgPrice"]),
                update_time: o["updateTime"].as_i64().unwrap_or(0),
                reduce_only: o["reduceOnly"].as_bool().unwrap_or(false),
            })
            .collect();

        debug!(symbol, count = orders.len(), "order history retrieved");
        Ok(orders)
    }
}

impl std::fmt::Debug for BinanceFutures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFutures")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let client = BinanceFutures::new("key", "secret");
        let sig = client.sign("symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, client.sign("symbol=BTCUSDT&timestamp=1700000000000"));
    }

    #[test]
    fn signed_query_appends_signature() {
        let client = BinanceFutures::new("key", "secret");
        let qs = client.signed_query("symbol=BTCUSDT");
        assert!(qs.starts_with("symbol=BTCUSDT&timestamp="));
        assert!(qs.contains("&recvWindow=5000&signature="));
    }

    #[test]
    fn json_f64_accepts_strings_and_numbers() {
        assert_eq!(BinanceFutures::json_f64(&serde_json::json!("1.5")), 1.5);
        assert_eq!(BinanceFutures::json_f64(&serde_json::json!(2.5)), 2.5);
        assert_eq!(BinanceFutures::json_f64(&serde_json::json!(null)), 0.0);
        assert_eq!(BinanceFutures::json_f64(&serde_json::json!("junk")), 0.0);
    }

    #[test]
    fn debug_redacts_secret() {
        let client = BinanceFutures::new("key", "supersecret");
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("supersecret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn order_ack_parsing() {
        let body = serde_json::json!({
            "orderId": 42,
            "clientOrderId": "helios-abc",
            "side": "BUY",
            "type": "MARKET",
            "avgPrice": "100.5",
            "executedQty": "2.0"
        });
        let ack = BinanceFutures::parse_order_ack("BTCUSDT", &body);
        assert_eq!(ack.order_id, 42);
        assert_eq!(ack.side, "BUY");
        assert!((ack.avg_price - 100.5).abs() < 1e-12);
        assert!((ack.executed_qty - 2.0).abs() < 1e-12);
    }
}
