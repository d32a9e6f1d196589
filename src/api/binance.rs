//! Binance spot REST client.
//!
//! Public endpoints (klines, 24h tickers) need no credentials. Account and
//! order endpoints are signed with HMAC-SHA256 over the query string using
//! `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`. Reads retry on transport
//! errors, 5xx and 429; order writes are sent once.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::gateway::{MarketGateway, OrderAck, OrderRequest};
use super::paper::round_to_step;
use super::types::{AccountInfo, BinanceOrder, KlineParams, RawKline, Ticker24h, TimeInForce};
use crate::models::{Candle, Side};

const BINANCE_API_BASE: &str = "https://api.binance.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(60);
const RECV_WINDOW_MS: u64 = 5_000;

/// Spot quantities carry at most 8 decimals.
const QUANTITY_STEP: Decimal = dec!(0.00000001);

/// Binance returns at most this many klines per request.
pub const MAX_KLINE_LIMIT: u32 = 1000;

type HmacSha256 = Hmac<Sha256>;

/// API key pair for signed endpoints.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Read `BINANCE_API_KEY` and `BINANCE_SECRET_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BINANCE_API_KEY").context("BINANCE_API_KEY not set")?;
        let secret_key = std::env::var("BINANCE_SECRET_KEY").context("BINANCE_SECRET_KEY not set")?;
        if api_key.trim().is_empty() || secret_key.trim().is_empty() {
            anyhow::bail!("BINANCE_API_KEY and BINANCE_SECRET_KEY must not be empty");
        }
        Ok(Self::new(api_key.trim(), secret_key.trim()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Hex HMAC-SHA256 of `payload` keyed with `secret`.
pub fn sign_query(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).context("Invalid HMAC key")?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `k1=v1&k2=v2` in the given order. Values are plain symbols and numbers,
/// so no escaping is applied.
fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn order_side(side: Side) -> &'static str {
    match side {
        Side::Long => "BUY",
        Side::Short => "SELL",
    }
}

/// Quantity as Binance expects it: at most 8 decimals, never in exponent
/// notation.
fn format_quantity(quantity: f64) -> Result<String> {
    round_to_step(quantity, QUANTITY_STEP)
        .map(|q| q.to_string())
        .with_context(|| format!("Quantity {} rounds to zero", quantity))
}

/// Client for the Binance spot REST API.
pub struct BinanceClient {
    client: Client,
    base_url: String,
    max_retry_elapsed: Duration,
    credentials: Option<Credentials>,
}

impl BinanceClient {
    /// Public-data client without credentials.
    pub fn new() -> Result<Self> {
        Self::with_base_url(BINANCE_API_BASE.to_string())
    }

    /// Client with credentials from the environment, for live trading.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new()?.with_credentials(Credentials::from_env()?))
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            max_retry_elapsed: MAX_RETRY_ELAPSED,
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Send the request built by `build`, decoding a JSON body.
    ///
    /// `build` runs once per attempt so signed requests get a fresh
    /// timestamp. With `retry` off, transient failures are returned as is.
    async fn send_json<T, F>(&self, path: &str, retry: bool, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> Result<RequestBuilder> + Sync,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(self.max_retry_elapsed))
            .build();
        let build = &build;
        let transient = move |err: anyhow::Error| {
            if retry {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            }
        };

        backoff::future::retry_notify(
            policy,
            move || async move {
                let request = build().map_err(backoff::Error::permanent)?;
                debug!(path, "Binance request");
                let response = request
                    .send()
                    .await
                    .map_err(|e| transient(anyhow!(e).context(format!("Failed to fetch {}", path))))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    let err = anyhow!("{} request failed: {} - {}", path, status, body);
                    return Err(if is_transient(status) {
                        transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    });
                }

                response
                    .json::<T>()
                    .await
                    .map_err(|e| backoff::Error::permanent(anyhow!(e).context(format!("Failed to parse {} response", path))))
            },
            |err: anyhow::Error, wait: Duration| {
                warn!(error = %err, retry_in_ms = wait.as_millis() as u64, "Transient API error, retrying");
            },
        )
        .await
    }

    /// GET a public JSON endpoint, retrying transient failures.
    async fn get_json<T, Q>(&self, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized + Sync,
    {
        let url = format!("{}{}", self.base_url, path);
        self.send_json(path, true, || Ok(self.client.get(&url).query(query)))
            .await
    }

    /// Call a signed endpoint. `params` are sent in order, followed by
    /// `recvWindow`, `timestamp` and the signature.
    async fn signed_json<T>(&self, method: Method, path: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let credentials = self
            .credentials
            .as_ref()
            .with_context(|| format!("{} needs BINANCE_API_KEY and BINANCE_SECRET_KEY", path))?;
        let retry = method == Method::GET;

        self.send_json(path, retry, || {
            let mut query = encode_params(params);
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                RECV_WINDOW_MS,
                Utc::now().timestamp_millis()
            ));
            let signature = sign_query(&credentials.secret_key, &query)?;
            let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

            Ok(self
                .client
                .request(method.clone(), url)
                .header("X-MBX-APIKEY", &credentials.api_key))
        })
        .await
    }

    /// Full account snapshot.
    pub async fn account(&self) -> Result<AccountInfo> {
        self.signed_json(Method::GET, "/api/v3/account", &[]).await
    }

    /// Submit an order. `price` and `time_in_force` are for limit orders.
    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        limit: Option<(f64, TimeInForce)>,
    ) -> Result<BinanceOrder> {
        let mut params = vec![
            ("symbol", symbol.to_uppercase()),
            ("side", order_side(side).to_string()),
        ];
        match limit {
            Some((price, tif)) => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", tif.as_str().to_string()));
                params.push(("quantity", format_quantity(quantity)?));
                params.push(("price", price.to_string()));
            }
            None => {
                params.push(("type", "MARKET".to_string()));
                params.push(("quantity", format_quantity(quantity)?));
            }
        }
        params.push(("newOrderRespType", "FULL".to_string()));

        let order: BinanceOrder = self.signed_json(Method::POST, "/api/v3/order", &params).await?;
        info!(
            symbol = %order.symbol,
            order_id = order.order_id,
            status = %order.status,
            executed = %order.executed_qty,
            "Binance order accepted"
        );
        Ok(order)
    }

    /// Place a limit order.
    pub async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        time_in_force: TimeInForce,
    ) -> Result<BinanceOrder> {
        if !(price > 0.0) {
            anyhow::bail!("Limit price must be positive, got {}", price);
        }
        self.create_order(symbol, side, quantity, Some((price, time_in_force)))
            .await
    }

    /// Open orders for `symbol`, or for every symbol when `None`.
    pub async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<BinanceOrder>> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_uppercase())])
            .unwrap_or_default();
        self.signed_json(Method::GET, "/api/v3/openOrders", &params).await
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<BinanceOrder> {
        let params = [("symbol", symbol.to_uppercase()), ("orderId", order_id.to_string())];
        let order: BinanceOrder = self.signed_json(Method::DELETE, "/api/v3/order", &params).await?;
        info!(symbol = %order.symbol, order_id, status = %order.status, "Order cancelled");
        Ok(order)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// USDT-quoted symbols by descending 24h quote volume.
pub fn rank_usdt_universe(mut tickers: Vec<Ticker24h>, size: usize) -> Vec<String> {
    tickers.retain(|t| t.symbol.ends_with("USDT"));
    tickers.sort_by(|a, b| b.quote_volume.cmp(&a.quote_volume));
    tickers.into_iter().take(size).map(|t| t.symbol).collect()
}

/// Average fill price of an order, falling back to `reference` when nothing
/// has executed yet.
fn average_fill_price(order: &BinanceOrder, reference: f64) -> f64 {
    if order.executed_qty > Decimal::ZERO {
        (order.cummulative_quote_qty / order.executed_qty)
            .to_f64()
            .unwrap_or(reference)
    } else {
        reference
    }
}

#[async_trait]
impl MarketGateway for BinanceClient {
    async fn fetch_bars(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let params = KlineParams {
            symbol: symbol.to_uppercase(),
            interval: interval.to_string(),
            limit: limit.clamp(1, MAX_KLINE_LIMIT),
        };
        let rows: Vec<RawKline> = self.get_json("/api/v3/klines", &params).await?;

        let candles = rows
            .iter()
            .map(RawKline::to_candle)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Malformed klines for {}", symbol))?;

        debug!(symbol, interval, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    async fn top_universe(&self, size: usize) -> Result<Vec<String>> {
        let no_params: &[(&str, &str)] = &[];
        let tickers: Vec<Ticker24h> = self.get_json("/api/v3/ticker/24hr", no_params).await?;
        let universe = rank_usdt_universe(tickers, size);
        debug!(count = universe.len(), "Ranked USDT universe");
        Ok(universe)
    }

    /// Free balance of `asset`; 0 when the account holds none.
    async fn account_balance(&self, asset: &str) -> Result<f64> {
        let account = self.account().await?;
        Ok(account.free_balance(asset))
    }

    /// Spot market order. Spot has no leverage, so `order.leverage` is only
    /// logged.
    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        if order.leverage > 1 {
            debug!(symbol = %order.symbol, leverage = order.leverage, "Spot order ignores leverage");
        }
        let placed = self
            .create_order(&order.symbol, order.side, order.quantity, None)
            .await?;

        Ok(OrderAck {
            order_id: placed.order_id.to_string(),
            symbol: placed.symbol.clone(),
            side: order.side,
            quantity: placed.executed_qty.to_f64().unwrap_or(order.quantity),
            fill_price: average_fill_price(&placed, order.reference_price),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, quote_volume: i64) -> Ticker24h {
        Ticker24h {
            symbol: symbol.to_string(),
            last_price: Decimal::ONE,
            volume: Decimal::ONE,
            quote_volume: Decimal::from(quote_volume),
        }
    }

    #[test]
    fn test_rank_usdt_universe() {
        let tickers = vec![
            ticker("ETHBTC", 9_000),
            ticker("SOLUSDT", 300),
            ticker("BTCUSDT", 1_000),
            ticker("DOGEUSDT", 50),
        ];
        assert_eq!(rank_usdt_universe(tickers.clone(), 2), vec!["BTCUSDT", "SOLUSDT"]);
        assert_eq!(rank_usdt_universe(tickers, 10).len(), 3);
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_sign_query_matches_binance_example() {
        // Example from the Binance signed-endpoint documentation.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1\
                     &recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_encode_params_and_quantity() {
        let params = [("symbol", "BTCUSDT".to_string()), ("side", "BUY".to_string())];
        assert_eq!(encode_params(&params), "symbol=BTCUSDT&side=BUY");
        assert_eq!(encode_params(&[]), "");

        assert_eq!(format_quantity(0.000012345678).unwrap(), "0.00001234");
        assert_eq!(format_quantity(1.5).unwrap(), "1.5");
        assert!(format_quantity(0.000000001).is_err());
        assert_eq!(order_side(Side::Long), "BUY");
        assert_eq!(order_side(Side::Short), "SELL");
    }

    #[test]
    fn test_average_fill_price() {
        let json = r#"{"symbol":"BTCUSDT","orderId":28,"clientOrderId":"x","price":"0",
            "origQty":"0.002","executedQty":"0.002","cummulativeQuoteQty":"120.4",
            "status":"FILLED","timeInForce":"GTC","type":"MARKET","side":"BUY"}"#;
        let order: BinanceOrder = serde_json::from_str(json).unwrap();
        assert!((average_fill_price(&order, 1.0) - 60_200.0).abs() < 1e-9);

        let mut pending = order.clone();
        pending.executed_qty = Decimal::ZERO;
        assert_eq!(average_fill_price(&pending, 59_000.0), 59_000.0);
    }

    #[tokio::test]
    async fn test_signed_endpoints_need_credentials() {
        let client = BinanceClient::new().unwrap();
        let err = client.account_balance("USDT").await.unwrap_err();
        assert!(err.to_string().contains("BINANCE_API_KEY"));

        let order = OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            quantity: 0.001,
            leverage: 1,
            reference_price: 60_000.0,
        };
        assert!(client.place_market_order(&order).await.is_err());
        assert!(client.open_orders(None).await.is_err());
        assert!(client.cancel_order("BTCUSDT", 1).await.is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("key", "very-secret");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("key"));
        assert!(!shown.contains("very-secret"));
    }
}
