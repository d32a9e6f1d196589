//! Wire types for the Binance REST API and the sentiment feeds.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Candle;

/// 24h rolling ticker from /api/v3/ticker/24hr.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(default)]
    pub last_price: Decimal,
    #[serde(default)]
    pub volume: Decimal,
    #[serde(default)]
    pub quote_volume: Decimal,
}

/// Query parameters for /api/v3/klines.
#[derive(Debug, Clone, Serialize)]
pub struct KlineParams {
    pub symbol: String,
    pub interval: String,
    pub limit: u32,
}

/// One row of /api/v3/klines. Binance sends these as positional arrays:
/// `[open_time, open, high, low, close, volume, close_time, ...]` with
/// prices as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct RawKline(pub Vec<Value>);

impl RawKline {
    pub fn to_candle(&self) -> Result<Candle> {
        let open_ms = self
            .0
            .first()
            .and_then(Value::as_i64)
            .context("Kline missing open time")?;
        let time = Utc
            .timestamp_millis_opt(open_ms)
            .single()
            .with_context(|| format!("Invalid kline open time {}", open_ms))?;

        Ok(Candle {
            time,
            open: self.price(1)?,
            high: self.price(2)?,
            low: self.price(3)?,
            close: self.price(4)?,
            volume: self.price(5)?,
        })
    }

    fn price(&self, idx: usize) -> Result<f64> {
        let field = self.0.get(idx).with_context(|| format!("Kline missing field {}", idx))?;
        match field {
            Value::String(s) => s
                .parse()
                .with_context(|| format!("Invalid kline field {}: {:?}", idx, s)),
            Value::Number(n) => n.as_f64().with_context(|| format!("Invalid kline field {}", idx)),
            other => anyhow::bail!("Unexpected kline field {}: {}", idx, other),
        }
    }
}

/// Account balance entry from the signed /api/v3/account endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Signed /api/v3/account response, trimmed to what we use.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub balances: Vec<AssetBalance>,
}

impl AccountInfo {
    /// Free balance of `asset`, 0 when absent.
    pub fn free_balance(&self, asset: &str) -> f64 {
        self.balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .and_then(|b| b.free.to_f64())
            .unwrap_or(0.0)
    }
}

/// Order as returned by the order, openOrders and cancel endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrder {
    pub symbol: String,
    pub order_id: u64,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub orig_qty: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
    /// Binance's spelling
    #[serde(default)]
    pub cummulative_quote_qty: Decimal,
    pub status: String,
    #[serde(default)]
    pub time_in_force: String,
    #[serde(rename = "type", default)]
    pub order_type: String,
    #[serde(default)]
    pub side: String,
}

/// Limit order lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TimeInForce {
    /// Good till cancelled
    #[default]
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Fill or kill
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

/// Response from the alternative.me Fear & Greed endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FearGreedResponse {
    #[serde(default)]
    pub data: Vec<FearGreedEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FearGreedEntry {
    /// Index value 0-100, sent as a string
    pub value: String,
    #[serde(default)]
    pub value_classification: String,
}

/// Response from the CryptoPanic posts endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoPanicResponse {
    #[serde(default)]
    pub results: Vec<CryptoPanicPost>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoPanicPost {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sentiment: Option<PostSentiment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostSentiment {
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_free_balance() {
        let json = r#"{"canTrade":true,"balances":[
            {"asset":"BTC","free":"0.5","locked":"0.0"},
            {"asset":"USDT","free":"812.35","locked":"10.00"}
        ]}"#;
        let account: AccountInfo = serde_json::from_str(json).unwrap();
        assert!(account.can_trade);
        assert_eq!(account.free_balance("USDT"), 812.35);
        assert_eq!(account.free_balance("usdt"), 812.35);
        assert_eq!(account.free_balance("ETH"), 0.0);
    }

    #[test]
    fn test_open_order_parsing() {
        let json = r#"[{"symbol":"ETHUSDT","orderId":7,"clientOrderId":"abc","price":"2500.00",
            "origQty":"0.10","executedQty":"0.00","cummulativeQuoteQty":"0.00",
            "status":"NEW","timeInForce":"GTC","type":"LIMIT","side":"SELL","time":1700000000000}]"#;
        let orders: Vec<BinanceOrder> = serde_json::from_str(json).unwrap();
        assert_eq!(orders[0].order_id, 7);
        assert_eq!(orders[0].order_type, "LIMIT");
        assert_eq!(orders[0].price, Decimal::from(2500));
        assert_eq!(TimeInForce::Ioc.as_str(), "IOC");
    }

    #[test]
    fn test_kline_row_to_candle() {
        let json = r#"[1700000000000,"100.5","101.0","99.5","100.8","1234.5",1700000059999,"124000.0",42,"600.0","60000.0","0"]"#;
        let raw: RawKline = serde_json::from_str(json).unwrap();
        let candle = raw.to_candle().unwrap();
        assert_eq!(candle.time.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(candle.open, 100.5);
        assert_eq!(candle.close, 100.8);
        assert_eq!(candle.volume, 1234.5);
    }

    #[test]
    fn test_kline_row_rejects_garbage() {
        let raw: RawKline = serde_json::from_str(r#"[1700000000000,"abc"]"#).unwrap();
        assert!(raw.to_candle().is_err());
        let raw: RawKline = serde_json::from_str(r#"["x"]"#).unwrap();
        assert!(raw.to_candle().is_err());
    }

    #[test]
    fn test_ticker_decimal_strings() {
        let json = r#"{"symbol":"BTCUSDT","lastPrice":"64000.10","volume":"10.5","quoteVolume":"672001.05","count":12}"#;
        let ticker: Ticker24h = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.quote_volume, Decimal::new(67200105, 2));
    }

    #[test]
    fn test_fear_greed_payload() {
        let json = r#"{"name":"Fear and Greed Index","data":[{"value":"27","value_classification":"Fear","timestamp":"1700000000"}]}"#;
        let resp: FearGreedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data[0].value, "27");
    }
}
