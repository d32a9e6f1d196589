//! Exchange gateway abstraction used by the live loop.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Candle, Side};

/// Market order to submit.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    /// Base-asset quantity before exchange step rounding
    pub quantity: f64,
    pub leverage: u32,
    /// Last close the order was sized against
    pub reference_price: f64,
}

/// Acknowledgement of a placed order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub fill_price: f64,
}

/// Market data and order placement against an exchange.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Most recent `limit` candles, oldest first.
    async fn fetch_bars(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Up to `size` USDT-quoted symbols ordered by 24h quote volume, highest
    /// first.
    async fn top_universe(&self, size: usize) -> Result<Vec<String>>;

    /// Free balance of `asset`.
    async fn account_balance(&self, asset: &str) -> Result<f64>;

    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    /// Venue leverage cap for `symbol`, if known.
    async fn max_leverage(&self, _symbol: &str) -> Result<Option<u32>> {
        Ok(None)
    }
}
