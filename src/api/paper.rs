//! Paper-trading gateway: real market data, simulated fills.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::info;

use super::gateway::{MarketGateway, OrderAck, OrderRequest};
use crate::models::Candle;

/// Fills market orders at the latest close of the wrapped data source and
/// tracks a fixed in-memory USDT balance.
pub struct PaperGateway {
    market: Arc<dyn MarketGateway>,
    interval: String,
    balance: RwLock<f64>,
    step_size: Decimal,
    fills: RwLock<Vec<OrderAck>>,
}

impl PaperGateway {
    pub fn new(market: Arc<dyn MarketGateway>, interval: impl Into<String>, balance: f64) -> Self {
        Self {
            market,
            interval: interval.into(),
            balance: RwLock::new(balance),
            step_size: dec!(0.000001),
            fills: RwLock::new(Vec::new()),
        }
    }

    /// Quantity step orders are rounded down to.
    pub fn with_step_size(mut self, step_size: Decimal) -> Self {
        self.step_size = step_size;
        self
    }

    pub async fn set_balance(&self, balance: f64) {
        *self.balance.write().await = balance;
    }

    /// Orders filled so far, oldest first.
    pub async fn fills(&self) -> Vec<OrderAck> {
        self.fills.read().await.clone()
    }
}

/// Round `quantity` down to a multiple of `step`. `None` if nothing is left.
pub fn round_to_step(quantity: f64, step: Decimal) -> Option<Decimal> {
    if step <= Decimal::ZERO {
        return None;
    }
    let qty = Decimal::from_f64(quantity)?;
    let rounded = (qty / step).floor() * step;
    (rounded > Decimal::ZERO).then_some(rounded.normalize())
}

#[async_trait]
impl MarketGateway for PaperGateway {
    async fn fetch_bars(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        self.market.fetch_bars(symbol, interval, limit).await
    }

    async fn top_universe(&self, size: usize) -> Result<Vec<String>> {
        self.market.top_universe(size).await
    }

    async fn account_balance(&self, _asset: &str) -> Result<f64> {
        Ok(*self.balance.read().await)
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let quantity = round_to_step(order.quantity, self.step_size).with_context(|| {
            format!(
                "Quantity {} for {} is below step size {}",
                order.quantity, order.symbol, self.step_size
            )
        })?;

        let last = self
            .market
            .fetch_bars(&order.symbol, &self.interval, 1)
            .await?
            .pop()
            .with_context(|| format!("No price available for {}", order.symbol))?;

        let ack = OrderAck {
            order_id: uuid::Uuid::new_v4().to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: quantity.to_f64().unwrap_or(0.0),
            fill_price: last.close,
        };

        info!(
            order_id = %ack.order_id,
            symbol = %ack.symbol,
            side = ack.side.as_str(),
            qty = %quantity,
            price = ack.fill_price,
            leverage = order.leverage,
            "[PAPER] Filled market order"
        );

        self.fills.write().await.push(ack.clone());
        Ok(ack)
    }

    async fn max_leverage(&self, symbol: &str) -> Result<Option<u32>> {
        self.market.max_leverage(symbol).await
    }
}
