//! Live order sizing: risk tier, ATR bracket, leverage and base quantity.

use serde::Serialize;

use super::leverage::{LeverageSelector, MarginMode};
use super::risk::RiskBudget;
use crate::error::EngineResult;
use crate::models::Side;

/// Fully sized order ready for a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizedOrder {
    pub risk_fraction: f64,
    pub stop_distance: f64,
    pub take_distance: f64,
    pub stop_price: f64,
    pub take_price: f64,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub notional_usd: f64,
    pub qty_base: f64,
}

impl SizedOrder {
    /// Nothing to trade.
    pub fn is_empty(&self) -> bool {
        self.qty_base <= 0.0
    }
}

/// Calculator combining the risk budget with the leverage selector.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    risk: RiskBudget,
    leverage: LeverageSelector,
    min_notional: f64,
}

impl PositionSizer {
    pub fn new(risk: RiskBudget, leverage: LeverageSelector, min_notional: f64) -> Self {
        Self {
            risk,
            leverage,
            min_notional,
        }
    }

    pub fn risk_budget(&self) -> &RiskBudget {
        &self.risk
    }

    /// Size an entry at `entry_price` with volatility `atr`.
    ///
    /// A non-positive stop distance or entry price yields a zero quantity
    /// rather than an error.
    pub fn size(
        &self,
        balance: f64,
        side: Side,
        entry_price: f64,
        atr: f64,
        exchange_max_leverage: Option<u32>,
    ) -> EngineResult<SizedOrder> {
        let risk_fraction = self.risk.risk_fraction(balance)?;
        let (stop_distance, take_distance) = self.risk.stop_take_distances(atr);

        let choice = self.leverage.choose(
            balance,
            risk_fraction,
            stop_distance,
            self.min_notional,
            exchange_max_leverage,
        )?;

        let qty_base = if stop_distance > 0.0 && entry_price > 0.0 {
            choice.notional_usd / entry_price
        } else {
            0.0
        };

        let sign = side.sign();
        Ok(SizedOrder {
            risk_fraction,
            stop_distance,
            take_distance,
            stop_price: entry_price - sign * stop_distance,
            take_price: entry_price + sign * take_distance,
            leverage: choice.leverage,
            margin_mode: choice.margin_mode,
            notional_usd: choice.notional_usd,
            qty_base,
        })
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(RiskBudget::default(), LeverageSelector::default(), 5.0)
    }
}
