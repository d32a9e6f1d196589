//! Trading logic: risk budget, leverage, position sizing, symbol selection.

mod config;
mod leverage;
mod position_sizer;
mod risk;
mod selector;

pub use config::{interval_to_seconds, TradingConfig};
pub use leverage::{default_leverage_tiers, LeverageChoice, LeverageSelector, LeverageTier, MarginMode};
pub use position_sizer::{PositionSizer, SizedOrder};
pub use risk::{default_risk_tiers, stop_take_distances, RiskBudget, RiskTier};
pub use selector::{BanditArm, BanditSelector};
