//! Trading configuration.

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::leverage::{default_leverage_tiers, LeverageSelector, LeverageTier};
use super::position_sizer::PositionSizer;
use super::risk::{default_risk_tiers, RiskBudget, RiskTier};
use crate::error::EngineResult;

/// Configuration for sizing, selection and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Kline interval, e.g. "15m" or "1h"
    pub interval: String,

    /// Minimum order notional in USDT; leverage is raised to reach it
    pub max_position_usdt: f64,

    /// Symbols traded on every tick
    pub static_symbols: Vec<String>,

    /// Size of the volume-ranked universe the bandit picks from
    pub dynamic_universe_size: usize,

    /// How many symbols the bandit adds per tick
    pub dynamic_select_k: usize,

    /// ATR multiplier for the stop distance
    pub sl_multiplier: f64,

    /// ATR multiplier for the take distance
    pub tp_multiplier: f64,

    pub risk_tiers: Vec<RiskTier>,

    pub leverage_tiers: Vec<LeverageTier>,

    /// Starting equity for backtests (1.0 = 100%)
    pub initial_balance: f64,

    /// Bars fetched per symbol per tick
    pub bar_limit: u32,

    /// Fetch the Fear & Greed index each tick
    pub use_sentiment: bool,

    /// Hours between policy retrains
    pub retrain_interval_hours: i64,

    /// Max rows kept for retraining
    pub training_window: usize,

    /// Paper mode: no real orders
    pub paper: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            interval: "1h".to_string(),
            max_position_usdt: 50.0,
            static_symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            dynamic_universe_size: 20,
            dynamic_select_k: 3,
            sl_multiplier: 1.2,
            tp_multiplier: 2.4,
            risk_tiers: default_risk_tiers(),
            leverage_tiers: default_leverage_tiers(),
            initial_balance: 1.0,
            bar_limit: 500,
            use_sentiment: true,
            retrain_interval_hours: 24,
            training_window: 50_000,
            paper: true,
        }
    }
}

impl TradingConfig {
    /// Defaults overridden by environment variables (a `.env` file is
    /// loaded first when present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(v) = env::var("INTERVAL") {
            config.interval = v;
        }
        if let Some(v) = parse_var("MAX_POSITION_USDT")? {
            config.max_position_usdt = v;
        }
        if let Ok(v) = env::var("STATIC_PAIRS") {
            config.static_symbols = parse_symbols(&v);
        }
        if let Some(v) = parse_var("DYNAMIC_UNIVERSE_SIZE")? {
            config.dynamic_universe_size = v;
        }
        if let Some(v) = parse_var("DYNAMIC_SELECT_K")? {
            config.dynamic_select_k = v;
        }
        if let Some(v) = parse_var("BAR_LIMIT")? {
            config.bar_limit = v;
        }
        if let Ok(v) = env::var("PAPER") {
            config.paper = parse_paper(&v);
        }
        Ok(config)
    }

    /// Real orders when `--live` is passed or `PAPER` is not `1`.
    pub fn is_live(&self, live_flag: bool) -> bool {
        live_flag || !self.paper
    }

    pub fn risk_budget(&self) -> EngineResult<RiskBudget> {
        RiskBudget::new(self.risk_tiers.clone(), self.sl_multiplier, self.tp_multiplier)
    }

    pub fn leverage_selector(&self) -> EngineResult<LeverageSelector> {
        LeverageSelector::new(self.leverage_tiers.clone())
    }

    pub fn position_sizer(&self) -> EngineResult<PositionSizer> {
        Ok(PositionSizer::new(
            self.risk_budget()?,
            self.leverage_selector()?,
            self.max_position_usdt,
        ))
    }

    pub fn interval_secs(&self) -> u64 {
        interval_to_seconds(&self.interval)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Convert an exchange interval ("15m", "4h", "1d", "1w") to seconds.
/// Unknown units fall back to 60.
pub fn interval_to_seconds(interval: &str) -> u64 {
    let Some(unit) = interval.chars().last() else {
        return 60;
    };
    let Ok(value) = interval[..interval.len() - unit.len_utf8()].parse::<u64>() else {
        return 60;
    };

    match unit {
        'm' => value * 60,
        'h' => value * 3_600,
        'd' => value * 86_400,
        'w' => value * 7 * 86_400,
        _ => 60,
    }
}

/// Paper mode only for an exact `1`.
fn parse_paper(raw: &str) -> bool {
    raw.trim() == "1"
}
