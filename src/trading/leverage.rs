//! Adaptive leverage and notional sizing with equity-tiered caps.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::risk::{unbounded, validate_partition};
use crate::error::{EngineError, EngineResult};

/// Floor on target risk so the leverage-needed division never blows up.
const TARGET_RISK_EPSILON: f64 = 1e-9;

/// Exchange margin mode for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    CrossMargin,
    Isolated,
}

/// Leverage cap applied to balances in `[min_equity, max_equity)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageTier {
    pub min_equity: f64,
    #[serde(with = "unbounded")]
    pub max_equity: f64,
    pub margin_mode: MarginMode,
    pub max_leverage: u32,
}

impl LeverageTier {
    pub const fn new(min_equity: f64, max_equity: f64, margin_mode: MarginMode, max_leverage: u32) -> Self {
        Self {
            min_equity,
            max_equity,
            margin_mode,
            max_leverage,
        }
    }

    fn contains(&self, balance: f64) -> bool {
        self.min_equity <= balance && balance < self.max_equity
    }
}

/// Default tiers: small accounts cross at 5x, mid accounts isolated at 25x,
/// large accounts isolated at 10x.
pub fn default_leverage_tiers() -> Vec<LeverageTier> {
    vec![
        LeverageTier::new(0.0, 200.0, MarginMode::CrossMargin, 5),
        LeverageTier::new(200.0, 2_000.0, MarginMode::Isolated, 25),
        LeverageTier::new(2_000.0, f64::INFINITY, MarginMode::Isolated, 10),
    ]
}

/// Result of a leverage query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LeverageChoice {
    pub leverage: u32,
    pub notional_usd: f64,
    pub margin_mode: MarginMode,
}

/// Picks leverage so the order meets the exchange minimum notional, within
/// the balance tier's cap.
#[derive(Debug, Clone)]
pub struct LeverageSelector {
    tiers: Vec<LeverageTier>,
}

impl LeverageSelector {
    pub fn new(tiers: Vec<LeverageTier>) -> EngineResult<Self> {
        let bounds: Vec<(f64, f64)> = tiers.iter().map(|t| (t.min_equity, t.max_equity)).collect();
        validate_partition("leverage", &bounds)?;
        if let Some(t) = tiers.iter().find(|t| t.max_leverage == 0) {
            return Err(EngineError::InvalidTiers(format!(
                "leverage: tier at {} has zero max leverage",
                t.min_equity
            )));
        }
        Ok(Self { tiers })
    }

    /// Tier whose range contains `balance`.
    pub fn tier_for(&self, balance: f64) -> EngineResult<&LeverageTier> {
        self.tiers
            .iter()
            .find(|t| t.contains(balance))
            .ok_or(EngineError::TierMiss {
                table: "leverage",
                balance,
            })
    }

    /// Choose leverage and notional.
    ///
    /// `leverage = clamp(round(min_notional * stop / target_risk), 1, tier cap)`
    /// with ties rounded to even, further capped by `exchange_max_leverage`.
    /// Notional is `target_risk * leverage / stop_distance_usd`, or 0 when the
    /// stop distance is not positive. An exchange cap of 0 yields leverage 0
    /// and no notional.
    pub fn choose(
        &self,
        balance: f64,
        risk_fraction: f64,
        stop_distance_usd: f64,
        min_notional: f64,
        exchange_max_leverage: Option<u32>,
    ) -> EngineResult<LeverageChoice> {
        let target_risk = balance * risk_fraction;
        let leverage_needed = (min_notional * stop_distance_usd) / target_risk.max(TARGET_RISK_EPSILON);

        let tier = self.tier_for(balance)?;

        let rounded = if leverage_needed.is_finite() {
            leverage_needed.round_ties_even().max(0.0).min(u32::MAX as f64) as u32
        } else {
            tier.max_leverage
        };
        let mut leverage = rounded.clamp(1, tier.max_leverage);
        if let Some(cap) = exchange_max_leverage {
            leverage = leverage.min(cap);
        }

        let notional_usd = if stop_distance_usd > 0.0 && leverage > 0 {
            (target_risk * leverage as f64) / stop_distance_usd
        } else {
            0.0
        };

        debug!(
            balance,
            risk_fraction,
            leverage_needed,
            leverage,
            notional_usd,
            "Leverage chosen"
        );

        Ok(LeverageChoice {
            leverage,
            notional_usd,
            margin_mode: tier.margin_mode,
        })
    }
}

impl Default for LeverageSelector {
    fn default() -> Self {
        Self {
            tiers: default_leverage_tiers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tier_selection() {
        let sel = LeverageSelector::default();
        assert_eq!(sel.tier_for(0.0).unwrap().max_leverage, 5);
        assert_eq!(sel.tier_for(199.99).unwrap().margin_mode, MarginMode::CrossMargin);
        assert_eq!(sel.tier_for(200.0).unwrap().max_leverage, 25);
        assert_eq!(sel.tier_for(2_000.0).unwrap().max_leverage, 10);
        assert!(matches!(
            sel.tier_for(-1.0),
            Err(EngineError::TierMiss { table: "leverage", .. })
        ));
    }

    #[test]
    fn test_leverage_meets_min_notional() {
        let sel = LeverageSelector::default();
        // target risk = 10, needed = 50 * 2 / 10 = 10 -> within the 25x cap
        let choice = sel.choose(500.0, 0.02, 2.0, 50.0, None).unwrap();
        assert_eq!(choice.leverage, 10);
        assert!((choice.notional_usd - 50.0).abs() < 1e-9);
        assert_eq!(choice.margin_mode, MarginMode::Isolated);
    }

    #[test]
    fn test_tier_cap_applies() {
        let sel = LeverageSelector::default();
        // needed = 50 * 10 / 2 = 250 -> small account capped at 5x
        let choice = sel.choose(100.0, 0.02, 10.0, 50.0, None).unwrap();
        assert_eq!(choice.leverage, 5);
        assert!((choice.notional_usd - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_exchange_cap_applies() {
        let sel = LeverageSelector::default();
        let choice = sel.choose(500.0, 0.02, 2.0, 50.0, Some(3)).unwrap();
        assert_eq!(choice.leverage, 3);
    }

    #[test]
    fn test_half_leverage_rounds_to_even() {
        let sel = LeverageSelector::default();
        // target risk = 10, needed = 10 * 2.5 / 10 = 2.5 -> 2
        let choice = sel.choose(500.0, 0.02, 2.5, 10.0, None).unwrap();
        assert_eq!(choice.leverage, 2);
        assert!((choice.notional_usd - 8.0).abs() < 1e-9);

        // needed = 3.5 -> 4
        let choice = sel.choose(500.0, 0.02, 3.5, 10.0, None).unwrap();
        assert_eq!(choice.leverage, 4);
    }

    #[test]
    fn test_zero_exchange_cap_means_no_position() {
        let sel = LeverageSelector::default();
        let choice = sel.choose(500.0, 0.02, 2.0, 50.0, Some(0)).unwrap();
        assert_eq!(choice.leverage, 0);
        assert_eq!(choice.notional_usd, 0.0);
    }

    #[test]
    fn test_minimum_leverage_is_one() {
        let sel = LeverageSelector::default();
        let choice = sel.choose(10_000.0, 0.01, 0.1, 5.0, None).unwrap();
        assert_eq!(choice.leverage, 1);
    }

    #[test]
    fn test_zero_stop_gives_zero_notional() {
        let sel = LeverageSelector::default();
        let choice = sel.choose(500.0, 0.02, 0.0, 50.0, None).unwrap();
        assert_eq!(choice.leverage, 1);
        assert_eq!(choice.notional_usd, 0.0);
    }

    #[test]
    fn test_zero_balance_uses_epsilon() {
        let sel = LeverageSelector::default();
        let choice = sel.choose(0.0, 0.02, 1.0, 5.0, None).unwrap();
        assert_eq!(choice.leverage, 5);
        assert_eq!(choice.notional_usd, 0.0);
    }

    proptest! {
        #[test]
        fn leverage_within_caps(
            balance in 0.0..100_000.0_f64,
            risk in 0.001..0.05_f64,
            stop in 0.01..500.0_f64,
            min_notional in 1.0..500.0_f64,
            cap in proptest::option::of(1u32..50),
        ) {
            let sel = LeverageSelector::default();
            let choice = sel.choose(balance, risk, stop, min_notional, cap).unwrap();
            let tier_cap = sel.tier_for(balance).unwrap().max_leverage;
            prop_assert!(choice.leverage >= 1);
            prop_assert!(choice.leverage <= tier_cap);
            if let Some(c) = cap {
                prop_assert!(choice.leverage <= c);
            }

            let target_risk = balance * risk;
            let implied = choice.notional_usd * stop / choice.leverage as f64;
            prop_assert!((implied - target_risk).abs() <= 1e-9 * target_risk.max(1.0));
        }
    }
}
