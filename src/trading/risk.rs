//! Tiered risk budget and ATR-based stop/take distances.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Risk fraction applied to balances in `[min_equity, max_equity)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskTier {
    pub min_equity: f64,
    #[serde(with = "unbounded")]
    pub max_equity: f64,
    pub risk_fraction: f64,
}

impl RiskTier {
    pub const fn new(min_equity: f64, max_equity: f64, risk_fraction: f64) -> Self {
        Self {
            min_equity,
            max_equity,
            risk_fraction,
        }
    }
}

/// Serializes an infinite upper bound as `null` so tier tables survive JSON.
pub(crate) mod unbounded {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Default risk tiers: <1k risks 2%, <5k risks 1.5%, above that 1%.
pub fn default_risk_tiers() -> Vec<RiskTier> {
    vec![
        RiskTier::new(0.0, 1_000.0, 0.02),
        RiskTier::new(1_000.0, 5_000.0, 0.015),
        RiskTier::new(5_000.0, f64::INFINITY, 0.01),
    ]
}

/// Check that `(min, max)` bounds partition `[0, inf)` in ascending order
/// with no gaps or overlaps.
pub(crate) fn validate_partition(table: &str, bounds: &[(f64, f64)]) -> EngineResult<()> {
    let Some(first) = bounds.first() else {
        return Err(EngineError::InvalidTiers(format!("{table}: no tiers")));
    };
    if first.0 != 0.0 {
        return Err(EngineError::InvalidTiers(format!(
            "{table}: first tier starts at {} instead of 0",
            first.0
        )));
    }

    for (i, &(min, max)) in bounds.iter().enumerate() {
        if !(min < max) {
            return Err(EngineError::InvalidTiers(format!(
                "{table}: tier {i} has empty range [{min}, {max})"
            )));
        }
        if let Some(&(_, prev_max)) = i.checked_sub(1).and_then(|p| bounds.get(p)) {
            if min != prev_max {
                return Err(EngineError::InvalidTiers(format!(
                    "{table}: tier {i} starts at {min} but previous ends at {prev_max}"
                )));
            }
        }
    }

    if bounds.last().map(|&(_, max)| max) != Some(f64::INFINITY) {
        return Err(EngineError::InvalidTiers(format!(
            "{table}: last tier must be unbounded"
        )));
    }

    Ok(())
}

/// Equity-tiered risk fraction lookup plus ATR bracket distances.
#[derive(Debug, Clone)]
pub struct RiskBudget {
    tiers: Vec<RiskTier>,
    sl_multiplier: f64,
    tp_multiplier: f64,
}

impl RiskBudget {
    /// Build a budget after validating the tier table.
    pub fn new(tiers: Vec<RiskTier>, sl_multiplier: f64, tp_multiplier: f64) -> EngineResult<Self> {
        let bounds: Vec<(f64, f64)> = tiers.iter().map(|t| (t.min_equity, t.max_equity)).collect();
        validate_partition("risk", &bounds)?;

        for pair in tiers.windows(2) {
            if pair[1].risk_fraction > pair[0].risk_fraction {
                return Err(EngineError::InvalidTiers(format!(
                    "risk: fraction rises from {} to {} at {}",
                    pair[0].risk_fraction, pair[1].risk_fraction, pair[1].min_equity
                )));
            }
        }
        if let Some(t) = tiers.iter().find(|t| !(t.risk_fraction > 0.0 && t.risk_fraction <= 1.0)) {
            return Err(EngineError::InvalidTiers(format!(
                "risk: fraction {} outside (0, 1]",
                t.risk_fraction
            )));
        }

        Ok(Self {
            tiers,
            sl_multiplier,
            tp_multiplier,
        })
    }

    /// Fraction of equity to risk at `balance`.
    ///
    /// First tier whose exclusive upper bound exceeds the balance wins.
    pub fn risk_fraction(&self, balance: f64) -> EngineResult<f64> {
        self.tiers
            .iter()
            .find(|t| balance < t.max_equity)
            .map(|t| t.risk_fraction)
            .ok_or(EngineError::TierMiss {
                table: "risk",
                balance,
            })
    }

    /// Stop and take distances for the configured multipliers.
    pub fn stop_take_distances(&self, atr: f64) -> (f64, f64) {
        stop_take_distances(atr, self.sl_multiplier, self.tp_multiplier)
    }

    pub fn sl_multiplier(&self) -> f64 {
        self.sl_multiplier
    }

    pub fn tp_multiplier(&self) -> f64 {
        self.tp_multiplier
    }
}

impl Default for RiskBudget {
    fn default() -> Self {
        Self {
            tiers: default_risk_tiers(),
            sl_multiplier: 1.2,
            tp_multiplier: 2.4,
        }
    }
}

/// `(sl_mult * atr, tp_mult * atr)`. No clamping: a non-positive ATR gives
/// non-positive distances, which callers must treat as "no position".
pub fn stop_take_distances(atr: f64, sl_multiplier: f64, tp_multiplier: f64) -> (f64, f64) {
    (sl_multiplier * atr, tp_multiplier * atr)
}
