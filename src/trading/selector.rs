//! UCB1 symbol selection: explore unsampled symbols, exploit proven ones.
//!
//! Each symbol is a bandit arm with a sample count and cumulative reward.
//! Arms are created lazily and never removed within a run. The selector
//! holds no lock; callers serialize access (one tick at a time).

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

/// Sampling statistics for one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BanditArm {
    pub count: u64,
    pub cumulative_reward: f64,
}

impl BanditArm {
    pub fn mean_reward(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.cumulative_reward / self.count as f64
        }
    }
}

/// Dynamic symbol selector merged with a static allowlist.
#[derive(Debug, Clone, Default)]
pub struct BanditSelector {
    arms: HashMap<String, BanditArm>,
    total_samples: u64,
}

impl BanditSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one reward observation for `symbol`. Non-finite rewards are
    /// dropped without counting a sample.
    pub fn update_reward(&mut self, symbol: &str, reward: f64) {
        if !reward.is_finite() {
            warn!(symbol = %symbol, reward, "Ignoring non-finite bandit reward");
            return;
        }

        let arm = self.arms.entry(symbol.to_string()).or_default();
        arm.count += 1;
        arm.cumulative_reward += reward;
        self.total_samples += 1;

        debug!(
            symbol = %symbol,
            reward,
            count = arm.count,
            mean = arm.mean_reward(),
            "Bandit reward recorded"
        );
    }

    pub fn arm(&self, symbol: &str) -> Option<&BanditArm> {
        self.arms.get(symbol)
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// UCB1 score: infinite for an unsampled arm, otherwise
    /// `mean + sqrt(2 ln(total) / count)`. A NaN score ranks last.
    pub fn score(&self, symbol: &str) -> f64 {
        match self.arms.get(symbol) {
            Some(arm) if arm.count > 0 => {
                let n = arm.count as f64;
                let bonus = (2.0 * (self.total_samples as f64).ln() / n).sqrt();
                let score = arm.mean_reward() + bonus;
                if score.is_nan() {
                    f64::NEG_INFINITY
                } else {
                    score
                }
            }
            _ => f64::INFINITY,
        }
    }

    /// Static symbols followed by the top-`k` of `universe` by UCB score.
    pub fn choose(&self, universe: &[String], static_symbols: &[String], k: usize) -> EngineResult<Vec<String>> {
        self.choose_with_rng(universe, static_symbols, k, &mut rand::thread_rng())
    }

    /// Same as [`choose`](Self::choose) with an explicit RNG for the
    /// fallback sample.
    ///
    /// Ties keep universe order, so a volume-ranked universe breaks ties by
    /// volume. Duplicates between the static and dynamic lists are kept.
    pub fn choose_with_rng<R: Rng + ?Sized>(
        &self,
        universe: &[String],
        static_symbols: &[String],
        k: usize,
        rng: &mut R,
    ) -> EngineResult<Vec<String>> {
        let mut scored: Vec<(&String, f64)> = universe.iter().map(|s| (s, self.score(s))).collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut dynamic: Vec<String> = scored.into_iter().take(k).map(|(s, _)| s.clone()).collect();

        if dynamic.is_empty() {
            if universe.len() < k {
                return Err(EngineError::InsufficientUniverse {
                    available: universe.len(),
                    requested: k,
                });
            }
            dynamic = universe.choose_multiple(rng, k).cloned().collect();
        }

        if dynamic.iter().any(|s| static_symbols.contains(s)) {
            debug!("Dynamic selection overlaps static symbols; duplicates kept");
        }

        let mut selected = static_symbols.to_vec();
        selected.extend(dynamic);

        info!(
            selected = ?selected,
            total_samples = self.total_samples,
            "Symbols selected"
        );

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn syms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unsampled_arms_first() {
        let mut sel = BanditSelector::new();
        sel.update_reward("AAAUSDT", 10.0);
        sel.update_reward("BBBUSDT", 5.0);

        let universe = syms(&["AAAUSDT", "BBBUSDT", "CCCUSDT"]);
        let picked = sel.choose(&universe, &[], 1).unwrap();
        assert_eq!(picked, syms(&["CCCUSDT"]));
    }

    #[test]
    fn test_exploits_higher_mean() {
        let mut sel = BanditSelector::new();
        for _ in 0..10 {
            sel.update_reward("GOODUSDT", 2.0);
            sel.update_reward("BADUSDT", -1.0);
        }
        let universe = syms(&["BADUSDT", "GOODUSDT"]);
        let picked = sel.choose(&universe, &[], 1).unwrap();
        assert_eq!(picked, syms(&["GOODUSDT"]));
    }

    #[test]
    fn test_ucb_score() {
        let mut sel = BanditSelector::new();
        sel.update_reward("A", 1.0);
        sel.update_reward("A", 3.0);
        sel.update_reward("B", 0.0);
        // mean 2, bonus sqrt(2 ln 3 / 2)
        let expected = 2.0 + (2.0 * 3.0_f64.ln() / 2.0).sqrt();
        assert!((sel.score("A") - expected).abs() < 1e-12);
        assert_eq!(sel.score("never"), f64::INFINITY);
        assert_eq!(sel.total_samples(), 3);
        assert_eq!(sel.arm("A").unwrap().count, 2);
    }

    #[test]
    fn test_non_finite_reward_ignored() {
        let mut sel = BanditSelector::new();
        sel.update_reward("AAAUSDT", f64::NAN);
        sel.update_reward("AAAUSDT", f64::INFINITY);
        assert!(sel.arm("AAAUSDT").is_none());
        assert_eq!(sel.total_samples(), 0);

        sel.update_reward("AAAUSDT", 1.0);
        sel.update_reward("AAAUSDT", f64::NAN);
        assert_eq!(sel.arm("AAAUSDT").unwrap().count, 1);

        let universe = syms(&["AAAUSDT", "BBBUSDT"]);
        let picked = sel.choose(&universe, &[], 1).unwrap();
        assert_eq!(picked, syms(&["BBBUSDT"]));
    }

    #[test]
    fn test_nan_score_ranks_last() {
        let mut sel = BanditSelector::new();
        sel.arms.insert(
            "NANUSDT".to_string(),
            BanditArm {
                count: 1,
                cumulative_reward: f64::NAN,
            },
        );
        sel.update_reward("OKUSDT", -3.0);
        assert_eq!(sel.score("NANUSDT"), f64::NEG_INFINITY);

        let universe = syms(&["NANUSDT", "OKUSDT", "FRESHUSDT"]);
        let picked = sel.choose(&universe, &[], 2).unwrap();
        assert_eq!(picked, syms(&["FRESHUSDT", "OKUSDT"]));
    }

    #[test]
    fn test_static_prefix_and_duplicates_kept() {
        let sel = BanditSelector::new();
        let universe = syms(&["BTCUSDT", "SOLUSDT"]);
        let statics = syms(&["BTCUSDT", "ETHUSDT"]);
        let picked = sel.choose(&universe, &statics, 2).unwrap();
        assert_eq!(picked, syms(&["BTCUSDT", "ETHUSDT", "BTCUSDT", "SOLUSDT"]));
    }

    #[test]
    fn test_empty_universe_fault() {
        let sel = BanditSelector::new();
        let err = sel.choose(&[], &syms(&["BTCUSDT"]), 2).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientUniverse {
                available: 0,
                requested: 2
            }
        );
    }

    #[test]
    fn test_k_zero_returns_statics() {
        let sel = BanditSelector::new();
        let mut rng = StdRng::seed_from_u64(7);
        let picked = sel
            .choose_with_rng(&syms(&["X"]), &syms(&["BTCUSDT"]), 0, &mut rng)
            .unwrap();
        assert_eq!(picked, syms(&["BTCUSDT"]));
    }

    proptest! {
        #[test]
        fn unsampled_arm_always_selected(
            rewards in proptest::collection::vec(-5.0..5.0_f64, 1..8),
            k in 1usize..4,
        ) {
            let mut sel = BanditSelector::new();
            let mut universe = Vec::new();
            for (i, r) in rewards.iter().enumerate() {
                let sym = format!("S{i}");
                sel.update_reward(&sym, *r);
                universe.push(sym);
            }
            universe.push("FRESH".to_string());

            let picked = sel.choose(&universe, &[], k).unwrap();
            prop_assert_eq!(picked.first().map(String::as_str), Some("FRESH"));
        }
    }
}
