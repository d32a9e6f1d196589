//! Feature extraction and decision policies.

mod features;
mod online_update;
mod policy;

pub use features::{atr, rsi, stochastic, true_range, FeatureProvider, TechnicalFeatures};
pub use online_update::{forward_return_labels, Observation, OnlineUpdater, LABEL_HORIZON};
pub use policy::{decide_from_probabilities, CentroidPolicy, DecisionPolicy, MIN_EDGE_PROBABILITY};

#[cfg(test)]
pub(crate) use features::tests::candles_from_closes;
