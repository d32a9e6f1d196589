//! Decision policies: map a bar's features and regime probabilities to a
//! side and a fraction of equity.

use tracing::debug;

use super::features::softmax;
use crate::error::{EngineError, EngineResult};
use crate::models::{Decision, Signal};

/// Minimum long or short probability needed to take a side.
pub const MIN_EDGE_PROBABILITY: f64 = 0.55;

/// Number of training classes: flat, long, short.
const N_CLASSES: usize = 3;

/// A trainable per-bar decision function.
pub trait DecisionPolicy: Send + Sync {
    /// Decide for one bar. `risk_aversion` caps the returned size.
    fn decide(&self, features: &[f64], state_probs: &[f64], risk_aversion: f64) -> Decision;

    /// Fit on rows of `features ++ state_probs` with labels
    /// `0 = flat, 1 = long, 2 = short`.
    fn train(&mut self, rows: &[Vec<f64>], labels: &[usize]) -> EngineResult<()>;

    fn is_trained(&self) -> bool;
}

impl<P: DecisionPolicy + ?Sized> DecisionPolicy for Box<P> {
    fn decide(&self, features: &[f64], state_probs: &[f64], risk_aversion: f64) -> Decision {
        (**self).decide(features, state_probs, risk_aversion)
    }

    fn train(&mut self, rows: &[Vec<f64>], labels: &[usize]) -> EngineResult<()> {
        (**self).train(rows, labels)
    }

    fn is_trained(&self) -> bool {
        (**self).is_trained()
    }
}

/// Turn `[flat, long, short]` probabilities into a decision.
///
/// Flat unless the stronger directional probability reaches
/// [`MIN_EDGE_PROBABILITY`]. Size is the probability gap capped by
/// `risk_aversion`. Ties go short.
pub fn decide_from_probabilities(probs: [f64; 3], risk_aversion: f64) -> Decision {
    let [_, long_p, short_p] = probs;
    if long_p.max(short_p) < MIN_EDGE_PROBABILITY {
        return Decision::flat();
    }

    let side = if long_p > short_p { Signal::Long } else { Signal::Short };
    let edge = (long_p - short_p).abs();
    let size = edge.min(risk_aversion).clamp(0.0, 1.0);

    Decision::new(side, size).unwrap_or_else(|_| Decision::flat())
}

/// Nearest-centroid classifier.
///
/// Class probabilities are the softmax of negative squared distance to each
/// class centroid, scaled by `temperature`. Classes absent from the training
/// set get probability zero.
#[derive(Debug, Clone)]
pub struct CentroidPolicy {
    pub temperature: f64,
    centroids: [Option<Vec<f64>>; N_CLASSES],
}

impl Default for CentroidPolicy {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl CentroidPolicy {
    pub fn new(temperature: f64) -> Self {
        Self {
            temperature,
            centroids: [None, None, None],
        }
    }

    /// `[flat, long, short]` probabilities, or `None` if untrained or the
    /// row width does not match the training rows.
    pub fn predict_proba(&self, row: &[f64]) -> Option<[f64; 3]> {
        let present: Vec<(usize, f64)> = self
            .centroids
            .iter()
            .enumerate()
            .filter_map(|(class, c)| c.as_ref().map(|c| (class, c)))
            .map(|(class, c)| {
                if c.len() != row.len() {
                    return None;
                }
                let dist: f64 = c.iter().zip(row).map(|(a, b)| (a - b) * (a - b)).sum();
                Some((class, -dist / self.temperature))
            })
            .collect::<Option<_>>()?;

        if present.is_empty() {
            return None;
        }

        let logits: Vec<f64> = present.iter().map(|&(_, l)| l).collect();
        let mut probs = [0.0; 3];
        for (&(class, _), p) in present.iter().zip(softmax(&logits)) {
            probs[class] = p;
        }
        Some(probs)
    }
}

impl DecisionPolicy for CentroidPolicy {
    fn decide(&self, features: &[f64], state_probs: &[f64], risk_aversion: f64) -> Decision {
        let row: Vec<f64> = features.iter().chain(state_probs).copied().collect();
        match self.predict_proba(&row) {
            Some(probs) => decide_from_probabilities(probs, risk_aversion),
            None => {
                debug!(width = row.len(), "Policy cannot score row, staying flat");
                Decision::flat()
            }
        }
    }

    fn train(&mut self, rows: &[Vec<f64>], labels: &[usize]) -> EngineResult<()> {
        if rows.len() != labels.len() {
            return Err(EngineError::InvalidTrainingSet(format!(
                "{} rows, {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let Some(width) = rows.first().map(Vec::len) else {
            return Ok(());
        };

        let mut sums = vec![vec![0.0; width]; N_CLASSES];
        let mut counts = [0usize; N_CLASSES];
        for (row, &label) in rows.iter().zip(labels) {
            if row.len() != width {
                return Err(EngineError::InvalidTrainingSet(format!(
                    "row width {} differs from {}",
                    row.len(),
                    width
                )));
            }
            if label >= N_CLASSES {
                return Err(EngineError::InvalidTrainingSet(format!("label {} out of range", label)));
            }
            for (s, v) in sums[label].iter_mut().zip(row) {
                *s += v;
            }
            counts[label] += 1;
        }

        for (class, sum) in sums.into_iter().enumerate() {
            self.centroids[class] = (counts[class] > 0)
                .then(|| sum.into_iter().map(|s| s / counts[class] as f64).collect());
        }

        debug!(
            rows = rows.len(),
            flat = counts[0],
            long = counts[1],
            short = counts[2],
            "Trained centroid policy"
        );
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.centroids.iter().any(Option::is_some)
    }
}
