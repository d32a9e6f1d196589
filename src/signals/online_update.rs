//! Rolling-window retraining of a decision policy.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::policy::DecisionPolicy;
use crate::error::EngineResult;
use crate::models::{Bar, Signal};

/// Bars ahead used to label training rows.
pub const LABEL_HORIZON: usize = 4;

/// A labelled training row: `features ++ state_probs` and its class.
pub type Observation = (Vec<f64>, usize);

/// Keeps the most recent `window_size` observations and retrains the policy
/// on a fixed schedule.
#[derive(Debug)]
pub struct OnlineUpdater<P> {
    policy: P,
    window: VecDeque<Observation>,
    window_size: usize,
    retrain_interval: Duration,
    last_retrain: Option<DateTime<Utc>>,
}

impl<P: DecisionPolicy> OnlineUpdater<P> {
    pub fn new(policy: P, window_size: usize, retrain_interval: Duration) -> Self {
        Self {
            policy,
            window: VecDeque::new(),
            window_size,
            retrain_interval,
            last_retrain: None,
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn last_retrain(&self) -> Option<DateTime<Utc>> {
        self.last_retrain
    }

    /// Append observations, evicting the oldest beyond the window.
    pub fn add_observations<I>(&mut self, observations: I)
    where
        I: IntoIterator<Item = Observation>,
    {
        self.window.extend(observations);
        let excess = self.window.len().saturating_sub(self.window_size);
        if excess > 0 {
            self.window.drain(..excess);
        }
    }

    /// True if the policy has never been trained here or the interval has
    /// elapsed since the last retrain.
    pub fn should_retrain(&self, now: DateTime<Utc>) -> bool {
        match self.last_retrain {
            None => true,
            Some(last) => now - last >= self.retrain_interval,
        }
    }

    /// Train on the current window. Returns `false` without touching the
    /// timer when the window is empty.
    pub fn retrain(&mut self, now: DateTime<Utc>) -> EngineResult<bool> {
        if self.window.is_empty() {
            debug!("No observations yet, skipping retrain");
            return Ok(false);
        }

        let (rows, labels): (Vec<Vec<f64>>, Vec<usize>) = self.window.iter().cloned().unzip();
        self.policy.train(&rows, &labels)?;
        self.last_retrain = Some(now);

        info!(rows = rows.len(), "Policy retrained");
        Ok(true)
    }
}

/// Label each bar by the move `horizon` bars ahead, in units of its ATR.
///
/// Long when the close rises by at least `atr_multiple * atr`, short when it
/// falls by as much, flat otherwise. The last `horizon` bars are unlabelled.
pub fn forward_return_labels(bars: &[Bar], horizon: usize, atr_multiple: f64) -> Vec<Observation> {
    if horizon == 0 {
        return Vec::new();
    }

    bars.iter()
        .zip(bars.iter().skip(horizon))
        .map(|(bar, future)| {
            let threshold = atr_multiple * bar.atr;
            let change = future.close - bar.close;
            let signal = if threshold > 0.0 && change >= threshold {
                Signal::Long
            } else if threshold > 0.0 && change <= -threshold {
                Signal::Short
            } else {
                Signal::Flat
            };
            let row = bar.features.iter().chain(&bar.state_probs).copied().collect();
            (row, signal.label())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::bars_from_closes;
    use crate::models::Decision;
    use crate::signals::CentroidPolicy;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut updater = OnlineUpdater::new(CentroidPolicy::default(), 3, Duration::days(1));
        updater.add_observations((0..5).map(|i| (vec![i as f64], 0)));
        assert_eq!(updater.len(), 3);
        let first = updater.window.front().map(|(row, _)| row[0]);
        assert_eq!(first, Some(2.0));
    }

    #[test]
    fn test_retrain_schedule() {
        let mut updater = OnlineUpdater::new(CentroidPolicy::default(), 100, Duration::days(1));
        assert!(updater.should_retrain(now()));

        // Empty window: nothing trained, timer untouched.
        assert!(!updater.retrain(now()).unwrap());
        assert!(updater.last_retrain().is_none());

        updater.add_observations(vec![(vec![1.0], 1), (vec![-1.0], 2)]);
        assert!(updater.retrain(now()).unwrap());
        assert!(updater.policy().is_trained());
        assert!(!updater.should_retrain(now() + Duration::hours(23)));
        assert!(updater.should_retrain(now() + Duration::days(1)));
    }

    #[test]
    fn test_retrained_policy_decides() {
        let mut updater = OnlineUpdater::new(CentroidPolicy::new(0.1), 100, Duration::days(1));
        updater.add_observations(vec![(vec![1.0, 1.0], 1), (vec![-1.0, 1.0], 2), (vec![0.0, 1.0], 0)]);
        updater.retrain(now()).unwrap();

        let d = updater.policy().decide(&[1.0], &[1.0], 0.02);
        assert_eq!(d, Decision::new(Signal::Long, 0.02).unwrap());
    }

    #[test]
    fn test_forward_return_labels() {
        let bars = bars_from_closes(&[100.0, 103.0, 100.0, 97.0, 97.5], 2.0);
        let labels: Vec<usize> = forward_return_labels(&bars, 1, 1.0)
            .into_iter()
            .map(|(_, label)| label)
            .collect();
        assert_eq!(labels, vec![1, 2, 2, 0]);

        let rows = forward_return_labels(&bars, 1, 1.0);
        assert_eq!(rows[0].0, vec![0.0, 1.0]);
        assert!(forward_return_labels(&bars, 5, 1.0).is_empty());
        assert!(forward_return_labels(&bars, 0, 1.0).is_empty());
    }
}
