//! Decision returned by a policy for a single bar.

use serde::{Deserialize, Serialize};

use super::position::Side;
use crate::error::{EngineError, EngineResult};

/// Direction requested by a decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Long,
    Short,
    Flat,
}

impl Signal {
    /// Training label used by policies: 0 = flat, 1 = long, 2 = short.
    pub fn label(&self) -> usize {
        match self {
            Signal::Flat => 0,
            Signal::Long => 1,
            Signal::Short => 2,
        }
    }

    /// Position side for a directional signal.
    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Long => Some(Side::Long),
            Signal::Short => Some(Side::Short),
            Signal::Flat => None,
        }
    }
}

/// Validated policy output: a side and the fraction of equity to risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub side: Signal,
    pub size: f64,
}

impl Decision {
    /// Build a decision, rejecting sizes outside [0, 1].
    pub fn new(side: Signal, size: f64) -> EngineResult<Self> {
        if !size.is_finite() || !(0.0..=1.0).contains(&size) {
            return Err(EngineError::InvalidDecision(size));
        }
        Ok(Self { side, size })
    }

    pub fn flat() -> Self {
        Self {
            side: Signal::Flat,
            size: 0.0,
        }
    }

    /// True when the decision asks for a position.
    pub fn is_entry(&self) -> bool {
        self.side != Signal::Flat && self.size > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_bounds() {
        assert!(Decision::new(Signal::Long, 0.0).is_ok());
        assert!(Decision::new(Signal::Long, 1.0).is_ok());
        assert_eq!(
            Decision::new(Signal::Short, 1.5),
            Err(EngineError::InvalidDecision(1.5))
        );
        assert!(Decision::new(Signal::Long, -0.1).is_err());
        assert!(Decision::new(Signal::Long, f64::NAN).is_err());
    }

    #[test]
    fn test_zero_size_is_not_entry() {
        let d = Decision::new(Signal::Long, 0.0).unwrap();
        assert!(!d.is_entry());
        assert!(!Decision::flat().is_entry());
        assert!(Decision::new(Signal::Short, 0.02).unwrap().is_entry());
    }
}
