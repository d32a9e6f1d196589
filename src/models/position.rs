//! Simulated position with an ATR-based stop/take bracket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::trade::ExitReason;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// The single open position held by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_price: f64,
    pub take_price: f64,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
}

impl Position {
    /// Open a bracketed position at `entry_price`.
    ///
    /// Long: stop below, take above. Short: mirrored.
    pub fn open(
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_distance: f64,
        take_distance: f64,
        entry_index: usize,
        entry_time: DateTime<Utc>,
    ) -> Self {
        let (stop_price, take_price) = match side {
            Side::Long => (entry_price - stop_distance, entry_price + take_distance),
            Side::Short => (entry_price + stop_distance, entry_price - take_distance),
        };

        Self {
            side,
            entry_price,
            quantity,
            stop_price,
            take_price,
            entry_index,
            entry_time,
        }
    }

    /// Test a closing price against the bracket.
    ///
    /// Returns the fill level (the stop or take price itself) and why.
    /// Stop is checked first; the two conditions cannot both hold.
    pub fn check_exit(&self, close: f64) -> Option<(f64, ExitReason)> {
        match self.side {
            Side::Long => {
                if close <= self.stop_price {
                    Some((self.stop_price, ExitReason::StopLoss))
                } else if close >= self.take_price {
                    Some((self.take_price, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
            Side::Short => {
                if close >= self.stop_price {
                    Some((self.stop_price, ExitReason::StopLoss))
                } else if close <= self.take_price {
                    Some((self.take_price, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
        }
    }

    /// Realized P&L if closed at `exit_price`.
    pub fn pnl_at(&self, exit_price: f64) -> f64 {
        (exit_price - self.entry_price) * self.quantity * self.side.sign()
    }
}
