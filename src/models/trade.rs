//! Completed trade record appended to the simulator's log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::position::Side;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    /// Force-closed at the final bar's close
    EndOfData,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "Stop Loss",
            ExitReason::TakeProfit => "Take Profit",
            ExitReason::EndOfData => "End of Data",
        }
    }
}

/// Immutable trade log row.
///
/// Field order is the exported column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub qty: f64,
    pub pnl: f64,
    pub balance_after: f64,

    #[serde(skip_serializing)]
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }
}
