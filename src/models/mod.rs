//! Data models for bars, decisions, positions, trades, and metrics.

mod bar;
mod decision;
mod metrics;
mod position;
mod trade;

pub use bar::{Bar, Candle};
pub use decision::{Decision, Signal};
pub use metrics::PerformanceSummary;
pub use position::{Position, Side};
pub use trade::{ExitReason, Trade};

#[cfg(test)]
pub(crate) use bar::fixtures;
