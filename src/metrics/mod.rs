//! Performance metrics over simulated trade logs.

mod calculator;

pub use calculator::PerformanceMetrics;
