//! Performance summary of a trade log.

use serde::Serialize;

/// Equity-curve summary. Undefined statistics are `NaN`, never an error.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub win_rate: f64,
    pub expectancy: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

impl PerformanceSummary {
    /// Reward fed to the symbol selector: the Sharpe ratio, or zero when
    /// there is not enough data for one.
    pub fn reward(&self) -> f64 {
        if self.sharpe_ratio.is_finite() {
            self.sharpe_ratio
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Trades:       {}", self.total_trades)?;
        writeln!(f, "Win Rate:     {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Expectancy:   {:.4}%", self.expectancy * 100.0)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)?;
        write!(f, "Max Drawdown: {:.2}%", self.max_drawdown * 100.0)
    }
}
