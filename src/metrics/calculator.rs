//! Equity-curve analytics over a trade log: returns, Sharpe, drawdown,
//! win rate and expectancy.
//!
//! Empty logs are not an error; undefined statistics come back as `NaN`.

use statrs::statistics::Statistics;

use crate::models::{PerformanceSummary, Trade};

/// Calculator for trade-log performance metrics.
pub struct PerformanceMetrics;

impl PerformanceMetrics {
    /// Per-trade return `(after - before) / before`, where the first trade's
    /// "before" is `initial_balance` and each later one is the previous
    /// trade's `balance_after`.
    pub fn trade_returns(trades: &[Trade], initial_balance: f64) -> Vec<f64> {
        let mut before = initial_balance;
        trades
            .iter()
            .map(|t| {
                let r = (t.balance_after - before) / before;
                before = t.balance_after;
                r
            })
            .collect()
    }

    /// `mean / stddev` of the return series, times `sqrt(n)` when
    /// `annualize` is set. `NaN` for fewer than two returns or zero variance.
    pub fn sharpe_ratio(returns: &[f64], annualize: bool) -> f64 {
        if returns.len() < 2 {
            return f64::NAN;
        }

        let mean = returns.iter().mean();
        let std_dev = returns.iter().std_dev();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return f64::NAN;
        }

        let sharpe = mean / std_dev;
        if annualize {
            sharpe * (returns.len() as f64).sqrt()
        } else {
            sharpe
        }
    }

    /// Most negative `(balance - peak) / peak` over the equity curve seeded
    /// with `initial_balance`. Zero if balances never dip below their peak.
    pub fn max_drawdown(trades: &[Trade], initial_balance: f64) -> f64 {
        let mut peak = initial_balance;
        let mut worst = 0.0_f64;

        for balance in std::iter::once(initial_balance).chain(trades.iter().map(|t| t.balance_after)) {
            if balance > peak {
                peak = balance;
            }
            let dd = (balance - peak) / peak;
            if dd < worst {
                worst = dd;
            }
        }

        worst
    }

    /// Fraction of trades with positive P&L.
    pub fn win_rate(trades: &[Trade]) -> f64 {
        if trades.is_empty() {
            return f64::NAN;
        }
        let wins = trades.iter().filter(|t| t.is_winner()).count();
        wins as f64 / trades.len() as f64
    }

    /// Mean per-trade return.
    pub fn expectancy(trades: &[Trade], initial_balance: f64) -> f64 {
        let returns = Self::trade_returns(trades, initial_balance);
        if returns.is_empty() {
            return f64::NAN;
        }
        returns.iter().mean()
    }

    /// All headline metrics, with the Sharpe ratio scaled by trade count.
    pub fn summary(trades: &[Trade], initial_balance: f64) -> PerformanceSummary {
        let returns = Self::trade_returns(trades, initial_balance);

        PerformanceSummary {
            total_trades: trades.len(),
            win_rate: Self::win_rate(trades),
            expectancy: Self::expectancy(trades, initial_balance),
            sharpe_ratio: Self::sharpe_ratio(&returns, true),
            max_drawdown: Self::max_drawdown(trades, initial_balance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Side};
    use chrono::Utc;
    use proptest::prelude::*;

    fn log_from_pnls(initial: f64, pnls: &[f64]) -> Vec<Trade> {
        let mut balance = initial;
        pnls.iter()
            .map(|&pnl| {
                balance += pnl;
                Trade {
                    entry_time: Utc::now(),
                    exit_time: Utc::now(),
                    side: Side::Long,
                    entry_price: 100.0,
                    exit_price: 100.0,
                    qty: 1.0,
                    pnl,
                    balance_after: balance,
                    exit_reason: ExitReason::TakeProfit,
                }
            })
            .collect()
    }

    #[test]
    fn test_empty_log_sentinels() {
        let summary = PerformanceMetrics::summary(&[], 1.0);
        assert_eq!(summary.total_trades, 0);
        assert!(summary.win_rate.is_nan());
        assert!(summary.expectancy.is_nan());
        assert!(summary.sharpe_ratio.is_nan());
        assert_eq!(summary.max_drawdown, 0.0);
        assert_eq!(summary.reward(), 0.0);
    }

    #[test]
    fn test_trade_returns() {
        let trades = log_from_pnls(100.0, &[10.0, -11.0]);
        let returns = PerformanceMetrics::trade_returns(&trades, 100.0);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_calculate_drawdown() {
        // 100 -> 150 -> 70 -> 50 -> 150 -> 200
        let trades = log_from_pnls(100.0, &[50.0, -80.0, -20.0, 100.0, 50.0]);
        let dd = PerformanceMetrics::max_drawdown(&trades, 100.0);
        assert!((dd - (50.0 - 150.0) / 150.0).abs() < 1e-12);
    }

    #[test]
    fn test_drawdown_below_initial() {
        let trades = log_from_pnls(1.0, &[-0.5]);
        assert!((PerformanceMetrics::max_drawdown(&trades, 1.0) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_sharpe_undefined_cases() {
        assert!(PerformanceMetrics::sharpe_ratio(&[0.1], true).is_nan());
        assert!(PerformanceMetrics::sharpe_ratio(&[0.02, 0.02, 0.02], true).is_nan());
    }

    #[test]
    fn test_sharpe_uses_sample_std() {
        let returns = [0.1, -0.05, 0.2, 0.0];
        let mean = 0.0625;
        let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / 3.0;
        let expected = mean / var.sqrt();
        let plain = PerformanceMetrics::sharpe_ratio(&returns, false);
        assert!((plain - expected).abs() < 1e-12);
        let annual = PerformanceMetrics::sharpe_ratio(&returns, true);
        assert!((annual - expected * 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_win_rate_and_expectancy() {
        let trades = log_from_pnls(100.0, &[10.0, -11.0, 0.0, 5.0]);
        assert!((PerformanceMetrics::win_rate(&trades) - 0.5).abs() < 1e-12);

        let returns = PerformanceMetrics::trade_returns(&trades, 100.0);
        let mean = returns.iter().sum::<f64>() / 4.0;
        assert!((PerformanceMetrics::expectancy(&trades, 100.0) - mean).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn non_decreasing_curve_has_zero_drawdown(
            gains in proptest::collection::vec(0.0..10.0_f64, 0..20),
        ) {
            let trades = log_from_pnls(1.0, &gains);
            prop_assert_eq!(PerformanceMetrics::max_drawdown(&trades, 1.0), 0.0);
        }

        #[test]
        fn drawdown_is_never_positive(
            pnls in proptest::collection::vec(-0.1..0.1_f64, 0..20),
        ) {
            let trades = log_from_pnls(10.0, &pnls);
            prop_assert!(PerformanceMetrics::max_drawdown(&trades, 10.0) <= 0.0);
        }
    }
}
