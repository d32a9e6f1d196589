//! Bar-by-bar trade simulator for validating decision policies.
//!
//! Features:
//! - One position at a time, bracketed by ATR-based stop and take levels
//! - Equity-at-risk sizing from the policy's size fraction
//! - Exits tested against the next bar's close only (no intrabar fills)
//! - Forced close at the final bar so the log accounts for all capital

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::metrics::PerformanceMetrics;
use crate::models::{Bar, Decision, ExitReason, PerformanceSummary, Position, Trade};
use crate::signals::DecisionPolicy;
use crate::trading::{stop_take_distances, TradingConfig};

/// Simulator parameters.
#[derive(Debug, Clone, Copy)]
pub struct TradeSimulator {
    /// ATR multiplier for the stop distance
    pub sl_multiplier: f64,

    /// ATR multiplier for the take distance
    pub tp_multiplier: f64,
}

impl Default for TradeSimulator {
    fn default() -> Self {
        Self {
            sl_multiplier: 1.2,
            tp_multiplier: 2.4,
        }
    }
}

/// Trade log and final balance of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trades: Vec<Trade>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl SimulationResult {
    pub fn summary(&self) -> PerformanceSummary {
        PerformanceMetrics::summary(&self.trades, self.initial_balance)
    }

    pub fn total_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }

    pub fn total_return(&self) -> f64 {
        (self.final_balance - self.initial_balance) / self.initial_balance
    }
}

impl std::fmt::Display for SimulationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " BACKTEST RESULTS ")?;
        writeln!(f)?;
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            writeln!(f, "Period: {} to {}", start.format("%Y-%m-%d %H:%M"), end.format("%Y-%m-%d %H:%M"))?;
            writeln!(f)?;
        }
        writeln!(f, "--- Capital ---")?;
        writeln!(f, "Initial:      {:.6}", self.initial_balance)?;
        writeln!(f, "Final:        {:.6}", self.final_balance)?;
        writeln!(f, "Return:       {:.2}%", self.total_return() * 100.0)?;
        writeln!(f)?;

        let stops = self.trades.iter().filter(|t| t.exit_reason == ExitReason::StopLoss).count();
        let takes = self.trades.iter().filter(|t| t.exit_reason == ExitReason::TakeProfit).count();
        let forced = self.trades.len() - stops - takes;
        writeln!(f, "--- Exits ---")?;
        writeln!(f, "{}: {}  {}: {}  {}: {}",
            ExitReason::StopLoss.as_str(), stops,
            ExitReason::TakeProfit.as_str(), takes,
            ExitReason::EndOfData.as_str(), forced)?;
        writeln!(f)?;
        writeln!(f, "--- Performance ---")?;
        writeln!(f, "{}", self.summary())?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

impl TradeSimulator {
    pub fn new(sl_multiplier: f64, tp_multiplier: f64) -> Self {
        Self {
            sl_multiplier,
            tp_multiplier,
        }
    }

    pub fn from_config(config: &TradingConfig) -> Self {
        Self::new(config.sl_multiplier, config.tp_multiplier)
    }

    /// Run the simulation with a per-bar decision function.
    ///
    /// `decide` is only called on bars where no position is open. A position
    /// opened on bar `i` is first tested against bar `i + 1`'s close. The
    /// decision on the last bar is never requested since there is no next
    /// bar to hold a position over.
    pub fn run<F>(&self, bars: &[Bar], initial_balance: f64, mut decide: F) -> EngineResult<SimulationResult>
    where
        F: FnMut(&Bar) -> Decision,
    {
        validate_bars(bars)?;

        let mut balance = initial_balance;
        let mut position: Option<Position> = None;
        let mut trades: Vec<Trade> = Vec::new();

        for (i, pair) in bars.windows(2).enumerate() {
            let (bar, next) = (&pair[0], &pair[1]);

            // === New entry decision ===
            if position.is_none() {
                position = self.try_open(i, bar, decide(bar), balance)?;
            }

            // === Position management ===
            if let Some(pos) = &position {
                if let Some((exit_price, reason)) = pos.check_exit(next.close) {
                    trades.push(close_position(pos, exit_price, next.time, reason, &mut balance));
                    position = None;
                }
            }
        }

        // Close any remaining position at the final close
        if let (Some(pos), Some(last)) = (position.take(), bars.last()) {
            let trade = close_position(&pos, last.close, last.time, ExitReason::EndOfData, &mut balance);
            trades.push(trade);
        }

        info!(
            bars = bars.len(),
            trades = trades.len(),
            final_balance = balance,
            "Simulation complete"
        );

        Ok(SimulationResult {
            initial_balance,
            final_balance: balance,
            trades,
            start_time: bars.first().map(|b| b.time),
            end_time: bars.last().map(|b| b.time),
        })
    }

    /// Turn a flat-state decision into a bracketed position, or `None` when
    /// the decision or the bar's volatility gives nothing to trade.
    fn try_open(&self, index: usize, bar: &Bar, decision: Decision, balance: f64) -> EngineResult<Option<Position>> {
        let decision = Decision::new(decision.side, decision.size)?;
        if !decision.is_entry() {
            return Ok(None);
        }
        let Some(side) = decision.side.side() else {
            return Ok(None);
        };

        let (stop_distance, take_distance) =
            stop_take_distances(bar.atr, self.sl_multiplier, self.tp_multiplier);
        if stop_distance <= 0.0 {
            debug!(index, atr = bar.atr, "Non-positive stop distance, staying flat");
            return Ok(None);
        }

        let quantity = balance * decision.size / stop_distance;
        if !(quantity > 0.0) {
            debug!(index, balance, "Non-positive quantity, staying flat");
            return Ok(None);
        }

        let pos = Position::open(side, bar.close, quantity, stop_distance, take_distance, index, bar.time);
        debug!(
            index,
            side = pos.side.as_str(),
            entry = pos.entry_price,
            qty = pos.quantity,
            stop = pos.stop_price,
            take = pos.take_price,
            "Opened position"
        );
        Ok(Some(pos))
    }

    /// Run the simulation with a policy, passing `risk_aversion` as the cap
    /// on each decision's size.
    pub fn run_policy<P>(
        &self,
        bars: &[Bar],
        initial_balance: f64,
        policy: &P,
        risk_aversion: f64,
    ) -> EngineResult<SimulationResult>
    where
        P: DecisionPolicy + ?Sized,
    {
        self.run(bars, initial_balance, |bar| {
            policy.decide(&bar.features, &bar.state_probs, risk_aversion)
        })
    }
}

fn close_position(
    pos: &Position,
    exit_price: f64,
    exit_time: DateTime<Utc>,
    reason: ExitReason,
    balance: &mut f64,
) -> Trade {
    let pnl = pos.pnl_at(exit_price);
    *balance += pnl;

    debug!(
        side = pos.side.as_str(),
        entry = pos.entry_price,
        exit = exit_price,
        pnl,
        balance = *balance,
        reason = reason.as_str(),
        "Closed position"
    );

    Trade {
        entry_time: pos.entry_time,
        exit_time,
        side: pos.side,
        entry_price: pos.entry_price,
        exit_price,
        qty: pos.quantity,
        pnl,
        balance_after: *balance,
        exit_reason: reason,
    }
}

/// Precondition check run once at entry.
fn validate_bars(bars: &[Bar]) -> EngineResult<()> {
    for (index, bar) in bars.iter().enumerate() {
        if !bar.close.is_finite() {
            return Err(EngineError::MalformedBars {
                index,
                reason: format!("close is {}", bar.close),
            });
        }
        if !bar.atr.is_finite() {
            return Err(EngineError::MalformedBars {
                index,
                reason: format!("atr is {}", bar.atr),
            });
        }
        if index > 0 && bar.time <= bars[index - 1].time {
            return Err(EngineError::MalformedBars {
                index,
                reason: "timestamps not strictly increasing".to_string(),
            });
        }
    }
    Ok(())
}
