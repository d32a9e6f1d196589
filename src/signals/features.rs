//! Technical feature pipeline: ATR, RSI and stochastic oscillator plus a
//! volatility-regime soft assignment.
//!
//! Indicators are computed over the whole candle window in one pass. Rows
//! where any indicator is still warming up are dropped.

use statrs::statistics::Statistics;
use tracing::debug;

use crate::models::{Bar, Candle};

/// Turns raw candles into feature-enriched bars.
pub trait FeatureProvider: Send + Sync {
    /// Output bars keep the input order; warm-up rows are dropped, so the
    /// result may be shorter than the input.
    fn transform(&self, candles: &[Candle]) -> Vec<Bar>;
}

/// ATR(14), RSI(14) and stochastic %K(14)/%D(3) with `n_states` volatility
/// regimes.
#[derive(Debug, Clone)]
pub struct TechnicalFeatures {
    pub atr_period: usize,
    pub rsi_period: usize,
    pub stoch_k_period: usize,
    pub stoch_d_period: usize,
    pub n_states: usize,
}

impl Default for TechnicalFeatures {
    fn default() -> Self {
        Self {
            atr_period: 14,
            rsi_period: 14,
            stoch_k_period: 14,
            stoch_d_period: 3,
            n_states: 3,
        }
    }
}

impl FeatureProvider for TechnicalFeatures {
    fn transform(&self, candles: &[Candle]) -> Vec<Bar> {
        let atr = atr(candles, self.atr_period);
        let rsi = rsi(candles, self.rsi_period);
        let (stoch_k, stoch_d) = stochastic(candles, self.stoch_k_period, self.stoch_d_period);

        let complete: Vec<usize> = (0..candles.len())
            .filter(|&i| {
                [atr[i], rsi[i], stoch_k[i], stoch_d[i]].iter().all(|v| v.is_finite())
                    && candles[i].close > 0.0
            })
            .collect();

        let vol_ratio: Vec<f64> = complete.iter().map(|&i| atr[i] / candles[i].close).collect();
        let regimes = RegimeModel::fit(&vol_ratio, self.n_states);

        let bars: Vec<Bar> = complete
            .iter()
            .zip(&vol_ratio)
            .map(|(&i, &vol)| {
                let ret = if i > 0 && candles[i - 1].close > 0.0 {
                    candles[i].close / candles[i - 1].close - 1.0
                } else {
                    0.0
                };
                let features = vec![vol, rsi[i] / 100.0, stoch_k[i] / 100.0, stoch_d[i] / 100.0, ret];
                Bar::from_candle(&candles[i], atr[i], features, regimes.probabilities(vol))
            })
            .collect();

        debug!(
            candles = candles.len(),
            bars = bars.len(),
            "Computed technical features"
        );
        bars
    }
}

/// True range series. The first candle has no previous close and is `NaN`.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut tr = vec![f64::NAN; candles.len()];
    for i in 1..candles.len() {
        let (h, l, pc) = (candles[i].high, candles[i].low, candles[i - 1].close);
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

/// Wilder smoothing (alpha = 1/period) seeded with the mean of the first
/// `period` values after `start`.
fn wilder_smooth(values: &[f64], start: usize, period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < start + period {
        return out;
    }

    let seed_end = start + period;
    let mut prev = values[start..seed_end].iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = prev;

    let alpha = 1.0 / period as f64;
    for i in seed_end..n {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

/// Average True Range with Wilder smoothing. First value at index `period`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    wilder_smooth(&true_range(candles), 1, period)
}

/// Relative Strength Index on closes. First value at index `period`.
pub fn rsi(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let change = candles[i].close - candles[i - 1].close;
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }

    let avg_gain = wilder_smooth(&gains, 1, period);
    let avg_loss = wilder_smooth(&losses, 1, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(&g, &l)| {
            if g.is_nan() || l.is_nan() {
                f64::NAN
            } else if l == 0.0 {
                if g == 0.0 { 50.0 } else { 100.0 }
            } else {
                100.0 - 100.0 / (1.0 + g / l)
            }
        })
        .collect()
}

/// Stochastic oscillator: %K over `k_period` highs/lows and %D as the
/// simple average of the last `d_period` %K values. A flat range reads 50.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> (Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut k = vec![f64::NAN; n];
    let mut d = vec![f64::NAN; n];
    if k_period == 0 || d_period == 0 {
        return (k, d);
    }

    for i in (k_period - 1)..n {
        let window = &candles[i + 1 - k_period..=i];
        let highest = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let range = highest - lowest;
        k[i] = if range > 0.0 {
            100.0 * (candles[i].close - lowest) / range
        } else {
            50.0
        };
    }

    for i in (k_period + d_period - 2)..n {
        d[i] = k[i + 1 - d_period..=i].iter().sum::<f64>() / d_period as f64;
    }

    (k, d)
}

/// Soft assignment of a volatility ratio to quantile centroids.
#[derive(Debug, Clone)]
struct RegimeModel {
    centroids: Vec<f64>,
    bandwidth: f64,
}

impl RegimeModel {
    fn fit(values: &[f64], n_states: usize) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let centroids = if sorted.is_empty() {
            vec![0.0; n_states]
        } else {
            (0..n_states)
                .map(|j| {
                    let q = (j as f64 + 0.5) / n_states as f64;
                    let idx = ((q * sorted.len() as f64) as usize).min(sorted.len() - 1);
                    sorted[idx]
                })
                .collect()
        };

        let bandwidth = if values.len() >= 2 { values.iter().std_dev() } else { f64::NAN };
        Self { centroids, bandwidth }
    }

    /// Gaussian-kernel weights normalised to sum to one. Uniform when the
    /// window has no spread.
    fn probabilities(&self, value: f64) -> Vec<f64> {
        let n = self.centroids.len();
        if n == 0 {
            return Vec::new();
        }
        if !(self.bandwidth > 0.0) || !self.bandwidth.is_finite() {
            return vec![1.0 / n as f64; n];
        }

        let logits: Vec<f64> = self
            .centroids
            .iter()
            .map(|c| {
                let z = (value - c) / self.bandwidth;
                -0.5 * z * z
            })
            .collect();
        softmax(&logits)
    }
}

/// Numerically stable softmax.
pub(crate) fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// Candles with open = previous close and a one-unit wick each side.
    pub(crate) fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                Candle {
                    time: start + Duration::hours(i as i64),
                    open,
                    high: open.max(close) + 1.0,
                    low: open.min(close) - 1.0,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + 10.0 * (i as f64 * 0.3).sin() + i as f64 * 0.05).collect()
    }

    #[test]
    fn test_true_range_gap() {
        let mut candles = candles_from_closes(&[100.0, 112.0]);
        candles[1].high = 115.0;
        candles[1].low = 108.0;
        let tr = true_range(&candles);
        assert!(tr[0].is_nan());
        assert_eq!(tr[1], 15.0);
    }

    #[test]
    fn test_atr_constant_range() {
        // Flat closes with a one-unit wick each side: TR is always 2.
        let candles = candles_from_closes(&[100.0; 20]);
        let atr = atr(&candles, 14);
        assert!(atr[13].is_nan());
        assert!((atr[14] - 2.0).abs() < 1e-12);
        assert!((atr[19] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rsi_extremes() {
        let up: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi_up = rsi(&candles_from_closes(&up), 14);
        assert!(rsi_up[13].is_nan());
        assert_eq!(rsi_up[14], 100.0);

        let down: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let rsi_down = rsi(&candles_from_closes(&down), 14);
        assert!(rsi_down[19].abs() < 1e-12);
    }

    #[test]
    fn test_stochastic_bounds() {
        let candles = candles_from_closes(&wave(60));
        let (k, d) = stochastic(&candles, 14, 3);
        assert!(k[12].is_nan());
        assert!(k[13].is_finite());
        assert!(d[14].is_nan());
        assert!(d[15].is_finite());
        for v in k.iter().chain(d.iter()).filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(v));
        }
    }

    #[test]
    fn test_transform_drops_warmup_rows() {
        let candles = candles_from_closes(&wave(100));
        let bars = TechnicalFeatures::default().transform(&candles);

        assert_eq!(bars.len(), 100 - 15);
        assert_eq!(bars[0].time, candles[15].time);
        for bar in &bars {
            assert!(bar.atr > 0.0);
            assert_eq!(bar.features.len(), 5);
            assert_eq!(bar.state_probs.len(), 3);
            let total: f64 = bar.state_probs.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_transform_short_window_is_empty() {
        let candles = candles_from_closes(&wave(10));
        assert!(TechnicalFeatures::default().transform(&candles).is_empty());
    }

    #[test]
    fn test_regime_probabilities() {
        let model = RegimeModel::fit(&[0.01, 0.02, 0.03, 0.04, 0.05, 0.06], 3);
        let low = model.probabilities(0.01);
        let high = model.probabilities(0.06);
        assert!(low[0] > low[2]);
        assert!(high[2] > high[0]);

        let flat = RegimeModel::fit(&[0.02, 0.02, 0.02], 3);
        assert_eq!(flat.probabilities(0.02), vec![1.0 / 3.0; 3]);
    }
}
