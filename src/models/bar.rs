//! Market bars: raw OHLCV candles and feature-enriched bars.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw OHLCV candle as delivered by a market data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A candle with its volatility estimate, feature vector and regime
/// probabilities attached. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    /// Average True Range at this bar
    pub atr: f64,

    /// Feature vector consumed by the decision policy
    pub features: Vec<f64>,

    /// Hidden-state probabilities, one per regime
    pub state_probs: Vec<f64>,
}

impl Bar {
    /// Attach features to a candle.
    pub fn from_candle(
        candle: &Candle,
        atr: f64,
        features: Vec<f64>,
        state_probs: Vec<f64>,
    ) -> Self {
        Self {
            time: candle.time,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            atr,
            features,
            state_probs,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, TimeZone, Utc};

    use super::Bar;

    /// Hourly bars with the given closes and a constant ATR.
    pub fn bars_from_closes(closes: &[f64], atr: f64) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                time: start + Duration::hours(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
                atr,
                features: vec![0.0],
                state_probs: vec![1.0],
            })
            .collect()
    }
}
