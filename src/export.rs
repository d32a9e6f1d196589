//! CSV import and export: the trade log out, OHLCV candles in.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::models::{Candle, Trade};

/// Column order of the exported trade log.
pub const TRADE_LOG_HEADER: [&str; 8] = [
    "entry_time",
    "exit_time",
    "side",
    "entry_price",
    "exit_price",
    "qty",
    "pnl",
    "balance_after",
];

/// Write the trade log as CSV with [`TRADE_LOG_HEADER`].
pub fn write_trade_log<W: Write>(trades: &[Trade], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(TRADE_LOG_HEADER)?;

    for t in trades {
        wtr.write_record([
            t.entry_time.to_rfc3339(),
            t.exit_time.to_rfc3339(),
            t.side.as_str().to_string(),
            t.entry_price.to_string(),
            t.exit_price.to_string(),
            t.qty.to_string(),
            t.pnl.to_string(),
            t.balance_after.to_string(),
        ])?;
    }

    wtr.flush().context("failed to flush CSV writer")?;
    Ok(())
}

/// Write the trade log to `path`, creating or truncating it.
pub fn save_trade_log(trades: &[Trade], path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_trade_log(trades, file)
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Accepts epoch milliseconds, RFC 3339, or `YYYY-MM-DD HH:MM:SS` (UTC).
fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Utc
            .timestamp_millis_opt(ms)
            .single()
            .with_context(|| format!("timestamp out of range: {}", ms));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("unrecognised time {:?}", raw))
}

/// Read `time,open,high,low,close,volume` candles.
pub fn read_candles<R: Read>(reader: R) -> Result<Vec<Candle>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    rdr.deserialize::<CandleRow>()
        .enumerate()
        .map(|(i, row)| {
            let row = row.with_context(|| format!("bad candle row {}", i + 1))?;
            Ok(Candle {
                time: parse_time(&row.time).with_context(|| format!("bad candle row {}", i + 1))?,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            })
        })
        .collect()
}

/// Load candles from a CSV file for offline backtests.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_candles(file).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Side};

    #[test]
    fn test_trade_log_header_and_row() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let trades = vec![Trade {
            entry_time: t0,
            exit_time: t0 + chrono::Duration::hours(1),
            side: Side::Short,
            entry_price: 100.0,
            exit_price: 95.2,
            qty: 0.5,
            pnl: 2.4,
            balance_after: 3.4,
            exit_reason: ExitReason::TakeProfit,
        }];

        let mut buf = Vec::new();
        write_trade_log(&trades, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("entry_time,exit_time,side,entry_price,exit_price,qty,pnl,balance_after")
        );
        assert_eq!(
            lines.next(),
            Some("2024-01-01T00:00:00+00:00,2024-01-01T01:00:00+00:00,short,100,95.2,0.5,2.4,3.4")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_empty_log_has_header_only() {
        let mut buf = Vec::new();
        write_trade_log(&[], &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_read_candles_time_formats() {
        let csv = "time,open,high,low,close,volume\n\
                   1704067200000,1,2,0.5,1.5,10\n\
                   2024-01-01T01:00:00Z, 1.5,2,1,1.8,12\n\
                   2024-01-01 02:00:00,1.8,2.2,1.7,2.0,9\n";
        let candles = read_candles(csv.as_bytes()).unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].time, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(candles[1].time, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        assert_eq!(candles[2].time, Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
        assert_eq!(candles[1].open, 1.5);
    }

    #[test]
    fn test_read_candles_rejects_bad_rows() {
        let csv = "time,open,high,low,close,volume\nyesterday,1,2,0.5,1.5,10\n";
        assert!(read_candles(csv.as_bytes()).is_err());
        let csv = "time,open,high,low,close,volume\n1704067200000,x,2,0.5,1.5,10\n";
        assert!(read_candles(csv.as_bytes()).is_err());
    }
}
