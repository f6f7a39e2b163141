//! CSV file market data adapter.
//!
//! One file per symbol and timeframe, `{symbol}_{timeframe}.csv`, with a
//! `timestamp,open,high,low,close,volume` header. Timestamps may be RFC 3339,
//! `YYYY-MM-DD`, or unix seconds.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::config_validation::parse_timestamp;
use crate::domain::error::TradeloomError;
use crate::domain::ohlcv::{Candle, CandleSeries};
use crate::ports::data_port::MarketDataPort;

pub struct CsvAdapter {
    base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Row {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn parse_row_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match raw.trim().parse::<i64>() {
        Ok(secs) => DateTime::from_timestamp(secs, 0),
        Err(_) => parse_timestamp(raw, false),
    }
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, timeframe))
    }

    /// Whole file as a series.
    fn read_series(&self, symbol: &str, timeframe: &str) -> Result<CandleSeries, TradeloomError> {
        let path = self.csv_path(symbol, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| TradeloomError::Database {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut candles = Vec::new();
        for (line, result) in rdr.deserialize::<Row>().enumerate() {
            let row = result.map_err(|e| TradeloomError::Database {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let timestamp =
                parse_row_timestamp(&row.timestamp).ok_or_else(|| TradeloomError::Database {
                    reason: format!(
                        "invalid timestamp '{}' on row {} of {}",
                        row.timestamp,
                        line + 1,
                        path.display()
                    ),
                })?;
            candles.push(Candle {
                symbol: symbol.to_string(),
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        Ok(CandleSeries::from_candles(symbol, timeframe, candles)?)
    }
}

fn filtered<F>(series: CandleSeries, keep: F) -> Result<CandleSeries, TradeloomError>
where
    F: Fn(&Candle) -> bool,
{
    let symbol = series.symbol().to_string();
    let timeframe = series.timeframe().to_string();
    let candles = series.candles().iter().filter(|c| keep(c)).cloned().collect();
    Ok(CandleSeries::from_candles(symbol, timeframe, candles)?)
}

impl MarketDataPort for CsvAdapter {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CandleSeries, TradeloomError> {
        let series = self.read_series(symbol, timeframe)?;
        filtered(series, |c| c.timestamp >= start && c.timestamp <= end)
    }

    fn fetch_latest(
        &self,
        symbol: &str,
        timeframe: &str,
        end: DateTime<Utc>,
        count: usize,
    ) -> Result<CandleSeries, TradeloomError> {
        let series = self.read_series(symbol, timeframe)?;
        let upto = series.candles().partition_point(|c| c.timestamp <= end);
        let from = upto.saturating_sub(count);
        let cutoff = series.candles()[from..upto].first().map(|c| c.timestamp);
        filtered(series, |c| {
            c.timestamp <= end && cutoff.is_some_and(|first| c.timestamp >= first)
        })
    }
}
