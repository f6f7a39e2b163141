//! Candles and append-only candle series.

use chrono::{DateTime, Utc};

use super::error::SeriesError;

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered OHLCV samples for one symbol and timeframe.
///
/// Timestamps are strictly increasing. The series only grows; indicators are
/// computed from it and never written back onto candles.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    symbol: String,
    timeframe: String,
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        CandleSeries {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            candles: Vec::new(),
        }
    }

    /// Build a series from candles that may arrive unsorted (adapters often
    /// read pages out of order). Duplicate timestamps are rejected.
    pub fn from_candles(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        mut candles: Vec<Candle>,
    ) -> Result<Self, SeriesError> {
        candles.sort_by_key(|c| c.timestamp);
        let mut series = CandleSeries::new(symbol, timeframe);
        for candle in candles {
            series.push(candle)?;
        }
        Ok(series)
    }

    pub fn push(&mut self, candle: Candle) -> Result<(), SeriesError> {
        if candle.symbol != self.symbol {
            return Err(SeriesError::SymbolMismatch {
                expected: self.symbol.clone(),
                got: candle.symbol,
            });
        }
        if let Some(last) = self.candles.last() {
            if candle.timestamp <= last.timestamp {
                return Err(SeriesError::OutOfOrder {
                    last: last.timestamp,
                    got: candle.timestamp,
                });
            }
        }
        self.candles.push(candle);
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(hour: u32, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn push_appends_in_order() {
        let mut series = CandleSeries::new("BTCUSDT", "1h");
        series.push(candle(0, 100.0)).unwrap();
        series.push(candle(1, 101.0)).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.last().unwrap().close, 101.0);
    }

    #[test]
    fn push_rejects_out_of_order() {
        let mut series = CandleSeries::new("BTCUSDT", "1h");
        series.push(candle(2, 100.0)).unwrap();
        let err = series.push(candle(1, 99.0)).unwrap_err();
        assert!(matches!(err, SeriesError::OutOfOrder { .. }));
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn push_rejects_duplicate_timestamp() {
        let mut series = CandleSeries::new("BTCUSDT", "1h");
        series.push(candle(2, 100.0)).unwrap();
        assert!(series.push(candle(2, 100.0)).is_err());
    }

    #[test]
    fn push_rejects_other_symbol() {
        let mut series = CandleSeries::new("ETHUSDT", "1h");
        let err = series.push(candle(0, 100.0)).unwrap_err();
        assert!(matches!(err, SeriesError::SymbolMismatch { .. }));
    }

    #[test]
    fn from_candles_sorts_input() {
        let series = CandleSeries::from_candles(
            "BTCUSDT",
            "1h",
            vec![candle(3, 3.0), candle(1, 1.0), candle(2, 2.0)],
        )
        .unwrap();
        let closes: Vec<f64> = series.candles().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }
}
