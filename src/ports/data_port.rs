//! Market data port trait.

use chrono::{DateTime, Utc};

use crate::domain::error::TradeloomError;
use crate::domain::ohlcv::CandleSeries;

pub trait MarketDataPort {
    /// Every candle in `[start, end]`, oldest first.
    ///
    /// Implementations page through their source until the whole range is
    /// read; returning a truncated prefix is a bug.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CandleSeries, TradeloomError>;

    /// Most recent `count` candles up to and including `end`.
    fn fetch_latest(
        &self,
        symbol: &str,
        timeframe: &str,
        end: DateTime<Utc>,
        count: usize,
    ) -> Result<CandleSeries, TradeloomError>;
}
