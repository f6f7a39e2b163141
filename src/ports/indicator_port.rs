//! Indicator calculator port trait.

use crate::domain::ohlcv::Candle;
use crate::domain::snapshot::IndicatorSnapshot;

pub trait IndicatorPort {
    /// Latest and previous value of every indicator for the last candle of
    /// `candles`. Only `candles` may be read.
    fn compute(&self, candles: &[Candle]) -> IndicatorSnapshot;
}
