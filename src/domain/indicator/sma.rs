//! Simple Moving Average over closes, and over volume.
//!
//! SMA(n)[i] = mean of the last n values. Warmup: first (n-1) candles are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Candle;

pub fn calculate_sma(candles: &[Candle], period: usize) -> IndicatorSeries {
    rolling_mean(candles, period, |c| c.close, IndicatorType::Sma(period))
}

pub fn calculate_volume_sma(candles: &[Candle], period: usize) -> IndicatorSeries {
    rolling_mean(candles, period, |c| c.volume, IndicatorType::VolumeSma(period))
}

fn rolling_mean(
    candles: &[Candle],
    period: usize,
    pick: impl Fn(&Candle) -> f64,
    indicator_type: IndicatorType,
) -> IndicatorSeries {
    if period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let mut values = Vec::with_capacity(candles.len());
    let mut sum = 0.0;

    for (i, candle) in candles.iter().enumerate() {
        sum += pick(candle);
        if i >= period {
            sum -= pick(&candles[i - period]);
        }
        let valid = i + 1 >= period;
        values.push(IndicatorPoint {
            timestamp: candle.timestamp,
            valid,
            value: IndicatorValue::Simple(if valid { sum / period as f64 } else { 0.0 }),
        });
    }

    IndicatorSeries {
        indicator_type,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::{test_candles, IndicatorField};

    #[test]
    fn sma_basic() {
        let candles = test_candles(&[10.0, 20.0, 30.0, 40.0]);
        let series = calculate_sma(&candles, 2);

        assert!(!series.values[0].valid);
        assert_eq!(series.values[1].value.field(IndicatorField::Value), Some(15.0));
        assert_eq!(series.values[3].value.field(IndicatorField::Value), Some(35.0));
    }

    #[test]
    fn volume_sma_reads_volume() {
        let mut candles = test_candles(&[1.0, 1.0, 1.0]);
        candles[0].volume = 100.0;
        candles[1].volume = 200.0;
        candles[2].volume = 600.0;
        let series = calculate_volume_sma(&candles, 3);

        assert_eq!(series.indicator_type, IndicatorType::VolumeSma(3));
        assert_eq!(series.values[2].value.field(IndicatorField::Value), Some(300.0));
    }

    #[test]
    fn sma_zero_period() {
        assert!(calculate_sma(&test_candles(&[1.0]), 0).values.is_empty());
    }
}
