//! Standard Deviation indicator.
//!
//! Population standard deviation over n closing prices.
//! STDDEV(n)[i] = sqrt(sum((C[i-j] - SMA(n)[i])^2 for j in 0..n-1) / n)
//! Warmup: first (n-1) candles are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Candle;

pub fn calculate_stddev(candles: &[Candle], period: usize) -> IndicatorSeries {
    if period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Stddev(period),
            values: Vec::new(),
        };
    }

    let mut values = Vec::with_capacity(candles.len());
    let warmup = period - 1;

    for (i, candle) in candles.iter().enumerate() {
        let valid = i >= warmup;
        let value = if valid {
            population_stddev(&candles[i + 1 - period..=i]).1
        } else {
            0.0
        };

        values.push(IndicatorPoint {
            timestamp: candle.timestamp,
            valid,
            value: IndicatorValue::Simple(value),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Stddev(period),
        values,
    }
}

/// Mean and population standard deviation of the closes in `window`.
pub(crate) fn population_stddev(window: &[Candle]) -> (f64, f64) {
    if window.is_empty() {
        return (0.0, 0.0);
    }
    let n = window.len() as f64;
    let mean: f64 = window.iter().map(|c| c.close).sum::<f64>() / n;
    let variance: f64 = window
        .iter()
        .map(|c| {
            let diff = c.close - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_candles;

    #[test]
    fn stddev_warmup() {
        let candles = test_candles(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_stddev(&candles, 3);

        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        assert!(series.values[2].valid);
    }

    #[test]
    fn stddev_constant_values() {
        let candles = test_candles(&[100.0, 100.0, 100.0, 100.0]);
        let series = calculate_stddev(&candles, 3);

        if let IndicatorValue::Simple(v) = series.values[2].value {
            assert!(v.abs() < f64::EPSILON);
        } else {
            panic!("Expected Simple value");
        }
    }

    #[test]
    fn stddev_known_values() {
        let candles = test_candles(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let series = calculate_stddev(&candles, 8);

        assert!(series.values[7].valid);
        if let IndicatorValue::Simple(v) = series.values[7].value {
            assert!((v - 2.0).abs() < 1e-10);
        } else {
            panic!("Expected Simple value");
        }
    }
}
