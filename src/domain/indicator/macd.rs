//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: slow - 1 + signal - 1 candles.

use crate::domain::indicator::{
    calculate_ema, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};
use crate::domain::ohlcv::Candle;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if candles.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let ema_fast = ema_raw_values(candles, fast);
    let ema_slow = ema_raw_values(candles, slow);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let k = 2.0 / (signal_period as f64 + 1.0);
    let mut signal_line: Vec<f64> = vec![0.0; candles.len()];
    let macd_warmup = fast.max(slow) - 1;

    if macd_warmup + signal_period <= candles.len() {
        let seed: f64 = macd_line[macd_warmup..macd_warmup + signal_period]
            .iter()
            .sum::<f64>()
            / signal_period as f64;
        let mut signal_ema = seed;
        signal_line[macd_warmup + signal_period - 1] = signal_ema;

        for i in (macd_warmup + signal_period)..candles.len() {
            signal_ema = macd_line[i] * k + signal_ema * (1.0 - k);
            signal_line[i] = signal_ema;
        }
    }

    let signal_warmup = macd_warmup + signal_period - 1;

    let values = candles
        .iter()
        .enumerate()
        .map(|(i, candle)| IndicatorPoint {
            timestamp: candle.timestamp,
            valid: i >= signal_warmup,
            value: IndicatorValue::Macd {
                line: macd_line[i],
                signal: signal_line[i],
                histogram: macd_line[i] - signal_line[i],
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

/// Raw EMA values, using 0.0 for warmup candles.
fn ema_raw_values(candles: &[Candle], period: usize) -> Vec<f64> {
    calculate_ema(candles, period)
        .values
        .iter()
        .map(|p| match p.value {
            IndicatorValue::Simple(v) => v,
            _ => 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_candles;

    fn trending(n: usize) -> Vec<Candle> {
        let prices: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        test_candles(&prices)
    }

    #[test]
    fn macd_warmup_default() {
        let series = calculate_macd(&trending(40), DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL);

        let warmup = DEFAULT_SLOW - 1 + DEFAULT_SIGNAL - 1;
        for i in 0..warmup {
            assert!(!series.values[i].valid, "Index {} should not be valid", i);
        }
        assert!(series.values[warmup].valid);
    }

    #[test]
    fn macd_histogram_equals_line_minus_signal() {
        let series = calculate_macd(&trending(40), DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL);

        for point in series.values.iter().filter(|p| p.valid) {
            if let IndicatorValue::Macd {
                line,
                signal,
                histogram,
            } = point.value
            {
                assert!((histogram - (line - signal)).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn macd_line_is_ema_fast_minus_ema_slow() {
        let candles = test_candles(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]);
        let series = calculate_macd(&candles, 3, 5, 2);

        let ema_fast = ema_raw_values(&candles, 3);
        let ema_slow = ema_raw_values(&candles, 5);

        for (i, point) in series.values.iter().enumerate() {
            if let IndicatorValue::Macd { line, .. } = point.value {
                assert!((line - (ema_fast[i] - ema_slow[i])).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn macd_custom_parameters_warmup() {
        let series = calculate_macd(&trending(20), 5, 10, 3);
        let warmup = 10 - 1 + 3 - 1;
        assert!(!series.values[warmup - 1].valid);
        assert!(series.values[warmup].valid);
    }

    #[test]
    fn macd_zero_period_or_empty() {
        let candles = test_candles(&[100.0, 101.0, 102.0]);
        assert!(calculate_macd(&candles, 0, 26, 9).values.is_empty());
        assert!(calculate_macd(&candles, 12, 26, 0).values.is_empty());
        assert!(calculate_macd(&[], 12, 26, 9).values.is_empty());
    }
}
