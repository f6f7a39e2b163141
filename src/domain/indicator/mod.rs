//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorPoint`: A single point in an indicator time series
//! - `IndicatorValue`: Enum for different indicator output shapes
//! - `IndicatorType`: Enum for indicator identity + parameters (serves as HashMap key)
//! - `IndicatorField`: Which component of a multi-value indicator to read
//! - `IndicatorSeries`: A time series of indicator values
//!
//! Every calculation is causal: the value at index `i` depends only on
//! candles `0..=i`.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stddev;

pub use bollinger::calculate_bollinger;
pub use ema::calculate_ema;
pub use macd::calculate_macd;
pub use rsi::calculate_rsi;
pub use sma::{calculate_sma, calculate_volume_sma};
pub use stddev::calculate_stddev;

use chrono::{DateTime, Utc};
use std::fmt;

use crate::domain::ohlcv::Candle;

#[derive(Debug, Clone)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Stddev(usize),
    VolumeSma(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorField {
    Value,
    MacdLine,
    MacdSignal,
    MacdHistogram,
    BollingerUpper,
    BollingerMiddle,
    BollingerLower,
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorType {
    /// Fields this indicator produces, in display order.
    pub fn fields(&self) -> &'static [IndicatorField] {
        match self {
            IndicatorType::Macd { .. } => &[
                IndicatorField::MacdLine,
                IndicatorField::MacdSignal,
                IndicatorField::MacdHistogram,
            ],
            IndicatorType::Bollinger { .. } => &[
                IndicatorField::BollingerUpper,
                IndicatorField::BollingerMiddle,
                IndicatorField::BollingerLower,
            ],
            _ => &[IndicatorField::Value],
        }
    }

    /// Snapshot key for one field of this indicator, e.g. `EMA(12)` or
    /// `MACD(12,26,9).histogram`.
    pub fn key(&self, field: IndicatorField) -> String {
        match field.suffix() {
            Some(suffix) => format!("{}.{}", self, suffix),
            None => self.to_string(),
        }
    }

    pub fn calculate(&self, candles: &[Candle]) -> IndicatorSeries {
        match *self {
            IndicatorType::Sma(period) => calculate_sma(candles, period),
            IndicatorType::Ema(period) => calculate_ema(candles, period),
            IndicatorType::Rsi(period) => calculate_rsi(candles, period),
            IndicatorType::Stddev(period) => calculate_stddev(candles, period),
            IndicatorType::VolumeSma(period) => calculate_volume_sma(candles, period),
            IndicatorType::Macd { fast, slow, signal } => {
                calculate_macd(candles, fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => calculate_bollinger(candles, period, stddev_mult_x100),
        }
    }
}

impl IndicatorField {
    fn suffix(self) -> Option<&'static str> {
        match self {
            IndicatorField::Value => None,
            IndicatorField::MacdLine => Some("line"),
            IndicatorField::MacdSignal => Some("signal"),
            IndicatorField::MacdHistogram => Some("histogram"),
            IndicatorField::BollingerUpper => Some("upper"),
            IndicatorField::BollingerMiddle => Some("middle"),
            IndicatorField::BollingerLower => Some("lower"),
        }
    }
}

impl IndicatorValue {
    /// Read one field; `None` when the field does not apply to this shape.
    pub fn field(&self, field: IndicatorField) -> Option<f64> {
        match (self, field) {
            (IndicatorValue::Simple(v), IndicatorField::Value) => Some(*v),
            (IndicatorValue::Macd { line, .. }, IndicatorField::MacdLine) => Some(*line),
            (IndicatorValue::Macd { signal, .. }, IndicatorField::MacdSignal) => Some(*signal),
            (IndicatorValue::Macd { histogram, .. }, IndicatorField::MacdHistogram) => {
                Some(*histogram)
            }
            (IndicatorValue::Bollinger { upper, .. }, IndicatorField::BollingerUpper) => {
                Some(*upper)
            }
            (IndicatorValue::Bollinger { middle, .. }, IndicatorField::BollingerMiddle) => {
                Some(*middle)
            }
            (IndicatorValue::Bollinger { lower, .. }, IndicatorField::BollingerLower) => {
                Some(*lower)
            }
            _ => None,
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Stddev(period) => write!(f, "STDDEV({})", period),
            IndicatorType::VolumeSma(period) => write!(f, "VOLUME_SMA({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}

/// Shared fixture for the indicator unit tests: one candle per hour.
#[cfg(test)]
pub(crate) fn test_candles(prices: &[f64]) -> Vec<Candle> {
    use chrono::TimeZone;

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            symbol: "TEST".into(),
            timestamp: start + chrono::Duration::hours(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_type_display_ema() {
        assert_eq!(IndicatorType::Ema(20).to_string(), "EMA(20)");
    }

    #[test]
    fn indicator_type_display_macd() {
        let macd = IndicatorType::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        assert_eq!(macd.to_string(), "MACD(12,26,9)");
    }

    #[test]
    fn indicator_type_display_bollinger() {
        let boll = IndicatorType::Bollinger {
            period: 20,
            stddev_mult_x100: 200,
        };
        assert_eq!(boll.to_string(), "BOLLINGER(20,2)");
    }

    #[test]
    fn key_for_simple_and_composite_fields() {
        assert_eq!(IndicatorType::Rsi(14).key(IndicatorField::Value), "RSI(14)");
        let macd = IndicatorType::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        assert_eq!(
            macd.key(IndicatorField::MacdHistogram),
            "MACD(12,26,9).histogram"
        );
    }

    #[test]
    fn field_extraction_matches_shape() {
        let value = IndicatorValue::Bollinger {
            upper: 3.0,
            middle: 2.0,
            lower: 1.0,
        };
        assert_eq!(value.field(IndicatorField::BollingerLower), Some(1.0));
        assert_eq!(value.field(IndicatorField::Value), None);
    }

    #[test]
    fn calculate_dispatches_by_type() {
        let candles = test_candles(&[1.0, 2.0, 3.0]);
        let series = IndicatorType::Sma(2).calculate(&candles);
        assert_eq!(series.indicator_type, IndicatorType::Sma(2));
        assert_eq!(series.values.len(), 3);
    }

    #[test]
    fn indicator_type_hash_eq() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        let ema12 = IndicatorType::Ema(12);
        let ema26 = IndicatorType::Ema(26);

        map.insert(ema12.clone(), "fast");
        map.insert(ema26.clone(), "slow");

        assert_eq!(map.get(&IndicatorType::Ema(12)), Some(&"fast"));
        assert_eq!(map.get(&ema26), Some(&"slow"));
    }
}
