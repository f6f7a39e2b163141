//! Indicator port backed by the domain indicator calculations.

use crate::domain::indicator::{IndicatorPoint, IndicatorType};
use crate::domain::ohlcv::Candle;
use crate::domain::snapshot::IndicatorSnapshot;
use crate::ports::indicator_port::IndicatorPort;

/// Computes a fixed set of indicators over whatever window it is given.
pub struct StandardIndicators {
    indicators: Vec<IndicatorType>,
}

impl StandardIndicators {
    pub fn new(mut indicators: Vec<IndicatorType>) -> Self {
        indicators.sort();
        indicators.dedup();
        Self { indicators }
    }

    pub fn indicators(&self) -> &[IndicatorType] {
        &self.indicators
    }
}

fn valid(point: Option<&IndicatorPoint>) -> Option<&IndicatorPoint> {
    point.filter(|p| p.valid)
}

impl IndicatorPort for StandardIndicators {
    fn compute(&self, candles: &[Candle]) -> IndicatorSnapshot {
        let mut snapshot = IndicatorSnapshot::new();
        if candles.is_empty() {
            return snapshot;
        }

        for indicator in &self.indicators {
            let series = indicator.calculate(candles);
            let n = series.values.len();
            let Some(latest) = valid(series.values.last()) else {
                continue;
            };
            let previous = n.checked_sub(2).and_then(|i| valid(series.values.get(i)));
            for &field in indicator.fields() {
                let Some(value) = latest.value.field(field) else {
                    continue;
                };
                let prev = previous.and_then(|p| p.value.field(field));
                snapshot.insert(indicator.key(field), value, prev);
            }
        }

        snapshot.insert_price(candles);
        snapshot
    }
}
