//! Derived per-indicator signals.
//!
//! Signals are recomputed from the snapshot on every evaluation and never
//! persisted.

use serde::Serialize;
use std::fmt;

use crate::domain::snapshot::IndicatorReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub indicator_name: String,
    pub value: f64,
    pub previous_value: Option<f64>,
    pub status: SignalStatus,
}

impl Signal {
    pub fn new(name: impl Into<String>, reading: IndicatorReading, status: SignalStatus) -> Self {
        Signal {
            indicator_name: name.into(),
            value: reading.value,
            previous_value: reading.previous,
            status,
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStatus::Bullish => write!(f, "bullish"),
            SignalStatus::Bearish => write!(f, "bearish"),
            SignalStatus::Neutral => write!(f, "neutral"),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.previous_value {
            Some(prev) => write!(
                f,
                "{}={:.4} (prev {:.4}, {})",
                self.indicator_name, self.value, prev, self.status
            ),
            None => write!(f, "{}={:.4} ({})", self.indicator_name, self.value, self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_previous_value() {
        let signal = Signal::new(
            "MACD(12,26,9).histogram",
            IndicatorReading {
                value: 0.2,
                previous: Some(-0.3),
            },
            SignalStatus::Bullish,
        );
        assert_eq!(
            signal.to_string(),
            "MACD(12,26,9).histogram=0.2000 (prev -0.3000, bullish)"
        );
    }
}
