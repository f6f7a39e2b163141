//! Latest/previous indicator readings handed to the decision paths.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::indicator::{IndicatorField, IndicatorType};
use crate::domain::ohlcv::Candle;

/// Key for the candle close in a snapshot.
pub const CLOSE: &str = "close";
/// Key for the candle volume in a snapshot.
pub const VOLUME: &str = "volume";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorReading {
    pub value: f64,
    /// `None` when the prior candle had no valid value (warmup, first candle).
    pub previous: Option<f64>,
}

/// `{indicator_name: (latest, previous)}` for one evaluation point.
///
/// A `BTreeMap` keeps iteration order stable so prompts and reasoning strings
/// built from a snapshot are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    readings: BTreeMap<String, IndicatorReading>,
}

impl IndicatorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64, previous: Option<f64>) {
        self.readings
            .insert(name.into(), IndicatorReading { value, previous });
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: f64, previous: Option<f64>) -> Self {
        self.insert(name, value, previous);
        self
    }

    pub fn get(&self, name: &str) -> Option<IndicatorReading> {
        self.readings.get(name).copied()
    }

    pub fn field(&self, indicator: &IndicatorType, field: IndicatorField) -> Option<IndicatorReading> {
        self.get(&indicator.key(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndicatorReading)> {
        self.readings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Record close and volume of the last two candles of `window`.
    pub fn insert_price(&mut self, window: &[Candle]) {
        let Some(last) = window.last() else {
            return;
        };
        let prev = window.len().checked_sub(2).map(|i| &window[i]);
        self.insert(CLOSE, last.close, prev.map(|c| c.close));
        self.insert(VOLUME, last.volume, prev.map(|c| c.volume));
    }
}
