//! Deterministic rule path: crossover detection on indicator snapshots.
//!
//! The engine only reacts to transitions between the previous and the current
//! candle. A histogram that has been positive for ten candles is not a buy; the
//! candle where it flipped sign was. Every decision is position aware: a BUY is
//! suppressed while a position is open and a SELL is suppressed without one.

use std::fmt;
use std::str::FromStr;

use crate::domain::decision::{Action, Decision, DecisionContext, DecisionDraft, DecisionSource};
use crate::domain::indicator::{IndicatorField, IndicatorType, bollinger, macd};
use crate::domain::position::Position;
use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::snapshot::{CLOSE, IndicatorReading, IndicatorSnapshot, VOLUME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStrategy {
    /// MACD histogram sign flip, filtered by RSI.
    MacdCross,
    /// Fast/slow EMA cross, gated by price against a trend EMA.
    EmaCross,
    /// Bollinger band touch confirmed by a volume spike.
    BandVolume,
}

impl FromStr for SignalStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "macd_cross" | "macd" => Ok(SignalStrategy::MacdCross),
            "ema_cross" | "ema" => Ok(SignalStrategy::EmaCross),
            "band_volume" | "bollinger" => Ok(SignalStrategy::BandVolume),
            other => Err(format!(
                "unknown strategy '{}', expected macd_cross, ema_cross or band_volume",
                other
            )),
        }
    }
}

impl fmt::Display for SignalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStrategy::MacdCross => write!(f, "macd_cross"),
            SignalStrategy::EmaCross => write!(f, "ema_cross"),
            SignalStrategy::BandVolume => write!(f, "band_volume"),
        }
    }
}

pub const DEFAULT_LOOKBACK: usize = 250;

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub strategy: SignalStrategy,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub bollinger_period: usize,
    pub bollinger_mult_x100: u32,
    pub volume_period: usize,
    pub volume_multiple: f64,
    /// Candles every evaluation computes indicators over, ending at the
    /// evaluated candle. Live and replayed decisions share it.
    pub lookback_candles: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            strategy: SignalStrategy::MacdCross,
            macd_fast: macd::DEFAULT_FAST,
            macd_slow: macd::DEFAULT_SLOW,
            macd_signal: macd::DEFAULT_SIGNAL,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            ema_fast: 12,
            ema_slow: 26,
            ema_trend: 50,
            bollinger_period: bollinger::DEFAULT_PERIOD,
            bollinger_mult_x100: bollinger::DEFAULT_MULT_X100,
            volume_period: 20,
            volume_multiple: 1.5,
            lookback_candles: DEFAULT_LOOKBACK,
        }
    }
}

impl SignalConfig {
    pub fn macd(&self) -> IndicatorType {
        IndicatorType::Macd {
            fast: self.macd_fast,
            slow: self.macd_slow,
            signal: self.macd_signal,
        }
    }

    pub fn rsi(&self) -> IndicatorType {
        IndicatorType::Rsi(self.rsi_period)
    }

    pub fn ema_fast(&self) -> IndicatorType {
        IndicatorType::Ema(self.ema_fast)
    }

    pub fn ema_slow(&self) -> IndicatorType {
        IndicatorType::Ema(self.ema_slow)
    }

    pub fn ema_trend(&self) -> IndicatorType {
        IndicatorType::Ema(self.ema_trend)
    }

    pub fn bollinger(&self) -> IndicatorType {
        IndicatorType::Bollinger {
            period: self.bollinger_period,
            stddev_mult_x100: self.bollinger_mult_x100,
        }
    }

    pub fn volume_average(&self) -> IndicatorType {
        IndicatorType::VolumeSma(self.volume_period)
    }

    /// Every indicator the engine can read. All are computed regardless of
    /// strategy so the advisory prompts see the same context.
    pub fn required_indicators(&self) -> Vec<IndicatorType> {
        vec![
            self.macd(),
            self.rsi(),
            self.ema_fast(),
            self.ema_slow(),
            self.ema_trend(),
            self.bollinger(),
            self.volume_average(),
        ]
    }

    /// Candles needed before every indicator has a current and a previous
    /// valid value.
    pub fn min_history(&self) -> usize {
        let macd = self.macd_fast.max(self.macd_slow) + self.macd_signal - 1;
        let longest = [
            macd,
            self.rsi_period + 1,
            self.ema_slow,
            self.ema_trend,
            self.bollinger_period,
            self.volume_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(1);
        longest + 1
    }

    /// Evaluation window length, never shorter than `min_history`.
    pub fn lookback(&self) -> usize {
        self.lookback_candles.max(self.min_history())
    }

    /// The window ending at `candles[index]`.
    pub fn window<'a, T>(&self, candles: &'a [T], index: usize) -> &'a [T] {
        let end = (index + 1).min(candles.len());
        &candles[end.saturating_sub(self.lookback())..end]
    }
}

#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: SignalConfig,
}

/// A directional trigger before position awareness is applied.
enum Trigger {
    Enter(String),
    Exit(String),
    None(String),
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        SignalEngine { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Per-indicator status derived from the snapshot. Indicators missing from
    /// the snapshot are skipped.
    pub fn signals(&self, snapshot: &IndicatorSnapshot) -> Vec<Signal> {
        let cfg = &self.config;
        let mut signals = Vec::new();
        let close = snapshot.get(CLOSE).map(|r| r.value);

        let macd = cfg.macd();
        if let Some(hist) = snapshot.field(&macd, IndicatorField::MacdHistogram) {
            signals.push(Signal::new(
                macd.key(IndicatorField::MacdHistogram),
                hist,
                sign_status(hist.value),
            ));
        }

        let rsi = cfg.rsi();
        if let Some(reading) = snapshot.field(&rsi, IndicatorField::Value) {
            let status = if reading.value < cfg.rsi_oversold {
                SignalStatus::Bullish
            } else if reading.value > cfg.rsi_overbought {
                SignalStatus::Bearish
            } else {
                SignalStatus::Neutral
            };
            signals.push(Signal::new(rsi.to_string(), reading, status));
        }

        let fast = snapshot.field(&cfg.ema_fast(), IndicatorField::Value);
        let slow = snapshot.field(&cfg.ema_slow(), IndicatorField::Value);
        if let (Some(fast), Some(slow)) = (fast, slow) {
            signals.push(Signal::new(
                cfg.ema_fast().to_string(),
                fast,
                sign_status(fast.value - slow.value),
            ));
        }

        let trend = cfg.ema_trend();
        if let (Some(reading), Some(close)) = (snapshot.field(&trend, IndicatorField::Value), close)
        {
            signals.push(Signal::new(
                trend.to_string(),
                reading,
                sign_status(close - reading.value),
            ));
        }

        let bands = cfg.bollinger();
        let lower = snapshot.field(&bands, IndicatorField::BollingerLower);
        let upper = snapshot.field(&bands, IndicatorField::BollingerUpper);
        if let (Some(lower), Some(upper), Some(close)) = (lower, upper, close) {
            let status = if close <= lower.value {
                SignalStatus::Bullish
            } else if close >= upper.value {
                SignalStatus::Bearish
            } else {
                SignalStatus::Neutral
            };
            signals.push(Signal::new(bands.to_string(), lower, status));
        }

        signals
    }

    /// Rule decision for one evaluation point.
    ///
    /// Returns HOLD, never an error, when a needed indicator or its previous
    /// value is missing.
    pub fn evaluate(
        &self,
        snapshot: &IndicatorSnapshot,
        position: Option<&Position>,
        ctx: &DecisionContext,
    ) -> Decision {
        let trigger = match self.config.strategy {
            SignalStrategy::MacdCross => self.macd_cross(snapshot),
            SignalStrategy::EmaCross => self.ema_cross(snapshot, ctx.price),
            SignalStrategy::BandVolume => self.band_volume(snapshot, ctx.price),
        };

        let held = position.filter(|p| p.is_open());
        match trigger {
            Trigger::None(reason) => ctx.hold(DecisionSource::Rule, reason),
            Trigger::Enter(reason) => match held {
                Some(p) => ctx.hold(
                    DecisionSource::Rule,
                    format!(
                        "BUY suppressed, position of {} already open in {}: {}",
                        p.quantity, ctx.symbol, reason
                    ),
                ),
                None => ctx.seal(
                    DecisionDraft {
                        action: Action::Buy,
                        quantity: None,
                        confidence: 1.0,
                        reasoning: reason,
                        approved: true,
                    },
                    DecisionSource::Rule,
                ),
            },
            Trigger::Exit(reason) => match held {
                Some(p) => ctx.seal(
                    DecisionDraft {
                        action: Action::Sell,
                        quantity: Some(p.quantity),
                        confidence: 1.0,
                        reasoning: reason,
                        approved: true,
                    },
                    DecisionSource::Rule,
                ),
                None => ctx.hold(
                    DecisionSource::Rule,
                    format!("SELL suppressed, no position in {}: {}", ctx.symbol, reason),
                ),
            },
        }
    }

    fn macd_cross(&self, snapshot: &IndicatorSnapshot) -> Trigger {
        let cfg = &self.config;
        let macd = cfg.macd();
        let Some(hist) = snapshot.field(&macd, IndicatorField::MacdHistogram) else {
            return Trigger::None(format!("{} unavailable", macd));
        };
        let Some(prev) = hist.previous else {
            return Trigger::None(format!("no previous {} histogram", macd));
        };
        let Some(rsi) = snapshot.field(&cfg.rsi(), IndicatorField::Value) else {
            return Trigger::None(format!("{} unavailable", cfg.rsi()));
        };

        let cross = format!(
            "{} histogram {:.4} -> {:.4}, {} {:.2}",
            macd,
            prev,
            hist.value,
            cfg.rsi(),
            rsi.value
        );
        if prev <= 0.0 && hist.value > 0.0 {
            if rsi.value < cfg.rsi_overbought {
                Trigger::Enter(format!("bullish MACD cross: {}", cross))
            } else {
                Trigger::None(format!("bullish MACD cross filtered, overbought: {}", cross))
            }
        } else if prev >= 0.0 && hist.value < 0.0 {
            if rsi.value > cfg.rsi_oversold {
                Trigger::Exit(format!("bearish MACD cross: {}", cross))
            } else {
                Trigger::None(format!("bearish MACD cross filtered, oversold: {}", cross))
            }
        } else {
            Trigger::None(format!("no MACD cross: {}", cross))
        }
    }

    fn ema_cross(&self, snapshot: &IndicatorSnapshot, price: f64) -> Trigger {
        let cfg = &self.config;
        let read = |t: IndicatorType| snapshot.field(&t, IndicatorField::Value);
        let (Some(fast), Some(slow), Some(trend)) =
            (read(cfg.ema_fast()), read(cfg.ema_slow()), read(cfg.ema_trend()))
        else {
            return Trigger::None("EMA values unavailable".into());
        };
        let (Some(prev_fast), Some(prev_slow)) = (fast.previous, slow.previous) else {
            return Trigger::None("no previous EMA values".into());
        };

        let detail = format!(
            "{} {:.4} vs {} {:.4}, price {:.4} vs {} {:.4}",
            cfg.ema_fast(),
            fast.value,
            cfg.ema_slow(),
            slow.value,
            price,
            cfg.ema_trend(),
            trend.value
        );
        let golden = prev_fast <= prev_slow && fast.value > slow.value;
        let death = prev_fast >= prev_slow && fast.value < slow.value;
        if golden {
            if price > trend.value {
                Trigger::Enter(format!("golden cross above trend: {}", detail))
            } else {
                Trigger::None(format!("golden cross below trend: {}", detail))
            }
        } else if death {
            if price < trend.value {
                Trigger::Exit(format!("death cross below trend: {}", detail))
            } else {
                Trigger::None(format!("death cross above trend: {}", detail))
            }
        } else {
            Trigger::None(format!("no EMA cross: {}", detail))
        }
    }

    fn band_volume(&self, snapshot: &IndicatorSnapshot, price: f64) -> Trigger {
        let cfg = &self.config;
        let bands = cfg.bollinger();
        let lower = snapshot.field(&bands, IndicatorField::BollingerLower);
        let upper = snapshot.field(&bands, IndicatorField::BollingerUpper);
        let average = snapshot.field(&cfg.volume_average(), IndicatorField::Value);
        let (Some(lower), Some(upper), Some(volume), Some(average)) =
            (lower, upper, snapshot.get(VOLUME), average)
        else {
            return Trigger::None(format!("{} or volume unavailable", bands));
        };
        if !has_previous(snapshot.get(CLOSE)) {
            return Trigger::None("no previous candle".into());
        }
        // Trailing average: the reading before this candle's volume joined it.
        let Some(trailing) = average.previous else {
            return Trigger::None(format!("no trailing {}", cfg.volume_average()));
        };

        let spike = volume.value > cfg.volume_multiple * trailing;
        let detail = format!(
            "price {:.4} in [{:.4}, {:.4}], volume {:.2} vs {:.2}x avg {:.2}",
            price, lower.value, upper.value, volume.value, cfg.volume_multiple, trailing
        );
        if price <= lower.value && spike {
            Trigger::Enter(format!("lower band touch on volume: {}", detail))
        } else if price >= upper.value && spike {
            Trigger::Exit(format!("upper band touch on volume: {}", detail))
        } else {
            Trigger::None(format!("no band signal: {}", detail))
        }
    }
}

fn sign_status(value: f64) -> SignalStatus {
    if value > 0.0 {
        SignalStatus::Bullish
    } else if value < 0.0 {
        SignalStatus::Bearish
    } else {
        SignalStatus::Neutral
    }
}

fn has_previous(reading: Option<IndicatorReading>) -> bool {
    reading.is_some_and(|r| r.previous.is_some())
}
