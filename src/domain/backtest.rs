//! Backtest replay engine.
//!
//! Replays a candle series through the same decision paths and portfolio
//! state machine as live evaluation. Step `t` sees the lookback window ending
//! at `candles[t]` and nothing later, the same window a live evaluation of
//! that candle computes over.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::decision::{Decision, DecisionContext, DecisionSource};
use crate::domain::error::{SeriesError, TradeloomError};
use crate::domain::execution::PortfolioConfig;
use crate::domain::metrics::Metrics;
use crate::domain::ohlcv::CandleSeries;
use crate::domain::orchestrator::Orchestrator;
use crate::domain::portfolio::{EquityPoint, Portfolio, PortfolioSnapshot, TransitionOutcome};
use crate::domain::position::Trade;
use crate::domain::signal_engine::SignalEngine;
use crate::ports::indicator_port::IndicatorPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestMode {
    Rule,
    Advisory,
}

impl fmt::Display for BacktestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestMode::Rule => write!(f, "rule"),
            BacktestMode::Advisory => write!(f, "advisory"),
        }
    }
}

impl FromStr for BacktestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rule" | "rules" => Ok(BacktestMode::Rule),
            "advisory" | "llm" => Ok(BacktestMode::Advisory),
            other => Err(format!("unknown backtest mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub mode: BacktestMode,
    /// Pipeline runs allowed per backtest. Later steps HOLD without calling out.
    pub max_advisory_calls: usize,
    /// Leading in-range steps that are marked but not evaluated.
    pub warmup_candles: usize,
    pub risk_free_rate: f64,
    pub portfolio: PortfolioConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub run_id: String,
    pub symbol: String,
    pub mode: BacktestMode,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    /// Every decision taken after warmup, in step order.
    pub decisions: Vec<Decision>,
    pub final_snapshot: PortfolioSnapshot,
    pub metrics: Metrics,
    pub advisory_invocations: usize,
    pub advisory_cost: f64,
}

pub struct BacktestEngine<'a> {
    config: &'a BacktestConfig,
    signal_engine: &'a SignalEngine,
    indicators: &'a dyn IndicatorPort,
    orchestrator: Option<&'a Orchestrator>,
}

impl<'a> BacktestEngine<'a> {
    pub fn new(
        config: &'a BacktestConfig,
        signal_engine: &'a SignalEngine,
        indicators: &'a dyn IndicatorPort,
    ) -> Self {
        BacktestEngine {
            config,
            signal_engine,
            indicators,
            orchestrator: None,
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: &'a Orchestrator) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Replay `series` over `[start, end]`.
    ///
    /// Candles before `start` are history for indicators only. The run gets
    /// its own `bt-<uuid>` id and portfolio.
    pub async fn run(
        &self,
        series: &CandleSeries,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BacktestResult, TradeloomError> {
        let orchestrator = match (self.config.mode, self.orchestrator) {
            (BacktestMode::Advisory, None) => {
                return Err(TradeloomError::ConfigInvalid {
                    section: "backtest".into(),
                    key: "mode".into(),
                    reason: "advisory mode needs a completion service".into(),
                });
            }
            (_, orchestrator) => orchestrator,
        };

        check_ordered(series)?;
        let candles = series.candles();
        let in_range: Vec<usize> = candles
            .iter()
            .enumerate()
            .filter(|(_, c)| c.timestamp >= start && c.timestamp <= end)
            .map(|(i, _)| i)
            .collect();
        let (Some(&first), Some(&last)) = (in_range.first(), in_range.last()) else {
            return Err(TradeloomError::NoData {
                symbol: series.symbol().to_string(),
                timeframe: series.timeframe().to_string(),
            });
        };
        if candles[first].timestamp > start {
            warn!(
                symbol = series.symbol(),
                requested = %start,
                first = %candles[first].timestamp,
                "coverage gap: data starts after the requested start"
            );
        }
        if candles[last].timestamp < end {
            warn!(
                symbol = series.symbol(),
                requested = %end,
                last = %candles[last].timestamp,
                "coverage gap: data ends before the requested end"
            );
        }

        let run_id = format!("bt-{}", Uuid::new_v4());
        let symbol = series.symbol().to_string();
        let mut portfolio = Portfolio::new(run_id.clone(), self.config.portfolio.clone());
        let mut equity_curve = Vec::with_capacity(in_range.len());
        let mut decisions = Vec::new();
        let mut advisory_invocations = 0usize;
        let mut advisory_cost = 0.0;
        let mut refused = 0usize;

        info!(
            run_id = %run_id,
            symbol = %symbol,
            mode = %self.config.mode,
            steps = in_range.len(),
            "backtest started"
        );

        for (step, &t) in in_range.iter().enumerate() {
            let candle = &candles[t];
            portfolio.mark(&symbol, candle.close);

            if step < self.config.warmup_candles {
                equity_curve.push(portfolio.equity_point(candle.timestamp));
                continue;
            }

            let window = self.signal_engine.config().window(candles, t);
            let snapshot = self.indicators.compute(window);
            let ctx = DecisionContext {
                run_id: run_id.clone(),
                sequence: decisions.len() as u64 + 1,
                symbol: symbol.clone(),
                timestamp: candle.timestamp,
                price: candle.close,
            };
            let position = portfolio.position(&symbol).cloned();

            let decision = match orchestrator.filter(|_| self.config.mode == BacktestMode::Advisory) {
                None => self.signal_engine.evaluate(&snapshot, position.as_ref(), &ctx),
                Some(_) if advisory_invocations >= self.config.max_advisory_calls => ctx.hold(
                    DecisionSource::Advisory,
                    format!(
                        "advisory call cap of {} reached",
                        self.config.max_advisory_calls
                    ),
                ),
                Some(orchestrator) => {
                    let signals = self.signal_engine.signals(&snapshot);
                    let outcome = orchestrator
                        .run(&ctx, &snapshot, &signals, position.as_ref())
                        .await;
                    advisory_invocations += 1;
                    advisory_cost += outcome.total_cost();
                    outcome.decision
                }
            };

            let transition = portfolio.apply(&decision, candle.close);
            if let TransitionOutcome::Refused(err) = &transition.outcome {
                refused += 1;
                debug!(run_id = %run_id, step, error = %err, "decision refused by portfolio");
            }
            equity_curve.push(portfolio.equity_point(candle.timestamp));
            decisions.push(decision);
        }

        portfolio.reconcile()?;
        let final_snapshot = portfolio.snapshot(candles[last].timestamp);
        let trades = portfolio.trades().to_vec();
        let metrics = Metrics::compute(
            &equity_curve,
            &trades,
            portfolio.initial_capital(),
            self.config.risk_free_rate,
        );

        info!(
            run_id = %run_id,
            trades = trades.len(),
            refused,
            advisory_invocations,
            final_equity = final_snapshot.total_equity,
            total_return = metrics.total_return,
            "backtest finished"
        );

        Ok(BacktestResult {
            run_id,
            symbol,
            mode: self.config.mode,
            equity_curve,
            trades,
            decisions,
            final_snapshot,
            metrics,
            advisory_invocations,
            advisory_cost,
        })
    }
}

fn check_ordered(series: &CandleSeries) -> Result<(), SeriesError> {
    for pair in series.candles().windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(SeriesError::OutOfOrder {
                last: pair[0].timestamp,
                got: pair[1].timestamp,
            });
        }
    }
    Ok(())
}
