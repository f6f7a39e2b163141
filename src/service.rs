//! Application service: the three operations callers drive the core through.
//!
//! `TradingService` wires the ports to the domain. Live evaluation keeps one
//! portfolio for the configured live run, rebuilt from the persisted trade
//! ledger on first use. Backtests get their own run id and portfolio and are
//! persisted under that id when they finish.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::backtest::{BacktestConfig, BacktestEngine, BacktestMode, BacktestResult};
use crate::domain::budget::{BudgetLedger, BudgetLimits};
use crate::domain::decision::{Decision, DecisionContext};
use crate::domain::error::{PortfolioError, TradeloomError};
use crate::domain::execution::PortfolioConfig;
use crate::domain::ohlcv::{Candle, CandleSeries};
use crate::domain::orchestrator::Orchestrator;
use crate::domain::portfolio::{Portfolio, PortfolioSnapshot, TransitionOutcome};
use crate::domain::position::{Position, Trade};
use crate::domain::signal_engine::SignalEngine;
use crate::ports::data_port::MarketDataPort;
use crate::ports::indicator_port::IndicatorPort;
use crate::ports::persistence_port::PersistencePort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Apply to the live run portfolio and persist.
    Live,
    /// Decide only. Nothing is applied or stored.
    BacktestStep,
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationMode::Live => write!(f, "live"),
            EvaluationMode::BacktestStep => write!(f, "backtest_step"),
        }
    }
}

impl FromStr for EvaluationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(EvaluationMode::Live),
            "backtest_step" | "backtest-step" | "step" => Ok(EvaluationMode::BacktestStep),
            other => Err(format!("unknown evaluation mode '{}'", other)),
        }
    }
}

/// Settings shared by every operation of one service instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub timeframe: String,
    pub live_run_id: String,
    pub portfolio: PortfolioConfig,
    pub max_advisory_calls: usize,
    pub warmup_candles: usize,
    pub risk_free_rate: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            timeframe: "1h".into(),
            live_run_id: "live".into(),
            portfolio: PortfolioConfig::default(),
            max_advisory_calls: 100,
            warmup_candles: 0,
            risk_free_rate: 0.0,
        }
    }
}

impl ServiceConfig {
    pub fn backtest(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mode: BacktestMode,
    ) -> BacktestConfig {
        BacktestConfig {
            symbol: symbol.to_string(),
            timeframe: self.timeframe.clone(),
            start,
            end,
            mode,
            max_advisory_calls: self.max_advisory_calls,
            warmup_candles: self.warmup_candles,
            risk_free_rate: self.risk_free_rate,
            portfolio: self.portfolio.clone(),
        }
    }
}

struct LiveRun {
    portfolio: Portfolio,
    last_seen: DateTime<Utc>,
}

pub struct TradingService {
    data: Box<dyn MarketDataPort>,
    indicators: Box<dyn IndicatorPort>,
    persistence: Box<dyn PersistencePort>,
    signal_engine: SignalEngine,
    orchestrator: Option<Orchestrator>,
    config: ServiceConfig,
    live: tokio::sync::Mutex<Option<LiveRun>>,
    backtests: Mutex<HashMap<String, PortfolioSnapshot>>,
}

impl TradingService {
    pub fn new(
        data: Box<dyn MarketDataPort>,
        indicators: Box<dyn IndicatorPort>,
        persistence: Box<dyn PersistencePort>,
        signal_engine: SignalEngine,
        config: ServiceConfig,
    ) -> Self {
        TradingService {
            data,
            indicators,
            persistence,
            signal_engine,
            orchestrator: None,
            config,
            live: tokio::sync::Mutex::new(None),
            backtests: Mutex::new(HashMap::new()),
        }
    }

    /// Route decisions through the advisory pipeline instead of the rules.
    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn evaluate(
        &self,
        symbol: &str,
        mode: EvaluationMode,
    ) -> Result<Decision, TradeloomError> {
        self.evaluate_at(symbol, mode, Utc::now()).await
    }

    /// Single-shot decision on the latest candle at or before `at`.
    pub async fn evaluate_at(
        &self,
        symbol: &str,
        mode: EvaluationMode,
        at: DateTime<Utc>,
    ) -> Result<Decision, TradeloomError> {
        match mode {
            EvaluationMode::BacktestStep => self.evaluate_step(symbol, at, None).await,
            EvaluationMode::Live => {
                let (candle, series) = self.latest_window(symbol, at)?;
                self.evaluate_live(symbol, &candle, &series).await
            }
        }
    }

    /// Decide on the candle at or before `at` without applying or storing
    /// anything. With `run_id`, the position that run currently holds in
    /// `symbol` is read so exits can fire; otherwise the step is flat.
    pub async fn evaluate_step(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
        run_id: Option<&str>,
    ) -> Result<Decision, TradeloomError> {
        let (candle, series) = self.latest_window(symbol, at)?;
        let position = match run_id {
            Some(run_id) => self.run_position(run_id, symbol).await?,
            None => None,
        };
        let ctx = DecisionContext {
            run_id: format!("bt-step-{}", Uuid::new_v4()),
            sequence: 1,
            symbol: symbol.to_string(),
            timestamp: candle.timestamp,
            price: candle.close,
        };
        let decision = self.decide(&ctx, &series, position.as_ref()).await;
        self.persist_costs()?;
        Ok(decision)
    }

    /// The lookback window ending at the latest candle at or before `at`.
    fn latest_window(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
    ) -> Result<(Candle, CandleSeries), TradeloomError> {
        let config = self.signal_engine.config();
        let series = self
            .data
            .fetch_latest(symbol, &self.config.timeframe, at, config.lookback())?;
        let Some(candle) = series.last().cloned() else {
            return Err(TradeloomError::NoData {
                symbol: symbol.to_string(),
                timeframe: self.config.timeframe.clone(),
            });
        };
        if series.len() < config.min_history() {
            warn!(
                symbol,
                candles = series.len(),
                needed = config.min_history(),
                "short history, indicators may be missing"
            );
        }
        Ok((candle, series))
    }

    /// Open position of `run_id` in `symbol`, read-only.
    async fn run_position(
        &self,
        run_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, TradeloomError> {
        if run_id == self.config.live_run_id {
            if let Some(live) = self.live.lock().await.as_ref() {
                return Ok(live.portfolio.position(symbol).cloned());
            }
        }
        let positions = self.persistence.load_positions(run_id)?;
        if positions.is_empty() {
            // Flat runs still have to exist.
            self.get_portfolio_snapshot(run_id).await?;
        }
        Ok(positions.into_iter().find(|p| p.symbol == symbol && p.is_open()))
    }

    async fn evaluate_live(
        &self,
        symbol: &str,
        candle: &Candle,
        series: &CandleSeries,
    ) -> Result<Decision, TradeloomError> {
        let run_id = self.config.live_run_id.clone();
        let mut guard = self.live.lock().await;
        let mut live = match guard.take() {
            Some(live) => live,
            None => self.restore_live(&run_id)?,
        };
        live.portfolio.mark(symbol, candle.close);
        live.last_seen = live.last_seen.max(candle.timestamp);

        let ctx = DecisionContext {
            run_id: run_id.clone(),
            sequence: self.persistence.decision_count(&run_id)? + 1,
            symbol: symbol.to_string(),
            timestamp: candle.timestamp,
            price: candle.close,
        };
        let position = live.portfolio.position(symbol).cloned();
        let decision = self.decide(&ctx, series, position.as_ref()).await;

        let transition = live.portfolio.apply(&decision, candle.close);
        if let TransitionOutcome::Refused(err) = &transition.outcome {
            warn!(run_id = %run_id, decision_id = decision.id(), error = %err, "live decision refused");
        }

        let positions: Vec<Position> = live.portfolio.positions().cloned().collect();
        let stored = self
            .persistence
            .save_decision(&decision)
            .and_then(|_| match &transition.trade {
                Some(trade) => self.persistence.append_trade(trade),
                None => Ok(()),
            })
            .and_then(|_| self.persistence.save_positions(&run_id, &positions))
            .and_then(|_| self.persistence.save_snapshot(&transition.snapshot))
            .and_then(|_| self.persist_costs());

        match stored {
            Ok(()) => {
                info!(
                    run_id = %run_id,
                    decision_id = decision.id(),
                    action = %decision.action(),
                    equity = transition.snapshot.total_equity,
                    "live decision stored"
                );
                *guard = Some(live);
                Ok(decision)
            }
            Err(err) => {
                // The next call rebuilds from whatever reached the ledger.
                warn!(run_id = %run_id, error = %err, "failed to persist live decision");
                Err(err)
            }
        }
    }

    fn restore_live(&self, run_id: &str) -> Result<LiveRun, TradeloomError> {
        let trades = self.persistence.load_trades(run_id)?;
        let last_seen = trades
            .last()
            .map(|t| t.timestamp)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let portfolio = Portfolio::from_ledger(run_id, self.config.portfolio.clone(), trades);
        portfolio.reconcile()?;
        check_positions(run_id, &portfolio, &self.persistence.load_positions(run_id)?)?;
        info!(
            run_id,
            trades = portfolio.trades().len(),
            cash = portfolio.cash(),
            "live run restored from ledger"
        );
        Ok(LiveRun {
            portfolio,
            last_seen,
        })
    }

    async fn decide(
        &self,
        ctx: &DecisionContext,
        series: &CandleSeries,
        position: Option<&Position>,
    ) -> Decision {
        let snapshot = self.indicators.compute(series.candles());
        match &self.orchestrator {
            None => self.signal_engine.evaluate(&snapshot, position, ctx),
            Some(orchestrator) => {
                let signals = self.signal_engine.signals(&snapshot);
                orchestrator
                    .run(ctx, &snapshot, &signals, position)
                    .await
                    .decision
            }
        }
    }

    fn persist_costs(&self) -> Result<(), TradeloomError> {
        let Some(orchestrator) = &self.orchestrator else {
            return Ok(());
        };
        let entries = orchestrator.governor().ledger().drain_unpersisted();
        if entries.is_empty() {
            return Ok(());
        }
        self.persistence.append_cost_log(&entries)
    }

    /// Replay `[start, end]` and persist the run under its `bt-` id.
    ///
    /// Candles just before `start` are fetched as indicator history so the
    /// first in-range step sees a full lookback window.
    pub async fn run_backtest(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mode: BacktestMode,
    ) -> Result<BacktestResult, TradeloomError> {
        let config = self.config.backtest(symbol, start, end, mode);
        let timeframe = &self.config.timeframe;

        let range = self.data.fetch_candles(symbol, timeframe, start, end)?;
        if range.is_empty() {
            return Err(TradeloomError::NoData {
                symbol: symbol.to_string(),
                timeframe: timeframe.clone(),
            });
        }
        let lookback = self.signal_engine.config().lookback().saturating_sub(1);
        let history =
            self.data
                .fetch_latest(symbol, timeframe, start - Duration::seconds(1), lookback)?;
        let candles: Vec<Candle> = history
            .candles()
            .iter()
            .chain(range.candles())
            .cloned()
            .collect();
        let series = CandleSeries::from_candles(symbol, timeframe.as_str(), candles)?;

        let mut engine = BacktestEngine::new(&config, &self.signal_engine, self.indicators.as_ref());
        if let Some(orchestrator) = &self.orchestrator {
            engine = engine.with_orchestrator(orchestrator);
        }
        let result = engine.run(&series, start, end).await?;

        self.persist_backtest(&result)?;
        self.backtests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(result.run_id.clone(), result.final_snapshot.clone());
        Ok(result)
    }

    fn persist_backtest(&self, result: &BacktestResult) -> Result<(), TradeloomError> {
        for decision in &result.decisions {
            self.persistence.save_decision(decision)?;
        }
        for trade in &result.trades {
            self.persistence.append_trade(trade)?;
        }
        let positions = open_positions(&result.run_id, &self.config.portfolio, &result.trades);
        self.persistence.save_positions(&result.run_id, &positions)?;
        self.persistence.save_snapshot(&result.final_snapshot)?;
        self.persist_costs()?;
        info!(
            run_id = %result.run_id,
            decisions = result.decisions.len(),
            trades = result.trades.len(),
            "backtest persisted"
        );
        Ok(())
    }

    /// Current snapshot of a run: live state or a backtest finished by this
    /// service first, then the latest persisted snapshot.
    pub async fn get_portfolio_snapshot(
        &self,
        run_id: &str,
    ) -> Result<PortfolioSnapshot, TradeloomError> {
        if run_id == self.config.live_run_id {
            if let Some(live) = self.live.lock().await.as_ref() {
                return Ok(live.portfolio.snapshot(live.last_seen));
            }
        }
        let cached = self
            .backtests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(run_id)
            .cloned();
        if let Some(snapshot) = cached {
            return Ok(snapshot);
        }
        self.persistence
            .latest_snapshot(run_id)?
            .ok_or_else(|| TradeloomError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }
}

/// Budget ledger for today, seeded with what the persisted cost log already
/// charged against it.
pub fn restore_budget(
    persistence: &dyn PersistencePort,
    limits: BudgetLimits,
    now: DateTime<Utc>,
) -> Result<Arc<BudgetLedger>, TradeloomError> {
    let (tokens, cost) = persistence.cost_since(BudgetLedger::period_start(now))?;
    if tokens > 0 || cost > 0.0 {
        info!(tokens, cost, "daily budget usage restored from cost log");
    }
    Ok(Arc::new(BudgetLedger::with_usage(limits, now, tokens, cost)))
}

fn open_positions(run_id: &str, config: &PortfolioConfig, trades: &[Trade]) -> Vec<Position> {
    Portfolio::from_ledger(run_id, config.clone(), trades.to_vec())
        .positions()
        .cloned()
        .collect()
}

/// Stored positions must agree with the ledger replay.
fn check_positions(
    run_id: &str,
    portfolio: &Portfolio,
    stored: &[Position],
) -> Result<(), TradeloomError> {
    let replayed = portfolio.positions().count();
    let mismatch = stored.len() != replayed
        || stored.iter().any(|s| match portfolio.position(&s.symbol) {
            Some(p) => (p.quantity - s.quantity).abs() > 1e-6,
            None => true,
        });
    if mismatch {
        return Err(PortfolioError::LedgerMismatch {
            reason: format!("stored positions for {} disagree with its trades", run_id),
        }
        .into());
    }
    Ok(())
}
