#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use tradeloom::domain::budget::{BudgetLedger, BudgetLimits, CostLogEntry, CostTier};
use tradeloom::domain::decision::Decision;
use tradeloom::domain::error::{CompletionError, TradeloomError};
use tradeloom::domain::governor::{Governor, GovernorConfig};
pub use tradeloom::domain::ohlcv::{Candle, CandleSeries};
use tradeloom::domain::orchestrator::{Orchestrator, PipelineConfig};
use tradeloom::domain::portfolio::PortfolioSnapshot;
use tradeloom::domain::position::{Position, Trade};
use tradeloom::domain::retry::{RetryPolicy, Sleeper};
use tradeloom::domain::signal_engine::{SignalConfig, SignalStrategy};
use tradeloom::ports::completion_port::{CompletionPort, CompletionRequest, CompletionResponse};
use tradeloom::ports::data_port::MarketDataPort;
use tradeloom::ports::persistence_port::PersistencePort;

pub const SYMBOL: &str = "BTCUSDT";

/// Closes that give one EMA(2)/EMA(4) golden cross above EMA(3) at index 7
/// and one death cross below it at index 13 when replayed from index 0.
pub const CROSS_CLOSES: [f64; 16] = [
    10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 6.0, 8.0, 10.0, 12.0, 14.0, 13.0, 11.0, 9.0, 7.0, 5.0,
];

pub fn ts(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hour)
}

pub fn make_candle(symbol: &str, hour: i64, close: f64) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timestamp: ts(hour),
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1000.0,
    }
}

pub fn hourly_candles(symbol: &str, closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| make_candle(symbol, i as i64, close))
        .collect()
}

/// Small periods so a handful of candles warms every indicator up.
pub fn fast_signal_config(strategy: SignalStrategy) -> SignalConfig {
    SignalConfig {
        strategy,
        macd_fast: 2,
        macd_slow: 4,
        macd_signal: 2,
        rsi_period: 3,
        ema_fast: 2,
        ema_slow: 4,
        ema_trend: 3,
        bollinger_period: 3,
        volume_period: 3,
        ..SignalConfig::default()
    }
}

#[derive(Default)]
pub struct MockDataPort {
    pub data: HashMap<String, Vec<Candle>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candles(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.data.insert(symbol.to_string(), candles);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    fn select<F>(&self, symbol: &str, timeframe: &str, keep: F) -> Result<Vec<Candle>, TradeloomError>
    where
        F: Fn(&Candle) -> bool,
    {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(TradeloomError::Database {
                reason: reason.clone(),
            });
        }
        let _ = timeframe;
        Ok(self
            .data
            .get(symbol)
            .map(|candles| candles.iter().filter(|c| keep(c)).cloned().collect())
            .unwrap_or_default())
    }
}

impl MarketDataPort for MockDataPort {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CandleSeries, TradeloomError> {
        let candles = self.select(symbol, timeframe, |c| c.timestamp >= start && c.timestamp <= end)?;
        Ok(CandleSeries::from_candles(symbol, timeframe, candles)?)
    }

    fn fetch_latest(
        &self,
        symbol: &str,
        timeframe: &str,
        end: DateTime<Utc>,
        count: usize,
    ) -> Result<CandleSeries, TradeloomError> {
        let mut candles = self.select(symbol, timeframe, |c| c.timestamp <= end)?;
        let skip = candles.len().saturating_sub(count);
        candles.drain(..skip);
        Ok(CandleSeries::from_candles(symbol, timeframe, candles)?)
    }
}

#[derive(Default)]
struct StoreState {
    decisions: Vec<Decision>,
    trades: Vec<Trade>,
    positions: HashMap<String, Vec<Position>>,
    snapshots: Vec<PortfolioSnapshot>,
    cost_log: Vec<CostLogEntry>,
}

/// In-memory persistence. Clones share state, so a test can keep a handle
/// while a service owns another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self, run_id: &str) -> Vec<Decision> {
        let state = self.state.lock().unwrap();
        state
            .decisions
            .iter()
            .filter(|d| d.run_id() == run_id)
            .cloned()
            .collect()
    }

    pub fn trades(&self, run_id: &str) -> Vec<Trade> {
        self.load_trades(run_id).unwrap()
    }

    pub fn cost_log(&self) -> Vec<CostLogEntry> {
        self.state.lock().unwrap().cost_log.clone()
    }
}

impl PersistencePort for MemoryStore {
    fn save_decision(&self, decision: &Decision) -> Result<(), TradeloomError> {
        self.state.lock().unwrap().decisions.push(decision.clone());
        Ok(())
    }

    fn decision_count(&self, run_id: &str) -> Result<u64, TradeloomError> {
        Ok(self.decisions(run_id).len() as u64)
    }

    fn append_trade(&self, trade: &Trade) -> Result<(), TradeloomError> {
        self.state.lock().unwrap().trades.push(trade.clone());
        Ok(())
    }

    fn save_positions(&self, run_id: &str, positions: &[Position]) -> Result<(), TradeloomError> {
        self.state
            .lock()
            .unwrap()
            .positions
            .insert(run_id.to_string(), positions.to_vec());
        Ok(())
    }

    fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), TradeloomError> {
        self.state.lock().unwrap().snapshots.push(snapshot.clone());
        Ok(())
    }

    fn append_cost_log(&self, entries: &[CostLogEntry]) -> Result<(), TradeloomError> {
        self.state.lock().unwrap().cost_log.extend_from_slice(entries);
        Ok(())
    }

    fn cost_since(&self, since: DateTime<Utc>) -> Result<(u64, f64), TradeloomError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cost_log
            .iter()
            .filter(|e| e.timestamp >= since)
            .fold((0, 0.0), |(tokens, cost), e| {
                (tokens + e.tokens_in + e.tokens_out, cost + e.cost)
            }))
    }

    fn load_trades(&self, run_id: &str) -> Result<Vec<Trade>, TradeloomError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .trades
            .iter()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect())
    }

    fn load_positions(&self, run_id: &str) -> Result<Vec<Position>, TradeloomError> {
        let state = self.state.lock().unwrap();
        Ok(state.positions.get(run_id).cloned().unwrap_or_default())
    }

    fn latest_snapshot(&self, run_id: &str) -> Result<Option<PortfolioSnapshot>, TradeloomError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .iter()
            .rev()
            .find(|s| s.run_id == run_id)
            .cloned())
    }
}

pub type Reply = Result<CompletionResponse, CompletionError>;

pub fn reply(content: &str) -> Reply {
    Ok(CompletionResponse {
        content: content.to_string(),
        tokens_in: 100,
        tokens_out: 50,
    })
}

pub fn analyst(signal: &str, confidence: f64) -> Reply {
    reply(&format!(
        r#"{{"signal": "{signal}", "confidence": {confidence}, "reasoning": "scripted"}}"#
    ))
}

/// Completion service answering from per-stage queues; unscripted stages
/// fail fatally.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, CostTier)>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, stage: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(stage.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, CostTier)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, stage: &str) -> usize {
        self.calls().iter().filter(|(s, _)| s == stage).count()
    }
}

#[async_trait]
impl CompletionPort for ScriptedCompletion {
    async fn complete(
        &self,
        request: &CompletionRequest,
        tier: CostTier,
    ) -> Result<CompletionResponse, CompletionError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.stage.clone(), tier));
        self.replies
            .lock()
            .unwrap()
            .get_mut(&request.stage)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(CompletionError::Fatal {
                    reason: format!("no scripted reply for {}", request.stage),
                })
            })
    }
}

/// Retries without waiting.
pub struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

pub fn governor_config() -> GovernorConfig {
    GovernorConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            rate_limit_base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        },
        ..GovernorConfig::default()
    }
}

pub fn orchestrator(
    completion: Arc<ScriptedCompletion>,
    limits: BudgetLimits,
    pipeline: PipelineConfig,
) -> Orchestrator {
    orchestrator_with_ledger(completion, Arc::new(BudgetLedger::new(limits, Utc::now())), pipeline)
}

pub fn orchestrator_with_ledger(
    completion: Arc<ScriptedCompletion>,
    ledger: Arc<BudgetLedger>,
    pipeline: PipelineConfig,
) -> Orchestrator {
    let governor = Governor::new(completion, ledger, governor_config()).with_sleeper(Arc::new(NoSleep));
    Orchestrator::new(Arc::new(governor), pipeline)
}
