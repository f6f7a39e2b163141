//! Domain error types.
//!
//! Business outcomes that the pipeline absorbs (a rejected validation, an
//! unavailable advisor) never propagate. They are recorded as a
//! [`PipelineIssue`] on the outcome and end in a HOLD decision.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::decision::Action;

/// Rejected append to a [`CandleSeries`](crate::domain::ohlcv::CandleSeries).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    #[error("candle at {got} is not after the last candle at {last}")]
    OutOfOrder {
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    #[error("candle for {got} does not belong to series {expected}")]
    SymbolMismatch { expected: String, got: String },
}

/// Refused portfolio transition. State is left unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortfolioError {
    #[error("insufficient funds for {symbol}: need {required:.2}, have {available:.2}")]
    InsufficientFunds {
        symbol: String,
        required: f64,
        available: f64,
    },

    #[error("no position held in {symbol}")]
    InsufficientPosition { symbol: String },

    #[error("position already open in {symbol}")]
    PositionExists { symbol: String },

    #[error("invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: f64 },

    #[error("trade ledger does not reconcile: {reason}")]
    LedgerMismatch { reason: String },
}

/// Failure reported by a completion service adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    #[error("rate limited: {reason}")]
    RateLimited { reason: String },

    #[error("transient failure: {reason}")]
    Transient { reason: String },

    #[error("fatal failure: {reason}")]
    Fatal { reason: String },
}

/// Malformed advisory payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdvisoryParseError {
    #[error("{stage} returned invalid JSON: {reason}")]
    InvalidJson { stage: String, reason: String },

    #[error("{stage} returned invalid {field}: {reason}")]
    InvalidField {
        stage: String,
        field: String,
        reason: String,
    },
}

/// Failure surfaced by the governor after budget checks and retries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GovernorError {
    #[error("daily {dimension} budget exceeded: spent {spent:.4} + estimate {estimate:.4} > limit {limit:.4}")]
    BudgetExceeded {
        dimension: &'static str,
        spent: f64,
        estimate: f64,
        limit: f64,
    },

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("transient failures after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error("fatal completion error: {reason}")]
    Fatal { reason: String },

    #[error(transparent)]
    Parse(#[from] AdvisoryParseError),
}

impl GovernorError {
    /// Short machine-friendly label used in stage reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GovernorError::BudgetExceeded { .. } => "budget_exceeded",
            GovernorError::RateLimited { .. } => "rate_limited",
            GovernorError::RetriesExhausted { .. } => "retries_exhausted",
            GovernorError::Fatal { .. } => "fatal",
            GovernorError::Parse(_) => "parse_error",
        }
    }
}

/// Problem the advisory pipeline absorbed on its way to a decision.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineIssue {
    #[error("{stage} unavailable: {reason}")]
    AdvisorUnavailable { stage: String, reason: String },

    #[error("{stage} failed: {reason}")]
    StageFailed {
        stage: String,
        cause: &'static str,
        reason: String,
    },

    #[error("{stage} rejected {action}: {reason}")]
    ValidationRejected {
        stage: String,
        action: Action,
        reason: String,
    },
}

/// Top-level error type for tradeloom.
#[derive(Debug, thiserror::Error)]
pub enum TradeloomError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no data for {symbol} ({timeframe})")]
    NoData { symbol: String, timeframe: String },

    #[error("insufficient data for {symbol}: have {candles} candles, need {minimum}")]
    InsufficientData {
        symbol: String,
        candles: usize,
        minimum: usize,
    },

    #[error("unknown run {run_id}")]
    RunNotFound { run_id: String },

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error(transparent)]
    Governor(#[from] GovernorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&TradeloomError> for std::process::ExitCode {
    fn from(err: &TradeloomError) -> Self {
        let code: u8 = match err {
            TradeloomError::Io(_) => 1,
            TradeloomError::ConfigParse { .. }
            | TradeloomError::ConfigMissing { .. }
            | TradeloomError::ConfigInvalid { .. } => 2,
            TradeloomError::Database { .. } | TradeloomError::DatabaseQuery { .. } => 3,
            TradeloomError::Series(_)
            | TradeloomError::NoData { .. }
            | TradeloomError::InsufficientData { .. } => 5,
            TradeloomError::RunNotFound { .. } => 6,
            TradeloomError::Portfolio(_) | TradeloomError::Governor(_) => 7,
        };
        std::process::ExitCode::from(code)
    }
}
