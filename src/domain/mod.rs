//! Core domain types and logic.

pub mod advisory;
pub mod backtest;
pub mod budget;
pub mod config_validation;
pub mod decision;
pub mod error;
pub mod execution;
pub mod governor;
pub mod indicator;
pub mod metrics;
pub mod ohlcv;
pub mod orchestrator;
pub mod portfolio;
pub mod position;
pub mod prompts;
pub mod retry;
pub mod signal;
pub mod signal_engine;
pub mod snapshot;
