//! tradeloom: candle-to-decision trading core with a backtest replay engine.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], and the operations callers drive
//! in [`service`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
pub mod service;
