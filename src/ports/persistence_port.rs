//! Durable storage for run state, keyed by `run_id`.

use chrono::{DateTime, Utc};

use crate::domain::budget::CostLogEntry;
use crate::domain::decision::Decision;
use crate::domain::error::TradeloomError;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::position::{Position, Trade};

pub trait PersistencePort {
    fn save_decision(&self, decision: &Decision) -> Result<(), TradeloomError>;

    /// Decisions stored for `run_id`; the next decision's sequence follows it.
    fn decision_count(&self, run_id: &str) -> Result<u64, TradeloomError>;

    fn append_trade(&self, trade: &Trade) -> Result<(), TradeloomError>;

    /// Replace the stored positions of `run_id` with `positions`.
    fn save_positions(&self, run_id: &str, positions: &[Position]) -> Result<(), TradeloomError>;

    fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), TradeloomError>;

    fn append_cost_log(&self, entries: &[CostLogEntry]) -> Result<(), TradeloomError>;

    /// Tokens and cost logged at or after `since`, across every run.
    fn cost_since(&self, since: DateTime<Utc>) -> Result<(u64, f64), TradeloomError>;

    fn load_trades(&self, run_id: &str) -> Result<Vec<Trade>, TradeloomError>;

    fn load_positions(&self, run_id: &str) -> Result<Vec<Position>, TradeloomError>;

    fn latest_snapshot(&self, run_id: &str) -> Result<Option<PortfolioSnapshot>, TradeloomError>;
}
