//! Report generation port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::TradeloomError;

/// Port for writing backtest artefacts.
pub trait ReportPort {
    fn write(&self, result: &BacktestResult, output_path: &str) -> Result<(), TradeloomError>;
}
