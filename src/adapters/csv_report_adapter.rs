//! CSV/JSON report adapter implementing ReportPort.
//!
//! `output_path` is a directory. It receives `equity.csv`, `trades.csv`,
//! `decisions.csv` and a `summary.json` with the metrics, the final snapshot
//! and compounded monthly returns.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::Datelike;
use serde::Serialize;

use crate::domain::backtest::{BacktestMode, BacktestResult};
use crate::domain::error::TradeloomError;
use crate::domain::metrics::Metrics;
use crate::domain::portfolio::{EquityPoint, PortfolioSnapshot};
use crate::ports::report_port::ReportPort;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct MonthlyReturn {
    year: i32,
    month: u32,
    /// Percent.
    return_pct: f64,
}

#[derive(Serialize)]
struct Summary<'a> {
    run_id: &'a str,
    symbol: &'a str,
    mode: BacktestMode,
    candles: usize,
    total_trades: usize,
    advisory_invocations: usize,
    advisory_cost: f64,
    final_snapshot: &'a PortfolioSnapshot,
    metrics: &'a Metrics,
    monthly_returns: Vec<MonthlyReturn>,
}

fn compute_monthly_returns(equity_curve: &[EquityPoint]) -> Vec<MonthlyReturn> {
    let mut monthly: BTreeMap<(i32, u32), f64> = BTreeMap::new();

    for window in equity_curve.windows(2) {
        let (prev, curr) = (&window[0], &window[1]);
        let r = if prev.equity > 0.0 {
            (curr.equity - prev.equity) / prev.equity
        } else {
            0.0
        };
        let key = (curr.timestamp.year(), curr.timestamp.month());
        *monthly.entry(key).or_insert(0.0) += (1.0 + r).ln();
    }

    monthly
        .into_iter()
        .map(|((year, month), log_sum)| MonthlyReturn {
            year,
            month,
            return_pct: (log_sum.exp() - 1.0) * 100.0,
        })
        .collect()
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), TradeloomError> {
    let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
    for row in rows {
        wtr.serialize(row).map_err(csv_err)?;
    }
    wtr.flush()?;
    Ok(())
}

fn csv_err(e: csv::Error) -> TradeloomError {
    TradeloomError::Io(std::io::Error::other(e.to_string()))
}

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &str) -> Result<(), TradeloomError> {
        let dir = Path::new(output_path);
        fs::create_dir_all(dir)?;

        write_rows(&dir.join("equity.csv"), &result.equity_curve)?;
        write_rows(&dir.join("trades.csv"), &result.trades)?;
        write_rows(&dir.join("decisions.csv"), &result.decisions)?;

        let summary = Summary {
            run_id: &result.run_id,
            symbol: &result.symbol,
            mode: result.mode,
            candles: result.equity_curve.len(),
            total_trades: result.trades.len(),
            advisory_invocations: result.advisory_invocations,
            advisory_cost: result.advisory_cost,
            final_snapshot: &result.final_snapshot,
            metrics: &result.metrics,
            monthly_returns: compute_monthly_returns(&result.equity_curve),
        };
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| TradeloomError::Io(std::io::Error::other(e.to_string())))?;
        fs::write(dir.join("summary.json"), json)?;

        Ok(())
    }
}
