//! Performance metrics over an equity curve and its closed trades.
//!
//! Candles can be any timeframe, so annualization is derived from the
//! timestamps on the curve instead of a fixed trading-day count.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::portfolio::EquityPoint;
use super::position::{Side, Trade};

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// In equity-curve points.
    pub max_drawdown_duration: i64,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// In hours.
    pub avg_trade_duration: f64,
}

/// One exit, paired with the time its position was opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTrip {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
}

/// Pair every sell with the opening buy of its position.
pub fn round_trips(trades: &[Trade]) -> Vec<RoundTrip> {
    let mut open: HashMap<&str, (DateTime<Utc>, f64)> = HashMap::new();
    let mut trips = Vec::new();
    for trade in trades {
        match trade.side {
            Side::Buy => {
                let entry = open
                    .entry(trade.symbol.as_str())
                    .or_insert((trade.timestamp, 0.0));
                entry.1 += trade.quantity;
            }
            Side::Sell => {
                let Some(entry) = open.get_mut(trade.symbol.as_str()) else {
                    continue;
                };
                trips.push(RoundTrip {
                    symbol: trade.symbol.clone(),
                    entry_time: entry.0,
                    exit_time: trade.timestamp,
                    pnl: trade.realized_pnl.unwrap_or(0.0),
                });
                entry.1 -= trade.quantity;
                if entry.1 <= 1e-12 {
                    open.remove(trade.symbol.as_str());
                }
            }
        }
    }
    trips
}

impl Metrics {
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        initial_capital: f64,
        risk_free_rate: f64,
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let (years, periods_per_year) = curve_span(equity_curve);
        let annualized_return = if years > 0.0 && total_return.is_finite() && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);

        let (sharpe_ratio, sortino_ratio) = if periods_per_year > 0.0 {
            compute_risk_adjusted(equity_curve, risk_free_rate / periods_per_year, periods_per_year)
        } else {
            (0.0, 0.0)
        };

        let trips = round_trips(trades);
        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_duration_hours = 0.0_f64;

        for trip in &trips {
            let pnl = trip.pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
            total_duration_hours += (trip.exit_time - trip.entry_time).num_seconds() as f64 / 3600.0;
        }

        let total_trades = trips.len();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };

        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };

        let avg_trade_duration = if total_trades > 0 {
            total_duration_hours / total_trades as f64
        } else {
            0.0
        };

        Metrics {
            total_return,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_trade_duration,
        }
    }

    pub fn total_trades(&self) -> usize {
        self.trades_won + self.trades_lost + self.trades_breakeven
    }
}

/// Elapsed years and sampling frequency of the curve.
fn curve_span(equity_curve: &[EquityPoint]) -> (f64, f64) {
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return (0.0, 0.0);
    };
    let seconds = (last.timestamp - first.timestamp).num_seconds() as f64;
    if seconds <= 0.0 {
        return (0.0, 0.0);
    }
    let years = seconds / SECONDS_PER_YEAR;
    let periods = (equity_curve.len() - 1) as f64;
    (years, periods / years)
}

fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, i64) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0i64;
    let mut current_dd_duration = 0i64;

    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 && point.equity < peak {
            let dd = (peak - point.equity) / peak;
            max_dd = max_dd.max(dd);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

fn compute_risk_adjusted(equity_curve: &[EquityPoint], period_rf: f64, periods_per_year: f64) -> (f64, f64) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            let curr = w[1].equity;
            if prev > 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;

    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let excess_return = mean - period_rf;
    let annualize = periods_per_year.sqrt();

    let sharpe = if stddev > 0.0 {
        (excess_return / stddev) * annualize
    } else {
        0.0
    };

    let downside: f64 = returns
        .iter()
        .filter(|&&r| r < period_rf)
        .map(|&r| (r - period_rf).powi(2))
        .sum();
    let downside_stddev = (downside / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        (excess_return / downside_stddev) * annualize
    } else {
        0.0
    };

    (sharpe, sortino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn make_equity_curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquityPoint {
                timestamp: start() + chrono::Duration::days(i as i64),
                equity: v,
                cash: v,
            })
            .collect()
    }

    fn make_trade(side: Side, hours: i64, pnl: Option<f64>) -> Trade {
        Trade {
            run_id: "bt".into(),
            decision_id: format!("bt:{}", hours),
            symbol: "BTCUSDT".into(),
            side,
            quantity: 1.0,
            price: 100.0,
            commission: 0.0,
            timestamp: start() + chrono::Duration::hours(hours),
            realized_pnl: pnl,
        }
    }

    /// Buy at `open_hour`, sell at `close_hour` for `pnl`.
    fn round_trip(open_hour: i64, close_hour: i64, pnl: f64) -> Vec<Trade> {
        vec![
            make_trade(Side::Buy, open_hour, None),
            make_trade(Side::Sell, close_hour, Some(pnl)),
        ]
    }

    fn trips(list: &[(i64, i64, f64)]) -> Vec<Trade> {
        list.iter()
            .flat_map(|&(o, c, p)| round_trip(o, c, p))
            .collect()
    }

    #[test]
    fn metrics_empty_curve() {
        let metrics = Metrics::compute(&[], &[], 100_000.0, 0.05);
        assert!((metrics.total_return - 0.0).abs() < f64::EPSILON);
        assert_eq!(metrics.total_trades(), 0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
    }

    #[test]
    fn metrics_total_return_positive() {
        let curve = make_equity_curve(&[100_000.0, 110_000.0]);
        let metrics = Metrics::compute(&curve, &[], 100_000.0, 0.05);
        assert!((metrics.total_return - 0.10).abs() < 1e-9);
    }

    #[test]
    fn metrics_total_return_negative() {
        let curve = make_equity_curve(&[100_000.0, 90_000.0]);
        let metrics = Metrics::compute(&curve, &[], 100_000.0, 0.05);
        assert!((metrics.total_return - (-0.10)).abs() < 1e-9);
    }

    #[test]
    fn metrics_flat_curve_has_zero_annualized_return() {
        let curve = make_equity_curve(&vec![100_000.0; 366]);
        let metrics = Metrics::compute(&curve, &[], 100_000.0, 0.05);
        assert!((metrics.annualized_return - 0.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_annualizes_from_timestamps() {
        let mut values = vec![100.0; 365];
        values.push(110.0);
        let curve = make_equity_curve(&values);
        let metrics = Metrics::compute(&curve, &[], 100.0, 0.0);
        // 365 days is slightly under one 365.25-day year.
        assert!(metrics.annualized_return > 0.10);
        assert!(metrics.annualized_return < 0.101);
    }

    #[test]
    fn metrics_trade_stats_wins_and_losses() {
        let trades = trips(&[(0, 5, 100.0), (6, 9, -50.0), (10, 20, 200.0), (21, 22, 0.0)]);
        let curve = make_equity_curve(&[100_000.0, 100_250.0]);
        let metrics = Metrics::compute(&curve, &trades, 100_000.0, 0.05);

        assert_eq!(metrics.trades_won, 2);
        assert_eq!(metrics.trades_lost, 1);
        assert_eq!(metrics.trades_breakeven, 1);
        assert!((metrics.win_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_profit_factor() {
        let trades = trips(&[(0, 5, 100.0), (6, 9, -50.0), (10, 20, 200.0)]);
        let metrics = Metrics::compute(&[], &trades, 100_000.0, 0.05);
        assert!((metrics.profit_factor - 6.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_avg_win_and_loss() {
        let trades = trips(&[(0, 1, 100.0), (2, 3, -60.0), (4, 5, 200.0), (6, 7, -40.0)]);
        let metrics = Metrics::compute(&[], &trades, 100_000.0, 0.05);
        assert!((metrics.avg_win - 150.0).abs() < 1e-9);
        assert!((metrics.avg_loss - 50.0).abs() < 1e-9);
        assert!((metrics.largest_win - 200.0).abs() < 1e-9);
        assert!((metrics.largest_loss - 60.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_avg_trade_duration_in_hours() {
        let trades = trips(&[(0, 5, 100.0), (10, 20, -50.0), (20, 35, 200.0)]);
        let metrics = Metrics::compute(&[], &trades, 100_000.0, 0.05);
        assert!((metrics.avg_trade_duration - 10.0).abs() < 1e-9);
    }

    #[test]
    fn partial_exits_share_the_entry_time() {
        let mut trades = vec![Trade {
            quantity: 2.0,
            ..make_trade(Side::Buy, 0, None)
        }];
        trades.push(make_trade(Side::Sell, 4, Some(10.0)));
        trades.push(make_trade(Side::Sell, 8, Some(20.0)));
        let trips = round_trips(&trades);
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[1].entry_time, start());
    }

    #[test]
    fn metrics_max_drawdown() {
        let curve = make_equity_curve(&[100.0, 110.0, 90.0, 95.0, 80.0, 100.0]);
        let (dd, _) = compute_drawdown(&curve);
        assert!((dd - (110.0 - 80.0) / 110.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_max_drawdown_duration() {
        let curve = make_equity_curve(&[100.0, 110.0, 100.0, 90.0, 85.0, 95.0]);
        let (_, duration) = compute_drawdown(&curve);
        assert_eq!(duration, 4);
    }

    #[test]
    fn metrics_sharpe_ratio_positive() {
        let values: Vec<f64> = (0..253)
            .map(|i| 100_000.0 * (1.0 + 0.001 * i as f64))
            .collect();
        let curve = make_equity_curve(&values);
        let metrics = Metrics::compute(&curve, &[], 100_000.0, 0.0);
        assert!(metrics.sharpe_ratio > 0.0);
    }

    #[test]
    fn metrics_sortino_ratio_is_finite() {
        let curve = make_equity_curve(&[100.0, 101.0, 100.5, 101.5, 100.0, 102.0]);
        let (sharpe, sortino) = compute_risk_adjusted(&curve, 0.0, 365.25);
        assert!(sharpe.is_finite());
        assert!(sortino.is_finite());
    }
}
