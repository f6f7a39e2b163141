//! Portfolio state machine for one run.
//!
//! `apply` is the only way positions and cash change. Each call is atomic: it
//! either books one fill or leaves every field untouched. Snapshots are
//! re-derived from the trade ledger and the current marks after every
//! transition rather than accumulated on the side.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::decision::{Action, Decision};
use crate::domain::error::PortfolioError;
use crate::domain::execution::{
    PortfolioConfig, apply_slippage_sell, calculate_commission, size_buy,
};
use crate::domain::position::{Position, Side, Trade};

/// Quantities below this are treated as a closed position.
const QUANTITY_EPSILON: f64 = 1e-12;
/// Tolerance for ledger reconciliation.
const RECONCILE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub run_id: String,
    pub cash: f64,
    pub total_equity: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Not approved, or HOLD.
    Skipped,
    Filled,
    Refused(PortfolioError),
}

/// Result of applying one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub trade: Option<Trade>,
    /// Position in the decision's symbol after the transition.
    pub position: Option<Position>,
    pub snapshot: PortfolioSnapshot,
    pub outcome: TransitionOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    run_id: String,
    config: PortfolioConfig,
    cash: f64,
    positions: BTreeMap<String, Position>,
    trades: Vec<Trade>,
    marks: BTreeMap<String, f64>,
}

/// Cash and positions rebuilt from a trade ledger.
struct Replay {
    cash: f64,
    realized: f64,
    positions: BTreeMap<String, Position>,
}

fn replay(initial_capital: f64, trades: &[Trade]) -> Replay {
    let mut cash = initial_capital;
    let mut realized = 0.0;
    let mut positions: BTreeMap<String, Position> = BTreeMap::new();
    for trade in trades {
        cash += trade.cash_delta();
        realized += trade.realized_pnl.unwrap_or(0.0);
        match trade.side {
            Side::Buy => match positions.get_mut(&trade.symbol) {
                Some(position) => position.add(trade.quantity, trade.price),
                None => {
                    positions.insert(
                        trade.symbol.clone(),
                        Position::open(&trade.symbol, trade.quantity, trade.price, trade.timestamp),
                    );
                }
            },
            Side::Sell => {
                let closed = match positions.get_mut(&trade.symbol) {
                    Some(position) => {
                        position.reduce(trade.quantity);
                        position.quantity <= QUANTITY_EPSILON
                    }
                    None => false,
                };
                if closed {
                    positions.remove(&trade.symbol);
                }
            }
        }
    }
    Replay {
        cash,
        realized,
        positions,
    }
}

impl Portfolio {
    pub fn new(run_id: impl Into<String>, config: PortfolioConfig) -> Self {
        Portfolio {
            run_id: run_id.into(),
            cash: config.initial_capital,
            config,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            marks: BTreeMap::new(),
        }
    }

    /// Rebuild a run's portfolio from its persisted ledger. Marks start at
    /// each position's entry price.
    pub fn from_ledger(
        run_id: impl Into<String>,
        config: PortfolioConfig,
        trades: Vec<Trade>,
    ) -> Self {
        let state = replay(config.initial_capital, &trades);
        let marks = state
            .positions
            .values()
            .map(|p| (p.symbol.clone(), p.avg_entry_price))
            .collect();
        Portfolio {
            run_id: run_id.into(),
            config,
            cash: state.cash,
            positions: state.positions,
            trades,
            marks,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &PortfolioConfig {
        &self.config
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_capital(&self) -> f64 {
        self.config.initial_capital
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.get(symbol).is_some_and(|p| p.is_open())
    }

    /// Update the price used for unrealized PnL. Invalid prices are ignored.
    pub fn mark(&mut self, symbol: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        self.marks.insert(symbol.to_string(), price);
        if let Some(position) = self.positions.get_mut(symbol) {
            position.mark(price);
        }
    }

    /// Mark price for `symbol`, falling back to the entry price.
    fn mark_for(&self, position: &Position) -> f64 {
        self.marks
            .get(&position.symbol)
            .copied()
            .unwrap_or(position.avg_entry_price)
    }

    /// `cash + Σ quantity × mark`.
    pub fn total_equity(&self) -> f64 {
        let value: f64 = self
            .positions
            .values()
            .map(|p| p.market_value(self.mark_for(p)))
            .sum();
        self.cash + value
    }

    pub fn equity_point(&self, timestamp: DateTime<Utc>) -> EquityPoint {
        EquityPoint {
            timestamp,
            equity: self.total_equity(),
            cash: self.cash,
        }
    }

    /// Derived view built from the ledger and the current marks.
    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> PortfolioSnapshot {
        let state = replay(self.config.initial_capital, &self.trades);
        let (value, unrealized) = state.positions.values().fold((0.0, 0.0), |(v, u), p| {
            let mark = self.mark_for(p);
            (v + p.market_value(mark), u + p.unrealized_pnl_at(mark))
        });
        PortfolioSnapshot {
            run_id: self.run_id.clone(),
            cash: state.cash,
            total_equity: state.cash + value,
            unrealized_pnl: unrealized,
            realized_pnl: state.realized,
            timestamp,
        }
    }

    /// Apply one decision at `current_price`.
    ///
    /// Unapproved decisions and HOLDs are skipped. Refusals are logged and
    /// leave the portfolio unchanged.
    pub fn apply(&mut self, decision: &Decision, current_price: f64) -> Transition {
        let symbol = decision.symbol();
        let result = if !decision.is_actionable() {
            Ok(None)
        } else if decision.run_id() != self.run_id {
            Err(PortfolioError::LedgerMismatch {
                reason: format!(
                    "decision {} belongs to run {}, not {}",
                    decision.id(),
                    decision.run_id(),
                    self.run_id
                ),
            })
        } else if !current_price.is_finite() || current_price <= 0.0 {
            Err(PortfolioError::InvalidPrice {
                symbol: symbol.to_string(),
                price: current_price,
            })
        } else {
            match decision.action() {
                Action::Buy => self.buy(decision, current_price).map(Some),
                Action::Sell => self.sell(decision, current_price).map(Some),
                Action::Hold => Ok(None),
            }
        };

        self.mark(symbol, current_price);
        let (trade, outcome) = match result {
            Ok(Some(trade)) => {
                info!(
                    run_id = %self.run_id,
                    decision_id = decision.id(),
                    side = %trade.side,
                    symbol,
                    quantity = trade.quantity,
                    price = trade.price,
                    commission = trade.commission,
                    realized_pnl = trade.realized_pnl.unwrap_or(0.0),
                    cash = self.cash,
                    "fill booked"
                );
                (Some(trade), TransitionOutcome::Filled)
            }
            Ok(None) => (None, TransitionOutcome::Skipped),
            Err(e) => {
                warn!(
                    run_id = %self.run_id,
                    decision_id = decision.id(),
                    action = %decision.action(),
                    "transition refused: {}",
                    e
                );
                (None, TransitionOutcome::Refused(e))
            }
        };

        Transition {
            trade,
            position: self.positions.get(symbol).cloned(),
            snapshot: self.snapshot(decision.timestamp()),
            outcome,
        }
    }

    fn buy(&mut self, decision: &Decision, market_price: f64) -> Result<Trade, PortfolioError> {
        let symbol = decision.symbol();
        if self.has_position(symbol) && !self.config.allow_scale_in {
            return Err(PortfolioError::PositionExists {
                symbol: symbol.to_string(),
            });
        }
        let fill = size_buy(
            symbol,
            self.cash,
            market_price,
            decision.quantity(),
            &self.config,
        )?;

        self.cash -= fill.total_cost();
        match self.positions.get_mut(symbol) {
            Some(position) => position.add(fill.quantity, fill.price),
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    Position::open(symbol, fill.quantity, fill.price, decision.timestamp()),
                );
            }
        }
        Ok(self.book(decision, Side::Buy, fill.quantity, fill.price, fill.commission, None))
    }

    fn sell(&mut self, decision: &Decision, market_price: f64) -> Result<Trade, PortfolioError> {
        let symbol = decision.symbol();
        let Some(position) = self.positions.get(symbol).filter(|p| p.is_open()) else {
            return Err(PortfolioError::InsufficientPosition {
                symbol: symbol.to_string(),
            });
        };

        let held = position.quantity;
        let entry = position.avg_entry_price;
        let quantity = decision.quantity().unwrap_or(held).min(held);
        let price = apply_slippage_sell(market_price, self.config.execution.slippage_pct);
        let commission = calculate_commission(quantity * price, &self.config.execution);
        let realized = (price - entry) * quantity - commission;

        self.cash += quantity * price - commission;
        let remaining = held - quantity;
        if remaining <= QUANTITY_EPSILON {
            self.positions.remove(symbol);
        } else if let Some(position) = self.positions.get_mut(symbol) {
            position.reduce(quantity);
        }
        Ok(self.book(decision, Side::Sell, quantity, price, commission, Some(realized)))
    }

    fn book(
        &mut self,
        decision: &Decision,
        side: Side,
        quantity: f64,
        price: f64,
        commission: f64,
        realized_pnl: Option<f64>,
    ) -> Trade {
        let trade = Trade {
            run_id: self.run_id.clone(),
            decision_id: decision.id().to_string(),
            symbol: decision.symbol().to_string(),
            side,
            quantity,
            price,
            commission,
            timestamp: decision.timestamp(),
            realized_pnl,
        };
        self.trades.push(trade.clone());
        trade
    }

    /// Replay the ledger and check it agrees with the live cash and positions.
    pub fn reconcile(&self) -> Result<(), PortfolioError> {
        let state = replay(self.config.initial_capital, &self.trades);
        if (state.cash - self.cash).abs() > RECONCILE_TOLERANCE {
            return Err(PortfolioError::LedgerMismatch {
                reason: format!("ledger cash {:.8} != live cash {:.8}", state.cash, self.cash),
            });
        }
        let open: Vec<&Position> = self.positions.values().filter(|p| p.is_open()).collect();
        if open.len() != state.positions.len() {
            return Err(PortfolioError::LedgerMismatch {
                reason: format!(
                    "ledger has {} open positions, live has {}",
                    state.positions.len(),
                    open.len()
                ),
            });
        }
        for live in open {
            let Some(replayed) = state.positions.get(&live.symbol) else {
                return Err(PortfolioError::LedgerMismatch {
                    reason: format!("live position in {} missing from ledger", live.symbol),
                });
            };
            if (replayed.quantity - live.quantity).abs() > RECONCILE_TOLERANCE
                || (replayed.avg_entry_price - live.avg_entry_price).abs() > RECONCILE_TOLERANCE
            {
                return Err(PortfolioError::LedgerMismatch {
                    reason: format!(
                        "{}: ledger {} @ {:.8}, live {} @ {:.8}",
                        live.symbol,
                        replayed.quantity,
                        replayed.avg_entry_price,
                        live.quantity,
                        live.avg_entry_price
                    ),
                });
            }
        }
        Ok(())
    }
}
