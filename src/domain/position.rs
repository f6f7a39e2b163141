//! Open positions and the immutable trade ledger entries behind them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// A long holding in one symbol. At most one per symbol per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    /// Unrealized PnL at the last mark.
    pub unrealized_pnl: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn open(symbol: impl Into<String>, quantity: f64, price: f64, at: DateTime<Utc>) -> Self {
        Position {
            symbol: symbol.into(),
            quantity,
            avg_entry_price: price,
            unrealized_pnl: 0.0,
            opened_at: at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl_at(&self, price: f64) -> f64 {
        self.quantity * (price - self.avg_entry_price)
    }

    /// Increase the holding, recomputing the weighted-average entry price.
    pub fn add(&mut self, quantity: f64, price: f64) {
        let total = self.quantity + quantity;
        if total > 0.0 {
            self.avg_entry_price =
                (self.quantity * self.avg_entry_price + quantity * price) / total;
        }
        self.quantity = total;
    }

    /// Reduce the holding; the entry price is unchanged.
    pub fn reduce(&mut self, quantity: f64) {
        self.quantity = (self.quantity - quantity).max(0.0);
    }

    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl = self.unrealized_pnl_at(price);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// An executed fill. Never modified after it is appended to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub run_id: String,
    pub decision_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub timestamp: DateTime<Utc>,
    /// Set on sells only.
    pub realized_pnl: Option<f64>,
}

impl Trade {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }

    /// Signed effect on cash: negative for buys, positive for sells.
    pub fn cash_delta(&self) -> f64 {
        match self.side {
            Side::Buy => -(self.notional() + self.commission),
            Side::Sell => self.notional() - self.commission,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    fn sample_position() -> Position {
        Position::open("BTCUSDT", 2.0, 50.0, at())
    }

    fn sample_trade(side: Side) -> Trade {
        Trade {
            run_id: "run".into(),
            decision_id: "run:1".into(),
            symbol: "BTCUSDT".into(),
            side,
            quantity: 2.0,
            price: 100.0,
            commission: 1.0,
            timestamp: at(),
            realized_pnl: None,
        }
    }

    #[test]
    fn market_value_and_unrealized_pnl() {
        let pos = sample_position();
        assert!((pos.market_value(55.0) - 110.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl_at(45.0) - (-10.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn add_recomputes_weighted_average() {
        let mut pos = sample_position();
        pos.add(2.0, 70.0);
        assert!((pos.quantity - 4.0).abs() < f64::EPSILON);
        assert!((pos.avg_entry_price - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reduce_keeps_entry_price_and_floors_at_zero() {
        let mut pos = sample_position();
        pos.reduce(1.5);
        assert!((pos.quantity - 0.5).abs() < f64::EPSILON);
        assert!((pos.avg_entry_price - 50.0).abs() < f64::EPSILON);
        pos.reduce(5.0);
        assert_eq!(pos.quantity, 0.0);
        assert!(!pos.is_open());
    }

    #[test]
    fn mark_updates_unrealized_pnl() {
        let mut pos = sample_position();
        pos.mark(60.0);
        assert!((pos.unrealized_pnl - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn trade_cash_delta_includes_commission() {
        assert!((sample_trade(Side::Buy).cash_delta() - (-201.0)).abs() < f64::EPSILON);
        assert!((sample_trade(Side::Sell).cash_delta() - 199.0).abs() < f64::EPSILON);
    }

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("SELL".parse::<Side>().unwrap(), Side::Sell);
        assert!("short".parse::<Side>().is_err());
    }
}
