//! Fill simulation: slippage, commission and position sizing.

use crate::domain::error::PortfolioError;

/// Costs applied to every simulated fill.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            slippage_pct: 0.0,
        }
    }
}

/// Sizing and safety rules for one run's portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioConfig {
    pub initial_capital: f64,
    /// Largest share of cash a single BUY may commit.
    pub max_position_fraction: f64,
    /// When false a BUY on an open position is refused.
    pub allow_scale_in: bool,
    pub execution: ExecutionConfig,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        PortfolioConfig {
            initial_capital: 10_000.0,
            max_position_fraction: 0.25,
            allow_scale_in: false,
            execution: ExecutionConfig::default(),
        }
    }
}

/// Calculate commission: flat_fee + (trade_value * pct / 100).
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    config.commission_per_trade + (trade_value * config.commission_pct / 100.0)
}

/// Buy fill: market_price * (1 + slippage_pct / 100)
pub fn apply_slippage_buy(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

/// Sell fill: market_price * (1 - slippage_pct / 100)
pub fn apply_slippage_sell(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}

/// A sized BUY ready to be booked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuyFill {
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
}

impl BuyFill {
    pub fn total_cost(&self) -> f64 {
        self.quantity * self.price + self.commission
    }
}

/// Size a BUY against available cash.
///
/// Quantity is the requested amount, or the fraction cap when none is given,
/// clamped to the fraction cap and to what cash covers including commission.
pub fn size_buy(
    symbol: &str,
    cash: f64,
    market_price: f64,
    requested: Option<f64>,
    config: &PortfolioConfig,
) -> Result<BuyFill, PortfolioError> {
    let exec = &config.execution;
    let price = apply_slippage_buy(market_price, exec.slippage_pct);
    let cap = (cash * config.max_position_fraction / price).max(0.0);
    let affordable =
        ((cash - exec.commission_per_trade) / (price * (1.0 + exec.commission_pct / 100.0))).max(0.0);
    let quantity = requested.unwrap_or(cap).min(cap).min(affordable);

    if !quantity.is_finite() || quantity <= 0.0 {
        let wanted = requested.unwrap_or(cap).max(0.0);
        let notional = wanted * price;
        return Err(PortfolioError::InsufficientFunds {
            symbol: symbol.to_string(),
            required: notional + calculate_commission(notional, exec),
            available: cash,
        });
    }

    let commission = calculate_commission(quantity * price, exec);
    Ok(BuyFill {
        quantity,
        price,
        commission,
    })
}
