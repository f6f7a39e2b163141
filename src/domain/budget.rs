//! Daily token/cost ledger shared by every completion call.
//!
//! The ledger is an explicit object handed to the governor, so independent
//! runs and tests can hold independent ledgers. Counters are monotonic within
//! a UTC day and reset when a call lands on a later day. A process that starts
//! mid-day seeds them from the persisted cost log with `with_usage`.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::error::GovernorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Cheap,
    Strong,
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostTier::Cheap => write!(f, "cheap"),
            CostTier::Strong => write!(f, "strong"),
        }
    }
}

impl FromStr for CostTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cheap" => Ok(CostTier::Cheap),
            "strong" => Ok(CostTier::Strong),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Price per 1k tokens for one tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl TierPricing {
    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        tokens_in as f64 / 1000.0 * self.input_per_1k
            + tokens_out as f64 / 1000.0 * self.output_per_1k
    }
}

/// Daily ceilings. Zero disables a dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetLimits {
    pub daily_token_limit: u64,
    pub daily_cost_limit: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        BudgetLimits {
            daily_token_limit: 200_000,
            daily_cost_limit: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    RateLimited,
    Timeout,
    Transient,
    Fatal,
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CallOutcome::Success => "success",
            CallOutcome::RateLimited => "rate_limited",
            CallOutcome::Timeout => "timeout",
            CallOutcome::Transient => "transient",
            CallOutcome::Fatal => "fatal",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for CallOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CallOutcome::Success),
            "rate_limited" => Ok(CallOutcome::RateLimited),
            "timeout" => Ok(CallOutcome::Timeout),
            "transient" => Ok(CallOutcome::Transient),
            "fatal" => Ok(CallOutcome::Fatal),
            other => Err(format!("unknown call outcome '{}'", other)),
        }
    }
}

/// One completion attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostLogEntry {
    pub run_id: String,
    pub stage: String,
    pub tier: CostTier,
    pub attempt: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Pre-dispatch estimate for this attempt.
    pub estimated_cost: f64,
    /// Actual cost charged to the ledger; zero for failed attempts.
    pub cost: f64,
    pub latency_ms: u64,
    pub outcome: CallOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Counter values for the current period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetUsage {
    pub period: NaiveDate,
    pub tokens: u64,
    pub cost: f64,
}

#[derive(Debug)]
struct LedgerState {
    period: NaiveDate,
    tokens: u64,
    cost: f64,
    /// Attempts recorded since the last `drain_unpersisted`.
    pending: Vec<CostLogEntry>,
}

#[derive(Debug)]
pub struct BudgetLedger {
    limits: BudgetLimits,
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    pub fn new(limits: BudgetLimits, now: DateTime<Utc>) -> Self {
        Self::with_usage(limits, now, 0, 0.0)
    }

    /// Ledger for the day of `now` with `tokens` and `cost` already spent.
    pub fn with_usage(limits: BudgetLimits, now: DateTime<Utc>, tokens: u64, cost: f64) -> Self {
        BudgetLedger {
            limits,
            state: Mutex::new(LedgerState {
                period: now.date_naive(),
                tokens,
                cost,
                pending: Vec::new(),
            }),
        }
    }

    pub fn shared(limits: BudgetLimits) -> Arc<Self> {
        Arc::new(Self::new(limits, Utc::now()))
    }

    /// Start of the UTC day containing `now`, the lower bound of its period.
    pub fn period_start(now: DateTime<Utc>) -> DateTime<Utc> {
        now.date_naive().and_time(NaiveTime::MIN).and_utc()
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    fn lock(&self, now: DateTime<Utc>) -> MutexGuard<'_, LedgerState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let today = now.date_naive();
        if today > state.period {
            state.period = today;
            state.tokens = 0;
            state.cost = 0.0;
        }
        state
    }

    /// Refuse a call whose estimate would push a counter past its ceiling.
    pub fn check(
        &self,
        estimated_tokens: u64,
        estimated_cost: f64,
        now: DateTime<Utc>,
    ) -> Result<(), GovernorError> {
        let state = self.lock(now);
        let limits = self.limits;
        if limits.daily_token_limit > 0
            && state.tokens.saturating_add(estimated_tokens) > limits.daily_token_limit
        {
            return Err(GovernorError::BudgetExceeded {
                dimension: "token",
                spent: state.tokens as f64,
                estimate: estimated_tokens as f64,
                limit: limits.daily_token_limit as f64,
            });
        }
        if limits.daily_cost_limit > 0.0 && state.cost + estimated_cost > limits.daily_cost_limit
        {
            return Err(GovernorError::BudgetExceeded {
                dimension: "cost",
                spent: state.cost,
                estimate: estimated_cost,
                limit: limits.daily_cost_limit,
            });
        }
        Ok(())
    }

    /// Add an attempt to the counters and the cost log.
    ///
    /// Concurrent calls can both pass `check` and jointly overshoot; the
    /// overshoot is kept and reported.
    pub fn record(&self, entry: CostLogEntry) {
        let mut state = self.lock(entry.timestamp);
        let tokens = state.tokens.saturating_add(entry.tokens_in + entry.tokens_out);
        state.tokens = tokens;
        state.cost += entry.cost;

        let limits = self.limits;
        let over_tokens = limits.daily_token_limit > 0 && state.tokens > limits.daily_token_limit;
        let over_cost = limits.daily_cost_limit > 0.0 && state.cost > limits.daily_cost_limit;
        if over_tokens || over_cost {
            warn!(
                run_id = %entry.run_id,
                stage = %entry.stage,
                tokens = state.tokens,
                token_limit = limits.daily_token_limit,
                cost = state.cost,
                cost_limit = limits.daily_cost_limit,
                "daily budget overshot by concurrent calls"
            );
        }
        state.pending.push(entry);
    }

    pub fn usage(&self, now: DateTime<Utc>) -> BudgetUsage {
        let state = self.lock(now);
        BudgetUsage {
            period: state.period,
            tokens: state.tokens,
            cost: state.cost,
        }
    }

    /// Attempts recorded since the last drain, oldest first.
    pub fn entries(&self) -> Vec<CostLogEntry> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending.clone()
    }

    /// Hand out the pending attempts for persistence. The ledger keeps only
    /// its counters afterwards.
    pub fn drain_unpersisted(&self) -> Vec<CostLogEntry> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut state.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn entry(tokens: u64, cost: f64, at: DateTime<Utc>) -> CostLogEntry {
        CostLogEntry {
            run_id: "run".into(),
            stage: "synthesis".into(),
            tier: CostTier::Strong,
            attempt: 1,
            tokens_in: tokens / 2,
            tokens_out: tokens - tokens / 2,
            estimated_cost: cost,
            cost,
            latency_ms: 10,
            outcome: CallOutcome::Success,
            timestamp: at,
        }
    }

    fn limits() -> BudgetLimits {
        BudgetLimits {
            daily_token_limit: 1000,
            daily_cost_limit: 1.0,
        }
    }

    #[test]
    fn pricing_per_thousand_tokens() {
        let pricing = TierPricing {
            input_per_1k: 0.5,
            output_per_1k: 1.5,
        };
        assert!((pricing.cost(2000, 1000) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn check_rejects_estimate_past_token_ceiling() {
        let ledger = BudgetLedger::new(limits(), day(1, 0));
        ledger.record(entry(900, 0.1, day(1, 1)));
        let err = ledger.check(200, 0.0, day(1, 2)).unwrap_err();
        assert!(matches!(
            err,
            GovernorError::BudgetExceeded {
                dimension: "token",
                ..
            }
        ));
        assert!(ledger.check(100, 0.0, day(1, 2)).is_ok());
    }

    #[test]
    fn check_rejects_estimate_past_cost_ceiling() {
        let ledger = BudgetLedger::new(limits(), day(1, 0));
        ledger.record(entry(10, 0.9, day(1, 1)));
        let err = ledger.check(10, 0.2, day(1, 2)).unwrap_err();
        assert_eq!(err.kind(), "budget_exceeded");
    }

    #[test]
    fn zero_limits_disable_checks() {
        let ledger = BudgetLedger::new(
            BudgetLimits {
                daily_token_limit: 0,
                daily_cost_limit: 0.0,
            },
            day(1, 0),
        );
        assert!(ledger.check(u64::MAX / 2, 1e9, day(1, 1)).is_ok());
    }

    #[test]
    fn counters_reset_on_rollover() {
        let ledger = BudgetLedger::new(limits(), day(1, 0));
        ledger.record(entry(900, 0.9, day(1, 23)));
        let usage = ledger.usage(day(2, 0));
        assert_eq!(usage.period, day(2, 0).date_naive());
        assert_eq!(usage.tokens, 0);
        assert_eq!(usage.cost, 0.0);
        assert!(ledger.check(900, 0.9, day(2, 1)).is_ok());
        assert_eq!(ledger.entries().len(), 1);
    }

    #[test]
    fn overshoot_is_recorded() {
        let ledger = BudgetLedger::new(limits(), day(1, 0));
        ledger.record(entry(800, 0.1, day(1, 1)));
        ledger.record(entry(800, 0.1, day(1, 1)));
        assert_eq!(ledger.usage(day(1, 2)).tokens, 1600);
    }

    #[test]
    fn cost_log_reconciles_with_counters() {
        let ledger = BudgetLedger::new(limits(), day(1, 0));
        for i in 0..5 {
            ledger.record(entry(10 + i, 0.01 * i as f64, day(1, 1)));
        }
        let entries = ledger.entries();
        let tokens: u64 = entries.iter().map(|e| e.tokens_in + e.tokens_out).sum();
        let cost: f64 = entries.iter().map(|e| e.cost).sum();
        let usage = ledger.usage(day(1, 2));
        assert_eq!(tokens, usage.tokens);
        assert!((cost - usage.cost).abs() < 1e-12);
    }

    #[test]
    fn drain_returns_each_entry_once() {
        let ledger = BudgetLedger::new(limits(), day(1, 0));
        ledger.record(entry(10, 0.0, day(1, 1)));
        assert_eq!(ledger.drain_unpersisted().len(), 1);
        assert!(ledger.drain_unpersisted().is_empty());
        ledger.record(entry(10, 0.0, day(1, 1)));
        assert_eq!(ledger.drain_unpersisted().len(), 1);
    }

    #[test]
    fn drained_entries_are_released_but_counters_kept() {
        let ledger = BudgetLedger::new(limits(), day(1, 0));
        for _ in 0..3 {
            ledger.record(entry(100, 0.1, day(1, 1)));
        }
        assert_eq!(ledger.drain_unpersisted().len(), 3);
        assert!(ledger.entries().is_empty());
        let usage = ledger.usage(day(1, 2));
        assert_eq!(usage.tokens, 300);
        assert!((usage.cost - 0.3).abs() < 1e-12);
    }

    #[test]
    fn seeded_usage_counts_against_the_ceiling() {
        let ledger = BudgetLedger::with_usage(limits(), day(1, 9), 950, 0.2);
        assert_eq!(ledger.usage(day(1, 9)).tokens, 950);
        assert!(matches!(
            ledger.check(100, 0.0, day(1, 10)).unwrap_err(),
            GovernorError::BudgetExceeded {
                dimension: "token",
                ..
            }
        ));
        assert!(ledger.check(100, 0.0, day(2, 0)).is_ok());
    }

    #[test]
    fn period_starts_at_utc_midnight() {
        assert_eq!(BudgetLedger::period_start(day(5, 17)), day(5, 0));
    }
}
