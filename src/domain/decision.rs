//! Immutable decision records.
//!
//! One `Decision` is produced per pipeline invocation, rule or advisory. Fields
//! are private; a decision is built once through [`DecisionContext`] and only
//! read afterwards.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Rule,
    Advisory,
}

/// Where and when a decision is being made.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionContext {
    pub run_id: String,
    /// Monotonic per run; forms the run-scoped decision id.
    pub sequence: u64,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// The mutable shape a decision path fills in before sealing it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionDraft {
    pub action: Action,
    pub quantity: Option<f64>,
    pub confidence: f64,
    pub reasoning: String,
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    id: String,
    run_id: String,
    symbol: String,
    action: Action,
    quantity: Option<f64>,
    price: Option<f64>,
    confidence: f64,
    reasoning: String,
    approved: bool,
    source: DecisionSource,
    timestamp: DateTime<Utc>,
}

impl DecisionContext {
    pub fn decision_id(&self) -> String {
        format!("{}:{}", self.run_id, self.sequence)
    }

    /// Seal a draft into an immutable decision.
    ///
    /// Confidence is clamped to `[0, 1]`. A HOLD is never approved.
    pub fn seal(&self, draft: DecisionDraft, source: DecisionSource) -> Decision {
        let confidence = if draft.confidence.is_finite() {
            draft.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let approved = draft.approved && draft.action != Action::Hold;
        let price = (draft.action != Action::Hold).then_some(self.price);
        Decision {
            id: self.decision_id(),
            run_id: self.run_id.clone(),
            symbol: self.symbol.clone(),
            action: draft.action,
            quantity: draft.quantity.filter(|q| q.is_finite() && *q > 0.0),
            price,
            confidence,
            reasoning: draft.reasoning,
            approved,
            source,
            timestamp: self.timestamp,
        }
    }

    pub fn hold(&self, source: DecisionSource, reasoning: impl Into<String>) -> Decision {
        self.seal(
            DecisionDraft {
                action: Action::Hold,
                quantity: None,
                confidence: 0.0,
                reasoning: reasoning.into(),
                approved: false,
            },
            source,
        )
    }
}

impl Decision {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn quantity(&self) -> Option<f64> {
        self.quantity
    }

    pub fn price(&self) -> Option<f64> {
        self.price
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn approved(&self) -> bool {
        self.approved
    }

    pub fn source(&self) -> DecisionSource {
        self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True when applying this decision may produce a trade.
    pub fn is_actionable(&self) -> bool {
        self.approved && self.action != Action::Hold
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionSource::Rule => write!(f, "rule"),
            DecisionSource::Advisory => write!(f, "advisory"),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context(price: f64) -> DecisionContext {
    use chrono::TimeZone;

    DecisionContext {
        run_id: "test-run".into(),
        sequence: 1,
        symbol: "BTCUSDT".into(),
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        price,
    }
}
