//! Typed advisory stage outputs.
//!
//! Completion replies are free text that should contain one JSON object. Each
//! stage parses into its own variant of [`StageOutput`] and is validated at
//! the boundary; anything malformed becomes an [`AdvisoryParseError`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::decision::Action;
use crate::domain::error::AdvisoryParseError;
use crate::domain::signal::SignalStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorRole {
    Technical,
    Momentum,
    Sentiment,
    Risk,
}

impl AdvisorRole {
    pub const ALL: [AdvisorRole; 4] = [
        AdvisorRole::Technical,
        AdvisorRole::Momentum,
        AdvisorRole::Sentiment,
        AdvisorRole::Risk,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AdvisorRole::Technical => "technical",
            AdvisorRole::Momentum => "momentum",
            AdvisorRole::Sentiment => "sentiment",
            AdvisorRole::Risk => "risk",
        }
    }
}

impl fmt::Display for AdvisorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AdvisorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AdvisorRole::ALL
            .into_iter()
            .find(|role| role.name() == wanted)
            .ok_or_else(|| format!("unknown advisor role '{}'", s.trim()))
    }
}

/// Which pipeline call produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Analyst(AdvisorRole),
    Synthesis,
    Proposal,
    Validation,
    RiskReview,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Analyst(role) => write!(f, "advisor:{}", role),
            StageKind::Synthesis => write!(f, "synthesis"),
            StageKind::Proposal => write!(f, "proposal"),
            StageKind::Validation => write!(f, "validation"),
            StageKind::RiskReview => write!(f, "risk_review"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalystView {
    pub role: AdvisorRole,
    pub stance: SignalStatus,
    /// 0 to 100.
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisReport {
    pub stance: SignalStatus,
    pub confidence: f64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeProposal {
    pub action: Action,
    pub quantity: Option<f64>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    Approve,
    AdjustSize { quantity: f64 },
    Reject { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StageOutput {
    Analyst(AnalystView),
    Synthesis(SynthesisReport),
    Proposal(TradeProposal),
    Validation(ValidationVerdict),
}

#[derive(Deserialize)]
struct RawAnalyst {
    signal: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Deserialize)]
struct RawSynthesis {
    signal: String,
    confidence: f64,
    #[serde(default)]
    summary: String,
}

#[derive(Deserialize)]
struct RawProposal {
    action: String,
    #[serde(default)]
    quantity: Option<f64>,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    verdict: String,
    #[serde(default)]
    quantity: Option<f64>,
    #[serde(default)]
    reason: String,
}

/// Drop markdown fences and any prose around the outermost JSON object.
pub fn extract_json(content: &str) -> &str {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parse and validate a completion reply for `stage`.
pub fn parse_stage(stage: StageKind, content: &str) -> Result<StageOutput, AdvisoryParseError> {
    let json = extract_json(content);
    match stage {
        StageKind::Analyst(role) => {
            let raw: RawAnalyst = decode(stage, json)?;
            Ok(StageOutput::Analyst(AnalystView {
                role,
                stance: parse_stance(stage, &raw.signal)?,
                confidence: check_confidence(stage, raw.confidence)?,
                reasoning: raw.reasoning,
            }))
        }
        StageKind::Synthesis => {
            let raw: RawSynthesis = decode(stage, json)?;
            Ok(StageOutput::Synthesis(SynthesisReport {
                stance: parse_stance(stage, &raw.signal)?,
                confidence: check_confidence(stage, raw.confidence)?,
                summary: raw.summary,
            }))
        }
        StageKind::Proposal => {
            let raw: RawProposal = decode(stage, json)?;
            let action = match raw.action.trim().to_ascii_uppercase().as_str() {
                "BUY" => Action::Buy,
                "SELL" => Action::Sell,
                "HOLD" => Action::Hold,
                other => return Err(invalid(stage, "action", format!("'{}'", other))),
            };
            let quantity = raw
                .quantity
                .map(|q| check_quantity(stage, q))
                .transpose()?;
            Ok(StageOutput::Proposal(TradeProposal {
                action,
                quantity,
                confidence: check_confidence(stage, raw.confidence)?,
                reasoning: raw.reasoning,
            }))
        }
        StageKind::Validation | StageKind::RiskReview => {
            let raw: RawVerdict = decode(stage, json)?;
            let verdict = match raw.verdict.trim().to_ascii_lowercase().as_str() {
                "approve" | "approved" => ValidationVerdict::Approve,
                "adjust_size" | "adjust" => {
                    let quantity = raw
                        .quantity
                        .ok_or_else(|| invalid(stage, "quantity", "missing for adjust_size"))?;
                    ValidationVerdict::AdjustSize {
                        quantity: check_quantity(stage, quantity)?,
                    }
                }
                "reject" | "rejected" => ValidationVerdict::Reject { reason: raw.reason },
                other => return Err(invalid(stage, "verdict", format!("'{}'", other))),
            };
            Ok(StageOutput::Validation(verdict))
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(
    stage: StageKind,
    json: &str,
) -> Result<T, AdvisoryParseError> {
    serde_json::from_str(json).map_err(|e| AdvisoryParseError::InvalidJson {
        stage: stage.to_string(),
        reason: e.to_string(),
    })
}

fn invalid(stage: StageKind, field: &str, reason: impl Into<String>) -> AdvisoryParseError {
    AdvisoryParseError::InvalidField {
        stage: stage.to_string(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_stance(stage: StageKind, raw: &str) -> Result<SignalStatus, AdvisoryParseError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "bullish" => Ok(SignalStatus::Bullish),
        "bearish" => Ok(SignalStatus::Bearish),
        "neutral" => Ok(SignalStatus::Neutral),
        other => Err(invalid(stage, "signal", format!("'{}'", other))),
    }
}

fn check_confidence(stage: StageKind, value: f64) -> Result<f64, AdvisoryParseError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(stage, "confidence", format!("{} outside 0..=100", value)))
    }
}

fn check_quantity(stage: StageKind, value: f64) -> Result<f64, AdvisoryParseError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(stage, "quantity", format!("{} is not positive", value)))
    }
}
