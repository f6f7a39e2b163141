//! Prompt builders for each pipeline stage.
//!
//! Prompts are assembled only from the evaluation context passed in, so the
//! same inputs always produce the same request text.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::domain::advisory::{AdvisorRole, AnalystView, StageKind, SynthesisReport, TradeProposal};
use crate::domain::position::Position;
use crate::domain::signal::Signal;
use crate::domain::snapshot::IndicatorSnapshot;
use crate::ports::completion_port::CompletionRequest;

const JSON_ONLY: &str = "Respond with a single JSON object and nothing else.";

/// What every stage gets to see about the market.
#[derive(Debug, Clone)]
pub struct MarketContext<'a> {
    pub run_id: &'a str,
    pub symbol: &'a str,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub snapshot: &'a IndicatorSnapshot,
    pub signals: &'a [Signal],
    pub position: Option<&'a Position>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromptLimits {
    pub advisor_max_tokens: u32,
    pub stage_max_tokens: u32,
    pub temperature: f32,
}

impl Default for PromptLimits {
    fn default() -> Self {
        PromptLimits {
            advisor_max_tokens: 300,
            stage_max_tokens: 600,
            temperature: 0.0,
        }
    }
}

fn role_brief(role: AdvisorRole) -> &'static str {
    match role {
        AdvisorRole::Technical => {
            "You are a technical analyst. Judge trend structure, moving-average alignment and band position."
        }
        AdvisorRole::Momentum => {
            "You are a momentum analyst. Judge MACD and RSI dynamics and whether momentum is building or fading."
        }
        AdvisorRole::Sentiment => {
            "You are a market sentiment analyst. Judge crowd positioning as implied by price and volume behaviour."
        }
        AdvisorRole::Risk => {
            "You are a risk analyst. Judge volatility, drawdown exposure and whether the current position is prudent."
        }
    }
}

fn market_section(ctx: &MarketContext<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Symbol: {}", ctx.symbol);
    let _ = writeln!(out, "Time: {}", ctx.timestamp.to_rfc3339());
    let _ = writeln!(out, "Price: {:.4}", ctx.price);
    match ctx.position {
        Some(p) if p.is_open() => {
            let _ = writeln!(
                out,
                "Open position: {} @ {:.4} (unrealized {:.2})",
                p.quantity,
                p.avg_entry_price,
                p.unrealized_pnl_at(ctx.price)
            );
        }
        _ => {
            let _ = writeln!(out, "Open position: none");
        }
    }
    let _ = writeln!(out, "Indicators (latest, previous):");
    for (name, reading) in ctx.snapshot.iter() {
        match reading.previous {
            Some(prev) => {
                let _ = writeln!(out, "  {}: {:.4}, {:.4}", name, reading.value, prev);
            }
            None => {
                let _ = writeln!(out, "  {}: {:.4}, n/a", name, reading.value);
            }
        }
    }
    if !ctx.signals.is_empty() {
        let _ = writeln!(out, "Signals:");
        for signal in ctx.signals {
            let _ = writeln!(out, "  {}", signal);
        }
    }
    out
}

fn request(
    ctx: &MarketContext<'_>,
    stage: StageKind,
    system: String,
    prompt: String,
    max_tokens: u32,
    limits: &PromptLimits,
) -> CompletionRequest {
    CompletionRequest {
        run_id: ctx.run_id.to_string(),
        stage: stage.to_string(),
        system,
        prompt,
        max_tokens,
        temperature: limits.temperature,
    }
}

pub fn analyst_request(
    ctx: &MarketContext<'_>,
    role: AdvisorRole,
    limits: &PromptLimits,
) -> CompletionRequest {
    let system = format!("{} {}", role_brief(role), JSON_ONLY);
    let prompt = format!(
        "{}\nReturn {{\"signal\": \"bullish\"|\"bearish\"|\"neutral\", \"confidence\": 0-100, \"reasoning\": string}}.",
        market_section(ctx)
    );
    request(
        ctx,
        StageKind::Analyst(role),
        system,
        prompt,
        limits.advisor_max_tokens,
        limits,
    )
}

pub fn synthesis_request(
    ctx: &MarketContext<'_>,
    views: &[AnalystView],
    limits: &PromptLimits,
) -> CompletionRequest {
    let mut prompt = market_section(ctx);
    prompt.push_str("Analyst views:\n");
    for view in views {
        let _ = writeln!(
            prompt,
            "  {} ({}, confidence {:.0}): {}",
            view.role, view.stance, view.confidence, view.reasoning
        );
    }
    prompt.push_str(
        "Combine these into one view. Return {\"signal\": \"bullish\"|\"bearish\"|\"neutral\", \"confidence\": 0-100, \"summary\": string}.",
    );
    request(
        ctx,
        StageKind::Synthesis,
        format!("You are the head of research reconciling analyst views. {}", JSON_ONLY),
        prompt,
        limits.stage_max_tokens,
        limits,
    )
}

pub fn proposal_request(
    ctx: &MarketContext<'_>,
    synthesis: &SynthesisReport,
    limits: &PromptLimits,
) -> CompletionRequest {
    let prompt = format!(
        "{}Research view: {} (confidence {:.0}). {}\nPropose one trade. BUY only without an open position, SELL only with one. Return {{\"action\": \"BUY\"|\"SELL\"|\"HOLD\", \"quantity\": number or null, \"confidence\": 0-100, \"reasoning\": string}}.",
        market_section(ctx),
        synthesis.stance,
        synthesis.confidence,
        synthesis.summary
    );
    request(
        ctx,
        StageKind::Proposal,
        format!("You are a portfolio manager sizing trades. {}", JSON_ONLY),
        prompt,
        limits.stage_max_tokens,
        limits,
    )
}

/// Validation and risk review share a request shape; `stage` selects which.
pub fn validation_request(
    ctx: &MarketContext<'_>,
    proposal: &TradeProposal,
    stage: StageKind,
    limits: &PromptLimits,
) -> CompletionRequest {
    let system = match stage {
        StageKind::RiskReview => format!(
            "You are the risk officer reviewing a high-conviction trade before it reaches final validation. {}",
            JSON_ONLY
        ),
        _ => format!("You are a trade validator checking a proposal for errors. {}", JSON_ONLY),
    };
    let quantity = proposal
        .quantity
        .map(|q| q.to_string())
        .unwrap_or_else(|| "sized by portfolio".into());
    let prompt = format!(
        "{}Proposal: {} quantity {} (confidence {:.0}). {}\nReturn {{\"verdict\": \"approve\"|\"adjust_size\"|\"reject\", \"quantity\": number (adjust_size only), \"reason\": string}}.",
        market_section(ctx),
        proposal.action,
        quantity,
        proposal.confidence,
        proposal.reasoning
    );
    request(ctx, stage, system, prompt, limits.stage_max_tokens, limits)
}
