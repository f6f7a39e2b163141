//! Advisory decision pipeline as an explicit state machine.
//!
//! ```text
//! Start -> Advisory -> Gate1
//! Gate1: no advisors, or mean confidence < threshold_low -> Finalize (HOLD)
//! Gate1: mean confidence >= threshold_low -> Synthesis -> Proposal -> Gate2
//! Gate2: confidence >= threshold_high -> EscalatedValidation -> Finalize
//! Gate2: confidence <  threshold_high -> Validation -> Finalize
//! ```
//!
//! Transitions live in the pure [`next_state`] function. The runner only
//! performs the work of the current state and gathers [`Evidence`]. Nothing in
//! here returns an error: every failure resolves to a HOLD decision with the
//! failure recorded on the outcome.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::advisory::{
    AdvisorRole, AnalystView, StageKind, StageOutput, SynthesisReport, TradeProposal,
    ValidationVerdict, parse_stage,
};
use crate::domain::budget::CostTier;
use crate::domain::decision::{Action, Decision, DecisionContext, DecisionDraft, DecisionSource};
use crate::domain::error::{GovernorError, PipelineIssue};
use crate::domain::governor::Governor;
use crate::domain::position::Position;
use crate::domain::prompts::{
    MarketContext, PromptLimits, analyst_request, proposal_request, synthesis_request,
    validation_request,
};
use crate::domain::signal::Signal;
use crate::domain::snapshot::IndicatorSnapshot;
use crate::ports::completion_port::CompletionRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Gate 1, on the 0-100 advisor confidence scale.
    pub threshold_low: f64,
    /// Gate 2, on the 0-100 proposal confidence scale.
    pub threshold_high: f64,
    pub advisors: Vec<AdvisorRole>,
    pub prompts: PromptLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            threshold_low: 60.0,
            threshold_high: 80.0,
            advisors: AdvisorRole::ALL.to_vec(),
            prompts: PromptLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    Advisory,
    Gate1,
    Synthesis,
    Proposal,
    Gate2,
    EscalatedValidation,
    Validation,
    Finalize,
}

/// What the pipeline has learned so far; the only input to transitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evidence {
    pub advisors_available: usize,
    pub mean_confidence: Option<f64>,
    pub proposal: Option<(Action, f64)>,
    /// A stage after gate 1 failed.
    pub failed: bool,
}

pub fn next_state(state: PipelineState, evidence: &Evidence, config: &PipelineConfig) -> PipelineState {
    use PipelineState::*;

    if evidence.failed {
        return Finalize;
    }
    match state {
        Start => Advisory,
        Advisory => Gate1,
        Gate1 => match evidence.mean_confidence {
            Some(mean) if evidence.advisors_available > 0 && mean >= config.threshold_low => {
                Synthesis
            }
            _ => Finalize,
        },
        Synthesis => Proposal,
        Proposal => match evidence.proposal {
            Some((Action::Hold, _)) | None => Finalize,
            Some(_) => Gate2,
        },
        Gate2 => match evidence.proposal {
            Some((_, confidence)) if confidence >= config.threshold_high => EscalatedValidation,
            _ => Validation,
        },
        Validation | EscalatedValidation | Finalize => Finalize,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed { kind: &'static str, detail: String },
}

/// Cost and latency of one completion stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub tier: CostTier,
    pub attempts: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub status: StageStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub decision: Decision,
    pub stages: Vec<StageReport>,
    pub issues: Vec<PipelineIssue>,
    /// Every state visited, `Start` through `Finalize`.
    pub trail: Vec<PipelineState>,
    /// The state the pipeline left for `Finalize`.
    pub final_state: PipelineState,
}

impl PipelineOutcome {
    pub fn total_cost(&self) -> f64 {
        self.stages.iter().map(|s| s.cost).sum()
    }
}

/// Results gathered while walking the machine.
#[derive(Default)]
struct Work {
    views: Vec<AnalystView>,
    synthesis: Option<SynthesisReport>,
    proposal: Option<TradeProposal>,
    verdicts: Vec<(StageKind, ValidationVerdict)>,
    stages: Vec<StageReport>,
    issues: Vec<PipelineIssue>,
}

pub struct Orchestrator {
    governor: Arc<Governor>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(governor: Arc<Governor>, config: PipelineConfig) -> Self {
        Orchestrator { governor, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    pub async fn run(
        &self,
        ctx: &DecisionContext,
        snapshot: &IndicatorSnapshot,
        signals: &[Signal],
        position: Option<&Position>,
    ) -> PipelineOutcome {
        let market = MarketContext {
            run_id: &ctx.run_id,
            symbol: &ctx.symbol,
            timestamp: ctx.timestamp,
            price: ctx.price,
            snapshot,
            signals,
            position,
        };
        let mut evidence = Evidence::default();
        let mut work = Work::default();
        let mut state = PipelineState::Start;
        let mut trail = vec![state];
        let mut final_state = state;

        while state != PipelineState::Finalize {
            match state {
                PipelineState::Advisory => self.advise(&market, &mut evidence, &mut work).await,
                PipelineState::Synthesis => {
                    let request = synthesis_request(&market, &work.views, &self.config.prompts);
                    if let Some(StageOutput::Synthesis(report)) = self
                        .stage(StageKind::Synthesis, request, CostTier::Strong, &mut evidence, &mut work)
                        .await
                    {
                        work.synthesis = Some(report);
                    }
                }
                PipelineState::Proposal => {
                    if let Some(synthesis) = work.synthesis.clone() {
                        let request = proposal_request(&market, &synthesis, &self.config.prompts);
                        if let Some(StageOutput::Proposal(proposal)) = self
                            .stage(StageKind::Proposal, request, CostTier::Strong, &mut evidence, &mut work)
                            .await
                        {
                            evidence.proposal = Some((proposal.action, proposal.confidence));
                            work.proposal = Some(proposal);
                        }
                    }
                }
                PipelineState::EscalatedValidation => {
                    let approved = self
                        .validate(&market, StageKind::RiskReview, &mut evidence, &mut work)
                        .await;
                    if approved {
                        self.validate(&market, StageKind::Validation, &mut evidence, &mut work)
                            .await;
                    }
                }
                PipelineState::Validation => {
                    self.validate(&market, StageKind::Validation, &mut evidence, &mut work)
                        .await;
                }
                PipelineState::Start | PipelineState::Gate1 | PipelineState::Gate2 => {}
                PipelineState::Finalize => break,
            }

            let next = next_state(state, &evidence, &self.config);
            debug!(run_id = %ctx.run_id, from = ?state, to = ?next, "pipeline transition");
            final_state = state;
            state = next;
            trail.push(state);
        }

        let decision = self.finalize(ctx, position, &evidence, &work);
        info!(
            run_id = %ctx.run_id,
            decision_id = decision.id(),
            action = %decision.action(),
            approved = decision.approved(),
            exited_from = ?final_state,
            stages = work.stages.len(),
            "advisory pipeline finished: {}",
            decision.reasoning()
        );
        PipelineOutcome {
            decision,
            stages: work.stages,
            issues: work.issues,
            trail,
            final_state,
        }
    }

    async fn advise(&self, market: &MarketContext<'_>, evidence: &mut Evidence, work: &mut Work) {
        let calls = self.config.advisors.iter().map(move |&role| {
            let request = analyst_request(market, role, &self.config.prompts);
            self.call(StageKind::Analyst(role), request, CostTier::Cheap)
        });
        let results = join_all(calls).await;

        for (output, report) in results {
            work.stages.push(report);
            match output {
                Ok(StageOutput::Analyst(view)) => work.views.push(view),
                Ok(_) => {}
                Err(e) => {
                    let stage = work.stages.last().map(|r| r.stage.clone()).unwrap_or_default();
                    warn!(run_id = %market.run_id, %stage, "advisor unavailable: {}", e);
                    work.issues.push(PipelineIssue::AdvisorUnavailable {
                        stage,
                        reason: e.to_string(),
                    });
                }
            }
        }

        evidence.advisors_available = work.views.len();
        if !work.views.is_empty() {
            let total: f64 = work.views.iter().map(|v| v.confidence).sum();
            evidence.mean_confidence = Some(total / work.views.len() as f64);
        }
        info!(
            run_id = %market.run_id,
            available = evidence.advisors_available,
            requested = self.config.advisors.len(),
            mean_confidence = evidence.mean_confidence.unwrap_or(0.0),
            threshold_low = self.config.threshold_low,
            "advisory stage complete"
        );
    }

    /// Run one sequential stage; a failure marks the evidence failed.
    async fn stage(
        &self,
        kind: StageKind,
        request: CompletionRequest,
        tier: CostTier,
        evidence: &mut Evidence,
        work: &mut Work,
    ) -> Option<StageOutput> {
        let (output, report) = self.call(kind, request, tier).await;
        work.stages.push(report);
        match output {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(stage = %kind, "stage failed: {}", e);
                work.issues.push(PipelineIssue::StageFailed {
                    stage: kind.to_string(),
                    cause: e.kind(),
                    reason: e.to_string(),
                });
                evidence.failed = true;
                None
            }
        }
    }

    /// Returns whether the verdict lets the trade through.
    async fn validate(
        &self,
        market: &MarketContext<'_>,
        kind: StageKind,
        evidence: &mut Evidence,
        work: &mut Work,
    ) -> bool {
        let Some(proposal) = work.proposal.clone() else {
            return false;
        };
        let request = validation_request(market, &proposal, kind, &self.config.prompts);
        match self
            .stage(kind, request, CostTier::Strong, evidence, work)
            .await
        {
            Some(StageOutput::Validation(verdict)) => {
                let passed = match &verdict {
                    ValidationVerdict::Reject { reason } => {
                        work.issues.push(PipelineIssue::ValidationRejected {
                            stage: kind.to_string(),
                            action: proposal.action,
                            reason: reason.clone(),
                        });
                        false
                    }
                    _ => true,
                };
                work.verdicts.push((kind, verdict));
                passed
            }
            _ => false,
        }
    }

    async fn call(
        &self,
        kind: StageKind,
        request: CompletionRequest,
        tier: CostTier,
    ) -> (Result<StageOutput, GovernorError>, StageReport) {
        let started = Instant::now();
        let mut report = StageReport {
            stage: kind.to_string(),
            tier,
            attempts: 0,
            tokens_in: 0,
            tokens_out: 0,
            cost: 0.0,
            latency_ms: 0,
            status: StageStatus::Completed,
        };

        let result = match self.governor.invoke(&request, tier).await {
            Ok(governed) => {
                report.attempts = governed.attempts;
                report.tokens_in = governed.response.tokens_in;
                report.tokens_out = governed.response.tokens_out;
                report.cost = governed.cost;
                parse_stage(kind, &governed.response.content).map_err(GovernorError::from)
            }
            Err(e) => Err(e),
        };
        report.latency_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = &result {
            report.status = StageStatus::Failed {
                kind: e.kind(),
                detail: e.to_string(),
            };
        }
        (result, report)
    }

    fn finalize(
        &self,
        ctx: &DecisionContext,
        position: Option<&Position>,
        evidence: &Evidence,
        work: &Work,
    ) -> Decision {
        let hold = |reason: String| ctx.hold(DecisionSource::Advisory, reason);

        if evidence.failed {
            let failures: Vec<String> = work.issues.iter().map(|i| i.to_string()).collect();
            return hold(format!("pipeline failed: {}", failures.join("; ")));
        }
        if evidence.advisors_available == 0 {
            return hold(format!(
                "no advisors available ({} requested)",
                self.config.advisors.len()
            ));
        }
        let mean = evidence.mean_confidence.unwrap_or(0.0);
        if mean < self.config.threshold_low {
            return hold(format!(
                "low conviction: mean advisor confidence {:.1} < {:.1}",
                mean, self.config.threshold_low
            ));
        }
        let Some(proposal) = &work.proposal else {
            return hold("no trade proposal".into());
        };
        if proposal.action == Action::Hold {
            return hold(format!("proposal: HOLD, {}", proposal.reasoning));
        }

        let mut quantity = proposal.quantity;
        for (kind, verdict) in &work.verdicts {
            match verdict {
                ValidationVerdict::Approve => {}
                ValidationVerdict::AdjustSize { quantity: adjusted } => quantity = Some(*adjusted),
                ValidationVerdict::Reject { reason } => {
                    return hold(format!("{} rejected {}: {}", kind, proposal.action, reason));
                }
            }
        }
        let validated = work
            .verdicts
            .iter()
            .any(|(kind, _)| *kind == StageKind::Validation);
        if !validated {
            return hold("proposal was not validated".into());
        }

        let held = position.filter(|p| p.is_open());
        match (proposal.action, held) {
            (Action::Buy, Some(p)) => {
                return hold(format!(
                    "BUY suppressed, position of {} already open in {}",
                    p.quantity, ctx.symbol
                ));
            }
            (Action::Sell, None) => {
                return hold(format!("SELL suppressed, no position in {}", ctx.symbol));
            }
            _ => {}
        }

        let summary = work
            .synthesis
            .as_ref()
            .map(|s| s.summary.as_str())
            .unwrap_or_default();
        ctx.seal(
            DecisionDraft {
                action: proposal.action,
                quantity,
                confidence: proposal.confidence / 100.0,
                reasoning: format!(
                    "{} (advisors {:.1}, proposal {:.0}): {} {}",
                    proposal.action, mean, proposal.confidence, summary, proposal.reasoning
                )
                .trim_end()
                .to_string(),
                approved: true,
            },
            DecisionSource::Advisory,
        )
    }
}
