//! Budget and retry governor in front of the completion service.
//!
//! Every call goes through [`Governor::invoke`]: a pre-dispatch budget check,
//! a bounded timeout, classification of the outcome, and retry with backoff.
//! Each attempt is logged and recorded in the ledger's cost log, so the log
//! always sums to the ledger counters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::budget::{BudgetLedger, CallOutcome, CostLogEntry, CostTier, TierPricing};
use crate::domain::error::{CompletionError, GovernorError};
use crate::domain::retry::{FailureClass, RetryPolicy, Sleeper, TokioSleeper};
use crate::ports::completion_port::{CompletionPort, CompletionRequest, CompletionResponse};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorConfig {
    pub retry: RetryPolicy,
    pub cheap: TierPricing,
    pub strong: TierPricing,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        GovernorConfig {
            retry: RetryPolicy::default(),
            cheap: TierPricing {
                input_per_1k: 0.00015,
                output_per_1k: 0.0006,
            },
            strong: TierPricing {
                input_per_1k: 0.0025,
                output_per_1k: 0.01,
            },
        }
    }
}

/// A successful completion plus what it took to get it.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernedResponse {
    pub response: CompletionResponse,
    pub attempts: u32,
    pub cost: f64,
    pub latency: Duration,
}

pub struct Governor {
    completion: Arc<dyn CompletionPort>,
    ledger: Arc<BudgetLedger>,
    config: GovernorConfig,
    sleeper: Arc<dyn Sleeper>,
}

/// Rough prompt size: four characters per token.
pub fn estimate_prompt_tokens(request: &CompletionRequest) -> u64 {
    ((request.system.chars().count() + request.prompt.chars().count()) / 4) as u64
}

impl Governor {
    pub fn new(
        completion: Arc<dyn CompletionPort>,
        ledger: Arc<BudgetLedger>,
        config: GovernorConfig,
    ) -> Self {
        Governor {
            completion,
            ledger,
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    pub fn pricing(&self, tier: CostTier) -> TierPricing {
        match tier {
            CostTier::Cheap => self.config.cheap,
            CostTier::Strong => self.config.strong,
        }
    }

    /// Worst-case tokens and cost: the prompt plus a full `max_tokens` reply.
    pub fn estimate(&self, request: &CompletionRequest, tier: CostTier) -> (u64, f64) {
        let prompt_tokens = estimate_prompt_tokens(request);
        let reply_tokens = u64::from(request.max_tokens);
        let cost = self.pricing(tier).cost(prompt_tokens, reply_tokens);
        (prompt_tokens + reply_tokens, cost)
    }

    pub async fn invoke(
        &self,
        request: &CompletionRequest,
        tier: CostTier,
    ) -> Result<GovernedResponse, GovernorError> {
        let policy = self.config.retry;
        let (estimated_tokens, estimated_cost) = self.estimate(request, tier);
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if let Err(e) = self.ledger.check(estimated_tokens, estimated_cost, Utc::now()) {
                warn!(
                    run_id = %request.run_id,
                    stage = %request.stage,
                    %tier,
                    estimated_tokens,
                    estimated_cost,
                    "call refused before dispatch: {}",
                    e
                );
                return Err(e);
            }

            let call_started = Instant::now();
            let result =
                tokio::time::timeout(policy.timeout, self.completion.complete(request, tier)).await;
            let latency = call_started.elapsed();

            let (outcome, class, reason) = match result {
                Ok(Ok(response)) => {
                    let cost = self.pricing(tier).cost(response.tokens_in, response.tokens_out);
                    self.record(
                        request,
                        tier,
                        attempt,
                        (response.tokens_in, response.tokens_out),
                        (estimated_cost, cost),
                        latency,
                        CallOutcome::Success,
                    );
                    return Ok(GovernedResponse {
                        response,
                        attempts: attempt,
                        cost,
                        latency: started.elapsed(),
                    });
                }
                Ok(Err(CompletionError::Fatal { reason })) => {
                    self.record(
                        request,
                        tier,
                        attempt,
                        (0, 0),
                        (estimated_cost, 0.0),
                        latency,
                        CallOutcome::Fatal,
                    );
                    return Err(GovernorError::Fatal { reason });
                }
                Ok(Err(CompletionError::RateLimited { reason })) => {
                    (CallOutcome::RateLimited, FailureClass::RateLimited, reason)
                }
                Ok(Err(CompletionError::Transient { reason })) => {
                    (CallOutcome::Transient, FailureClass::Transient, reason)
                }
                Err(_) => (
                    CallOutcome::Timeout,
                    FailureClass::RateLimited,
                    format!("no reply within {:?}", policy.timeout),
                ),
            };

            self.record(
                request,
                tier,
                attempt,
                (0, 0),
                (estimated_cost, 0.0),
                latency,
                outcome,
            );

            if !policy.should_retry(attempt) {
                return Err(match class {
                    FailureClass::RateLimited => GovernorError::RateLimited { attempts: attempt },
                    FailureClass::Transient => GovernorError::RetriesExhausted {
                        attempts: attempt,
                        reason,
                    },
                });
            }

            let delay = policy.delay_for(attempt, class);
            warn!(
                run_id = %request.run_id,
                stage = %request.stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after {}: {}",
                outcome,
                reason
            );
            self.sleeper.sleep(delay).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        request: &CompletionRequest,
        tier: CostTier,
        attempt: u32,
        (tokens_in, tokens_out): (u64, u64),
        (estimated_cost, cost): (f64, f64),
        latency: Duration,
        outcome: CallOutcome,
    ) {
        let latency_ms = latency.as_millis() as u64;
        info!(
            run_id = %request.run_id,
            stage = %request.stage,
            %tier,
            attempt,
            tokens_in,
            tokens_out,
            estimated_cost,
            cost,
            latency_ms,
            %outcome,
            "completion call"
        );
        self.ledger.record(CostLogEntry {
            run_id: request.run_id.clone(),
            stage: request.stage.clone(),
            tier,
            attempt,
            tokens_in,
            tokens_out,
            estimated_cost,
            cost,
            latency_ms,
            outcome,
            timestamp: Utc::now(),
        });
    }
}

/// Completion service stand-in for unit tests: replies are scripted per stage
/// and every call is recorded.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    type Reply = Result<CompletionResponse, CompletionError>;

    #[derive(Default)]
    pub(crate) struct ScriptedCompletion {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<(String, CostTier)>>,
        pub(crate) stall: Option<Duration>,
    }

    pub(crate) fn ok(content: &str) -> Reply {
        Ok(CompletionResponse {
            content: content.to_string(),
            tokens_in: 100,
            tokens_out: 50,
        })
    }

    impl ScriptedCompletion {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn script(self, stage: &str, reply: Reply) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(stage.to_string())
                .or_default()
                .push_back(reply);
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, CostTier)> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn calls_for(&self, stage: &str) -> usize {
            self.calls().iter().filter(|(s, _)| s == stage).count()
        }
    }

    #[async_trait]
    impl CompletionPort for ScriptedCompletion {
        async fn complete(
            &self,
            request: &CompletionRequest,
            tier: CostTier,
        ) -> Result<CompletionResponse, CompletionError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.stage.clone(), tier));
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            self.replies
                .lock()
                .unwrap()
                .get_mut(&request.stage)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| {
                    Err(CompletionError::Fatal {
                        reason: format!("no scripted reply for {}", request.stage),
                    })
                })
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub(crate) fn delays(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingSleeper, ScriptedCompletion, ok};
    use super::*;
    use crate::domain::budget::BudgetLimits;

    fn request(stage: &str) -> CompletionRequest {
        CompletionRequest {
            run_id: "run".into(),
            stage: stage.into(),
            system: "system".into(),
            prompt: "x".repeat(400),
            max_tokens: 200,
            temperature: 0.0,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            rate_limit_base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn governor(
        completion: Arc<ScriptedCompletion>,
        limits: BudgetLimits,
    ) -> (Governor, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let ledger = Arc::new(BudgetLedger::new(limits, Utc::now()));
        let config = GovernorConfig {
            retry: policy(),
            ..GovernorConfig::default()
        };
        let governor = Governor::new(completion, ledger, config).with_sleeper(sleeper.clone());
        (governor, sleeper)
    }

    fn rate_limited() -> Result<CompletionResponse, CompletionError> {
        Err(CompletionError::RateLimited {
            reason: "429".into(),
        })
    }

    #[test]
    fn estimate_counts_prompt_and_reply() {
        let completion = Arc::new(ScriptedCompletion::new());
        let (governor, _) = governor(completion, BudgetLimits::default());
        let (tokens, cost) = governor.estimate(&request("s"), CostTier::Strong);
        assert_eq!(tokens, 101 + 200);
        assert!(cost > 0.0);
    }

    #[tokio::test]
    async fn success_records_one_entry() {
        let completion = Arc::new(ScriptedCompletion::new().script("s", ok("{}")));
        let (governor, sleeper) = governor(completion.clone(), BudgetLimits::default());
        let reply = governor.invoke(&request("s"), CostTier::Cheap).await.unwrap();
        assert_eq!(reply.attempts, 1);
        assert_eq!(reply.response.content, "{}");
        assert!(sleeper.delays().is_empty());
        let entries = governor.ledger().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, CallOutcome::Success);
        assert_eq!(entries[0].tokens_in, 100);
    }

    #[tokio::test]
    async fn budget_exceeded_never_dispatches() {
        let completion = Arc::new(ScriptedCompletion::new().script("s", ok("{}")));
        let limits = BudgetLimits {
            daily_token_limit: 100,
            daily_cost_limit: 0.0,
        };
        let (governor, _) = governor(completion.clone(), limits);
        let err = governor.invoke(&request("s"), CostTier::Strong).await.unwrap_err();
        assert_eq!(err.kind(), "budget_exceeded");
        assert!(completion.calls().is_empty());
        assert!(governor.ledger().entries().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_retries_with_larger_backoff() {
        let completion = Arc::new(
            ScriptedCompletion::new()
                .script("s", rate_limited())
                .script("s", rate_limited())
                .script("s", ok("done")),
        );
        let (governor, sleeper) = governor(completion.clone(), BudgetLimits::default());
        let reply = governor.invoke(&request("s"), CostTier::Cheap).await.unwrap();
        assert_eq!(reply.attempts, 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(governor.ledger().entries().len(), 3);
    }

    #[tokio::test]
    async fn transient_retries_use_generic_base() {
        let completion = Arc::new(
            ScriptedCompletion::new()
                .script(
                    "s",
                    Err(CompletionError::Transient {
                        reason: "502".into(),
                    }),
                )
                .script("s", ok("done")),
        );
        let (governor, sleeper) = governor(completion, BudgetLimits::default());
        governor.invoke(&request("s"), CostTier::Cheap).await.unwrap();
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(10)]);
    }

    #[tokio::test]
    async fn exhausted_rate_limits_surface_typed_error() {
        let completion = Arc::new(
            ScriptedCompletion::new()
                .script("s", rate_limited())
                .script("s", rate_limited())
                .script("s", rate_limited()),
        );
        let (governor, sleeper) = governor(completion.clone(), BudgetLimits::default());
        let err = governor.invoke(&request("s"), CostTier::Cheap).await.unwrap_err();
        assert_eq!(err, GovernorError::RateLimited { attempts: 3 });
        assert_eq!(completion.calls_for("s"), 3);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let completion = Arc::new(ScriptedCompletion::new().script(
            "s",
            Err(CompletionError::Fatal {
                reason: "400".into(),
            }),
        ));
        let (governor, sleeper) = governor(completion.clone(), BudgetLimits::default());
        let err = governor.invoke(&request("s"), CostTier::Strong).await.unwrap_err();
        assert_eq!(err.kind(), "fatal");
        assert_eq!(completion.calls_for("s"), 1);
        assert!(sleeper.delays().is_empty());
        assert_eq!(governor.ledger().entries()[0].outcome, CallOutcome::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_treated_as_rate_limit() {
        let mut completion = ScriptedCompletion::new();
        completion.stall = Some(Duration::from_secs(60));
        let completion = Arc::new(completion);
        let (governor, sleeper) = governor(completion.clone(), BudgetLimits::default());
        let err = governor.invoke(&request("s"), CostTier::Cheap).await.unwrap_err();
        assert_eq!(err, GovernorError::RateLimited { attempts: 3 });
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        let outcomes: Vec<CallOutcome> =
            governor.ledger().entries().iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec![CallOutcome::Timeout; 3]);
    }

    #[tokio::test]
    async fn ledger_counters_match_cost_log() {
        let completion = Arc::new(
            ScriptedCompletion::new()
                .script("a", rate_limited())
                .script("a", ok("1"))
                .script("b", ok("2")),
        );
        let (governor, _) = governor(completion, BudgetLimits::default());
        governor.invoke(&request("a"), CostTier::Cheap).await.unwrap();
        governor.invoke(&request("b"), CostTier::Strong).await.unwrap();
        let entries = governor.ledger().entries();
        let usage = governor.ledger().usage(Utc::now());
        let tokens: u64 = entries.iter().map(|e| e.tokens_in + e.tokens_out).sum();
        let cost: f64 = entries.iter().map(|e| e.cost).sum();
        assert_eq!(tokens, usage.tokens);
        assert!((cost - usage.cost).abs() < 1e-12);
    }
}
