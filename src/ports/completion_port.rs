//! LLM completion service port trait.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::budget::CostTier;
use crate::domain::error::CompletionError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub run_id: String,
    /// Pipeline stage label, e.g. `advisor:technical` or `synthesis`.
    pub stage: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

#[async_trait]
pub trait CompletionPort: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        tier: CostTier,
    ) -> Result<CompletionResponse, CompletionError>;
}
