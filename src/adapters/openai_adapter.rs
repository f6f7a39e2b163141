//! OpenAI-compatible chat completions adapter.
//!
//! Cheap and strong tiers map to two model names on the same endpoint.
//! HTTP failures are classified for the governor: 429 is rate limiting,
//! 5xx and network timeouts are transient, anything else is fatal.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::domain::budget::CostTier;
use crate::domain::error::{CompletionError, TradeloomError};
use crate::ports::completion_port::{CompletionPort, CompletionRequest, CompletionResponse};
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub cheap_model: String,
    pub strong_model: String,
}

impl OpenAiConfig {
    /// Reads `[llm]`; the key itself comes from the environment variable
    /// named by `api_key_env`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradeloomError> {
        let get = |key: &str| {
            config
                .get_string("llm", key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| TradeloomError::ConfigMissing {
                    section: "llm".into(),
                    key: key.into(),
                })
        };
        let key_env = config
            .get_string("llm", "api_key_env")
            .unwrap_or_else(|| "OPENAI_API_KEY".to_string());
        let api_key = std::env::var(&key_env).map_err(|_| TradeloomError::ConfigInvalid {
            section: "llm".into(),
            key: "api_key_env".into(),
            reason: format!("environment variable {} is not set", key_env),
        })?;

        Ok(OpenAiConfig {
            base_url: get("base_url")?.trim_end_matches('/').to_string(),
            api_key,
            cheap_model: get("cheap_model")?,
            strong_model: get("strong_model")?,
        })
    }

    pub fn model(&self, tier: CostTier) -> &str {
        match tier {
            CostTier::Cheap => &self.cheap_model,
            CostTier::Strong => &self.strong_model,
        }
    }
}

pub struct OpenAiAdapter {
    client: Client,
    cfg: OpenAiConfig,
}

impl OpenAiAdapter {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }
}

fn request_body(model: &str, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": request.system},
            {"role": "user", "content": request.prompt}
        ],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "response_format": {"type": "json_object"}
    })
}

fn classify_status(status: StatusCode, body: &str) -> CompletionError {
    let reason = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        CompletionError::RateLimited { reason }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        CompletionError::Transient { reason }
    } else {
        CompletionError::Fatal { reason }
    }
}

fn classify_transport(err: &reqwest::Error) -> CompletionError {
    let reason = err.to_string();
    if err.is_timeout() || err.is_connect() || err.is_request() {
        CompletionError::Transient { reason }
    } else {
        CompletionError::Fatal { reason }
    }
}

fn parse_response(body: &Value) -> Result<CompletionResponse, CompletionError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| CompletionError::Fatal {
            reason: "no content in completion response".into(),
        })?;
    Ok(CompletionResponse {
        content: content.to_string(),
        tokens_in: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        tokens_out: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    })
}

#[async_trait]
impl CompletionPort for OpenAiAdapter {
    async fn complete(
        &self,
        request: &CompletionRequest,
        tier: CostTier,
    ) -> Result<CompletionResponse, CompletionError> {
        let model = self.cfg.model(tier);
        let url = format!("{}/chat/completions", self.cfg.base_url);
        info!(stage = %request.stage, %tier, model, "calling completion service");

        let res = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.cfg.api_key))
            .json(&request_body(model, request))
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let body: Value = res.json().await.map_err(|e| CompletionError::Transient {
            reason: format!("unreadable completion body: {}", e),
        })?;
        let response = parse_response(&body)?;
        debug!(
            stage = %request.stage,
            tokens_in = response.tokens_in,
            tokens_out = response.tokens_out,
            "completion received"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn request() -> CompletionRequest {
        CompletionRequest {
            run_id: "live-1".into(),
            stage: "synthesis".into(),
            system: "sys".into(),
            prompt: "user".into(),
            max_tokens: 600,
            temperature: 0.0,
        }
    }

    #[test]
    fn body_carries_model_messages_and_limits() {
        let body = request_body("gpt-4o", &request());
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
        assert_eq!(body["max_tokens"], 600);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            CompletionError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            CompletionError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            CompletionError::Fatal { .. }
        ));
    }

    #[test]
    fn response_content_and_usage_are_extracted() {
        let body = json!({
            "choices": [{"message": {"content": "{\"signal\":\"bullish\"}"}}],
            "usage": {"prompt_tokens": 321, "completion_tokens": 45}
        });
        let response = parse_response(&body).unwrap();
        assert_eq!(response.content, "{\"signal\":\"bullish\"}");
        assert_eq!(response.tokens_in, 321);
        assert_eq!(response.tokens_out, 45);
    }

    #[test]
    fn missing_usage_counts_as_zero() {
        let body = json!({"choices": [{"message": {"content": "{}"}}]});
        let response = parse_response(&body).unwrap();
        assert_eq!(response.tokens_in, 0);
    }

    #[test]
    fn missing_content_is_fatal() {
        let body = json!({"choices": []});
        assert!(matches!(
            parse_response(&body),
            Err(CompletionError::Fatal { .. })
        ));
    }

    #[test]
    fn config_reads_models_and_key_env() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("TRADELOOM_TEST_KEY_A", "sk-test") };
        let config = FileConfigAdapter::from_string(
            "[llm]\nbase_url = https://api.example.com/v1/\napi_key_env = TRADELOOM_TEST_KEY_A\ncheap_model = small\nstrong_model = large\n",
        )
        .unwrap();
        let cfg = OpenAiConfig::from_config(&config).unwrap();
        assert_eq!(cfg.base_url, "https://api.example.com/v1");
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.model(CostTier::Cheap), "small");
        assert_eq!(cfg.model(CostTier::Strong), "large");
    }

    #[test]
    fn unset_key_env_is_invalid_config() {
        let config = FileConfigAdapter::from_string(
            "[llm]\nbase_url = https://api.example.com/v1\napi_key_env = TRADELOOM_TEST_KEY_UNSET\ncheap_model = a\nstrong_model = b\n",
        )
        .unwrap();
        let err = OpenAiConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "api_key_env"));
    }
}
