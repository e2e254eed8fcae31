use async_trait::async_trait;
use serde_json::json;

use crate::json::extract_json;
use crate::prompt::{build_user_prompt, PLANNER_SYSTEM_PROMPT};
use crate::rate_limit::RateLimiter;
use crate::retry::with_retry;
use crate::types::{ExecutionPlan, PlanContext};
use crate::{plan_from_value, PlannerProvider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const API_VERSION: &str = "2023-06-01";
const CLOUD_CALLS_PER_MINUTE: u32 = 50;

pub struct AnthropicPlanner {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout_ms: u64,
    limiter: RateLimiter,
}

impl AnthropicPlanner {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        planner: &parallax_config::PlannerConfig,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_millis(planner.timeout_ms))
                .build()
                .unwrap_or_default(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: planner.max_tokens,
            temperature: planner.temperature,
            timeout_ms: planner.timeout_ms,
            limiter: RateLimiter::per_minute(CLOUD_CALLS_PER_MINUTE),
        }
    }

    pub fn from_config(config: &parallax_config::Config) -> Result<Self, ProviderError> {
        let entry = config
            .provider
            .entry(parallax_config::ProviderKind::Anthropic);
        let api_key = entry
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| ProviderError::MissingCredentials("anthropic".into()))?;
        Ok(Self::new(
            api_key,
            entry.base_url.clone(),
            entry.model.clone(),
            &config.planner,
        ))
    }

    async fn request_plan(
        &self,
        task: &str,
        context: &PlanContext,
    ) -> Result<ExecutionPlan, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": PLANNER_SYSTEM_PROMPT,
            "messages": [
                {"role": "user", "content": build_user_prompt(task, context)},
            ],
        });

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_http(
                status.as_u16(),
                body,
                retry_after.as_deref(),
            ));
        }

        let data: serde_json::Value = resp.json().await?;
        let content: String = data["content"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        plan_from_value(extract_json(&content)?)
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            return ProviderError::Timeout {
                timeout_ms: self.timeout_ms,
            };
        }
        err.into()
    }
}

#[async_trait]
impl PlannerProvider for AnthropicPlanner {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate_plan(
        &self,
        task: &str,
        context: &PlanContext,
    ) -> Result<ExecutionPlan, ProviderError> {
        self.limiter.acquire().await;
        with_retry("anthropic_plan", || self.request_plan(task, context)).await
    }
}
