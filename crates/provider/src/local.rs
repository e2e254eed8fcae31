use async_trait::async_trait;
use serde_json::json;

use crate::json::extract_json;
use crate::prompt::{build_user_prompt, PLANNER_SYSTEM_PROMPT};
use crate::rate_limit::RateLimiter;
use crate::types::{ExecutionPlan, PlanContext, PlanStep};
use crate::{plan_from_value, PlannerProvider, ProviderError};

const DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1:8b";
const LOCAL_CALLS_PER_MINUTE: u32 = 30;

/// Ollama-backed planner. Small local models produce malformed JSON often
/// enough that any parse failure degrades to a single-step navigate plan
/// instead of failing the attempt.
pub struct LocalPlanner {
    client: reqwest::Client,
    host: String,
    model: String,
    limiter: RateLimiter,
}

impl LocalPlanner {
    pub fn new(
        host: Option<String>,
        model: Option<String>,
        planner: &parallax_config::PlannerConfig,
    ) -> Self {
        // Local models are slow; double the cloud timeout.
        let timeout_ms = planner.timeout_ms * 2;
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            host: host
                .or_else(|| std::env::var("OLLAMA_HOST").ok())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            model: model
                .or_else(|| std::env::var("LOCAL_MODEL").ok())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            limiter: RateLimiter::per_minute(LOCAL_CALLS_PER_MINUTE),
        }
    }

    pub fn from_config(config: &parallax_config::Config) -> Self {
        let entry = config.provider.entry(parallax_config::ProviderKind::Local);
        Self::new(entry.base_url.clone(), entry.model.clone(), &config.planner)
    }

    fn fallback_plan(context: &PlanContext) -> ExecutionPlan {
        let url = context
            .start_url
            .clone()
            .unwrap_or_else(|| "https://example.com".to_string());
        ExecutionPlan {
            steps: vec![PlanStep::navigate(url)],
        }
    }

    async fn request_plan(
        &self,
        task: &str,
        context: &PlanContext,
    ) -> Result<ExecutionPlan, ProviderError> {
        let prompt = format!(
            "{PLANNER_SYSTEM_PROMPT}\n\n{}",
            build_user_prompt(task, context)
        );
        let resp = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_http(status.as_u16(), body, None));
        }

        let data: serde_json::Value = resp.json().await?;
        let content = data["response"].as_str().unwrap_or("");
        let plan = plan_from_value(extract_json(content)?)?;
        if plan.steps.is_empty() {
            return Err(ProviderError::Parse("plan had no steps".into()));
        }
        Ok(plan)
    }
}

#[async_trait]
impl PlannerProvider for LocalPlanner {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate_plan(
        &self,
        task: &str,
        context: &PlanContext,
    ) -> Result<ExecutionPlan, ProviderError> {
        self.limiter.acquire().await;
        match self.request_plan(task, context).await {
            Ok(plan) => Ok(plan),
            Err(err) => {
                tracing::warn!(error = %err, "local planner failed, using fallback plan");
                Ok(Self::fallback_plan(context))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;

    #[test]
    fn fallback_is_a_single_navigate() {
        let ctx = PlanContext {
            start_url: Some("https://wikipedia.org".into()),
            ..Default::default()
        };
        let plan = LocalPlanner::fallback_plan(&ctx);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, Action::Navigate);
        assert_eq!(plan.steps[0].target.as_deref(), Some("https://wikipedia.org"));
    }
}
