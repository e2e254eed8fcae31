pub mod types;

pub mod anthropic;
pub mod local;
pub mod openai;
pub mod vision;

mod error;
mod json;
mod prompt;
mod rate_limit;
mod retry;

pub use error::ProviderError;
pub use json::extract_json;
pub use rate_limit::RateLimiter;
pub use types::*;

use async_trait::async_trait;

/// LLM-backed plan generation. Implementations own their HTTP client, rate
/// limiter, and retry policy; callers see only plans and typed errors.
#[async_trait]
pub trait PlannerProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_plan(
        &self,
        task: &str,
        context: &PlanContext,
    ) -> Result<ExecutionPlan, ProviderError>;
}

/// Decode a `{"steps": [...]}` payload (or a bare steps array) into a plan.
pub fn plan_from_value(value: serde_json::Value) -> Result<ExecutionPlan, ProviderError> {
    let steps_value = if value.is_array() {
        value
    } else {
        value.get("steps").cloned().unwrap_or(serde_json::json!([]))
    };
    let steps: Vec<PlanStep> =
        serde_json::from_value(steps_value).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(ExecutionPlan { steps })
}

/// Build the configured planner. `auto` prefers OpenAI, then Anthropic, then
/// the local provider, picking the first with usable credentials.
pub fn create_planner(
    config: &parallax_config::Config,
) -> Result<Box<dyn PlannerProvider>, ProviderError> {
    use parallax_config::ProviderKind;

    let kind = std::env::var("PARALLAX_PROVIDER")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(config.provider.default);

    match kind {
        ProviderKind::Openai => Ok(Box::new(openai::OpenAiPlanner::from_config(config)?)),
        ProviderKind::Anthropic => Ok(Box::new(anthropic::AnthropicPlanner::from_config(config)?)),
        ProviderKind::Local => Ok(Box::new(local::LocalPlanner::from_config(config))),
        ProviderKind::Auto => {
            if let Ok(planner) = openai::OpenAiPlanner::from_config(config) {
                tracing::debug!("auto provider selected openai");
                return Ok(Box::new(planner));
            }
            if let Ok(planner) = anthropic::AnthropicPlanner::from_config(config) {
                tracing::debug!("auto provider selected anthropic");
                return Ok(Box::new(planner));
            }
            tracing::debug!("auto provider fell back to local");
            Ok(Box::new(local::LocalPlanner::from_config(config)))
        }
    }
}
