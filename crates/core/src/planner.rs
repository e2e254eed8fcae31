use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use serde_json::json;

use parallax_provider::PlannerProvider;

use crate::constitution::{AgentConstitution, FailureStore};
use crate::metrics;
use crate::rules::planner_constitution;
use crate::schemas::{ExecutionPlan, PlanContext};
use crate::strategy::StrategyGenerator;

/// Agent A1: turns a natural-language task into a validated execution plan.
/// Failure patterns learned from persisted reports are threaded into the
/// provider context as read-only snapshots.
pub struct Planner {
    provider: Arc<dyn PlannerProvider>,
    failure_store: Option<Arc<FailureStore>>,
    strategy_generator: Option<Arc<Mutex<StrategyGenerator>>>,
    constitution: AgentConstitution<String, ExecutionPlan>,
}

impl Planner {
    pub fn new(provider: Arc<dyn PlannerProvider>) -> Self {
        Self {
            provider,
            failure_store: None,
            strategy_generator: None,
            constitution: planner_constitution(),
        }
    }

    pub fn with_failure_store(mut self, store: Arc<FailureStore>) -> Self {
        self.failure_store = Some(store);
        self
    }

    pub fn with_strategy_generator(mut self, generator: Arc<Mutex<StrategyGenerator>>) -> Self {
        self.strategy_generator = Some(generator);
        self
    }

    pub async fn plan(&self, task: &str, mut context: PlanContext) -> Result<ExecutionPlan> {
        if let Some(generator) = &self.strategy_generator {
            let patterns = generator.lock().unwrap().analyze_failures(20);
            if !patterns_empty(&patterns) {
                context.failure_patterns = Some(patterns);
                context.use_strategies = true;
            }
        }

        let plan = self.provider.generate_plan(task, &context).await?;

        // Rough accounting: one token per four characters of task + plan.
        let plan_chars: usize = serde_json::to_string(&plan).map(|s| s.len()).unwrap_or(0);
        metrics::registry().llm_tokens.observe(((task.len() + plan_chars) / 4) as f64);

        let mut validation_context = serde_json::Map::new();
        validation_context.insert("task".into(), json!(task));
        if let Some(url) = &context.start_url {
            validation_context.insert("start_url".into(), json!(url));
        }
        validation_context.insert("retry".into(), json!(context.retry));

        let report =
            self.constitution
                .validate(&task.to_string(), &plan, validation_context.clone());
        if !report.passed {
            tracing::error!(
                agent = self.constitution.agent_name,
                failures = ?report.failures.iter().map(|f| f.rule_name.as_str()).collect::<Vec<_>>(),
                "constitution failed"
            );
            if let Some(store) = &self.failure_store {
                store.save(&report);
            }
            self.constitution
                .must_pass(&task.to_string(), &plan, validation_context)?;
        } else if !report.warnings.is_empty() {
            tracing::warn!(
                agent = self.constitution.agent_name,
                warnings = ?report.warnings.iter().map(|w| w.rule_name.as_str()).collect::<Vec<_>>(),
                "constitution warnings"
            );
            if let Some(store) = &self.failure_store {
                store.save(&report);
            }
        }

        Ok(plan)
    }
}

fn patterns_empty(patterns: &serde_json::Value) -> bool {
    patterns
        .as_object()
        .map(|o| o.values().all(|v| v.as_array().map(|a| a.is_empty()).unwrap_or(true)))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parallax_provider::{PlanStep, ProviderError};

    struct CannedPlanner {
        plan: ExecutionPlan,
    }

    #[async_trait]
    impl PlannerProvider for CannedPlanner {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate_plan(
            &self,
            _task: &str,
            _context: &PlanContext,
        ) -> Result<ExecutionPlan, ProviderError> {
            Ok(self.plan.clone())
        }
    }

    #[tokio::test]
    async fn valid_plan_passes_through() {
        let provider = Arc::new(CannedPlanner {
            plan: ExecutionPlan {
                steps: vec![PlanStep::navigate("https://example.com")],
            },
        });
        let planner = Planner::new(provider);
        let plan = planner.plan("visit example", PlanContext::default()).await.unwrap();
        assert_eq!(plan.steps.len(), 1);
    }

    #[tokio::test]
    async fn empty_plan_raises_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FailureStore::new(dir.path()).unwrap());
        let provider = Arc::new(CannedPlanner {
            plan: ExecutionPlan::default(),
        });
        let planner = Planner::new(provider).with_failure_store(store.clone());

        let err = planner
            .plan("do nothing", PlanContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("plan_non_empty"));
        assert_eq!(store.failures(None, 10).len(), 1);
    }
}
