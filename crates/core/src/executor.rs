use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::constitution::{
    AgentConstitution, ConstitutionReport, ConstitutionViolation, FailureStore, ValidationFailure,
};
use crate::driver::{Page, TextMatch};
use crate::error::LocatorError;
use crate::locator::LocatorResolver;
use crate::observer::Observer;
use crate::rules::executor_constitution;
use crate::schemas::{Action, ExecutionPlan, PlanStep};
use crate::strategy::StrategyGenerator;

const SCROLL_INTO_VIEW_TIMEOUT_MS: u64 = 5000;
const POST_SCROLL_SETTLE_MS: u64 = 200;

/// What execution left behind, fed to the executor constitution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub final_url: String,
    pub action_count: u32,
    pub action_budget: u32,
    pub start_url: String,
}

/// Context mutations computed by the heal pass. These influence the next
/// attempt only; the current attempt's plan is never touched.
#[derive(Debug, Default)]
pub struct HealAdjustments {
    pub start_url: Option<String>,
    pub action_budget: Option<u32>,
    pub requires_auth: bool,
    pub improved_steps: Vec<PlanStep>,
    pub notes: Vec<String>,
}

impl HealAdjustments {
    pub fn is_empty(&self) -> bool {
        self.start_url.is_none()
            && self.action_budget.is_none()
            && !self.requires_auth
            && self.improved_steps.is_empty()
    }
}

pub type ProgressCallback = Box<dyn Fn(usize, usize, &PlanStep) + Send + Sync>;

/// Agent A2: executes plan steps in order, resolving elements through the
/// locator cascade and observing the page after every step, failed or not.
pub struct Executor {
    page: Arc<dyn Page>,
    resolver: LocatorResolver,
    default_wait_ms: u64,
    scroll_margin_px: u32,
    action_count: u32,
    locator_failures: Vec<(PlanStep, String)>,
    failure_store: Option<Arc<FailureStore>>,
    strategy_generator: Option<Arc<Mutex<StrategyGenerator>>>,
    progress: Option<ProgressCallback>,
    constitution: AgentConstitution<ExecutionPlan, ExecutionOutcome>,
}

enum StepError {
    /// Element never resolved; the step is marked failed and execution
    /// continues.
    Locator(LocatorError),
    /// Driver-level failure (target closed, navigation crashed); execution
    /// stops and the finalize pass reports it.
    Driver(anyhow::Error),
}

impl Executor {
    pub fn new(page: Arc<dyn Page>, navigation: &parallax_config::NavigationConfig) -> Self {
        Self {
            resolver: LocatorResolver::new(page.clone()),
            page,
            default_wait_ms: navigation.default_wait_ms,
            scroll_margin_px: navigation.scroll_margin_px,
            action_count: 0,
            locator_failures: Vec::new(),
            failure_store: None,
            strategy_generator: None,
            progress: None,
            constitution: executor_constitution(navigation.auth_redirect_critical),
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

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn action_count(&self) -> u32 {
        self.action_count
    }

    /// Run steps in order up to the action budget. Each step, success or
    /// failure, is observed before the next begins. Cancellation is checked
    /// between steps.
    pub async fn execute(
        &mut self,
        plan: &ExecutionPlan,
        observer: &mut Observer,
        action_budget: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let total = plan.steps.len();
        for (index, step) in plan.steps.iter().enumerate() {
            if self.action_count >= action_budget {
                tracing::warn!(action_budget, "action budget exhausted");
                break;
            }
            if cancel.is_cancelled() {
                tracing::info!("execution cancelled");
                break;
            }

            let result = self.run_step(step).await;
            self.action_count += 1;

            let description = match &result {
                Ok(()) => step.describe(),
                Err(_) => format!("[FAILED] {}", step.describe()),
            };
            observer.observe(Some(&description)).await?;

            if let Some(progress) = &self.progress {
                progress(index + 1, total, step);
            }

            match result {
                Ok(()) => {}
                Err(StepError::Locator(err)) => {
                    tracing::warn!(step = %step.describe(), error = %err, "locator failure");
                    self.locator_failures
                        .push((step.clone(), err.to_string()));
                }
                Err(StepError::Driver(err)) => {
                    tracing::error!(step = %step.describe(), error = %err, "driver failure");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn run_step(&self, step: &PlanStep) -> std::result::Result<(), StepError> {
        match &step.action {
            Action::Navigate => {
                let target = step.target.as_deref().unwrap_or_default();
                if strip_fragment(&self.page.url()) == strip_fragment(target) {
                    // Fragment-only changes are a no-op.
                    return Ok(());
                }
                self.page.goto(target).await.map_err(StepError::Driver)?;
                self.page
                    .wait_for_load_state()
                    .await
                    .map_err(StepError::Driver)?;
                self.settle().await;
                Ok(())
            }
            Action::Click => self.with_element(step, |el| async move { el.click().await }).await,
            Action::DoubleClick => {
                self.with_element(step, |el| async move { el.double_click().await })
                    .await
            }
            Action::RightClick => {
                self.with_element(step, |el| async move { el.right_click().await })
                    .await
            }
            Action::Hover => {
                let element = self.resolver.resolve(step).await.map_err(StepError::Locator)?;
                element.hover().await.map_err(StepError::Driver)
            }
            Action::Type => {
                let value = step.value.as_deref().unwrap_or_default().to_string();
                self.with_element(step, move |el| async move { el.type_text(&value).await })
                    .await
            }
            Action::Fill => {
                let value = step.value.as_deref().unwrap_or_default().to_string();
                self.with_element(step, move |el| async move { el.fill(&value).await })
                    .await
            }
            Action::Submit => {
                match self.resolver.resolve(step).await {
                    Ok(element) => element.click().await.map_err(StepError::Driver)?,
                    // No clickable submit control: press Enter on the form.
                    Err(_) => self
                        .page
                        .press_key("Enter")
                        .await
                        .map_err(StepError::Driver)?,
                }
                self.settle().await;
                Ok(())
            }
            Action::Select => {
                let value = step
                    .value
                    .as_deref()
                    .or(step.option_value.as_deref())
                    .unwrap_or_default()
                    .to_string();
                self.with_element(step, move |el| async move { el.select_option(&value).await })
                    .await
            }
            Action::Drag => {
                let start = self
                    .page
                    .locator(step.start_selector.as_deref().unwrap_or_default());
                if start.count().await.map_err(StepError::Driver)? == 0 {
                    return Err(StepError::Locator(LocatorError::NoMatch {
                        description: step.describe(),
                    }));
                }
                let end = match (&step.end_selector, &step.target) {
                    (Some(selector), _) => self.page.locator(selector),
                    (None, Some(target)) => self
                        .page
                        .get_by_text(TextMatch::Substring(target.clone())),
                    (None, None) => {
                        return Err(StepError::Locator(LocatorError::InsufficientInfo {
                            action: step.action.to_string(),
                        }))
                    }
                };
                start.drag_to(end).await.map_err(StepError::Driver)?;
                self.settle().await;
                Ok(())
            }
            Action::Upload => {
                let path = step
                    .file_path
                    .as_deref()
                    .or(step.value.as_deref())
                    .unwrap_or_default()
                    .to_string();
                self.with_element(step, move |el| async move {
                    el.set_input_files(Path::new(&path)).await
                })
                .await
            }
            Action::Check => {
                self.with_element(step, |el| async move { el.set_checked(true).await })
                    .await
            }
            Action::Uncheck => {
                self.with_element(step, |el| async move { el.set_checked(false).await })
                    .await
            }
            Action::Focus => {
                let element = self.resolver.resolve(step).await.map_err(StepError::Locator)?;
                element.focus().await.map_err(StepError::Driver)
            }
            Action::Blur => {
                let element = self.resolver.resolve(step).await.map_err(StepError::Locator)?;
                element.blur().await.map_err(StepError::Driver)
            }
            Action::KeyPress | Action::PressKey => {
                let key = step.value.as_deref().unwrap_or("Enter");
                self.page.press_key(key).await.map_err(StepError::Driver)
            }
            Action::Scroll => {
                if let Some(selector) = &step.selector {
                    let locator = self.page.locator(selector);
                    locator
                        .scroll_into_view_if_needed(SCROLL_INTO_VIEW_TIMEOUT_MS)
                        .await
                        .map_err(StepError::Driver)?;
                } else {
                    let height = self
                        .page
                        .viewport_size()
                        .map(|v| v.height)
                        .unwrap_or(800);
                    let delta = height.saturating_sub(self.scroll_margin_px) as i64;
                    let signed = match step.value.as_deref() {
                        Some("up") => -delta,
                        _ => delta,
                    };
                    self.page
                        .evaluate(&format!("() => window.scrollBy(0, {signed})"), None)
                        .await
                        .map_err(StepError::Driver)?;
                }
                self.page.wait_for_timeout(POST_SCROLL_SETTLE_MS).await;
                Ok(())
            }
            Action::Wait => {
                let ms = parse_duration_ms(step.value.as_deref().unwrap_or(""))
                    .unwrap_or(self.default_wait_ms);
                self.page.wait_for_timeout(ms).await;
                Ok(())
            }
            Action::GoBack => self.page.go_back().await.map_err(StepError::Driver),
            Action::GoForward => self.page.go_forward().await.map_err(StepError::Driver),
            Action::Reload => {
                self.page.reload().await.map_err(StepError::Driver)?;
                self.settle().await;
                Ok(())
            }
            Action::Screenshot => self
                .page
                .wait_for_load_state()
                .await
                .map_err(StepError::Driver),
            Action::Evaluate => {
                let script = step.value.as_deref().unwrap_or("() => null");
                self.page
                    .evaluate(script, None)
                    .await
                    .map(|_| ())
                    .map_err(StepError::Driver)
            }
            Action::Unknown(tag) => Err(StepError::Driver(anyhow::anyhow!(
                "unknown action '{tag}' reached dispatch"
            ))),
        }
    }

    async fn with_element<F, Fut>(
        &self,
        step: &PlanStep,
        act: F,
    ) -> std::result::Result<(), StepError>
    where
        F: FnOnce(Arc<dyn crate::driver::Locator>) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let element = self.resolver.resolve(step).await.map_err(StepError::Locator)?;
        act(element).await.map_err(StepError::Driver)?;
        self.settle().await;
        Ok(())
    }

    async fn settle(&self) {
        self.page.wait_for_timeout(self.default_wait_ms).await;
    }

    /// Close out the attempt against the executor constitution. Critical
    /// failures surface as a typed violation; warnings ride in the report.
    pub fn finalize(
        &self,
        plan: &ExecutionPlan,
        outcome: &ExecutionOutcome,
    ) -> std::result::Result<ConstitutionReport, ConstitutionViolation> {
        let mut context = serde_json::Map::new();
        context.insert("final_url".into(), json!(outcome.final_url));
        context.insert("action_budget".into(), json!(outcome.action_budget));
        context.insert("action_count".into(), json!(outcome.action_count));
        context.insert("start_url".into(), json!(outcome.start_url));
        context.insert(
            "locator_failures".into(),
            json!(self
                .locator_failures
                .iter()
                .map(|(step, reason)| json!({"step": step.describe(), "reason": reason}))
                .collect::<Vec<_>>()),
        );

        let report = self.constitution.validate(plan, outcome, context);
        if !report.passed || !report.warnings.is_empty() {
            if let Some(store) = &self.failure_store {
                store.save(&report);
            }
        }
        if !report.passed {
            return Err(ConstitutionViolation::new(
                self.constitution.agent_name,
                report.failures,
            ));
        }
        Ok(report)
    }

    /// Compute context adjustments for the next attempt from this attempt's
    /// critical failures. Never mutates the current plan.
    pub fn heal(
        &self,
        outcome: &ExecutionOutcome,
        failures: &[ValidationFailure],
    ) -> HealAdjustments {
        let mut adjustments = HealAdjustments::default();

        for failure in failures {
            match failure.rule_name.as_str() {
                "navigation_success" => {
                    adjustments.start_url = Some(outcome.start_url.clone());
                    adjustments
                        .notes
                        .push(format!("re-issue navigate({})", outcome.start_url));
                }
                "action_budget" => {
                    adjustments.action_budget = Some(outcome.action_budget + 5);
                    adjustments.notes.push(format!(
                        "raise action budget to {}",
                        outcome.action_budget + 5
                    ));
                }
                "no_auth_redirects" => {
                    adjustments.requires_auth = true;
                    adjustments
                        .notes
                        .push("flag requires_auth; further retries aborted".to_string());
                }
                _ => {}
            }
        }

        if let Some(generator) = &self.strategy_generator {
            let website_pattern = website_pattern(&outcome.start_url);
            let mut generator = generator.lock().unwrap();
            for (step, reason) in &self.locator_failures {
                if let Some(improved) =
                    generator.suggest_improved_step(step, reason, website_pattern.as_deref())
                {
                    adjustments
                        .notes
                        .push(format!("improved step for {}", step.describe()));
                    adjustments.improved_steps.push(improved);
                }
            }
        }

        adjustments
    }

    pub fn locator_failures(&self) -> &[(PlanStep, String)] {
        &self.locator_failures
    }
}

fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// Parse durations like "1.5s", "1000ms", or bare seconds.
pub fn parse_duration_ms(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse::<f64>().ok().map(|v| v as u64);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs.trim().parse::<f64>().ok().map(|v| (v * 1000.0) as u64);
    }
    value.parse::<f64>().ok().map(|v| (v * 1000.0) as u64)
}

fn website_pattern(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
}

/// Gate helper for callers that need the final page state without running
/// the constitution.
pub fn outcome_for(
    page: &dyn Page,
    action_count: u32,
    action_budget: u32,
    start_url: &str,
) -> ExecutionOutcome {
    ExecutionOutcome {
        final_url: page.url(),
        action_count,
        action_budget,
        start_url: start_url.to_string(),
    }
}

impl Executor {
    /// Convenience for tests and callers driving single steps.
    pub async fn run_single(&self, step: &PlanStep) -> Result<()> {
        match self.run_step(step).await {
            Ok(()) => Ok(()),
            Err(StepError::Locator(err)) => Err(anyhow::Error::new(err)).context("locator failed"),
            Err(StepError::Driver(err)) => Err(err),
        }
    }
}
