use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use parallax_config::Config;
use parallax_provider::vision::{VisionAnalyzer, VisionCapability};
use parallax_provider::PlannerProvider;

use crate::archivist::Archivist;
use crate::completion::{validate_completion, CompletionError};
use crate::constitution::{ConstitutionViolation, FailureStore, ValidationFailure};
use crate::driver::BrowserLauncher;
use crate::executor::{outcome_for, Executor, HealAdjustments, ProgressCallback};
use crate::metrics;
use crate::observer::Observer;
use crate::overrides::apply_site_overrides;
use crate::planner::Planner;
use crate::schemas::{ExecutionPlan, PlanContext, PlanStep};
use crate::strategy::StrategyGenerator;
use crate::trace::TraceController;
use crate::detectors::Detectors;

const FAILURE_HISTORY_CAP: usize = 20;
const FAILURE_CONTEXT_WINDOW: usize = 10;

#[derive(Debug)]
pub struct RunSummary {
    pub dataset_path: PathBuf,
    pub states_captured: usize,
    pub attempts: u32,
    pub trace_path: PathBuf,
    pub cancelled: bool,
}

type ProgressFn = Arc<dyn Fn(usize, usize, &PlanStep) + Send + Sync>;

/// Drives the four-agent pipeline through planning, execution, observation,
/// and archival, with a self-heal loop that mutates the planning context
/// between attempts.
pub struct Orchestrator {
    config: Config,
    planner: Planner,
    launcher: Arc<dyn BrowserLauncher>,
    failure_store: Arc<FailureStore>,
    strategy_generator: Arc<Mutex<StrategyGenerator>>,
    vision: Option<Arc<dyn VisionCapability>>,
    progress: Option<ProgressFn>,
}

enum AttemptOutcome {
    Complete(RunSummary),
    /// Critical executor violation with the heal adjustments for the next
    /// attempt.
    Heal(ConstitutionViolation, HealAdjustments),
}

impl Orchestrator {
    pub fn new(
        config: Config,
        provider: Arc<dyn PlannerProvider>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Self> {
        let base_dir = PathBuf::from(&config.output.base_dir);
        let failure_store = Arc::new(FailureStore::new(base_dir.join("_constitution_failures"))?);
        let strategy_generator = Arc::new(Mutex::new(StrategyGenerator::new(
            Some(failure_store.clone()),
            base_dir.join("_strategies").join("strategies.json"),
        )));
        let planner = Planner::new(provider)
            .with_failure_store(failure_store.clone())
            .with_strategy_generator(strategy_generator.clone());
        let vision = if config.vision.enabled {
            match VisionAnalyzer::from_config(&config) {
                Ok(analyzer) => Some(Arc::new(analyzer) as Arc<dyn VisionCapability>),
                Err(err) => {
                    tracing::warn!(error = %err, "vision analyzer unavailable");
                    None
                }
            }
        } else {
            None
        };
        Ok(Self {
            config,
            planner,
            launcher,
            failure_store,
            strategy_generator,
            vision,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn failure_store(&self) -> Arc<FailureStore> {
        self.failure_store.clone()
    }

    /// Run all attempts for one task. Heal adjustments thread forward; the
    /// final violation propagates when heals are exhausted.
    pub async fn run(
        &self,
        task: &str,
        app_name: &str,
        start_url: &str,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let slug = task_slug(task);
        let total_runs = 1 + self.config.navigation.self_heal_attempts;

        let mut start_url_current = start_url.to_string();
        let mut action_budget_override: Option<u32> = None;
        let mut improved_steps: Vec<PlanStep> = Vec::new();
        let mut failure_history: Vec<serde_json::Value> = Vec::new();
        let mut attempts_run: u32 = 0;

        for attempt in 0..total_runs {
            if cancel.is_cancelled() {
                tracing::info!(attempt, "run cancelled before attempt");
                break;
            }
            attempts_run = attempt + 1;
            let attempt_slug = if attempt == 0 {
                slug.clone()
            } else {
                format!("{slug}-retry-{attempt}")
            };

            let attempt_result = self
                .run_attempt(
                    task,
                    app_name,
                    &attempt_slug,
                    &start_url_current,
                    attempt,
                    action_budget_override,
                    &improved_steps,
                    &failure_history,
                    cancel,
                )
                .await;

            // Planner and observer violations heal the same way executor
            // violations do, just without computed adjustments.
            let outcome = match attempt_result {
                Ok(outcome) => outcome,
                Err(err) => match err.downcast::<ConstitutionViolation>() {
                    Ok(violation) => AttemptOutcome::Heal(violation, HealAdjustments::default()),
                    Err(err) => {
                        metrics::registry().workflow_failure.inc();
                        return Err(err);
                    }
                },
            };

            match outcome {
                AttemptOutcome::Complete(summary) => {
                    metrics::registry().workflow_success.inc();
                    metrics::registry()
                        .states_per_workflow
                        .observe(summary.states_captured as f64);
                    if attempt > 0 {
                        tracing::info!(attempt = attempt + 1, "workflow recovered");
                    }
                    return Ok(summary);
                }
                AttemptOutcome::Heal(violation, adjustments) => {
                    for failure in &violation.failures {
                        failure_history.push(json!({
                            "rule": failure.rule_name,
                            "reason": failure.reason,
                            "details": failure.details,
                        }));
                        report_failure(failure);
                    }
                    if failure_history.len() > FAILURE_HISTORY_CAP {
                        failure_history.drain(..failure_history.len() - FAILURE_HISTORY_CAP);
                    }

                    for note in &adjustments.notes {
                        tracing::info!(note, "self-heal action");
                    }
                    if let Some(url) = &adjustments.start_url {
                        start_url_current = url.clone();
                    }
                    if let Some(budget) = adjustments.action_budget {
                        action_budget_override = Some(budget);
                    }
                    if !adjustments.improved_steps.is_empty() {
                        improved_steps = adjustments.improved_steps.clone();
                    }

                    let abort_for_auth =
                        adjustments.requires_auth && self.config.navigation.auth_redirect_critical;
                    let exhausted = attempt + 1 == total_runs;
                    if abort_for_auth || exhausted {
                        if abort_for_auth {
                            tracing::error!("authentication required; aborting further heals");
                        } else {
                            tracing::error!("exhausted self-heal attempts");
                        }
                        metrics::registry().workflow_failure.inc();
                        return Err(violation.into());
                    }
                    if adjustments.is_empty() {
                        tracing::warn!("no automated recovery steps were available");
                    }
                    tracing::info!("attempting self-heal and retry");
                }
            }
        }

        // The loop only exits via the cancellation break. Whatever earlier
        // attempts left on disk is the partial dataset; the run is clean.
        let dataset_path = PathBuf::from(&self.config.output.base_dir)
            .join(app_name)
            .join(&slug);
        let trace_path = dataset_path.join("trace.zip");
        tracing::info!("run cancelled; returning partial dataset");
        Ok(RunSummary {
            dataset_path,
            states_captured: 0,
            attempts: attempts_run,
            trace_path,
            cancelled: true,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        task: &str,
        app_name: &str,
        attempt_slug: &str,
        start_url: &str,
        attempt: u32,
        action_budget_override: Option<u32>,
        improved_steps: &[PlanStep],
        failure_history: &[serde_json::Value],
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome> {
        let context = PlanContext {
            start_url: Some(start_url.to_string()),
            retry: attempt,
            failure_history: failure_history
                .iter()
                .rev()
                .take(FAILURE_CONTEXT_WINDOW)
                .rev()
                .cloned()
                .collect(),
            ..Default::default()
        };

        let plan = self.planner.plan(task, context).await?;
        let mut plan = apply_site_overrides(plan, Some(start_url));
        splice_improved_steps(&mut plan, improved_steps);
        tracing::info!(steps = plan.steps.len(), attempt = attempt + 1, "plan ready");

        let session = self.launcher.launch(&self.config.browser).await?;
        let page = session.page.clone();
        let tracer = TraceController::new(session.context.clone());
        tracer.start().await?;

        let base_dir = PathBuf::from(&self.config.output.base_dir);
        let task_dir = base_dir.join(app_name).join(attempt_slug);
        let trace_path = task_dir.join("trace.zip");

        let mut detectors =
            Detectors::new(self.config.observer.clone(), self.config.capture.clone());
        if let Some(vision) = &self.vision {
            detectors = detectors.with_vision(vision.clone());
        }
        let mut observer = Observer::new(page.clone(), detectors, Some(task_dir.clone()))
            .with_failure_store(self.failure_store.clone())
            .with_task_context(task);

        let action_budget = action_budget_override.unwrap_or(self.config.navigation.action_budget);
        let mut executor = Executor::new(page.clone(), &self.config.navigation)
            .with_failure_store(self.failure_store.clone())
            .with_strategy_generator(self.strategy_generator.clone());
        if let Some(progress) = &self.progress {
            let progress = progress.clone();
            let callback: ProgressCallback =
                Box::new(move |index, total, step| progress(index, total, step));
            executor = executor.with_progress_callback(callback);
        }

        let exec_result = executor
            .execute(&plan, &mut observer, action_budget, cancel)
            .await;

        let outcome = outcome_for(page.as_ref(), executor.action_count(), action_budget, start_url);

        if let Err(err) = exec_result {
            tracer.stop(&trace_path).await.ok();
            session.context.close().await.ok();
            return Err(err);
        }

        if cancel.is_cancelled() {
            // Partial dataset on disk, clean shutdown, success exit code.
            tracer.stop(&trace_path).await.ok();
            session.context.close().await.ok();
            let states = observer.into_states();
            let dataset_path = if states.is_empty() {
                task_dir
            } else {
                Archivist::new(base_dir.clone())
                    .with_failure_store(self.failure_store.clone())
                    .write_states(app_name, attempt_slug, &states, "trace.zip")?
            };
            return Ok(AttemptOutcome::Complete(RunSummary {
                dataset_path,
                states_captured: states.len(),
                attempts: attempt + 1,
                trace_path,
                cancelled: true,
            }));
        }

        match executor.finalize(&plan, &outcome) {
            Ok(report) => {
                for warning in &report.warnings {
                    tracing::warn!(
                        rule = warning.rule_name,
                        reason = warning.reason,
                        "navigation warning"
                    );
                }
            }
            Err(violation) => {
                let adjustments = executor.heal(&outcome, &violation.failures);
                tracer.stop(&trace_path).await.ok();
                session.context.close().await.ok();
                return Ok(AttemptOutcome::Heal(violation, adjustments));
            }
        }

        let completion = validate_completion(
            &plan,
            observer.states(),
            self.config.completion.min_targets,
        );
        if let Err(err) = completion {
            tracer.stop(&trace_path).await.ok();
            session.context.close().await.ok();
            // Failure accounting happens once, in the caller's error arm.
            report_missing_destinations(&err);
            return Err(err.into());
        }

        tracer.stop(&trace_path).await?;
        if let Ok(meta) = std::fs::metadata(&trace_path) {
            metrics::registry().trace_size_bytes.observe(meta.len() as f64);
        }

        let states = observer.into_states();
        let dataset_path = Archivist::new(base_dir.clone())
            .with_failure_store(self.failure_store.clone())
            .write_states(app_name, attempt_slug, &states, "trace.zip")?;

        session.context.close().await?;

        Ok(AttemptOutcome::Complete(RunSummary {
            dataset_path,
            states_captured: states.len(),
            attempts: attempt + 1,
            trace_path,
            cancelled: false,
        }))
    }
}

/// Replace element-identification fields of steps the strategy generator
/// improved, matched by action and accessible name. Step count is never
/// changed.
fn splice_improved_steps(plan: &mut ExecutionPlan, improved: &[PlanStep]) {
    for replacement in improved {
        for step in plan.steps.iter_mut() {
            if step.action == replacement.action && step.name == replacement.name {
                step.selector = replacement.selector.clone();
                step.role = replacement.role.clone();
                break;
            }
        }
    }
}

/// Full-text slug for dataset directories ("Create a project" →
/// "create-a-project").
pub fn task_slug(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn report_failure(failure: &ValidationFailure) {
    tracing::warn!(
        rule = failure.rule_name,
        reason = failure.reason,
        "navigation validation failed"
    );
    for suggestion in recovery_suggestions(&failure.rule_name) {
        tracing::info!(rule = failure.rule_name, suggestion, "recovery suggestion");
    }
}

fn report_missing_destinations(err: &CompletionError) {
    for missing in &err.missing {
        tracing::error!(missing, "completion validation failed");
    }
}

/// Fixed suggestion table shown with each failed rule.
pub fn recovery_suggestions(rule_name: &str) -> &'static [&'static str] {
    match rule_name {
        "plan_structure" => &[
            "Check if the task description is clear and actionable",
            "Try rephrasing the task with more specific instructions",
        ],
        "plan_non_empty" => {
            &["Add more detail so the planner can infer at least one actionable step"]
        }
        "plan_step_validity" => &[
            "Check if the task uses supported actions (navigate, click, type, submit)",
            "Try breaking down complex tasks into simpler steps",
        ],
        "navigation_success" => &[
            "Check if the website is accessible and responsive",
            "Verify that the start URL is correct",
            "Try increasing the action budget in the configuration",
        ],
        "action_budget" => &[
            "Increase action_budget in the configuration",
            "Simplify the task to require fewer steps",
        ],
        "no_auth_redirects" => &[
            "Ensure the account has access and is already authenticated",
            "Consider providing login steps in the task description",
        ],
        "state_captured" => &[
            "Check if the screenshots directory is writable",
            "Verify the browser driver installation",
        ],
        "screenshot_quality" => &[
            "Ensure the page finished loading before actions continue",
            "Check for modal dialogs blocking the viewport",
        ],
        "dataset_created" => &[
            "Check if the datasets directory is writable",
            "Verify disk space is available",
        ],
        "dataset_files" => &[
            "Verify the archivist has permission to write report files",
            "Look for antivirus or sync tools locking files during write",
        ],
        "dataset_data_integrity" => &[
            "Check if the workflow captured the expected number of states",
            "Ensure no external process is modifying dataset files mid-run",
        ],
        _ => &[],
    }
}
