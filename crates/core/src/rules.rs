use std::path::PathBuf;

use serde_json::json;

use crate::constitution::{AgentConstitution, RuleVerdict, ValidationLevel, ValidationRule};
use crate::executor::ExecutionOutcome;
use crate::schemas::{Action, ExecutionPlan, PlanStep, UIState};

pub const PLANNER_AGENT: &str = "A1_Planner";
pub const EXECUTOR_AGENT: &str = "A2_Executor";
pub const OBSERVER_AGENT: &str = "A3_Observer";
pub const ARCHIVIST_AGENT: &str = "A4_Archivist";

const AUTH_PATH_MARKERS: &[&str] = &["/login", "/auth", "/signin"];
const DEFAULT_DESCRIPTIONS: &[&str] = &["", "ui state", "ui state (stable)"];

/// Which required fields a step is missing for its action, if any.
fn missing_requirement(step: &PlanStep) -> Option<String> {
    let need = |ok: bool, what: &str| (!ok).then(|| what.to_string());
    match &step.action {
        Action::Navigate => need(step.target.is_some(), "target"),
        Action::Click | Action::DoubleClick | Action::RightClick | Action::Hover => {
            need(step.has_element_hint(), "selector, role+name, or name")
        }
        Action::Type | Action::Fill => need(
            (step.selector.is_some() || (step.role.is_some() && step.name.is_some()))
                && step.value.is_some(),
            "selector (or role+name) and value",
        ),
        Action::Submit | Action::Focus | Action::Blur | Action::Check | Action::Uncheck => {
            need(step.selector.is_some() || step.has_element_hint(), "selector")
        }
        Action::Select => need(
            step.selector.is_some() && (step.value.is_some() || step.option_value.is_some()),
            "selector and value or option_value",
        ),
        Action::Drag => need(
            step.start_selector.is_some()
                && (step.end_selector.is_some() || step.target.is_some()),
            "start_selector and end_selector or target",
        ),
        Action::Upload => need(
            step.selector.is_some() && (step.file_path.is_some() || step.value.is_some()),
            "selector and file_path or value",
        ),
        Action::KeyPress | Action::PressKey | Action::Wait => need(step.value.is_some(), "value"),
        Action::Scroll => need(
            step.selector.is_some()
                || matches!(step.value.as_deref(), Some("up") | Some("down")),
            "selector or value in {up, down}",
        ),
        Action::GoBack
        | Action::GoForward
        | Action::Reload
        | Action::Screenshot
        | Action::Evaluate => None,
        Action::Unknown(_) => None,
    }
}

/// A1: structure, non-emptiness, per-step validity. All critical.
pub fn planner_constitution() -> AgentConstitution<String, ExecutionPlan> {
    AgentConstitution::new(
        PLANNER_AGENT,
        vec![
            ValidationRule::new(
                "plan_structure",
                "Plan must be a sequence of action records",
                ValidationLevel::Critical,
                |_task, plan: &ExecutionPlan, _ctx| {
                    let blank = plan
                        .steps
                        .iter()
                        .position(|s| s.action.as_str().is_empty());
                    Ok(match blank {
                        Some(idx) => RuleVerdict::fail(format!("step {idx} has no action tag"))
                            .with_detail("index", json!(idx)),
                        None => RuleVerdict::pass(),
                    })
                },
            ),
            ValidationRule::new(
                "plan_non_empty",
                "Plan must contain at least one step",
                ValidationLevel::Critical,
                |_task, plan: &ExecutionPlan, _ctx| {
                    Ok(if plan.steps.is_empty() {
                        RuleVerdict::fail("plan has no steps")
                    } else {
                        RuleVerdict::pass()
                    })
                },
            ),
            ValidationRule::new(
                "plan_step_validity",
                "Every step must use a known action with its required fields",
                ValidationLevel::Critical,
                |_task, plan: &ExecutionPlan, _ctx| {
                    for (idx, step) in plan.steps.iter().enumerate() {
                        if !step.action.is_known() {
                            return Ok(RuleVerdict::fail(format!(
                                "step {idx} has unknown action '{}'",
                                step.action
                            ))
                            .with_detail("index", json!(idx))
                            .with_detail("action", json!(step.action.as_str())));
                        }
                        if let Some(missing) = missing_requirement(step) {
                            return Ok(RuleVerdict::fail(format!(
                                "step {idx} ({}) is missing {missing}",
                                step.action
                            ))
                            .with_detail("index", json!(idx))
                            .with_detail("action", json!(step.action.as_str())));
                        }
                    }
                    Ok(RuleVerdict::pass())
                },
            ),
        ],
    )
}

/// A2: navigation outcome checks run at finalize time. The auth-redirect
/// rule is a warning unless escalated by configuration.
pub fn executor_constitution(
    auth_redirect_critical: bool,
) -> AgentConstitution<ExecutionPlan, ExecutionOutcome> {
    let auth_level = if auth_redirect_critical {
        ValidationLevel::Critical
    } else {
        ValidationLevel::Warning
    };
    AgentConstitution::new(
        EXECUTOR_AGENT,
        vec![
            ValidationRule::new(
                "navigation_success",
                "Execution must end on a real page",
                ValidationLevel::Critical,
                |plan: &ExecutionPlan, outcome: &ExecutionOutcome, _ctx| {
                    let url = outcome.final_url.trim();
                    if url.is_empty() {
                        return Ok(RuleVerdict::fail("final URL is empty"));
                    }
                    if url == "about:blank" && plan.has_navigate() {
                        return Ok(RuleVerdict::fail(
                            "page never left about:blank despite a navigate step",
                        )
                        .with_detail("url", json!(url)));
                    }
                    Ok(RuleVerdict::pass())
                },
            ),
            ValidationRule::new(
                "action_budget",
                "Executed actions should stay within the configured budget",
                ValidationLevel::Warning,
                |_plan, outcome: &ExecutionOutcome, _ctx| {
                    Ok(if outcome.action_count > outcome.action_budget {
                        RuleVerdict::fail(format!(
                            "{} actions exceeded budget of {}",
                            outcome.action_count, outcome.action_budget
                        ))
                        .with_detail("action_count", json!(outcome.action_count))
                        .with_detail("action_budget", json!(outcome.action_budget))
                    } else {
                        RuleVerdict::pass()
                    })
                },
            ),
            ValidationRule::new(
                "no_auth_redirects",
                "Final URL must not be a login or auth page",
                auth_level,
                |_plan, outcome: &ExecutionOutcome, _ctx| {
                    let url = outcome.final_url.to_lowercase();
                    for marker in AUTH_PATH_MARKERS {
                        if url.contains(marker) {
                            return Ok(RuleVerdict::fail(format!(
                                "final URL contains '{marker}'"
                            ))
                            .with_detail("url", json!(outcome.final_url)));
                        }
                    }
                    Ok(RuleVerdict::pass())
                },
            ),
        ],
    )
}

/// A3: every emitted state must be backed by screenshots on disk, carry a
/// signature, and describe itself.
pub fn observer_constitution() -> AgentConstitution<(), UIState> {
    AgentConstitution::new(
        OBSERVER_AGENT,
        vec![
            ValidationRule::new(
                "state_captured",
                "State must carry a non-empty signature",
                ValidationLevel::Critical,
                |_input, state: &UIState, _ctx| {
                    let sig = &state.state_signature;
                    Ok(
                        if sig.len() == 64 && sig.chars().all(|c| c.is_ascii_hexdigit()) {
                            RuleVerdict::pass()
                        } else {
                            RuleVerdict::fail("state signature is not a 64-hex digest")
                                .with_detail("signature", json!(sig))
                        },
                    )
                },
            ),
            ValidationRule::new(
                "screenshot_quality",
                "Referenced screenshot files must exist and be non-empty",
                ValidationLevel::Critical,
                |_input, state: &UIState, ctx| {
                    let save_dir = ctx
                        .get("save_dir")
                        .and_then(|v| v.as_str())
                        .map(PathBuf::from);
                    if state.screenshots.is_empty() {
                        return Ok(RuleVerdict::fail("state has no screenshots"));
                    }
                    for (viewport, filename) in &state.screenshots {
                        let path = match &save_dir {
                            Some(dir) => dir.join(filename),
                            None => PathBuf::from(filename),
                        };
                        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                        if size == 0 {
                            return Ok(RuleVerdict::fail(format!(
                                "screenshot '{filename}' ({viewport}) missing or empty"
                            ))
                            .with_detail("viewport", json!(viewport))
                            .with_detail("filename", json!(filename)));
                        }
                    }
                    Ok(RuleVerdict::pass())
                },
            ),
            ValidationRule::new(
                "state_description",
                "State description should be meaningful",
                ValidationLevel::Warning,
                |_input, state: &UIState, _ctx| {
                    let normalized = state.description.trim().to_lowercase();
                    Ok(if DEFAULT_DESCRIPTIONS.contains(&normalized.as_str()) {
                        RuleVerdict::fail("description is blank or a default placeholder")
                            .with_detail("description", json!(state.description))
                    } else {
                        RuleVerdict::pass()
                    })
                },
            ),
        ],
    )
}

/// A4: dataset directory, required files, state counts.
pub fn archivist_constitution() -> AgentConstitution<Vec<UIState>, PathBuf> {
    AgentConstitution::new(
        ARCHIVIST_AGENT,
        vec![
            ValidationRule::new(
                "dataset_created",
                "Dataset directory must exist",
                ValidationLevel::Critical,
                |_states, root: &PathBuf, _ctx| {
                    Ok(if root.is_dir() {
                        RuleVerdict::pass()
                    } else {
                        RuleVerdict::fail(format!("missing dataset dir {}", root.display()))
                    })
                },
            ),
            ValidationRule::new(
                "dataset_files",
                "Required dataset files must exist",
                ValidationLevel::Critical,
                |_states, root: &PathBuf, _ctx| {
                    for file in ["steps.jsonl", "dataset.db", "report.md", "report.html"] {
                        if !root.join(file).is_file() {
                            return Ok(RuleVerdict::fail(format!("missing {file}"))
                                .with_detail("file", json!(file)));
                        }
                    }
                    Ok(RuleVerdict::pass())
                },
            ),
            ValidationRule::new(
                "minimum_states",
                "At least one state must be captured",
                ValidationLevel::Critical,
                |states: &Vec<UIState>, _root, ctx| {
                    let min_states = ctx
                        .get("min_states")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(1) as usize;
                    Ok(if states.len() >= min_states {
                        RuleVerdict::pass()
                    } else {
                        RuleVerdict::fail(format!(
                            "captured {} states, need at least {min_states}",
                            states.len()
                        ))
                    })
                },
            ),
            ValidationRule::new(
                "dataset_data_integrity",
                "JSONL line count must match the number of input states",
                ValidationLevel::Warning,
                |states: &Vec<UIState>, root: &PathBuf, _ctx| {
                    let lines = std::fs::read_to_string(root.join("steps.jsonl"))
                        .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
                        .unwrap_or(0);
                    Ok(if lines == states.len() {
                        RuleVerdict::pass()
                    } else {
                        RuleVerdict::fail(format!(
                            "steps.jsonl has {lines} lines for {} states",
                            states.len()
                        ))
                        .with_detail("lines", json!(lines))
                        .with_detail("states", json!(states.len()))
                    })
                },
            ),
        ],
    )
}
