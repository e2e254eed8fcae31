use std::collections::{BTreeMap, HashSet};

use url::Url;

use crate::schemas::{Action, ExecutionPlan, PlanStep, UIState};

const INTERACTIVE_SIGNAL_TOKENS: &[&str] =
    &["submit", "type", "fill", "upload", "check", "form", "save"];

/// Raised after successful execution when the captured states never reached
/// the destinations or signals the plan promised. The run is failed; no
/// further heal attempts follow.
#[derive(Debug, thiserror::Error)]
#[error("Workflow did not reach expected destinations. Missing: {}", missing.join(", "))]
pub struct CompletionError {
    pub missing: Vec<String>,
    pub actual: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Interactive,
    Explore,
}

pub fn classify_plan(plan: &ExecutionPlan) -> PlanMode {
    if plan.is_interactive() {
        PlanMode::Interactive
    } else {
        PlanMode::Explore
    }
}

/// Validate that the run reached what the plan set out to do.
///
/// Explore plans must hit enough of the expected destination slugs in the
/// captured URLs. Interactive plans must show at least one form-flavored
/// action with a confirming signal (toast, valid form, or a critical form
/// event).
pub fn validate_completion(
    plan: &ExecutionPlan,
    states: &[UIState],
    min_targets: u32,
) -> Result<(), CompletionError> {
    let actual = actual_slugs(states);
    match classify_plan(plan) {
        PlanMode::Explore => {
            let expected = expected_slugs(plan);
            if expected.is_empty() {
                return Ok(());
            }
            let required = expected.len().min((min_targets.max(1)) as usize);
            let hits = expected.keys().filter(|slug| actual.contains(*slug)).count();
            if hits >= required {
                return Ok(());
            }
            let mut missing = Vec::new();
            for (slug, label) in &expected {
                if !actual.contains(slug) {
                    missing.push(label.clone());
                }
                if missing.len() >= required {
                    break;
                }
            }
            Err(CompletionError {
                missing,
                actual: actual.into_iter().collect(),
            })
        }
        PlanMode::Interactive => {
            if has_interactive_signal(states) {
                Ok(())
            } else {
                Err(CompletionError {
                    missing: vec!["post-action signal".to_string()],
                    actual: actual.into_iter().collect(),
                })
            }
        }
    }
}

/// Destination slugs promised by the plan: first path segments of navigate
/// targets, plus short click labels on links and buttons.
fn expected_slugs(plan: &ExecutionPlan) -> BTreeMap<String, String> {
    let mut expected = BTreeMap::new();
    for step in &plan.steps {
        if let Some(target) = &step.target {
            if let Some(slug) = first_path_slug(target) {
                expected.entry(slug).or_insert_with(|| target.clone());
            }
        }
        if is_nav_click(step) {
            if let Some(slug) = slugify(step.name.as_deref().unwrap_or("")) {
                expected
                    .entry(slug)
                    .or_insert_with(|| step.name.clone().unwrap_or_default());
            }
        }
    }
    expected
}

fn actual_slugs(states: &[UIState]) -> HashSet<String> {
    states
        .iter()
        .filter_map(|s| first_path_slug(&s.url))
        .collect()
}

fn has_interactive_signal(states: &[UIState]) -> bool {
    for state in states {
        let action = state.action.as_deref().unwrap_or("").to_lowercase();
        if !INTERACTIVE_SIGNAL_TOKENS.iter().any(|t| action.contains(t)) {
            continue;
        }
        if state.has_toast() || state.form_validity() == Some(true) {
            return true;
        }
        let reasoning = state
            .metadata
            .get("significance_reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        if state.significance() == crate::schemas::Significance::Critical
            && reasoning.contains("form")
        {
            return true;
        }
    }
    false
}

/// Short link/button click labels count as navigation promises.
fn is_nav_click(step: &PlanStep) -> bool {
    if step.action != Action::Click {
        return false;
    }
    let Some(name) = &step.name else {
        return false;
    };
    if !matches!(step.role.as_deref(), Some("link") | Some("button") | None) {
        return false;
    }
    if name.len() > 40 {
        return false;
    }
    let words = name
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .count();
    (1..=3).contains(&words)
}

fn first_path_slug(url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }
    let path = Url::parse(url).ok().map(|u| u.path().to_string())?;
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    slugify(trimmed.split('/').next().unwrap_or_default())
}

/// Lowercased dash form, minimum three characters; slugs with three or more
/// dashes collapse to their first segment. Idempotent.
pub fn slugify(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let mut slug = String::new();
    let mut last_dash = true;
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.len() < 3 {
        return None;
    }
    let slug = if slug.matches('-').count() >= 3 {
        slug.split('-').next().unwrap_or_default().to_string()
    } else {
        slug
    };
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Significance;
    use serde_json::json;

    fn state(url: &str, action: Option<&str>) -> UIState {
        UIState {
            id: "state_test".into(),
            url: url.to_string(),
            description: "Test page".into(),
            has_modal: false,
            action: action.map(String::from),
            screenshots: Default::default(),
            metadata: Default::default(),
            state_signature: "0".repeat(64),
        }
    }

    fn click(name: &str, role: &str) -> PlanStep {
        PlanStep {
            action: Action::Click,
            name: Some(name.into()),
            role: Some(role.into()),
            ..Default::default()
        }
    }

    #[test]
    fn slugify_is_idempotent() {
        for input in ["Join Waitlist", "We're Hiring!", "about-us", "pricing"] {
            let once = slugify(input).unwrap();
            assert_eq!(slugify(&once).unwrap(), once);
        }
    }

    #[test]
    fn slugify_rejects_short_and_collapses_long() {
        assert_eq!(slugify("ab"), None);
        assert_eq!(slugify(""), None);
        assert_eq!(slugify("a-b-c-d-e").as_deref(), Some("a"));
        assert_eq!(slugify("one-two-three-four").as_deref(), Some("one"));
        assert_eq!(slugify("about us").as_deref(), Some("about-us"));
    }

    #[test]
    fn explore_passes_when_enough_slugs_are_reached() {
        let plan = ExecutionPlan {
            steps: vec![
                click("Pricing", "link"),
                click("Security", "link"),
                click("Customers", "link"),
            ],
        };
        let states = vec![
            state("https://linear.app/pricing", Some("click(Pricing)")),
            state("https://linear.app/security", Some("click(Security)")),
        ];
        // min_targets = 2 requires only two of the three promised slugs.
        assert!(validate_completion(&plan, &states, 2).is_ok());
    }

    #[test]
    fn explore_fails_with_missing_labels() {
        let plan = ExecutionPlan {
            steps: vec![click("Pricing", "link"), click("Product", "link")],
        };
        let states = vec![state("https://linear.app/pricing", None)];
        let err = validate_completion(&plan, &states, 2).unwrap_err();
        assert_eq!(err.missing, vec!["Product".to_string()]);
    }

    #[test]
    fn explore_with_no_expectations_passes() {
        let plan = ExecutionPlan {
            steps: vec![PlanStep {
                action: Action::Scroll,
                value: Some("down".into()),
                ..Default::default()
            }],
        };
        assert!(validate_completion(&plan, &[], 1).is_ok());
    }

    #[test]
    fn interactive_requires_confirming_signal() {
        let plan = ExecutionPlan {
            steps: vec![PlanStep {
                action: Action::Fill,
                selector: Some("input[name='search']".into()),
                value: Some("Python".into()),
                ..Default::default()
            }],
        };
        let bare = vec![state("https://wikipedia.org", Some("fill(input)"))];
        assert!(validate_completion(&plan, &bare, 1).is_err());

        let mut confirmed = state("https://wikipedia.org/wiki/Python", Some("submit(button)"));
        confirmed
            .metadata
            .insert("form_validity".into(), json!(true));
        assert!(validate_completion(&plan, &[confirmed], 1).is_ok());
    }

    #[test]
    fn interactive_accepts_critical_form_event() {
        let plan = ExecutionPlan {
            steps: vec![PlanStep {
                action: Action::Submit,
                selector: Some("button".into()),
                ..Default::default()
            }],
        };
        let mut s = state("https://app.example.com", Some("submit(button)"));
        s.metadata
            .insert("significance".into(), json!(Significance::Critical.as_str()));
        s.metadata.insert(
            "significance_reasoning".into(),
            json!("Form submission confirmed"),
        );
        assert!(validate_completion(&plan, &[s], 1).is_ok());
    }

    #[test]
    fn long_click_labels_are_not_nav_promises() {
        assert!(is_nav_click(&click("About", "link")));
        assert!(!is_nav_click(&click(
            "Read the entire documentation for this product now",
            "link"
        )));
        assert!(!is_nav_click(&click("Settings", "menuitem")));
    }
}
