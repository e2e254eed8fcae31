use crate::schemas::{Action, ExecutionPlan, PlanStep};

const GOOGLE_SEARCH_INPUT_SELECTOR: &str = ":is(input,textarea)[name='q']";
const GOOGLE_RESULTS_SCOPE: &str = "#search";
const WIKIPEDIA_SEARCH_SELECTOR: &str = "input[name='search']";
const WIKIPEDIA_SUBMIT_SELECTOR: &str = "button#searchButton";

/// Rewrite plan steps for known site quirks. Overrides only adjust element
/// identification fields; they never add or remove steps.
pub fn apply_site_overrides(mut plan: ExecutionPlan, start_url: Option<&str>) -> ExecutionPlan {
    let Some(start_url) = start_url else {
        return plan;
    };
    let lowered = start_url.to_lowercase();
    if lowered.contains("google.") {
        tune_google_plan(&mut plan);
    } else if lowered.contains("wikipedia.org") {
        tune_wikipedia_plan(&mut plan);
    }
    plan
}

fn tune_google_plan(plan: &mut ExecutionPlan) {
    for step in &mut plan.steps {
        match step.action {
            Action::Type | Action::Fill if step.selector.is_none() => {
                step.selector = Some(GOOGLE_SEARCH_INPUT_SELECTOR.to_string());
                step.role = None;
            }
            Action::Click if step.selector.is_none() => {
                if let Some(selector) = step.name.as_deref().and_then(google_result_selector) {
                    step.selector = Some(selector);
                    step.role = None;
                }
            }
            _ => {}
        }
    }
}

fn google_result_selector(label: &str) -> Option<String> {
    let text = label.trim();
    if text.is_empty() {
        return None;
    }
    if looks_like_domain(text) {
        let fragment = domain_fragment(text);
        if !fragment.is_empty() {
            let escaped = escape_attr_value(&fragment);
            return Some(format!("{GOOGLE_RESULTS_SCOPE} a[href*=\"{escaped}\"]"));
        }
    }
    let escaped = escape_attr_value(text);
    Some(format!("{GOOGLE_RESULTS_SCOPE} a:has-text(\"{escaped}\")"))
}

fn looks_like_domain(text: &str) -> bool {
    text.contains('.') && !text.contains(' ')
}

fn domain_fragment(text: &str) -> String {
    let mut fragment = text.to_lowercase();
    for prefix in ["https://", "http://"] {
        if let Some(stripped) = fragment.strip_prefix(prefix) {
            fragment = stripped.to_string();
        }
    }
    let fragment = fragment.trim_matches(|c| c == '/' || c == ' ');
    fragment.split('/').next().unwrap_or_default().to_string()
}

fn escape_attr_value(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn tune_wikipedia_plan(plan: &mut ExecutionPlan) {
    for step in &mut plan.steps {
        match step.action {
            Action::Type | Action::Fill => {
                let needs_fix = step
                    .selector
                    .as_deref()
                    .map(|s| s.contains("search"))
                    .unwrap_or(true);
                if needs_fix {
                    step.selector = Some(WIKIPEDIA_SEARCH_SELECTOR.to_string());
                }
            }
            Action::Focus => {
                let needs_fix = step
                    .selector
                    .as_deref()
                    .map(|s| s.contains("search"))
                    .unwrap_or(true);
                if needs_fix {
                    step.selector = Some(WIKIPEDIA_SEARCH_SELECTOR.to_string());
                }
            }
            Action::Click | Action::Submit => {
                let name = step.name.as_deref().unwrap_or("").to_lowercase();
                let selector = step.selector.as_deref().unwrap_or("").to_lowercase();
                if name.contains("search") || selector.contains("search") {
                    step.selector = Some(WIKIPEDIA_SUBMIT_SELECTOR.to_string());
                    step.name = None;
                    step.role = None;
                }
            }
            _ => {}
        }
    }
}
