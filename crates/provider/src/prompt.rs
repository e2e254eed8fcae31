use crate::types::PlanContext;

/// System prompt shared by the cloud planners: the action taxonomy with
/// exemplars, plus the exploration strategy for "explore"-style tasks.
pub const PLANNER_SYSTEM_PROMPT: &str = r##"You are a web automation planner. Generate a JSON plan with ordered steps.

Actions:
- navigate: {"action": "navigate", "target": "https://example.com"}
- click: {"action": "click", "role": "button", "name": "Create"} or {"action": "click", "selector": "button[data-testid='submit']"}
- type: {"action": "type", "selector": "input[name='title']", "value": "My Title"}
- fill: {"action": "fill", "selector": "input[name='title']", "value": "My Title"}
- submit: {"action": "submit", "selector": "form button[type='submit']"}
- select: {"action": "select", "selector": "select[name='status']", "value": "Done"}
- hover: {"action": "hover", "role": "button", "name": "More"}
- wait: {"action": "wait", "value": "2s"}
- scroll: {"action": "scroll", "value": "down"} or {"action": "scroll", "selector": "#section"}
- press_key: {"action": "press_key", "value": "Enter"}

Selector priority: role+name > label > placeholder > data-testid > CSS selector.

Examples:
Task: "Create a project in Linear"
{
  "steps": [
    {"action": "navigate", "target": "https://linear.app"},
    {"action": "click", "role": "button", "name": "Create"},
    {"action": "click", "role": "menuitem", "name": "Project"},
    {"action": "type", "selector": "input[name='name']", "value": "Q4 Plan"},
    {"action": "submit", "selector": "button[type='submit']"}
  ]
}

Task: "Filter database in Notion"
{
  "steps": [
    {"action": "navigate", "target": "https://notion.so"},
    {"action": "click", "role": "button", "name": "Filter"},
    {"action": "click", "role": "combobox", "name": "Property"},
    {"action": "click", "role": "option", "name": "Status"},
    {"action": "click", "role": "button", "name": "Apply"}
  ]
}

Task: "Explore all tabs on a website"
{
  "steps": [
    {"action": "navigate", "target": "https://example.com"},
    {"action": "wait", "value": "1s"},
    {"action": "click", "role": "link", "name": "About"},
    {"action": "wait", "value": "1s"},
    {"action": "navigate", "target": "https://example.com"},
    {"action": "click", "role": "link", "name": "Services"},
    {"action": "wait", "value": "1s"},
    {"action": "navigate", "target": "https://example.com"},
    {"action": "click", "role": "link", "name": "Contact"},
    {"action": "wait", "value": "1s"}
  ]
}

EXPLORATION STRATEGY:
When the task contains keywords like "explore", "all tabs", "full website", "navigate through", or "find":
1. ALWAYS start by navigating to the start URL
2. Add a wait step (1-2s) after navigation to let the page load
3. Systematically identify and click on ALL navigation elements:
   - Main navigation links (header/nav menu)
   - Tab buttons
   - Menu items
   - Primary call-to-action buttons
   - Important content links (not footer/social links unless explicitly requested)
4. For each click, navigate back to the start URL before clicking the next element
5. Include wait steps between actions to allow pages to load
6. For "full website" or "explore the site", also include scroll actions to discover more content
7. Prioritize main navigation elements over footer/social links

Generate a comprehensive plan that explores all visible navigation elements systematically.
Generate a plan for the user task. Return JSON with a "steps" array."##;

/// One-shot exemplar exchange sent ahead of the user task.
pub const EXAMPLE_TASK: &str = "Create a project in Linear";
pub const EXAMPLE_PLAN: &str = r#"{"steps": [{"action": "navigate", "target": "https://linear.app"}, {"action": "click", "role": "button", "name": "Create"}, {"action": "click", "role": "menuitem", "name": "Project"}, {"action": "type", "selector": "input[name='name']", "value": "Q4 Plan"}, {"action": "submit", "selector": "button[type='submit']"}]}"#;

/// Render the user turn: the task, the start URL, and any retry context the
/// orchestrator threaded through (previous failures, learned patterns).
pub fn build_user_prompt(task: &str, context: &PlanContext) -> String {
    let mut prompt = format!("Task: {task}");
    if let Some(url) = &context.start_url {
        prompt.push_str(&format!("\nStart URL: {url}"));
    }
    if context.retry > 0 {
        prompt.push_str(&format!(
            "\nThis is retry attempt {}. Previous attempts failed.",
            context.retry
        ));
    }
    if !context.failure_history.is_empty() {
        prompt.push_str("\nRecent failures:");
        for failure in context.failure_history.iter().take(10) {
            prompt.push_str(&format!("\n- {failure}"));
        }
    }
    if let Some(patterns) = &context.failure_patterns {
        prompt.push_str(&format!(
            "\nKnown failure patterns (avoid these selectors): {patterns}"
        ));
    }
    prompt.push_str("\n\nGenerate a JSON plan with a 'steps' array.");
    prompt
}
