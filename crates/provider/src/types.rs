use serde::{Deserialize, Serialize};

/// Closed action taxonomy understood by the executor. Plans arrive as
/// free-form JSON, so an unrecognized tag is preserved as `Unknown` and
/// rejected by plan validation instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Navigate,
    Click,
    DoubleClick,
    RightClick,
    Hover,
    Type,
    Fill,
    Submit,
    Select,
    Drag,
    Upload,
    Check,
    Uncheck,
    Focus,
    Blur,
    KeyPress,
    PressKey,
    Scroll,
    Wait,
    GoBack,
    GoForward,
    Reload,
    Screenshot,
    Evaluate,
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Navigate => "navigate",
            Action::Click => "click",
            Action::DoubleClick => "double_click",
            Action::RightClick => "right_click",
            Action::Hover => "hover",
            Action::Type => "type",
            Action::Fill => "fill",
            Action::Submit => "submit",
            Action::Select => "select",
            Action::Drag => "drag",
            Action::Upload => "upload",
            Action::Check => "check",
            Action::Uncheck => "uncheck",
            Action::Focus => "focus",
            Action::Blur => "blur",
            Action::KeyPress => "key_press",
            Action::PressKey => "press_key",
            Action::Scroll => "scroll",
            Action::Wait => "wait",
            Action::GoBack => "go_back",
            Action::GoForward => "go_forward",
            Action::Reload => "reload",
            Action::Screenshot => "screenshot",
            Action::Evaluate => "evaluate",
            Action::Unknown(s) => s.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Action::Unknown(_))
    }

    /// Actions that drive form input; their presence classifies a plan as
    /// interactive for completion validation.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Action::Type
                | Action::Fill
                | Action::Submit
                | Action::Select
                | Action::Upload
                | Action::Check
                | Action::Uncheck
                | Action::KeyPress
                | Action::PressKey
        )
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "navigate" => Action::Navigate,
            "click" => Action::Click,
            "double_click" => Action::DoubleClick,
            "right_click" => Action::RightClick,
            "hover" => Action::Hover,
            "type" => Action::Type,
            "fill" => Action::Fill,
            "submit" => Action::Submit,
            "select" => Action::Select,
            "drag" => Action::Drag,
            "upload" => Action::Upload,
            "check" => Action::Check,
            "uncheck" => Action::Uncheck,
            "focus" => Action::Focus,
            "blur" => Action::Blur,
            "key_press" => Action::KeyPress,
            "press_key" => Action::PressKey,
            "scroll" => Action::Scroll,
            "wait" => Action::Wait,
            "go_back" => Action::GoBack,
            "go_forward" => Action::GoForward,
            "reload" => Action::Reload,
            "screenshot" => Action::Screenshot,
            "evaluate" => Action::Evaluate,
            _ => Action::Unknown(s),
        }
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        a.as_str().to_string()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single step in an execution plan. Which optional fields are required
/// depends on the action; plan validation enforces the combinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_value: Option<String>,
}

impl Default for Action {
    fn default() -> Self {
        Action::Unknown(String::new())
    }
}

impl PlanStep {
    pub fn navigate(target: impl Into<String>) -> Self {
        Self {
            action: Action::Navigate,
            target: Some(target.into()),
            ..Self::default()
        }
    }

    /// A selector, a role+name pair, or a bare name for text-match fallback.
    pub fn has_element_hint(&self) -> bool {
        self.selector.is_some()
            || (self.role.is_some() && self.name.is_some())
            || self.name.is_some()
    }

    /// Short human-readable form used in action descriptions and state logs.
    pub fn describe(&self) -> String {
        let arg = self
            .target
            .as_deref()
            .or(self.selector.as_deref())
            .or(self.name.as_deref())
            .or(self.value.as_deref())
            .unwrap_or("");
        format!("{}({arg})", self.action)
    }
}

/// An ordered execution plan. Produced once per attempt; site overrides and
/// heal splices run before execution, never during it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn is_interactive(&self) -> bool {
        self.steps.iter().any(|s| s.action.is_interactive())
    }

    pub fn has_navigate(&self) -> bool {
        self.steps.iter().any(|s| s.action == Action::Navigate)
    }
}

/// Context handed to the planner. Failure history is a read-only snapshot;
/// the planner never holds a reference back into the stores.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanContext {
    pub start_url: Option<String>,
    pub retry: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_history: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_patterns: Option<serde_json::Value>,
    pub use_strategies: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_through_serde() {
        let step: PlanStep =
            serde_json::from_str(r##"{"action": "double_click", "selector": "#go"}"##).unwrap();
        assert_eq!(step.action, Action::DoubleClick);
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains(r#""action":"double_click""#));
    }

    #[test]
    fn unknown_action_is_preserved_not_rejected() {
        let step: PlanStep = serde_json::from_str(r#"{"action": "teleport"}"#).unwrap();
        assert_eq!(step.action, Action::Unknown("teleport".into()));
        assert!(!step.action.is_known());
    }

    #[test]
    fn interactive_classification() {
        assert!(Action::Fill.is_interactive());
        assert!(Action::PressKey.is_interactive());
        assert!(!Action::Click.is_interactive());
        assert!(!Action::Navigate.is_interactive());
    }

    #[test]
    fn element_hint_shapes() {
        let mut step = PlanStep {
            action: Action::Click,
            ..Default::default()
        };
        assert!(!step.has_element_hint());
        step.name = Some("Create".into());
        assert!(step.has_element_hint());
        step.name = None;
        step.selector = Some("#create".into());
        assert!(step.has_element_hint());
    }
}
