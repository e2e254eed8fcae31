use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use parallax_provider::types::{Action, ExecutionPlan, PlanContext, PlanStep};

/// A node from the page's accessibility tree, used for state signatures and
/// structural diffing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleNode {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl RoleNode {
    pub fn new(role: impl Into<String>, name: Option<String>) -> Self {
        Self {
            role: role.into(),
            name,
            selector: None,
        }
    }
}

/// How much a captured state matters to the archived story of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    Critical,
    Supporting,
    #[default]
    Optional,
}

impl Significance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Significance::Critical => "critical",
            Significance::Supporting => "supporting",
            Significance::Optional => "optional",
        }
    }
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Significance {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Significance::Critical),
            "supporting" => Ok(Significance::Supporting),
            "optional" => Ok(Significance::Optional),
            other => Err(format!("unknown significance: {other}")),
        }
    }
}

/// A captured observation after an action. Appended to the observer's log as
/// steps execute, then serialized by the archivist at the end of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIState {
    pub id: String,
    pub url: String,
    pub description: String,
    pub has_modal: bool,
    #[serde(default)]
    pub action: Option<String>,
    /// Viewport name → screenshot filename, relative to the dataset dir.
    #[serde(default)]
    pub screenshots: BTreeMap<String, String>,
    /// Open metadata: role snapshot, toast flag, form validity, loader flag,
    /// role-diff score, significance, vision analysis.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub state_signature: String,
}

impl UIState {
    pub fn significance(&self) -> Significance {
        self.metadata
            .get("significance")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn has_toast(&self) -> bool {
        self.metadata
            .get("has_toast")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn form_validity(&self) -> Option<bool> {
        self.metadata.get("form_validity").and_then(|v| v.as_bool())
    }
}
