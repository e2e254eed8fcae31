use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use parallax_config::{CaptureConfig, ObserverConfig};
use parallax_provider::vision::VisionCapability;
use serde_json::json;
use sha2::Digest;
use url::Url;

use crate::capture;
use crate::driver::Page;
use crate::role_tree::jaccard_similarity;
use crate::schemas::{RoleNode, Significance, UIState};

const ROLE_TREE_LIMIT: usize = 200;
const SIGNATURE_ROLE_LIMIT: usize = 50;

const ROLE_TREE_SCRIPT: &str = r#"
() => {
  const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_ELEMENT);
  const nodes = [];
  while (walker.nextNode()) {
    const el = walker.currentNode;
    const role = el.getAttribute('role');
    if (!role) continue;
    const name = el.getAttribute('aria-label') || el.textContent?.trim()?.slice(0,80) || null;
    nodes.push({ role, name });
    if (nodes.length >= 200) break;
  }
  return nodes;
}
"#;

const TOAST_SCRIPT: &str = r#"
() => {
  const status = document.querySelector('[role="status"], [role="alert"]');
  const toast = document.querySelector('.toast, [class*="toast"], [class*="Toast"]');
  return !!(status || toast);
}
"#;

const FORM_VALIDITY_SCRIPT: &str = r#"
() => {
  const forms = document.querySelectorAll('form');
  if (forms.length === 0) return null;
  for (const form of forms) {
    if (form.querySelector(':invalid')) return false;
  }
  return true;
}
"#;

const LOADER_SCRIPT: &str = r#"
() => {
  const busy = document.querySelector('[aria-busy="true"]');
  const progressbar = document.querySelector('[role="progressbar"]');
  const spinner = document.querySelector('[class*="spinner"], [class*="loading"], [class*="loader"]');
  return !!(busy || progressbar || spinner);
}
"#;

/// Stateful page inspector. Tracks the previous role tree and state summary
/// so diffs and URL transitions can be scored across observations.
pub struct Detectors {
    observer_cfg: ObserverConfig,
    capture_cfg: CaptureConfig,
    vision: Option<Arc<dyn VisionCapability>>,
    task_context: Option<String>,
    previous_roles: Option<Vec<RoleNode>>,
    previous_state: Option<serde_json::Value>,
}

impl Detectors {
    pub fn new(observer_cfg: ObserverConfig, capture_cfg: CaptureConfig) -> Self {
        Self {
            observer_cfg,
            capture_cfg,
            vision: None,
            task_context: None,
            previous_roles: None,
            previous_state: None,
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionCapability>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn set_task_context(&mut self, task: &str) {
        self.task_context = Some(task.to_string());
    }

    /// Full capture sequence against one quiescent page: url, role tree,
    /// detections, diff, signature, screenshots, significance.
    pub async fn capture_state(
        &mut self,
        page: &dyn Page,
        action_desc: Option<&str>,
        save_dir: Option<&Path>,
        index: usize,
    ) -> Result<UIState> {
        page.wait_for_load_state().await?;

        let current_url = page.url();
        let roles = self.extract_role_tree(page).await?;
        let has_modal = roles.iter().any(|r| r.role == "dialog");
        let has_toast = page
            .evaluate(TOAST_SCRIPT, None)
            .await?
            .as_bool()
            .unwrap_or(false);
        let form_validity = page.evaluate(FORM_VALIDITY_SCRIPT, None).await?.as_bool();
        let has_loader = page
            .evaluate(LOADER_SCRIPT, None)
            .await?
            .as_bool()
            .unwrap_or(false);
        let role_diff = self.compute_role_diff(&roles);
        let signature = hash_signature(&current_url, &roles);
        let description = describe(
            &current_url,
            &roles,
            has_toast,
            form_validity,
            has_loader,
            role_diff,
        );

        let screenshots =
            capture::capture_screenshots(page, &self.capture_cfg, save_dir, index, has_modal)
                .await?;

        let (significance, confidence, reasoning) = self.determine_significance(
            &current_url,
            has_modal,
            has_toast,
            form_validity,
            role_diff,
            has_loader,
        );

        let mut metadata = serde_json::Map::new();
        metadata.insert("roles".into(), serde_json::to_value(&roles)?);
        metadata.insert("has_toast".into(), json!(has_toast));
        metadata.insert("form_validity".into(), json!(form_validity));
        metadata.insert("has_loader".into(), json!(has_loader));
        metadata.insert("role_diff".into(), json!(role_diff));
        metadata.insert("significance".into(), json!(significance.as_str()));
        metadata.insert("significance_confidence".into(), json!(confidence));
        metadata.insert("significance_reasoning".into(), json!(reasoning));

        let current_summary = json!({
            "url": current_url,
            "has_modal": has_modal,
            "has_toast": has_toast,
            "form_validity": form_validity,
        });

        if let Some(vision) = &self.vision {
            match page.screenshot_bytes().await {
                Ok(png) => {
                    let analysis = vision
                        .analyze_significance(
                            &png,
                            self.task_context.as_deref().unwrap_or(""),
                            &current_summary,
                            self.previous_state.as_ref(),
                        )
                        .await;
                    match analysis {
                        Ok(result) => {
                            // Vision overrides the heuristic; the heuristic
                            // values above remain as fallback in metadata.
                            metadata.insert("vision_analysis".into(), serde_json::to_value(&result)?);
                            if result.significance.parse::<Significance>().is_ok() {
                                metadata.insert("significance".into(), json!(result.significance));
                            }
                            metadata
                                .insert("significance_confidence".into(), json!(result.confidence));
                            metadata
                                .insert("significance_reasoning".into(), json!(result.reasoning));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "vision significance analysis failed")
                        }
                    }
                }
                Err(err) => tracing::warn!(error = %err, "screenshot bytes unavailable for vision"),
            }
        }

        self.previous_state = Some(current_summary);

        Ok(UIState {
            id: format!("state_{}", &signature[..8]),
            url: current_url,
            description,
            has_modal,
            action: action_desc.map(String::from),
            screenshots,
            metadata,
            state_signature: signature,
        })
    }

    async fn extract_role_tree(&self, page: &dyn Page) -> Result<Vec<RoleNode>> {
        let data = page.evaluate(ROLE_TREE_SCRIPT, None).await?;
        let nodes: Vec<RoleNode> = data
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|n| {
                        let role = n.get("role")?.as_str()?.to_string();
                        let name = n
                            .get("name")
                            .and_then(|v| v.as_str())
                            .map(String::from);
                        Some(RoleNode {
                            role,
                            name,
                            selector: None,
                        })
                    })
                    .take(ROLE_TREE_LIMIT)
                    .collect()
            })
            .unwrap_or_default();
        if nodes.len() >= ROLE_TREE_LIMIT {
            // A dialog past the cutoff will not be seen by modal detection.
            tracing::debug!(limit = ROLE_TREE_LIMIT, "role tree truncated");
        }
        Ok(nodes)
    }

    fn compute_role_diff(&mut self, roles: &[RoleNode]) -> Option<f64> {
        let previous = match self.previous_roles.replace(roles.to_vec()) {
            Some(previous) => previous,
            None => return None,
        };
        let diff = 1.0 - jaccard_similarity(&previous, roles);
        (diff > self.observer_cfg.role_diff_threshold).then_some(diff)
    }

    fn determine_significance(
        &mut self,
        current_url: &str,
        has_modal: bool,
        has_toast: bool,
        form_validity: Option<bool>,
        role_diff: Option<f64>,
        has_loader: bool,
    ) -> (Significance, f64, String) {
        let mut significance = Significance::Optional;
        let mut confidence: f64 = 0.5;
        let mut reasoning: Vec<String> = Vec::new();

        let previous_url = self
            .previous_state
            .as_ref()
            .and_then(|s| s.get("url"))
            .and_then(|v| v.as_str());
        if !current_url.is_empty() && previous_url != Some(current_url) {
            significance = Significance::Supporting;
            confidence = 0.65;
            reasoning.push(format!("Navigated to {}", path_label(current_url)));
        }

        if has_modal || has_toast {
            significance = Significance::Critical;
            confidence = 0.85;
            if has_modal {
                reasoning.push("Modal dialog visible".into());
            }
            if has_toast {
                reasoning.push("Toast/alert detected".into());
            }
        } else if form_validity == Some(true) && !has_loader {
            significance = Significance::Supporting;
            confidence = 0.7;
            reasoning.push("Form validated successfully".into());
        } else if has_loader {
            significance = Significance::Supporting;
            confidence = 0.6;
            reasoning.push("Loading indicator detected".into());
        }

        if let Some(diff) = role_diff {
            if diff > 0.2 && significance != Significance::Critical {
                significance = Significance::Supporting;
                confidence = confidence.max(0.65);
                reasoning.push("Significant role-tree change".into());
            }
        }

        if reasoning.is_empty() {
            reasoning.push("Stable navigation state".into());
        }

        (significance, confidence, reasoning.join("; "))
    }
}

fn path_label(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| "/".to_string());
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "home".to_string()
    } else {
        trimmed.to_string()
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// SHA-256 over the URL and the first 50 (role, name) pairs, matching the
/// signature format archived alongside each state.
pub fn hash_signature(url: &str, roles: &[RoleNode]) -> String {
    let pairs: Vec<(&str, Option<&str>)> = roles
        .iter()
        .take(SIGNATURE_ROLE_LIMIT)
        .map(|r| (r.role.as_str(), r.name.as_deref()))
        .collect();
    // serde_json maps are sorted by key, so the payload is deterministic.
    let payload = serde_json::to_string(&json!({
        "url": url,
        "roles": pairs,
    }))
    .unwrap_or_default();
    hex::encode(sha2::Sha256::digest(payload.as_bytes()))
}

fn describe(
    url: &str,
    roles: &[RoleNode],
    has_toast: bool,
    form_validity: Option<bool>,
    has_loader: bool,
    role_diff: Option<f64>,
) -> String {
    let mut parts = vec![format!("{} page", capitalize(&path_label(url)))];
    if roles.iter().any(|r| r.role == "dialog") {
        parts.push("Dialog open".into());
    }
    if has_toast {
        parts.push("Toast visible".into());
    }
    match form_validity {
        Some(false) => parts.push("Form invalid".into()),
        Some(true) => parts.push("Form valid".into()),
        None => {}
    }
    if has_loader {
        parts.push("Loading".into());
    }
    if let Some(diff) = role_diff {
        parts.push(format!("Structure changed ({diff:.2})"));
    }
    parts.join(" | ")
}
