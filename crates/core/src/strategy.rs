use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constitution::FailureStore;
use crate::schemas::PlanStep;

const SEARCH_TOKENS: &[&str] = &["search", "lookup", "find"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Role,
    #[serde(rename = "data-testid")]
    DataTestid,
    Text,
    Css,
    Xpath,
    Placeholder,
    RoleSearchbox,
    CssSearch,
    AriaLabel,
}

/// A ranked recipe for resolving an element description to a locator,
/// scored by an exponential moving average of past outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorStrategy {
    pub pattern: String,
    pub kind: StrategyKind,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl SelectorStrategy {
    fn new(pattern: &str, kind: StrategyKind, context: Map<String, Value>) -> Self {
        Self {
            pattern: pattern.to_string(),
            kind,
            success_rate: 0.0,
            usage_count: 0,
            context,
        }
    }
}

/// Learns selector strategies from persisted constitution failures and past
/// outcomes. The JSON store is keyed by website pattern, normalized element
/// description, and step identity; this process is its only writer.
pub struct StrategyGenerator {
    failure_store: Option<Arc<FailureStore>>,
    strategies_file: PathBuf,
    strategies: HashMap<String, Vec<SelectorStrategy>>,
}

impl StrategyGenerator {
    pub fn new(failure_store: Option<Arc<FailureStore>>, strategies_file: PathBuf) -> Self {
        let mut generator = Self {
            failure_store,
            strategies_file,
            strategies: HashMap::new(),
        };
        generator.load();
        generator
    }

    fn load(&mut self) {
        let Ok(content) = std::fs::read_to_string(&self.strategies_file) else {
            return;
        };
        match serde_json::from_str::<HashMap<String, Vec<SelectorStrategy>>>(&content) {
            Ok(strategies) => {
                let count: usize = strategies.values().map(|v| v.len()).sum();
                tracing::info!(count, "strategies loaded");
                self.strategies = strategies;
            }
            Err(err) => tracing::warn!(error = %err, "failed to load strategies"),
        }
    }

    /// Write-then-rename so readers racing a save see a complete file.
    fn save(&self) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.strategies_file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(&self.strategies)
                .map_err(std::io::Error::other)?;
            let tmp = self.strategies_file.with_extension("json.tmp");
            std::fs::write(&tmp, content)?;
            std::fs::rename(&tmp, &self.strategies_file)?;
            Ok(())
        };
        if let Err(err) = write() {
            tracing::warn!(error = %err, "failed to save strategies");
        }
    }

    fn cache_key(description: &str, website_pattern: Option<&str>, step: Option<&PlanStep>) -> String {
        let step_key = step
            .and_then(|s| s.selector.clone().or_else(|| s.name.clone()))
            .unwrap_or_default();
        format!(
            "{}:{}:{}",
            website_pattern.unwrap_or("generic"),
            description.to_lowercase(),
            step_key
        )
    }

    /// Bucket recent persisted failures into selector / action / navigation /
    /// auth patterns for the planner context.
    pub fn analyze_failures(&self, limit: usize) -> Value {
        let Some(store) = &self.failure_store else {
            return json!({});
        };
        let reports = store.failures(None, limit);
        if reports.is_empty() {
            return json!({});
        }

        let mut selector_failures = Vec::new();
        let mut action_failures = Vec::new();
        let mut navigation_failures = Vec::new();
        let mut auth_failures = Vec::new();

        for report in &reports {
            for f in report
                .get("failures")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
            {
                let rule = f
                    .get("rule_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_lowercase();
                let entry = json!({
                    "rule": rule,
                    "details": f.get("details").cloned().unwrap_or(Value::Null),
                    "context": report.get("context").cloned().unwrap_or(Value::Null),
                });
                if rule.contains("selector") || rule.contains("locator") {
                    selector_failures.push(entry);
                } else if rule.contains("action") {
                    action_failures.push(entry);
                } else if rule.contains("navigation") {
                    navigation_failures.push(entry);
                } else if rule.contains("auth") {
                    auth_failures.push(entry);
                }
            }
        }

        json!({
            "selector_failures": selector_failures,
            "action_failures": action_failures,
            "navigation_failures": navigation_failures,
            "auth_failures": auth_failures,
        })
    }

    /// Generate (or recall) ranked strategies for an element description.
    /// Search-flavored descriptions seed specialized strategies first.
    pub fn generate_selector_strategies(
        &mut self,
        description: &str,
        website_pattern: Option<&str>,
        step: Option<&PlanStep>,
    ) -> Vec<SelectorStrategy> {
        let key = Self::cache_key(description, website_pattern, step);
        if let Some(existing) = self.strategies.get_mut(&key) {
            existing.sort_by(|a, b| {
                b.success_rate
                    .partial_cmp(&a.success_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            return existing.clone();
        }

        let step_key = step
            .and_then(|s| s.selector.clone().or_else(|| s.name.clone()))
            .unwrap_or_default();
        let ctx = |pairs: &[(&str, Value)]| -> Map<String, Value> {
            let mut map = Map::new();
            for (k, v) in pairs {
                map.insert(k.to_string(), v.clone());
            }
            map.insert("step_key".into(), json!(step_key));
            map
        };

        let mut strategies = Vec::new();

        let description_lower = description.to_lowercase();
        let selector_lower = step
            .and_then(|s| s.selector.as_deref())
            .unwrap_or("")
            .to_lowercase();
        let is_search = SEARCH_TOKENS.iter().any(|t| description_lower.contains(t))
            || selector_lower.contains("search");
        if is_search {
            strategies.push(SelectorStrategy::new(
                description,
                StrategyKind::Placeholder,
                ctx(&[
                    ("attribute", json!("placeholder")),
                    ("includes", json!(["search", "find", "look"])),
                ]),
            ));
            strategies.push(SelectorStrategy::new(
                description,
                StrategyKind::RoleSearchbox,
                ctx(&[]),
            ));
            strategies.push(SelectorStrategy::new(
                description,
                StrategyKind::CssSearch,
                ctx(&[(
                    "selectors",
                    json!([
                        "input[type='search']",
                        "input[role='searchbox']",
                        "form input[type='text']"
                    ]),
                )]),
            ));
            strategies.push(SelectorStrategy::new(
                description,
                StrategyKind::AriaLabel,
                ctx(&[
                    ("attribute", json!("aria-label")),
                    ("includes", json!(["search", "find"])),
                ]),
            ));
        }

        strategies.push(SelectorStrategy::new(
            description,
            StrategyKind::Role,
            ctx(&[("use_name_variants", json!(true))]),
        ));
        strategies.push(SelectorStrategy::new(
            description,
            StrategyKind::DataTestid,
            ctx(&[("use_dash_underscore", json!(true))]),
        ));
        strategies.push(SelectorStrategy::new(
            description,
            StrategyKind::Text,
            ctx(&[("use_regex", json!(true)), ("case_insensitive", json!(true))]),
        ));
        strategies.push(SelectorStrategy::new(
            description,
            StrategyKind::Css,
            ctx(&[("use_common_patterns", json!(true))]),
        ));
        strategies.push(SelectorStrategy::new(
            description,
            StrategyKind::Xpath,
            ctx(&[("use_text_matching", json!(true))]),
        ));

        self.strategies.insert(key, strategies.clone());
        self.save();
        strategies
    }

    /// EMA update: rate ← 0.9·rate + 0.1·outcome, usage_count incremented.
    pub fn record_result(
        &mut self,
        strategy: &SelectorStrategy,
        success: bool,
        description: Option<&str>,
        website_pattern: Option<&str>,
        step: Option<&PlanStep>,
    ) {
        let key = Self::cache_key(description.unwrap_or("unknown"), website_pattern, step);
        if let Some(strategies) = self.strategies.get_mut(&key) {
            for s in strategies.iter_mut() {
                if s.pattern == strategy.pattern && s.kind == strategy.kind {
                    s.usage_count += 1;
                    let outcome = if success { 1.0 } else { 0.0 };
                    s.success_rate = 0.9 * s.success_rate + 0.1 * outcome;
                    break;
                }
            }
            self.save();
        }
    }

    pub fn best_strategies(
        &mut self,
        description: &str,
        website_pattern: Option<&str>,
        limit: usize,
        step: Option<&PlanStep>,
    ) -> Vec<SelectorStrategy> {
        let mut strategies = self.generate_selector_strategies(description, website_pattern, step);
        strategies.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        strategies.truncate(limit);
        strategies
    }

    /// Rewrite only the element-identification fields of a failed step
    /// according to the best-ranked strategy. Returns None when nothing
    /// would change.
    pub fn suggest_improved_step(
        &mut self,
        failed_step: &PlanStep,
        _failure_reason: &str,
        website_pattern: Option<&str>,
    ) -> Option<PlanStep> {
        if failed_step.name.is_none() && failed_step.selector.is_none() {
            return None;
        }
        let description = failed_step
            .name
            .clone()
            .or_else(|| failed_step.selector.clone())
            .unwrap_or_default();
        let strategies =
            self.best_strategies(&description, website_pattern, 1, Some(failed_step));

        for strategy in strategies {
            let mut improved = failed_step.clone();
            match strategy.kind {
                StrategyKind::Role if failed_step.name.is_some() => {
                    improved.role = failed_step.role.clone().or_else(|| Some("button".into()));
                }
                StrategyKind::DataTestid if failed_step.name.is_some() => {
                    let base = description.to_lowercase().replace(' ', "-");
                    improved.selector = Some(format!("[data-testid=\"{base}\"]"));
                }
                StrategyKind::Text if failed_step.name.is_some() => {
                    improved.selector = None;
                }
                StrategyKind::Css if failed_step.name.is_some() => {
                    let base = description.to_lowercase().replace(' ', "-");
                    improved.selector = Some(format!(
                        "button[data-testid=\"{base}\"], [data-testid=\"{base}\"]"
                    ));
                }
                StrategyKind::Placeholder => {
                    improved.selector = Some(
                        "input[placeholder*='search' i], input[placeholder*='find' i], \
                         input[placeholder*='wiki' i]"
                            .into(),
                    );
                }
                StrategyKind::RoleSearchbox => {
                    improved.role = Some("searchbox".into());
                    improved.selector = None;
                }
                StrategyKind::CssSearch => {
                    let mut selectors: Vec<String> = strategy
                        .context
                        .get("selectors")
                        .and_then(|v| v.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|s| s.as_str())
                                .map(String::from)
                                .collect()
                        })
                        .unwrap_or_default();
                    if !selectors.is_empty() {
                        selectors.push("input#searchInput".into());
                        selectors.push("form input[name='search']".into());
                        improved.selector = Some(selectors.join(", "));
                    }
                }
                StrategyKind::AriaLabel => {
                    improved.selector = Some(
                        "input[aria-label*='search' i], input[aria-label*='find' i], \
                         input[aria-label*='wiki' i]"
                            .into(),
                    );
                }
                _ => {}
            }

            if improved.selector != failed_step.selector || improved.role != failed_step.role {
                return Some(improved);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Action;

    fn generator(dir: &std::path::Path) -> StrategyGenerator {
        StrategyGenerator::new(None, dir.join("_strategies/strategies.json"))
    }

    #[test]
    fn search_descriptions_seed_specialized_strategies_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = generator(dir.path());
        let strategies =
            generator.generate_selector_strategies("search input", Some("wikipedia.org"), None);
        assert_eq!(strategies[0].kind, StrategyKind::Placeholder);
        assert_eq!(strategies[1].kind, StrategyKind::RoleSearchbox);
        assert!(strategies.len() > 5);
    }

    #[test]
    fn generic_descriptions_seed_generic_strategies_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = generator(dir.path());
        let strategies = generator.generate_selector_strategies("submit button", None, None);
        assert_eq!(strategies.len(), 5);
        assert_eq!(strategies[0].kind, StrategyKind::Role);
    }

    #[test]
    fn record_result_moves_rate_toward_one_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = generator(dir.path());
        let strategies = generator.generate_selector_strategies("create button", None, None);
        let chosen = strategies[0].clone();

        let mut last_rate = 0.0;
        for _ in 0..10 {
            generator.record_result(&chosen, true, Some("create button"), None, None);
            let current = generator
                .best_strategies("create button", None, 10, None)
                .into_iter()
                .find(|s| s.kind == chosen.kind)
                .unwrap();
            assert!(current.success_rate >= last_rate);
            assert!(current.success_rate <= 1.0);
            last_rate = current.success_rate;
        }
        assert!(last_rate > 0.6);
    }

    #[test]
    fn best_strategies_sorted_descending_after_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = generator(dir.path());
        let strategies = generator.generate_selector_strategies("create button", None, None);
        let text = strategies
            .iter()
            .find(|s| s.kind == StrategyKind::Text)
            .unwrap()
            .clone();
        generator.record_result(&text, true, Some("create button"), None, None);
        generator.record_result(&text, true, Some("create button"), None, None);

        let best = generator.best_strategies("create button", None, 3, None);
        assert_eq!(best[0].kind, StrategyKind::Text);
        assert!(best.windows(2).all(|w| w[0].success_rate >= w[1].success_rate));
    }

    #[test]
    fn persistence_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut generator = generator(dir.path());
            let strategies = generator.generate_selector_strategies("save button", None, None);
            generator.record_result(&strategies[0], true, Some("save button"), None, None);
        }
        let mut reloaded = generator(dir.path());
        let strategies = reloaded.generate_selector_strategies("save button", None, None);
        assert!(strategies.iter().any(|s| s.usage_count == 1));
    }

    #[test]
    fn improved_step_rewrites_only_identification_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = generator(dir.path());
        let failed = PlanStep {
            action: Action::Click,
            name: Some("Join waitlist".into()),
            value: Some("unused".into()),
            ..Default::default()
        };
        let improved = generator
            .suggest_improved_step(&failed, "no match", None)
            .unwrap();
        assert_eq!(improved.action, failed.action);
        assert_eq!(improved.value, failed.value);
        assert_eq!(improved.name, failed.name);
        assert!(improved.selector.is_some() || improved.role.is_some());
    }

    #[test]
    fn step_without_identity_gets_no_suggestion() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = generator(dir.path());
        let failed = PlanStep {
            action: Action::Click,
            ..Default::default()
        };
        assert!(generator
            .suggest_improved_step(&failed, "no match", None)
            .is_none());
    }
}
