use std::sync::Arc;
use std::time::Instant;

use unicode_normalization::UnicodeNormalization;

use crate::driver::{Locator, Page, TextMatch};
use crate::error::LocatorError;
use crate::schemas::PlanStep;

const VISIBILITY_TIMEOUT_MS: u64 = 2000;
const STEP_BUDGET_MS: u64 = 15_000;

/// Resolves plan steps to live elements by walking a fixed strategy
/// cascade: role, data-testid heuristics, literal selector, text
/// fallbacks, then XPath fallbacks.
pub struct LocatorResolver {
    page: Arc<dyn Page>,
}

impl LocatorResolver {
    pub fn new(page: Arc<dyn Page>) -> Self {
        Self { page }
    }

    pub async fn resolve(&self, step: &PlanStep) -> Result<Arc<dyn Locator>, LocatorError> {
        let variants = step
            .name
            .as_deref()
            .map(text_variants)
            .unwrap_or_default();
        let started = Instant::now();

        if let Some(role) = &step.role {
            let candidates = self.role_locators(role, &variants);
            if let Some(found) = self.first_matching(candidates, "role", started).await? {
                return Ok(found);
            }
        }

        if !variants.is_empty() {
            let candidates = self.data_testid_locators(&variants);
            if let Some(found) = self
                .first_matching(candidates, "data-testid", started)
                .await?
            {
                return Ok(found);
            }
        }

        if let Some(selector) = &step.selector {
            let candidates = vec![self.page.locator(selector)];
            if let Some(found) = self.first_matching(candidates, "selector", started).await? {
                return Ok(found);
            }
        }

        if !variants.is_empty() {
            let candidates = self.text_locators(&variants, step.role.as_deref());
            if let Some(found) = self.first_matching(candidates, "text", started).await? {
                return Ok(found);
            }

            let candidates = self.xpath_locators(&variants, step.role.as_deref());
            if let Some(found) = self.first_matching(candidates, "xpath", started).await? {
                return Ok(found);
            }
        }

        if step.role.is_none() && step.selector.is_none() && variants.is_empty() {
            return Err(LocatorError::InsufficientInfo {
                action: step.action.to_string(),
            });
        }

        self.log_diagnostics(step, &variants).await;
        Err(LocatorError::NoMatch {
            description: step.describe(),
        })
    }

    /// First candidate with at least one match that also proves visible.
    /// Counts of zero skip the candidate; counts above one take `first`.
    async fn first_matching(
        &self,
        candidates: Vec<Arc<dyn Locator>>,
        strategy: &str,
        started: Instant,
    ) -> Result<Option<Arc<dyn Locator>>, LocatorError> {
        let mut attempts = 0usize;
        for locator in candidates {
            if started.elapsed().as_millis() as u64 > STEP_BUDGET_MS {
                return Err(LocatorError::BudgetExhausted {
                    description: strategy.to_string(),
                    budget_ms: STEP_BUDGET_MS,
                });
            }
            attempts += 1;
            let count = match locator.count().await {
                Ok(count) => count,
                Err(err) => {
                    tracing::debug!(strategy, error = %err, "locator count failed");
                    continue;
                }
            };
            if count == 0 {
                continue;
            }
            let candidate = if count > 1 { locator.first() } else { locator };
            match candidate.wait_for_visible(VISIBILITY_TIMEOUT_MS).await {
                Ok(()) => {
                    tracing::debug!(strategy, attempts, "locator resolved");
                    return Ok(Some(candidate));
                }
                Err(err) => {
                    tracing::debug!(strategy, error = %err, "candidate not visible");
                    continue;
                }
            }
        }
        tracing::debug!(strategy, attempts, "strategy exhausted");
        Ok(None)
    }

    fn role_locators(&self, role: &str, variants: &[String]) -> Vec<Arc<dyn Locator>> {
        let mut out: Vec<Arc<dyn Locator>> = Vec::new();
        for variant in variants {
            let regex = TextMatch::ci_regex_for(variant);
            out.push(
                self.page
                    .get_by_role(role, Some(TextMatch::Exact(variant.clone()))),
            );
            out.push(
                self.page
                    .get_by_role(role, Some(TextMatch::Substring(variant.clone()))),
            );
            out.push(self.page.get_by_role(role, Some(regex.clone())));
            out.push(self.page.get_by_role(role, None).filter_has_text(&regex));
            for selector in role_selector_candidates(role) {
                out.push(self.page.locator(&selector).filter_has_text(&regex));
            }
        }
        out
    }

    fn data_testid_locators(&self, variants: &[String]) -> Vec<Arc<dyn Locator>> {
        let mut selectors: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for variant in variants {
            let value = collapse_whitespace(variant).to_lowercase();
            if value.is_empty() {
                continue;
            }
            let dash = value.replace(' ', "-");
            let underscore = value.replace(' ', "_");
            for selector in [
                format!("[data-testid=\"{dash}\"]"),
                format!("[data-testid=\"{underscore}\"]"),
                format!("[data-testid*=\"{value}\"]"),
            ] {
                if seen.insert(selector.clone()) {
                    selectors.push(selector);
                }
            }
        }
        selectors
            .iter()
            .map(|s| self.page.locator(s))
            .collect()
    }

    fn text_locators(&self, variants: &[String], preferred_role: Option<&str>) -> Vec<Arc<dyn Locator>> {
        let mut out: Vec<Arc<dyn Locator>> = Vec::new();
        for variant in variants {
            let regex = TextMatch::ci_regex_for(variant);
            let literal = selector_literal(variant);
            out.push(self.page.get_by_text(TextMatch::Exact(variant.clone())));
            out.push(self.page.get_by_text(TextMatch::Substring(variant.clone())));
            out.push(self.page.get_by_text(regex.clone()));
            out.push(self.page.locator(&format!("text={literal}")));
            out.push(self.page.locator(&format!("[aria-label={literal}]")));
            out.push(self.page.locator(&format!("[aria-label*={literal}]")));
            out.push(self.page.locator(&format!("[title={literal}]")));
            out.push(self.page.locator(&format!("[title*={literal}]")));
            if let Some(role) = preferred_role {
                for selector in role_selector_candidates(role) {
                    out.push(self.page.locator(&selector).filter_has_text(&regex));
                }
            }
            out.push(self.page.locator("a").filter_has_text(&regex));
            out.push(self.page.locator("[role=\"link\"]").filter_has_text(&regex));
        }
        out
    }

    fn xpath_locators(&self, variants: &[String], preferred_role: Option<&str>) -> Vec<Arc<dyn Locator>> {
        let conditions = role_xpath_conditions(preferred_role);
        let predicate = if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" or "))
        };
        let mut out: Vec<Arc<dyn Locator>> = Vec::new();
        for variant in variants {
            let literal = xpath_literal(variant);
            match &predicate {
                Some(p) => {
                    out.push(self.page.locator(&format!(
                        "xpath=//*[{p}][normalize-space(.)={literal}]"
                    )));
                    out.push(self.page.locator(&format!(
                        "xpath=//*[{p}][contains(normalize-space(.), {literal})]"
                    )));
                }
                None => {
                    out.push(
                        self.page
                            .locator(&format!("xpath=//*[normalize-space(.)={literal}]")),
                    );
                    out.push(self.page.locator(&format!(
                        "xpath=//*[contains(normalize-space(.), {literal})]"
                    )));
                }
            }
        }
        out
    }

    async fn log_diagnostics(&self, step: &PlanStep, variants: &[String]) {
        let sample_texts = match &step.role {
            Some(role) => self
                .page
                .get_by_role(role, None)
                .all_inner_texts()
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        };
        tracing::debug!(
            action = %step.action,
            role = ?step.role,
            selector = ?step.selector,
            name = ?step.name,
            variants = ?&variants[..variants.len().min(5)],
            sample_texts = ?sample_texts
                .iter()
                .take(5)
                .map(|s| collapse_whitespace(s))
                .collect::<Vec<_>>(),
            "locator cascade exhausted"
        );
    }
}

const SMART_TO_ASCII: &[(char, &str)] = &[
    ('\u{2019}', "'"),
    ('\u{2018}', "'"),
    ('\u{201b}', "'"),
    ('\u{201c}', "\""),
    ('\u{201d}', "\""),
    ('\u{201e}', "\""),
    ('\u{2013}', "-"),
    ('\u{2014}', "-"),
    ('\u{2011}', "-"),
    ('\u{a0}', " "),
];

fn smart_to_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    'outer: for c in text.chars() {
        for (from, to) in SMART_TO_ASCII {
            if c == *from {
                out.push_str(to);
                continue 'outer;
            }
        }
        out.push(c);
    }
    out
}

fn ascii_to_smart(text: &str) -> String {
    text.replace('\'', "\u{2019}").replace('"', "\u{201d}")
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ordered, de-duplicated name variants: original, NFKC, quote swaps both
/// directions, lowercase, title case. Every variant is whitespace-collapsed.
pub fn text_variants(text: &str) -> Vec<String> {
    let mut variants = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut add = |value: String| {
        let collapsed = collapse_whitespace(&value);
        if !collapsed.is_empty() && seen.insert(collapsed.clone()) {
            variants.push(collapsed);
        }
    };

    let normalized: String = text.nfkc().collect();
    add(text.to_string());
    add(normalized.clone());
    add(smart_to_ascii(text));
    add(smart_to_ascii(&normalized));
    add(ascii_to_smart(text));
    add(ascii_to_smart(&normalized));
    add(text.to_lowercase());
    add(title_case(text));
    variants
}

fn role_selector_candidates(role: &str) -> Vec<String> {
    let raw: &[&str] = match role {
        "link" => &["a", "[role=\"link\"]"],
        "button" => &[
            "button",
            "[role=\"button\"]",
            "input[type='button']",
            "input[type='submit']",
        ],
        "menuitem" => &["[role=\"menuitem\"]"],
        "tab" => &["[role=\"tab\"]"],
        "checkbox" => &["input[type='checkbox']", "[role=\"checkbox\"]"],
        "radio" => &["input[type='radio']", "[role=\"radio\"]"],
        "option" => &["option", "[role=\"option\"]"],
        _ => return vec![format!("[role=\"{role}\"]")],
    };
    raw.iter().map(|s| s.to_string()).collect()
}

fn role_xpath_conditions(role: Option<&str>) -> Vec<String> {
    let raw: &[&str] = match role {
        Some("link") => &["self::a", "@role='link'"],
        Some("button") => &[
            "self::button",
            "@role='button'",
            "self::input[@type='button']",
            "self::input[@type='submit']",
        ],
        Some("menuitem") => &["@role='menuitem'"],
        Some("tab") => &["@role='tab'"],
        Some("checkbox") => &["@role='checkbox'", "self::input[@type='checkbox']"],
        Some("radio") => &["@role='radio'", "self::input[@type='radio']"],
        Some("option") => &["@role='option'", "self::option"],
        Some(other) => return vec![format!("@role='{other}'")],
        None => &[
            "self::a",
            "@role='link'",
            "@role='button'",
            "self::button",
            "self::input[@type='button']",
            "self::input[@type='submit']",
        ],
    };
    raw.iter().map(|s| s.to_string()).collect()
}

fn selector_literal(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('`', "\\`")
        .replace('\n', "\\A ");
    format!("\"{escaped}\"")
}

fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    if !text.contains('"') {
        return format!("\"{text}\"");
    }
    let parts: Vec<&str> = text.split('\'').collect();
    let mut tokens = Vec::new();
    for (idx, part) in parts.iter().enumerate() {
        if !part.is_empty() {
            tokens.push(format!("'{part}'"));
        }
        if idx != parts.len() - 1 {
            tokens.push("\"'\"".to_string());
        }
    }
    format!("concat({})", tokens.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Action;
    use crate::test_support::FakePage;

    fn click_step(role: Option<&str>, name: &str) -> PlanStep {
        PlanStep {
            action: Action::Click,
            role: role.map(String::from),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn variants_cover_quote_and_case_forms() {
        let variants = text_variants("We\u{2019}re  hiring");
        assert!(variants.contains(&"We\u{2019}re hiring".to_string()));
        assert!(variants.contains(&"We're hiring".to_string()));
        assert!(variants.contains(&"we\u{2019}re hiring".to_string()));
        // Whitespace is collapsed in every variant.
        assert!(variants.iter().all(|v| !v.contains("  ")));
    }

    #[test]
    fn xpath_literal_handles_mixed_quotes() {
        assert_eq!(xpath_literal("plain"), "'plain'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        let both = xpath_literal("a'b\"c");
        assert!(both.starts_with("concat("));
        assert!(both.contains("\"'\""));
    }

    #[tokio::test]
    async fn resolves_smart_apostrophe_via_variants() {
        let page = FakePage::with_texts(&["We\u{2019}re hiring", "Join waitlist"]);
        let resolver = LocatorResolver::new(page);
        let step = click_step(Some("link"), "We're hiring");
        let locator = resolver.resolve(&step).await.unwrap();
        assert_eq!(locator.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn resolves_collapsed_whitespace() {
        let page = FakePage::with_texts(&["Join     waitlist"]);
        let resolver = LocatorResolver::new(page);
        let step = click_step(Some("link"), "Join waitlist");
        let locator = resolver.resolve(&step).await.unwrap();
        assert_eq!(locator.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_text_without_role() {
        let page = FakePage::with_texts(&["Join\nwaitlist"]);
        let resolver = LocatorResolver::new(page);
        let step = click_step(None, "Join waitlist");
        let locator = resolver.resolve(&step).await.unwrap();
        assert_eq!(locator.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn matches_aria_label_when_text_is_empty() {
        let page = FakePage::with_labelled(&[("", Some("Join the waitlist"))]);
        let resolver = LocatorResolver::new(page);
        let step = click_step(Some("button"), "Join the waitlist");
        let locator = resolver.resolve(&step).await.unwrap();
        assert_eq!(locator.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn xpath_fallback_matches_containing_text() {
        let page = FakePage::with_texts(&["Join waitlist now"]);
        let resolver = LocatorResolver::new(page);
        let step = click_step(Some("link"), "Join waitlist");
        let locator = resolver.resolve(&step).await.unwrap();
        assert_eq!(locator.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_hint_is_insufficient_info() {
        let page = FakePage::with_texts(&[]);
        let resolver = LocatorResolver::new(page);
        let step = PlanStep {
            action: Action::Click,
            ..Default::default()
        };
        let err = resolver.resolve(&step).await.unwrap_err();
        assert!(matches!(err, LocatorError::InsufficientInfo { .. }));
    }

    #[tokio::test]
    async fn no_match_after_exhausting_cascade() {
        let page = FakePage::with_texts(&["Something else"]);
        let resolver = LocatorResolver::new(page);
        let step = click_step(Some("link"), "Join waitlist");
        let err = resolver.resolve(&step).await.unwrap_err();
        assert!(matches!(err, LocatorError::NoMatch { .. }));
    }

    #[tokio::test]
    async fn hidden_elements_are_rejected() {
        let page = FakePage::with_hidden_texts(&["Join waitlist"]);
        let resolver = LocatorResolver::new(page);
        let step = click_step(Some("link"), "Join waitlist");
        assert!(resolver.resolve(&step).await.is_err());
    }
}
