use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Current browser viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl From<parallax_config::ViewportSize> for Viewport {
    fn from(v: parallax_config::ViewportSize) -> Self {
        Self {
            width: v.width,
            height: v.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Name matching modes used across the locator cascade.
#[derive(Debug, Clone)]
pub enum TextMatch {
    Exact(String),
    Substring(String),
    /// Case-insensitive regex over the element text.
    Regex(String),
}

impl TextMatch {
    pub fn ci_regex_for(text: &str) -> TextMatch {
        TextMatch::Regex(regex::escape(text))
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            TextMatch::Exact(t) => candidate == t,
            TextMatch::Substring(t) => candidate.contains(t.as_str()),
            TextMatch::Regex(pattern) => regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(candidate))
                .unwrap_or(false),
        }
    }
}

/// Handle to a set of elements matching a query, mirroring the driver's
/// locator semantics: queries are lazy, `count` and actions resolve live.
#[async_trait]
pub trait Locator: Send + Sync + std::fmt::Debug {
    async fn count(&self) -> Result<usize>;
    fn first(&self) -> Arc<dyn Locator>;
    fn filter_has_text(&self, text: &TextMatch) -> Arc<dyn Locator>;
    async fn wait_for_visible(&self, timeout_ms: u64) -> Result<()>;
    async fn scroll_into_view_if_needed(&self, timeout_ms: u64) -> Result<()>;
    async fn click(&self) -> Result<()>;
    async fn double_click(&self) -> Result<()>;
    async fn right_click(&self) -> Result<()>;
    async fn hover(&self) -> Result<()>;
    async fn fill(&self, value: &str) -> Result<()>;
    /// Simulates keystrokes; `fill` replaces the value instead.
    async fn type_text(&self, value: &str) -> Result<()>;
    async fn press(&self, key: &str) -> Result<()>;
    async fn select_option(&self, value: &str) -> Result<()>;
    async fn set_checked(&self, checked: bool) -> Result<()>;
    async fn focus(&self) -> Result<()>;
    async fn blur(&self) -> Result<()>;
    async fn set_input_files(&self, path: &Path) -> Result<()>;
    async fn drag_to(&self, target: Arc<dyn Locator>) -> Result<()>;
    async fn all_inner_texts(&self) -> Result<Vec<String>>;
    async fn bounding_box(&self) -> Result<Option<Rect>>;
}

/// One browser page. The core never talks to a driver protocol directly;
/// anything implementing this capability can back the pipeline.
#[async_trait]
pub trait Page: Send + Sync {
    fn url(&self) -> String;
    async fn goto(&self, url: &str) -> Result<()>;
    async fn go_back(&self) -> Result<()>;
    async fn go_forward(&self) -> Result<()>;
    async fn reload(&self) -> Result<()>;
    /// Gate used to quiesce the page before captures.
    async fn wait_for_load_state(&self) -> Result<()>;
    async fn wait_for_timeout(&self, ms: u64);
    async fn screenshot(&self, path: &Path, full_page: bool, clip: Option<Rect>) -> Result<()>;
    async fn screenshot_bytes(&self) -> Result<Vec<u8>>;
    fn viewport_size(&self) -> Option<Viewport>;
    async fn set_viewport_size(&self, viewport: Viewport) -> Result<()>;
    async fn evaluate(
        &self,
        script: &str,
        args: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>;
    async fn press_key(&self, key: &str) -> Result<()>;
    fn locator(&self, selector: &str) -> Arc<dyn Locator>;
    fn get_by_role(&self, role: &str, name: Option<TextMatch>) -> Arc<dyn Locator>;
    fn get_by_text(&self, text: TextMatch) -> Arc<dyn Locator>;
}

/// The owning browser context: tracing control plus teardown. Must be
/// closed on every exit path of an attempt.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn tracing_start(&self) -> Result<()>;
    async fn tracing_stop(&self, path: &Path) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// One page plus its context, as opened for a single attempt.
pub struct BrowserSession {
    pub page: Arc<dyn Page>,
    pub context: Arc<dyn BrowserContext>,
}

/// Launches browser sessions. Supplied by the embedding application; the
/// orchestrator opens one session per attempt and always closes it.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, browser: &parallax_config::BrowserConfig) -> Result<BrowserSession>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_match_semantics() {
        assert!(TextMatch::Exact("Create".into()).matches("Create"));
        assert!(!TextMatch::Exact("Create".into()).matches("Created"));
        assert!(TextMatch::Substring("reate".into()).matches("Created"));
        assert!(TextMatch::ci_regex_for("join waitlist").matches("Join Waitlist"));
        assert!(!TextMatch::ci_regex_for("join waitlist").matches("Join later"));
    }

    #[test]
    fn ci_regex_escapes_metacharacters() {
        let m = TextMatch::ci_regex_for("What's new? (beta)");
        assert!(m.matches("what's new? (beta)"));
        assert!(!m.matches("whats new beta"));
    }
}
