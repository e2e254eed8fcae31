//! Fake driver implementations used across the crate's tests. The fakes
//! model accessible-name matching the way a real driver does: names are
//! whitespace-collapsed and compared case-insensitively.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::driver::{BrowserContext, Locator, Page, Rect, TextMatch, Viewport};

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub role: Option<String>,
    pub text: String,
    pub aria_label: Option<String>,
    pub visible: bool,
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn element_matches(el: &FakeElement, needle: &TextMatch) -> bool {
    let text = normalize(&el.text);
    let aria = el.aria_label.as_deref().map(normalize).unwrap_or_default();
    match needle {
        TextMatch::Exact(t) => {
            let t = normalize(t);
            text == t || aria == t
        }
        TextMatch::Substring(t) => {
            let t = normalize(t);
            !t.is_empty() && (text.contains(&t) || aria.contains(&t))
        }
        TextMatch::Regex(_) => needle.matches(&el.text) || el
            .aria_label
            .as_deref()
            .map(|a| needle.matches(a))
            .unwrap_or(false),
    }
}

#[derive(Default, Debug)]
pub struct ActionLog {
    pub clicks: AtomicUsize,
    pub fills: Mutex<Vec<String>>,
    pub typed: Mutex<Vec<String>>,
    pub pressed: Mutex<Vec<String>>,
    pub checked: Mutex<Vec<bool>>,
    pub scrolled: AtomicUsize,
}

#[derive(Debug)]
pub struct FakeLocator {
    elements: Vec<FakeElement>,
    log: Arc<ActionLog>,
}

impl FakeLocator {
    fn new(elements: Vec<FakeElement>, log: Arc<ActionLog>) -> Arc<dyn Locator> {
        Arc::new(Self { elements, log })
    }
}

#[async_trait]
impl Locator for FakeLocator {
    async fn count(&self) -> Result<usize> {
        Ok(self.elements.len())
    }

    fn first(&self) -> Arc<dyn Locator> {
        FakeLocator::new(self.elements.iter().take(1).cloned().collect(), self.log.clone())
    }

    fn filter_has_text(&self, text: &TextMatch) -> Arc<dyn Locator> {
        let filtered = self
            .elements
            .iter()
            .filter(|el| element_matches(el, text))
            .cloned()
            .collect();
        FakeLocator::new(filtered, self.log.clone())
    }

    async fn wait_for_visible(&self, _timeout_ms: u64) -> Result<()> {
        match self.elements.first() {
            Some(el) if el.visible => Ok(()),
            Some(_) => anyhow::bail!("element is hidden"),
            None => anyhow::bail!("no elements"),
        }
    }

    async fn scroll_into_view_if_needed(&self, _timeout_ms: u64) -> Result<()> {
        self.log.scrolled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn click(&self) -> Result<()> {
        self.log.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn double_click(&self) -> Result<()> {
        self.log.clicks.fetch_add(2, Ordering::SeqCst);
        Ok(())
    }

    async fn right_click(&self) -> Result<()> {
        self.log.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn hover(&self) -> Result<()> {
        Ok(())
    }

    async fn fill(&self, value: &str) -> Result<()> {
        self.log.fills.lock().unwrap().push(value.to_string());
        Ok(())
    }

    async fn type_text(&self, value: &str) -> Result<()> {
        self.log.typed.lock().unwrap().push(value.to_string());
        Ok(())
    }

    async fn press(&self, key: &str) -> Result<()> {
        self.log.pressed.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn select_option(&self, value: &str) -> Result<()> {
        self.log.fills.lock().unwrap().push(value.to_string());
        Ok(())
    }

    async fn set_checked(&self, checked: bool) -> Result<()> {
        self.log.checked.lock().unwrap().push(checked);
        Ok(())
    }

    async fn focus(&self) -> Result<()> {
        Ok(())
    }

    async fn blur(&self) -> Result<()> {
        Ok(())
    }

    async fn set_input_files(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn drag_to(&self, _target: Arc<dyn Locator>) -> Result<()> {
        Ok(())
    }

    async fn all_inner_texts(&self) -> Result<Vec<String>> {
        Ok(self.elements.iter().map(|e| e.text.clone()).collect())
    }

    async fn bounding_box(&self) -> Result<Option<Rect>> {
        Ok(self.elements.first().map(|_| Rect {
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 80.0,
        }))
    }
}

pub struct FakePage {
    pub elements: Mutex<Vec<FakeElement>>,
    pub url: Mutex<String>,
    pub navigations: Mutex<Vec<String>>,
    pub wait_calls: Mutex<Vec<u64>>,
    pub evaluate_scripts: Mutex<Vec<String>>,
    pub pressed_keys: Mutex<Vec<String>>,
    pub viewport: Mutex<Option<Viewport>>,
    pub viewport_history: Mutex<Vec<Viewport>>,
    pub screenshots: Mutex<Vec<PathBuf>>,
    pub form_validity: Mutex<Option<bool>>,
    pub has_loader: AtomicBool,
    pub log: Arc<ActionLog>,
}

impl FakePage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            elements: Mutex::new(Vec::new()),
            url: Mutex::new("https://example.com".to_string()),
            navigations: Mutex::new(Vec::new()),
            wait_calls: Mutex::new(Vec::new()),
            evaluate_scripts: Mutex::new(Vec::new()),
            pressed_keys: Mutex::new(Vec::new()),
            viewport: Mutex::new(Some(Viewport {
                width: 1366,
                height: 832,
            })),
            viewport_history: Mutex::new(Vec::new()),
            screenshots: Mutex::new(Vec::new()),
            form_validity: Mutex::new(None),
            has_loader: AtomicBool::new(false),
            log: Arc::new(ActionLog::default()),
        })
    }

    pub fn with_texts(texts: &[&str]) -> Arc<Self> {
        let page = Self::new();
        for text in texts {
            page.push_element(None, text, None, true);
        }
        page
    }

    pub fn with_labelled(entries: &[(&str, Option<&str>)]) -> Arc<Self> {
        let page = Self::new();
        for (text, aria) in entries {
            page.push_element(None, text, aria.map(String::from), true);
        }
        page
    }

    pub fn with_hidden_texts(texts: &[&str]) -> Arc<Self> {
        let page = Self::new();
        for text in texts {
            page.push_element(None, text, None, false);
        }
        page
    }

    pub fn push_element(
        &self,
        role: Option<&str>,
        text: &str,
        aria_label: Option<String>,
        visible: bool,
    ) {
        self.elements.lock().unwrap().push(FakeElement {
            role: role.map(String::from),
            text: text.to_string(),
            aria_label,
            visible,
        });
    }

    pub fn set_url(&self, url: &str) {
        *self.url.lock().unwrap() = url.to_string();
    }

    fn all_elements(&self) -> Vec<FakeElement> {
        self.elements.lock().unwrap().clone()
    }

    fn matching(&self, needle: &TextMatch) -> Vec<FakeElement> {
        self.all_elements()
            .into_iter()
            .filter(|el| element_matches(el, needle))
            .collect()
    }

    fn write_png(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([240, 240, 240, 255]));
        img.save(path)?;
        Ok(())
    }
}

#[async_trait]
impl Page for FakePage {
    fn url(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        self.set_url(url);
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_load_state(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_timeout(&self, ms: u64) {
        self.wait_calls.lock().unwrap().push(ms);
    }

    async fn screenshot(&self, path: &Path, _full_page: bool, _clip: Option<Rect>) -> Result<()> {
        self.write_png(path)?;
        self.screenshots.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn screenshot_bytes(&self) -> Result<Vec<u8>> {
        let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([240, 240, 240, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }

    fn viewport_size(&self) -> Option<Viewport> {
        *self.viewport.lock().unwrap()
    }

    async fn set_viewport_size(&self, viewport: Viewport) -> Result<()> {
        *self.viewport.lock().unwrap() = Some(viewport);
        self.viewport_history.lock().unwrap().push(viewport);
        Ok(())
    }

    async fn evaluate(
        &self,
        script: &str,
        _args: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.evaluate_scripts.lock().unwrap().push(script.to_string());

        if script.contains("getAttribute('role')") {
            let nodes: Vec<serde_json::Value> = self
                .all_elements()
                .iter()
                .filter_map(|el| {
                    el.role.as_ref().map(|role| {
                        serde_json::json!({
                            "role": role,
                            "name": el.aria_label.clone().unwrap_or_else(|| el.text.clone()),
                        })
                    })
                })
                .collect();
            return Ok(serde_json::json!(nodes));
        }
        if script.contains("[role=\"status\"]") {
            let toast = self.all_elements().iter().any(|el| {
                matches!(el.role.as_deref(), Some("status") | Some("alert"))
            });
            return Ok(serde_json::json!(toast));
        }
        if script.contains(":invalid") {
            return Ok(serde_json::json!(*self.form_validity.lock().unwrap()));
        }
        if script.contains("aria-busy") {
            return Ok(serde_json::json!(self.has_loader.load(Ordering::SeqCst)));
        }
        if script.contains("[role=\"dialog\"]") {
            let has_dialog = self
                .all_elements()
                .iter()
                .any(|el| el.role.as_deref() == Some("dialog"));
            if has_dialog {
                return Ok(serde_json::json!({
                    "x": 10.0, "y": 10.0, "width": 132.0, "height": 112.0
                }));
            }
            return Ok(serde_json::Value::Null);
        }
        if script.contains("getBoundingClientRect") {
            return Ok(serde_json::json!([]));
        }
        Ok(serde_json::Value::Null)
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.pressed_keys.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn locator(&self, selector: &str) -> Arc<dyn Locator> {
        let elements = if matches!(
            selector,
            "a" | "[role=\"link\"]"
                | "button"
                | "[role=\"button\"]"
                | "input[type='button']"
                | "input[type='submit']"
        ) {
            self.all_elements()
        } else if let Some(rest) = selector.strip_prefix("text=") {
            let needle = rest.trim().trim_matches('"').trim_matches('\'');
            self.matching(&TextMatch::Substring(needle.to_string()))
        } else if selector.starts_with("[aria-label") {
            let needle = attr_value(selector);
            self.all_elements()
                .into_iter()
                .filter(|el| {
                    el.aria_label
                        .as_deref()
                        .map(|a| normalize(a).contains(&normalize(&needle)))
                        .unwrap_or(false)
                })
                .collect()
        } else if selector.starts_with("[title") || selector.starts_with("[data-testid") {
            let needle = attr_value(selector);
            self.matching(&TextMatch::Substring(needle))
        } else if let Some(expr) = selector.strip_prefix("xpath=") {
            let exact = regex::Regex::new(r#"normalize-space\(\.\)\s*=\s*['"](.+?)['"]"#).unwrap();
            let contains =
                regex::Regex::new(r#"contains\(normalize-space\(\.\),\s*['"](.+?)['"]"#).unwrap();
            if let Some(cap) = exact.captures(expr) {
                self.matching(&TextMatch::Exact(cap[1].to_string()))
            } else if let Some(cap) = contains.captures(expr) {
                self.matching(&TextMatch::Substring(cap[1].to_string()))
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };
        FakeLocator::new(elements, self.log.clone())
    }

    fn get_by_role(&self, _role: &str, name: Option<TextMatch>) -> Arc<dyn Locator> {
        let elements = match &name {
            None => self.all_elements(),
            Some(needle) => self.matching(needle),
        };
        FakeLocator::new(elements, self.log.clone())
    }

    fn get_by_text(&self, text: TextMatch) -> Arc<dyn Locator> {
        FakeLocator::new(self.matching(&text), self.log.clone())
    }
}

fn attr_value(selector: &str) -> String {
    selector
        .split_once('=')
        .map(|(_, rest)| rest.trim_end_matches(']').trim_matches('"').trim_matches('\''))
        .unwrap_or_default()
        .to_string()
}

#[derive(Default)]
pub struct FakeContext {
    pub trace_started: AtomicBool,
    pub trace_path: Mutex<Option<PathBuf>>,
    pub closed: AtomicBool,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn tracing_start(&self) -> Result<()> {
        self.trace_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn tracing_stop(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"trace")?;
        *self.trace_path.lock().unwrap() = Some(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
