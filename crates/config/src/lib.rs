use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub vision: VisionConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Local,
    #[default]
    Auto,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Openai => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::Openai),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "local" | "ollama" => Ok(ProviderKind::Local),
            "auto" => Ok(ProviderKind::Auto),
            other => Err(format!(
                "unknown provider: {other} (use openai, anthropic, local, or auto)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub default: ProviderKind,
    #[serde(default)]
    pub openai: ProviderEntry,
    #[serde(default)]
    pub anthropic: ProviderEntry,
    #[serde(default)]
    pub local: ProviderEntry,
}

impl ProviderConfig {
    pub fn entry(&self, kind: ProviderKind) -> &ProviderEntry {
        match kind {
            ProviderKind::Openai => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Local | ProviderKind::Auto => &self.local,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

fn default_planner_max_tokens() -> u32 {
    1200
}

fn default_planner_temperature() -> f32 {
    0.2
}

fn default_planner_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_planner_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_planner_temperature")]
    pub temperature: f32,
    /// Cloud providers use this directly; the local provider doubles it.
    #[serde(default = "default_planner_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_planner_max_tokens(),
            temperature: default_planner_temperature(),
            timeout_ms: default_planner_timeout_ms(),
        }
    }
}

fn default_action_budget() -> u32 {
    30
}

fn default_wait_ms() -> u64 {
    1000
}

fn default_self_heal_attempts() -> u32 {
    1
}

fn default_scroll_margin_px() -> u32 {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "default_action_budget")]
    pub action_budget: u32,
    #[serde(default = "default_wait_ms")]
    pub default_wait_ms: u64,
    #[serde(default = "default_self_heal_attempts")]
    pub self_heal_attempts: u32,
    #[serde(default = "default_scroll_margin_px")]
    pub scroll_margin_px: u32,
    /// Escalates the auth-redirect rule from warning to critical. When set,
    /// a detected login redirect also stops further heal attempts.
    #[serde(default)]
    pub auth_redirect_critical: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            action_budget: default_action_budget(),
            default_wait_ms: default_wait_ms(),
            self_heal_attempts: default_self_heal_attempts(),
            scroll_margin_px: default_scroll_margin_px(),
            auth_redirect_critical: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

fn default_desktop_viewport() -> ViewportSize {
    ViewportSize {
        width: 1366,
        height: 832,
    }
}

fn default_tablet_viewport() -> ViewportSize {
    ViewportSize {
        width: 834,
        height: 1112,
    }
}

fn default_mobile_viewport() -> ViewportSize {
    ViewportSize {
        width: 390,
        height: 844,
    }
}

fn default_crop_focus_padding_px() -> u32 {
    16
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub selectors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_true")]
    pub multi_viewport: bool,
    #[serde(default = "default_desktop_viewport")]
    pub desktop_viewport: ViewportSize,
    #[serde(default = "default_tablet_viewport")]
    pub tablet_viewport: ViewportSize,
    #[serde(default = "default_mobile_viewport")]
    pub mobile_viewport: ViewportSize,
    #[serde(default = "default_crop_focus_padding_px")]
    pub crop_focus_padding_px: u32,
    #[serde(default)]
    pub redact: RedactConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            multi_viewport: true,
            desktop_viewport: default_desktop_viewport(),
            tablet_viewport: default_tablet_viewport(),
            mobile_viewport: default_mobile_viewport(),
            crop_focus_padding_px: default_crop_focus_padding_px(),
            redact: RedactConfig::default(),
        }
    }
}

fn default_role_diff_threshold() -> f64 {
    0.2
}

fn default_loader_timeout_ms() -> u64 {
    8000
}

fn default_detection_poll_ms() -> u64 {
    150
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default = "default_role_diff_threshold")]
    pub role_diff_threshold: f64,
    #[serde(default = "default_loader_timeout_ms")]
    pub loader_timeout_ms: u64,
    #[serde(default = "default_detection_poll_ms")]
    pub detection_poll_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            role_diff_threshold: default_role_diff_threshold(),
            loader_timeout_ms: default_loader_timeout_ms(),
            detection_poll_ms: default_detection_poll_ms(),
        }
    }
}

fn default_base_dir() -> String {
    "datasets".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_min_targets() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_min_targets")]
    pub min_targets: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            min_targets: default_min_targets(),
        }
    }
}

fn default_prometheus_port() -> u16 {
    9109
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_port: default_prometheus_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserProject {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl std::fmt::Display for BrowserProject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserProject::Chromium => write!(f, "chromium"),
            BrowserProject::Firefox => write!(f, "firefox"),
            BrowserProject::Webkit => write!(f, "webkit"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub project: BrowserProject,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user_data_dir: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            project: BrowserProject::Chromium,
            channel: None,
            user_data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: VisionProvider,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionProvider {
    #[default]
    Openai,
    Anthropic,
}

impl std::fmt::Display for VisionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VisionProvider::Openai => write!(f, "openai"),
            VisionProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = std::env::var("PARALLAX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_path());
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        let mut value: toml::Value = content.parse().context("Failed to parse config file")?;
        normalize_legacy_keys(&mut value);
        value.try_into().context("Failed to deserialize config file")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parallax")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        std::fs::create_dir_all(Self::config_dir())?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }
}

/// Lift legacy flat keys into their sections so old configs keep loading.
/// Keys still unknown after this pass are ignored by serde.
fn normalize_legacy_keys(value: &mut toml::Value) {
    let Some(table) = value.as_table_mut() else {
        return;
    };

    const MOVES: &[(&str, &str)] = &[
        ("action_budget", "navigation"),
        ("default_wait_ms", "navigation"),
        ("self_heal_attempts", "navigation"),
        ("scroll_margin_px", "navigation"),
        ("multi_viewport", "capture"),
        ("role_diff_threshold", "observer"),
        ("base_dir", "output"),
        ("min_targets", "completion"),
        ("prometheus_port", "metrics"),
        ("headless", "browser"),
    ];

    for (key, section) in MOVES {
        if let Some(moved) = table.remove(*key) {
            tracing::debug!(key, section, "normalizing legacy config key");
            if let Some(t) = table
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(Default::default()))
                .as_table_mut()
            {
                t.entry(key.to_string()).or_insert(moved);
            }
        }
    }

    // Old configs carried the provider name as a bare string at the root.
    if let Some(provider) = table.get("provider").cloned() {
        if provider.is_str() {
            let mut section = toml::value::Table::new();
            section.insert("default".to_string(), provider);
            table.insert("provider".to_string(), toml::Value::Table(section));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.navigation.action_budget, 30);
        assert_eq!(cfg.navigation.self_heal_attempts, 1);
        assert_eq!(cfg.capture.desktop_viewport.width, 1366);
        assert_eq!(cfg.capture.tablet_viewport.height, 1112);
        assert_eq!(cfg.observer.role_diff_threshold, 0.2);
        assert_eq!(cfg.output.base_dir, "datasets");
        assert_eq!(cfg.metrics.prometheus_port, 9109);
        assert!(cfg.capture.multi_viewport);
        assert!(!cfg.vision.enabled);
    }

    #[test]
    fn legacy_flat_keys_are_lifted() {
        let raw = r#"
            provider = "anthropic"
            action_budget = 12
            headless = false
        "#;
        let mut value: toml::Value = raw.parse().unwrap();
        normalize_legacy_keys(&mut value);
        let cfg: Config = value.try_into().unwrap();
        assert_eq!(cfg.provider.default, ProviderKind::Anthropic);
        assert_eq!(cfg.navigation.action_budget, 12);
        assert!(!cfg.browser.headless);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let raw = r#"
            something_unrecognized = true

            [navigation]
            action_budget = 5
            another_unknown = "x"
        "#;
        let mut value: toml::Value = raw.parse().unwrap();
        normalize_legacy_keys(&mut value);
        let cfg: Config = value.try_into().unwrap();
        assert_eq!(cfg.navigation.action_budget, 5);
    }

    #[test]
    fn nested_sections_take_priority_over_defaults() {
        let raw = r#"
            [capture]
            multi_viewport = false

            [capture.redact]
            enabled = true
            selectors = ["input[type='password']"]
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert!(!cfg.capture.multi_viewport);
        assert!(cfg.capture.redact.enabled);
        assert_eq!(cfg.capture.redact.selectors.len(), 1);
    }
}
