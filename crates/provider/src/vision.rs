use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::json::extract_json;
use crate::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceAnalysis {
    pub significance: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub key_elements: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionAnalysis {
    pub is_complete: bool,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub indicators: Vec<String>,
}

/// Optional vision-model capability. When analysis fails or no credentials
/// are configured, callers fall back to the heuristic classifiers.
#[async_trait]
pub trait VisionCapability: Send + Sync {
    async fn analyze_significance(
        &self,
        png_bytes: &[u8],
        task: &str,
        current_state: &serde_json::Value,
        previous_state: Option<&serde_json::Value>,
    ) -> Result<SignificanceAnalysis, ProviderError>;

    async fn analyze_completion(
        &self,
        png_bytes: &[u8],
        task: &str,
        states_captured: usize,
    ) -> Result<CompletionAnalysis, ProviderError>;
}

pub struct VisionAnalyzer {
    client: reqwest::Client,
    provider: parallax_config::VisionProvider,
    api_key: String,
}

impl VisionAnalyzer {
    pub fn from_config(config: &parallax_config::Config) -> Result<Self, ProviderError> {
        let provider = config.vision.provider;
        let env_var = match provider {
            parallax_config::VisionProvider::Openai => "OPENAI_API_KEY",
            parallax_config::VisionProvider::Anthropic => "ANTHROPIC_API_KEY",
        };
        let api_key = std::env::var(env_var)
            .map_err(|_| ProviderError::MissingCredentials(provider.to_string()))?;
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            provider,
            api_key,
        })
    }

    async fn ask(&self, png_bytes: &[u8], prompt: &str) -> Result<serde_json::Value, ProviderError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(png_bytes);
        let resp = match self.provider {
            parallax_config::VisionProvider::Openai => {
                self.client
                    .post("https://api.openai.com/v1/chat/completions")
                    .bearer_auth(&self.api_key)
                    .json(&json!({
                        "model": "gpt-4o-mini",
                        "messages": [{
                            "role": "user",
                            "content": [
                                {"type": "text", "text": prompt},
                                {"type": "image_url", "image_url": {
                                    "url": format!("data:image/png;base64,{image_b64}")
                                }},
                            ],
                        }],
                        "max_tokens": 500,
                    }))
                    .send()
                    .await?
            }
            parallax_config::VisionProvider::Anthropic => {
                self.client
                    .post("https://api.anthropic.com/v1/messages")
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&json!({
                        "model": "claude-3-5-sonnet-latest",
                        "max_tokens": 500,
                        "messages": [{
                            "role": "user",
                            "content": [
                                {"type": "image", "source": {
                                    "type": "base64",
                                    "media_type": "image/png",
                                    "data": image_b64,
                                }},
                                {"type": "text", "text": prompt},
                            ],
                        }],
                    }))
                    .send()
                    .await?
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_http(status.as_u16(), body, None));
        }
        let data: serde_json::Value = resp.json().await?;
        let content = match self.provider {
            parallax_config::VisionProvider::Openai => data["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or(""),
            parallax_config::VisionProvider::Anthropic => {
                data["content"][0]["text"].as_str().unwrap_or("")
            }
        };
        extract_json(content)
    }
}

#[async_trait]
impl VisionCapability for VisionAnalyzer {
    async fn analyze_significance(
        &self,
        png_bytes: &[u8],
        task: &str,
        current_state: &serde_json::Value,
        previous_state: Option<&serde_json::Value>,
    ) -> Result<SignificanceAnalysis, ProviderError> {
        let previous = previous_state
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string());
        let prompt = format!(
            "Classify the significance of this UI state for the task.\n\n\
             Task: {task}\n\
             Current state: {current_state}\n\
             Previous state: {previous}\n\n\
             significance must be one of: critical, supporting, optional.\n\
             critical: modal dialogs, confirmations, errors, task-completing screens.\n\
             supporting: navigation changes, validated forms, loading transitions.\n\
             optional: stable states with no meaningful change.\n\n\
             Return JSON: {{\"significance\": \"...\", \"confidence\": 0.0, \
             \"reasoning\": \"...\", \"key_elements\": []}}"
        );
        let value = self.ask(png_bytes, &prompt).await?;
        serde_json::from_value(value).map_err(|e| ProviderError::Parse(e.to_string()))
    }

    async fn analyze_completion(
        &self,
        png_bytes: &[u8],
        task: &str,
        states_captured: usize,
    ) -> Result<CompletionAnalysis, ProviderError> {
        let prompt = format!(
            "Analyze this screenshot to determine if the workflow task is complete.\n\n\
             Task: {task}\n\
             Previous states captured: {states_captured}\n\n\
             Look for completion indicators: success messages, confirmation \
             dialogs, success toasts, final-state indicators. Error messages \
             indicate failure, not completion.\n\n\
             Return JSON: {{\"is_complete\": false, \"confidence\": 0.0, \
             \"reasoning\": \"...\", \"indicators\": []}}"
        );
        let value = self.ask(png_bytes, &prompt).await?;
        serde_json::from_value(value).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}
