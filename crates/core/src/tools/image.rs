//! # Image Generation
//!
//! `generate_image` tool. Renders are written to the run's `images/`
//! directory as `{timestamp}_{slug(prompt_id)}.png`; every success is kept in
//! the tool's generated-asset list for the rest of the run. The capability
//! has no documented concurrency ceiling, so calls are not throttled.

use async_trait::async_trait;
use base64::Engine;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{parameters_for, parse_args, Tool};
use crate::artifacts::GeneratedImage;
use crate::error::{WorkflowError, WorkflowResult};
use crate::llm::ToolDefinition;
use crate::state::io::{slugify, timestamp_id, truncate, write_bytes};

const DEFAULT_DEPLOYMENT: &str = "FLUX.1-Kontext-pro";
const MAX_ERROR_LEN: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImageRequest {
    /// Detailed image generation prompt in English, including lighting, composition and atmosphere.
    pub prompt: String,
    /// Unique identifier for this image, e.g. prompt-01
    #[serde(default = "default_prompt_id")]
    pub prompt_id: String,
    /// Image size, e.g. 1024x1024, 1792x1024
    #[serde(default)]
    pub size: Option<String>,
}

fn default_prompt_id() -> String {
    "prompt-01".to_string()
}

/// A finished render
#[derive(Debug, Clone, Default)]
pub struct RenderedImage {
    /// Image bytes, when the provider returned or allowed downloading them
    pub bytes: Option<Vec<u8>>,
    /// Remote URL, when the provider returned one
    pub url: Option<String>,
    pub revised_prompt: Option<String>,
}

/// The image-generation capability
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, prompt: &str, size: &str) -> WorkflowResult<RenderedImage>;
}

/// OpenAI-style `images/generations` client for an Azure deployment
pub struct AzureImageClient {
    endpoint: Option<String>,
    api_key: Option<String>,
    deployment: String,
    client: reqwest::Client,
}

impl AzureImageClient {
    pub fn new(endpoint: Option<String>, api_key: Option<String>, deployment: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .unwrap_or_default();
        Self {
            endpoint,
            api_key,
            deployment: deployment.unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string()),
            client,
        }
    }

    /// Reads `AZURE_IMAGE_ENDPOINT`, `AZURE_IMAGE_API_KEY`, `AZURE_IMAGE_DEPLOYMENT_NAME`
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("AZURE_IMAGE_ENDPOINT").ok(),
            std::env::var("AZURE_IMAGE_API_KEY").ok(),
            std::env::var("AZURE_IMAGE_DEPLOYMENT_NAME").ok(),
        )
    }

    async fn download(&self, url: &str) -> Option<Vec<u8>> {
        let response = self.client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.bytes().await.ok().map(|b| b.to_vec())
    }
}

#[async_trait]
impl ImageProvider for AzureImageClient {
    async fn generate(&self, prompt: &str, size: &str) -> WorkflowResult<RenderedImage> {
        let (Some(endpoint), Some(key)) = (self.endpoint.as_deref(), self.api_key.as_deref()) else {
            return Err(WorkflowError::Configuration(
                "Azure image generation credentials not configured. Set AZURE_IMAGE_ENDPOINT and AZURE_IMAGE_API_KEY".into(),
            ));
        };

        let url = format!("{}/images/generations", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&json!({
                "model": self.deployment,
                "prompt": prompt,
                "n": 1,
                "size": size,
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("HTTP {}: {}", status, body).into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("invalid JSON: {}", e))?;
        let data = &body["data"][0];

        let mut rendered = RenderedImage {
            revised_prompt: data["revised_prompt"].as_str().map(str::to_string),
            url: data["url"].as_str().map(str::to_string),
            bytes: None,
        };

        if let Some(b64) = data["b64_json"].as_str().filter(|s| !s.is_empty()) {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| anyhow::anyhow!("invalid base64 image: {}", e))?;
            rendered.bytes = Some(bytes);
        } else if let Some(url) = rendered.url.clone() {
            rendered.bytes = self.download(&url).await;
        } else {
            return Err(anyhow::anyhow!("response contained neither b64_json nor url").into());
        }

        Ok(rendered)
    }
}

/// The `generate_image` tool
pub struct ImageTool {
    provider: Arc<dyn ImageProvider>,
    output_dir: PathBuf,
    default_size: String,
    generated: Mutex<Vec<GeneratedImage>>,
}

impl ImageTool {
    pub fn new(provider: Arc<dyn ImageProvider>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            output_dir: output_dir.into(),
            default_size: "1024x1024".to_string(),
            generated: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_size(mut self, size: impl Into<String>) -> Self {
        self.default_size = size.into();
        self
    }

    /// Successful renders, in call order
    pub fn generated_images(&self) -> Vec<GeneratedImage> {
        self.generated.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Render one image; failures come back as an error record
    pub async fn generate(&self, request: ImageRequest) -> WorkflowResult<Value> {
        let size = request.size.clone().unwrap_or_else(|| self.default_size.clone());

        let rendered = match self.provider.generate(&request.prompt, &size).await {
            Ok(rendered) => rendered,
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => return Ok(self.failure(&request, &e.to_string())),
        };

        let path = self.output_dir.join(format!(
            "{}_{}.png",
            timestamp_id(),
            slugify(&request.prompt_id)
        ));

        let mut local_path = None;
        if let Some(bytes) = &rendered.bytes {
            match write_bytes(&path, bytes).await {
                Ok(()) => local_path = Some(path.display().to_string()),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to save image"),
            }
        }

        let Some(url) = rendered.url.clone().or_else(|| local_path.clone()) else {
            return Ok(self.failure(&request, "image could not be saved"));
        };

        let image = GeneratedImage {
            prompt_id: request.prompt_id.clone(),
            url,
            local_path,
            revised_prompt: Some(rendered.revised_prompt.unwrap_or_else(|| request.prompt.clone())),
            prompt: Some(request.prompt.clone()),
        };

        if let Ok(mut generated) = self.generated.lock() {
            generated.push(image.clone());
        }
        tracing::info!(prompt_id = %image.prompt_id, "Image generated");

        Ok(serde_json::to_value(&image).unwrap_or_else(|e| super::error_payload(e.to_string())))
    }

    fn failure(&self, request: &ImageRequest, error: &str) -> Value {
        let mut message = error.to_string();
        if message.chars().count() > MAX_ERROR_LEN {
            message = format!("{}...", truncate(&message, MAX_ERROR_LEN));
        }
        tracing::warn!(prompt_id = %request.prompt_id, error = %message, "Image generation failed");
        json!({
            "prompt_id": request.prompt_id,
            "error": format!("Image generation failed: {}", message),
            "url": null,
            "local_path": null,
            "prompt": request.prompt,
        })
    }
}

#[async_trait]
impl Tool for ImageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "generate_image".to_string(),
            description: "Generate a marketing image. Returns the file path and URL of the generated image. The prompt MUST be in English.".to_string(),
            parameters: parameters_for::<ImageRequest>(),
        }
    }

    async fn call(&self, args: Value) -> WorkflowResult<Value> {
        match parse_args::<ImageRequest>("generate_image", args) {
            Ok(request) => self.generate(request).await,
            Err(payload) => Ok(payload),
        }
    }
}
