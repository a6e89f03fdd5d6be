//! # Video Generation
//!
//! `generate_video` tool. Every submission runs inside the shared
//! [`SingleFlight`] permit: create the job, poll it to completion, fetch the
//! content and write `{timestamp}_{slug(scene_id)}.mp4` under the run's
//! `video/` directory. Failures at any step come back as a descriptor with
//! `error` set and no `local_path`.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{parameters_for, parse_args, Tool};
use crate::error::{WorkflowError, WorkflowResult};
use crate::llm::ToolDefinition;
use crate::state::io::{slugify, timestamp_id, truncate, write_bytes};
use crate::throttle::{poll_until, Poll, PollOutcome, PollPolicy, SingleFlight};

const DEFAULT_DEPLOYMENT: &str = "sora-2";
const ALLOWED_SECONDS: [u32; 3] = [4, 8, 12];
const MAX_ERROR_LEN: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoRequest {
    /// Detailed video generation prompt in English describing the scene, camera movement and atmosphere.
    pub prompt: String,
    /// Unique identifier for this scene, e.g. scene-01
    #[serde(default = "default_scene_id")]
    pub scene_id: String,
    /// Video duration in seconds. Allowed values: 4, 8, 12
    #[serde(default = "default_seconds")]
    pub seconds: u32,
    /// Video resolution: 1280x720, 720x1280 or 1024x1024
    #[serde(default)]
    pub size: Option<String>,
}

fn default_scene_id() -> String {
    "scene-01".to_string()
}

fn default_seconds() -> u32 {
    8
}

/// Generated asset record for one video
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoDescriptor {
    pub scene_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VideoDescriptor {
    fn failed(scene_id: &str, video_id: Option<String>, error: &str) -> Self {
        let mut message = error.to_string();
        if message.chars().count() > MAX_ERROR_LEN {
            message = format!("{}...", truncate(&message, MAX_ERROR_LEN));
        }
        Self {
            scene_id: scene_id.to_string(),
            video_id,
            error: Some(message),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Remote job state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed(String),
}

/// What the content endpoint handed back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoContent {
    Bytes(Vec<u8>),
    Url(String),
}

/// The asynchronous video-generation capability
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Fail with `Configuration` when credentials are absent
    fn check_configured(&self) -> WorkflowResult<()>;

    /// Start a job and return its id
    async fn create(&self, prompt: &str, seconds: u32, size: &str) -> WorkflowResult<String>;

    async fn status(&self, video_id: &str) -> WorkflowResult<JobStatus>;

    async fn content(&self, video_id: &str) -> WorkflowResult<VideoContent>;

    async fn download(&self, url: &str) -> WorkflowResult<Vec<u8>>;
}

/// Azure OpenAI `videos` (Sora) client
pub struct SoraClient {
    endpoint: Option<String>,
    api_key: Option<String>,
    deployment: String,
    client: reqwest::Client,
}

impl SoraClient {
    pub fn new(endpoint: Option<String>, api_key: Option<String>, deployment: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            api_key,
            deployment: deployment.unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string()),
            client,
        }
    }

    /// Reads `AZURE_VIDEO_ENDPOINT`, `AZURE_VIDEO_API_KEY` (falling back to
    /// `AZURE_IMAGE_API_KEY`) and `AZURE_VIDEO_DEPLOYMENT_NAME`
    pub fn from_env() -> Self {
        let key = std::env::var("AZURE_VIDEO_API_KEY")
            .or_else(|_| std::env::var("AZURE_IMAGE_API_KEY"))
            .ok();
        Self::new(
            std::env::var("AZURE_VIDEO_ENDPOINT").ok(),
            key,
            std::env::var("AZURE_VIDEO_DEPLOYMENT_NAME").ok(),
        )
    }

    fn credentials(&self) -> WorkflowResult<(&str, &str)> {
        match (self.endpoint.as_deref(), self.api_key.as_deref()) {
            (Some(endpoint), Some(key)) => Ok((endpoint, key)),
            _ => Err(WorkflowError::Configuration(
                "Azure video generation credentials not configured. Set AZURE_VIDEO_ENDPOINT and AZURE_VIDEO_API_KEY".into(),
            )),
        }
    }
}

#[async_trait]
impl VideoBackend for SoraClient {
    fn check_configured(&self) -> WorkflowResult<()> {
        self.credentials().map(|_| ())
    }

    async fn create(&self, prompt: &str, seconds: u32, size: &str) -> WorkflowResult<String> {
        let (endpoint, key) = self.credentials()?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(key)
            .json(&json!({
                "prompt": prompt,
                "size": size,
                "seconds": seconds.to_string(),
                "model": self.deployment,
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("API error: {} - {}", status.as_u16(), truncate(&body, 200)).into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("invalid JSON: {}", e))?;
        body["id"]
            .as_str()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("No video ID returned from API").into())
    }

    async fn status(&self, video_id: &str) -> WorkflowResult<JobStatus> {
        let (endpoint, key) = self.credentials()?;
        let response = self
            .client
            .get(format!("{}/{}", endpoint, video_id))
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Status check failed: {}", status.as_u16()).into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("invalid JSON: {}", e))?;
        Ok(match body["status"].as_str().unwrap_or("") {
            "completed" => JobStatus::Completed,
            "failed" => {
                let reason = match &body["error"] {
                    Value::String(s) => s.clone(),
                    Value::Null => "Unknown error".to_string(),
                    other => other.to_string(),
                };
                JobStatus::Failed(reason)
            }
            _ => JobStatus::Running,
        })
    }

    async fn content(&self, video_id: &str) -> WorkflowResult<VideoContent> {
        let (endpoint, key) = self.credentials()?;
        let response = self
            .client
            .get(format!("{}/{}/content", endpoint, video_id))
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Content fetch failed: {}", status.as_u16()).into());
        }

        let is_video = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("video"));
        let bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?
            .to_vec();

        classify_content(bytes, is_video)
    }

    async fn download(&self, url: &str) -> WorkflowResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Download failed: {}", response.status().as_u16()).into());
        }
        Ok(response.bytes().await.map_err(|e| anyhow::anyhow!("{}", e))?.to_vec())
    }
}

/// Content is either the MP4 itself, a JSON `{url}` or a bare URL
fn classify_content(bytes: Vec<u8>, is_video: bool) -> WorkflowResult<VideoContent> {
    if is_video || bytes.starts_with(&[0, 0, 0]) {
        return Ok(VideoContent::Bytes(bytes));
    }
    if let Ok(body) = serde_json::from_slice::<Value>(&bytes) {
        if let Some(url) = body["url"].as_str() {
            return Ok(VideoContent::Url(url.to_string()));
        }
    }
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    if text.starts_with("http") {
        return Ok(VideoContent::Url(text));
    }
    Err(anyhow::anyhow!("Unrecognized video content response").into())
}

/// Snap a requested duration to the nearest allowed value; ties go to the smaller
pub fn snap_seconds(requested: u32) -> u32 {
    ALLOWED_SECONDS
        .iter()
        .copied()
        .min_by_key(|allowed| allowed.abs_diff(requested))
        .unwrap_or(ALLOWED_SECONDS[0])
}

/// The `generate_video` tool
pub struct VideoTool {
    backend: Arc<dyn VideoBackend>,
    throttle: SingleFlight,
    polling: PollPolicy,
    output_dir: PathBuf,
    default_size: String,
    generated: Mutex<Vec<VideoDescriptor>>,
}

impl VideoTool {
    pub fn new(backend: Arc<dyn VideoBackend>, throttle: SingleFlight, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            throttle,
            polling: PollPolicy::default(),
            output_dir: output_dir.into(),
            default_size: "1280x720".to_string(),
            generated: Mutex::new(Vec::new()),
        }
    }

    pub fn with_polling(mut self, polling: PollPolicy) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_default_size(mut self, size: impl Into<String>) -> Self {
        self.default_size = size.into();
        self
    }

    /// Successful videos, in completion order
    pub fn generated_videos(&self) -> Vec<VideoDescriptor> {
        self.generated.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Generate one video while holding the single-flight permit
    pub async fn submit(&self, request: VideoRequest) -> WorkflowResult<VideoDescriptor> {
        self.backend.check_configured()?;

        let seconds = snap_seconds(request.seconds);
        let size = request.size.clone().unwrap_or_else(|| self.default_size.clone());

        let descriptor = self
            .throttle
            .run(self.generate(&request, seconds, &size))
            .await
            .unwrap_or_else(|| Ok(VideoDescriptor::failed(&request.scene_id, None, "Video throttle closed")))?;

        if descriptor.is_ok() {
            if let Ok(mut generated) = self.generated.lock() {
                generated.push(descriptor.clone());
            }
            tracing::info!(scene_id = %descriptor.scene_id, seconds, "Video generated");
        } else {
            tracing::warn!(
                scene_id = %descriptor.scene_id,
                error = descriptor.error.as_deref().unwrap_or(""),
                "Video generation failed"
            );
        }
        Ok(descriptor)
    }

    async fn generate(&self, request: &VideoRequest, seconds: u32, size: &str) -> WorkflowResult<VideoDescriptor> {
        let scene_id = request.scene_id.as_str();

        let video_id = match self.backend.create(&request.prompt, seconds, size).await {
            Ok(id) => id,
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => return Ok(VideoDescriptor::failed(scene_id, None, &e.to_string())),
        };
        tracing::debug!(scene_id, video_id = %video_id, "Video job created");

        let backend = &self.backend;
        let job = video_id.as_str();
        let outcome = poll_until(self.polling, || async move {
            match backend.status(job).await {
                Ok(JobStatus::Completed) => Poll::Ready(()),
                Ok(JobStatus::Running) => Poll::Pending,
                Ok(JobStatus::Failed(reason)) => Poll::Failed(format!("Video generation failed: {}", reason)),
                Err(e) => Poll::Failed(e.to_string()),
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(()) => {}
            PollOutcome::Failed(error) => {
                return Ok(VideoDescriptor::failed(scene_id, Some(video_id), &error));
            }
            PollOutcome::TimedOut { waited } => {
                tracing::warn!(scene_id, waited_secs = waited.as_secs(), "Video polling budget exceeded");
                return Ok(VideoDescriptor::failed(scene_id, Some(video_id), "Video generation timed out"));
            }
        }

        let (bytes, url) = match self.backend.content(&video_id).await {
            Ok(VideoContent::Bytes(bytes)) => (bytes, None),
            Ok(VideoContent::Url(url)) => match self.backend.download(&url).await {
                Ok(bytes) => (bytes, Some(url)),
                Err(e) => return Ok(VideoDescriptor::failed(scene_id, Some(video_id), &e.to_string())),
            },
            Err(e) => return Ok(VideoDescriptor::failed(scene_id, Some(video_id), &e.to_string())),
        };

        let path = self
            .output_dir
            .join(format!("{}_{}.mp4", timestamp_id(), slugify(scene_id)));
        if let Err(e) = write_bytes(&path, &bytes).await {
            return Ok(VideoDescriptor::failed(
                scene_id,
                Some(video_id),
                &format!("Failed to save video: {}", e),
            ));
        }
        let local_path = path.display().to_string();

        Ok(VideoDescriptor {
            scene_id: scene_id.to_string(),
            prompt: Some(request.prompt.clone()),
            video_id: Some(video_id),
            url: Some(url.unwrap_or_else(|| local_path.clone())),
            local_path: Some(local_path),
            duration_seconds: Some(seconds),
            size: Some(size.to_string()),
            error: None,
        })
    }
}

#[async_trait]
impl Tool for VideoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "generate_video".to_string(),
            description: "Generate a short marketing video clip for one scene. Returns the file path of the generated video. The prompt MUST be in English. Only one video renders at a time.".to_string(),
            parameters: parameters_for::<VideoRequest>(),
        }
    }

    async fn call(&self, args: Value) -> WorkflowResult<Value> {
        let request = match parse_args::<VideoRequest>("generate_video", args) {
            Ok(request) => request,
            Err(payload) => return Ok(payload),
        };
        let descriptor = self.submit(request).await?;
        Ok(serde_json::to_value(descriptor).unwrap_or_else(|e| super::error_payload(e.to_string())))
    }
}
