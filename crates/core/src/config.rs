//! # Workflow Configuration
//!
//! Everything a [`MarketingWorkflow`](crate::workflow::MarketingWorkflow)
//! needs besides credentials, persisted as pretty JSON. A missing or
//! unreadable file yields the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{LlmProvider, ModelConfig};
use crate::stages::StageId;
use crate::throttle::PollPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Write per-stage files and the manifest
    pub persist_output: bool,
    pub output_dir: PathBuf,
    pub enable_image_generation: bool,
    pub enable_video_generation: bool,
    /// Replace the single-call strategy stage with plan/research/synthesis
    pub enable_deep_research: bool,
    pub debug: bool,
    pub global_model: ModelConfig,
    /// Stage author name -> provider override
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub per_stage_providers: HashMap<String, LlmProvider>,
    /// Stage author name -> model override
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub per_stage_models: HashMap<String, String>,
    /// Tool rounds a generative stage may take before it must answer
    pub max_tool_rounds: usize,
    /// Shared search-call budget for the generative stages
    pub search_budget: usize,
    pub research: ResearchConfig,
    pub video: VideoConfig,
    pub image: ImageConfig,
    /// SQLite checkpoint database; in-memory checkpoints when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_db: Option<PathBuf>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            persist_output: true,
            output_dir: PathBuf::from("artifacts/campaigns"),
            enable_image_generation: false,
            enable_video_generation: false,
            enable_deep_research: false,
            debug: false,
            global_model: ModelConfig::default(),
            per_stage_providers: HashMap::new(),
            per_stage_models: HashMap::new(),
            max_tool_rounds: 8,
            search_budget: 12,
            research: ResearchConfig::default(),
            video: VideoConfig::default(),
            image: ImageConfig::default(),
            checkpoint_db: None,
        }
    }
}

/// Bounds for the deep-research search phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchConfig {
    pub max_queries_per_dimension: usize,
    pub max_search_calls: usize,
    pub search_depth: String,
    pub max_results: u32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_queries_per_dimension: 2,
            max_search_calls: 10,
            search_depth: "advanced".to_string(),
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    pub default_size: String,
    /// Remote concurrency ceiling
    pub max_concurrent: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_wait_secs: 300,
            default_size: "1280x720".to_string(),
            max_concurrent: 1,
        }
    }
}

impl VideoConfig {
    pub fn polling(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    pub default_size: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            default_size: "1024x1024".to_string(),
        }
    }
}

impl WorkflowConfig {
    /// Load from a JSON file; missing or malformed files give the defaults
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed config");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Model for a stage: per-stage override, then global, then the provider default
    pub fn model_for(&self, stage: StageId) -> ModelConfig {
        let key = stage.author_name();
        let provider = self
            .per_stage_providers
            .get(key)
            .copied()
            .unwrap_or(self.global_model.provider);

        let model = self
            .per_stage_models
            .get(key)
            .cloned()
            .or_else(|| (provider == self.global_model.provider).then(|| self.global_model.model.clone()))
            .unwrap_or_else(|| provider.default_model().to_string());

        ModelConfig {
            provider,
            model,
            base_url: self.global_model.base_url.clone().filter(|_| provider == self.global_model.provider),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::io::tests::scratch_dir;

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::default();
        assert!(config.persist_output);
        assert!(!config.enable_video_generation);
        assert_eq!(config.max_tool_rounds, 8);
        assert_eq!(config.research.max_search_calls, 10);
        assert_eq!(config.video.polling(), PollPolicy::default());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: WorkflowConfig =
            serde_json::from_str(r#"{"enable_deep_research": true, "video": {"max_wait_secs": 60}}"#).unwrap();
        assert!(config.enable_deep_research);
        assert_eq!(config.video.max_wait_secs, 60);
        assert_eq!(config.video.default_size, "1280x720");
        assert_eq!(config.output_dir, PathBuf::from("artifacts/campaigns"));
    }

    #[test]
    fn test_model_for_stage() {
        let mut config = WorkflowConfig::default();
        config.global_model = ModelConfig::new("gpt-4o-mini");
        config
            .per_stage_models
            .insert("copywriting_agent".into(), "gpt-4.1".into());
        config
            .per_stage_providers
            .insert("video_agent".into(), LlmProvider::DeepSeek);

        assert_eq!(config.model_for(StageId::Strategy).model, "gpt-4o-mini");
        assert_eq!(config.model_for(StageId::Copywriting).model, "gpt-4.1");

        let video = config.model_for(StageId::Video);
        assert_eq!(video.provider, LlmProvider::DeepSeek);
        assert_eq!(video.model, LlmProvider::DeepSeek.default_model());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = scratch_dir("config");
        let path = dir.join("config.json");
        let mut config = WorkflowConfig::default();
        config.enable_image_generation = true;
        config.save(&path).await.unwrap();

        let loaded = WorkflowConfig::load(&path).await;
        assert_eq!(loaded, config);

        let missing = WorkflowConfig::load(path.with_file_name("absent.json")).await;
        assert_eq!(missing, WorkflowConfig::default());

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
