//! # Marketing Workflow
//!
//! Wires the standard campaign pipeline from a [`WorkflowConfig`]:
//! strategy (or deep research), copywriting, image, video and packaging,
//! each with the tools its configuration enables.
//!
//! Tool routing:
//! - strategy and copywriting share one budgeted `web_search` tool
//! - image gets `generate_image` when image generation is enabled
//! - video gets `generate_video` when video generation is enabled; every
//!   video tool built by one workflow shares its single-flight throttle

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::WorkflowEvent;
use super::orchestrator::{package_from, Orchestrator, WorkflowCommand};
use super::pipeline::Pipeline;
use crate::artifacts::{ArtifactKind, CampaignPackage};
use crate::config::WorkflowConfig;
use crate::error::WorkflowResult;
use crate::llm::{ChatBackend, ChatConfig};
use crate::stages::{DeepResearchStage, GenerativeStage, PackagingStage, Stage, StageId, StrategyStage};
use crate::state::io::timestamp_id;
use crate::state::{BeaconDb, CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
use crate::throttle::SingleFlight;
use crate::tools::{
    AzureImageClient, ImageProvider, ImageTool, SearchProvider, SearchTool, SoraClient, ToolBox, VideoBackend,
    VideoTool,
};

/// External capabilities the workflow calls
#[derive(Clone)]
pub struct Capabilities {
    /// Default text generator
    pub chat: Arc<dyn ChatBackend>,
    /// Per-stage generator overrides
    pub stage_chat: HashMap<StageId, Arc<dyn ChatBackend>>,
    pub search: Arc<dyn SearchProvider>,
    pub image: Option<Arc<dyn ImageProvider>>,
    pub video: Option<Arc<dyn VideoBackend>>,
}

impl Capabilities {
    pub fn new(chat: Arc<dyn ChatBackend>, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            chat,
            stage_chat: HashMap::new(),
            search,
            image: None,
            video: None,
        }
    }

    pub fn with_image(mut self, image: Arc<dyn ImageProvider>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_video(mut self, video: Arc<dyn VideoBackend>) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_stage_chat(mut self, stage: StageId, chat: Arc<dyn ChatBackend>) -> Self {
        self.stage_chat.insert(stage, chat);
        self
    }

    /// Real clients for everything the config enables.
    ///
    /// Credentials are read now but only checked on first use.
    pub fn from_env(config: &WorkflowConfig) -> Self {
        let mut caps = Self::new(
            Arc::new(config.global_model.create_backend()),
            Arc::new(crate::tools::TavilySearch::from_env()),
        );

        for stage in StageId::all() {
            let model = config.model_for(stage);
            if model.provider != config.global_model.provider {
                caps = caps.with_stage_chat(stage, Arc::new(model.create_backend()));
            }
        }
        if config.enable_image_generation {
            caps = caps.with_image(Arc::new(AzureImageClient::from_env()));
        }
        if config.enable_video_generation {
            caps = caps.with_video(Arc::new(SoraClient::from_env()));
        }
        caps
    }

    pub fn chat_for(&self, stage: StageId) -> Arc<dyn ChatBackend> {
        self.stage_chat
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.chat))
    }
}

pub struct MarketingWorkflow {
    config: WorkflowConfig,
    capabilities: Capabilities,
    throttle: SingleFlight,
    checkpoints: Arc<dyn CheckpointStore>,
    event_tx: Option<mpsc::Sender<WorkflowEvent>>,
    command_rx: Option<mpsc::Receiver<WorkflowCommand>>,
    last_run_id: Option<String>,
}

impl MarketingWorkflow {
    /// Opens the checkpoint database when one is configured
    pub fn new(config: WorkflowConfig, capabilities: Capabilities) -> WorkflowResult<Self> {
        let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint_db {
            Some(path) => Arc::new(SqliteCheckpointStore::new(&BeaconDb::open_at(path)?)),
            None => Arc::new(InMemoryCheckpointStore::new()),
        };
        let throttle = SingleFlight::new(config.video.max_concurrent);

        Ok(Self {
            config,
            capabilities,
            throttle,
            checkpoints,
            event_tx: None,
            command_rx: None,
            last_run_id: None,
        })
    }

    /// Share a throttle with other workflows in the process
    pub fn with_throttle(mut self, throttle: SingleFlight) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_command_channel(mut self, rx: mpsc::Receiver<WorkflowCommand>) -> Self {
        self.command_rx = Some(rx);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn last_run_id(&self) -> Option<&str> {
        self.last_run_id.as_deref()
    }

    /// `{output_dir}/{YYYYMMDD_HHMMSS}_campaign`
    pub fn new_campaign_dir(&self) -> PathBuf {
        self.config.output_dir.join(format!("{}_campaign", timestamp_id()))
    }

    fn chat_config(&self, stage: StageId) -> ChatConfig {
        ChatConfig::for_model(self.config.model_for(stage).model)
    }

    fn generative(&self, stage: StageId, kind: ArtifactKind, tools: ToolBox) -> GenerativeStage {
        GenerativeStage::new(stage, kind, self.capabilities.chat_for(stage), self.chat_config(stage))
            .with_tools(tools)
            .with_max_rounds(self.config.max_tool_rounds)
    }

    fn image_tools(&self, campaign_dir: &Path) -> ToolBox {
        if !self.config.enable_image_generation {
            return ToolBox::new();
        }
        match &self.capabilities.image {
            Some(provider) => ToolBox::new().with(Arc::new(
                ImageTool::new(Arc::clone(provider), campaign_dir.join("images"))
                    .with_default_size(self.config.image.default_size.clone()),
            )),
            None => {
                tracing::warn!("Image generation enabled but no image capability; prompts only");
                ToolBox::new()
            }
        }
    }

    fn video_tools(&self, campaign_dir: &Path) -> ToolBox {
        if !self.config.enable_video_generation {
            return ToolBox::new();
        }
        match &self.capabilities.video {
            Some(backend) => ToolBox::new().with(Arc::new(
                VideoTool::new(Arc::clone(backend), self.throttle.clone(), campaign_dir.join("video"))
                    .with_polling(self.config.video.polling())
                    .with_default_size(self.config.video.default_size.clone()),
            )),
            None => {
                tracing::warn!("Video generation enabled but no video capability; script only");
                ToolBox::new()
            }
        }
    }

    /// The five-stage campaign pipeline writing media and files under `campaign_dir`
    pub fn build_pipeline(&self, campaign_dir: &Path) -> WorkflowResult<Pipeline> {
        let config = &self.config;
        let search = Arc::new(
            SearchTool::new(Arc::clone(&self.capabilities.search)).with_budget(config.search_budget),
        );

        let strategy = if config.enable_deep_research {
            StrategyStage::DeepResearch(DeepResearchStage::new(
                self.capabilities.chat_for(StageId::Strategy),
                self.chat_config(StageId::Strategy),
                Arc::clone(&self.capabilities.search),
                config.research.clone(),
            ))
        } else {
            StrategyStage::Simple(self.generative(
                StageId::Strategy,
                ArtifactKind::Strategy,
                ToolBox::new().with(search.clone()),
            ))
        };

        let copywriting = self.generative(
            StageId::Copywriting,
            ArtifactKind::Copywriting,
            ToolBox::new().with(search),
        );

        let image = self.generative(StageId::Image, ArtifactKind::Images, self.image_tools(campaign_dir));
        let video = self.generative(StageId::Video, ArtifactKind::Video, self.video_tools(campaign_dir));

        let packaging = if config.persist_output {
            PackagingStage::persisting_to(campaign_dir)
        } else {
            PackagingStage::new()
        };

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(strategy),
            Box::new(copywriting),
            Box::new(image),
            Box::new(video),
            Box::new(packaging),
        ];
        Pipeline::build(stages)
    }

    fn orchestrator(&mut self, campaign_dir: &Path) -> WorkflowResult<Orchestrator> {
        let mut orchestrator = Orchestrator::new(self.build_pipeline(campaign_dir)?, Arc::clone(&self.checkpoints));
        if let Some(tx) = &self.event_tx {
            orchestrator = orchestrator.with_event_channel(tx.clone());
        }
        if let Some(rx) = self.command_rx.take() {
            orchestrator = orchestrator.with_command_channel(rx);
        }
        Ok(orchestrator)
    }

    /// Generate a full campaign for `topic`
    pub async fn run(&mut self, topic: &str) -> WorkflowResult<CampaignPackage> {
        let campaign_dir = self.new_campaign_dir();
        tracing::info!(
            topic = %topic,
            deep_research = self.config.enable_deep_research,
            images = self.config.enable_image_generation,
            video = self.config.enable_video_generation,
            campaign_dir = %campaign_dir.display(),
            "Generating campaign"
        );

        let mut orchestrator = self.orchestrator(&campaign_dir)?;
        let result = orchestrator.execute(topic).await;
        self.last_run_id = orchestrator.last_run_id().map(str::to_string);
        package_from(&result?)
    }

    /// Finish an interrupted run from its latest checkpoint, into a fresh campaign folder
    pub async fn resume(&mut self, run_id: &str) -> WorkflowResult<CampaignPackage> {
        let campaign_dir = self.new_campaign_dir();
        let mut orchestrator = self.orchestrator(&campaign_dir)?;
        self.last_run_id = Some(run_id.to_string());
        let conversation = orchestrator.resume(run_id).await?;
        package_from(&conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::agent::tests::ScriptedChat;
    use crate::tools::image::tests::FakeImages;
    use crate::tools::search::tests::FakeSearch;

    fn caps(replies: &[&str]) -> Capabilities {
        Capabilities::new(Arc::new(ScriptedChat::texts(replies)), Arc::new(FakeSearch::default()))
    }

    fn quiet_config() -> WorkflowConfig {
        WorkflowConfig {
            persist_output: false,
            ..WorkflowConfig::default()
        }
    }

    #[test]
    fn test_default_pipeline_shape() {
        let workflow = MarketingWorkflow::new(quiet_config(), caps(&[])).unwrap();
        let pipeline = workflow.build_pipeline(Path::new("unused")).unwrap();
        assert_eq!(
            pipeline.stage_ids(),
            vec![
                StageId::Strategy,
                StageId::Copywriting,
                StageId::Image,
                StageId::Video,
                StageId::Packaging
            ]
        );
    }

    #[test]
    fn test_tools_follow_config() {
        let dir = Path::new("unused");
        let images: Arc<dyn ImageProvider> = Arc::new(FakeImages { fail: false });

        let workflow = MarketingWorkflow::new(quiet_config(), caps(&[]).with_image(images.clone())).unwrap();
        assert!(workflow.image_tools(dir).is_empty());
        assert!(workflow.video_tools(dir).is_empty());

        let config = WorkflowConfig {
            enable_image_generation: true,
            enable_video_generation: true,
            ..quiet_config()
        };
        let workflow = MarketingWorkflow::new(config, caps(&[]).with_image(images)).unwrap();
        assert_eq!(workflow.image_tools(dir).names(), vec!["generate_image".to_string()]);
        // Enabled without a backend degrades to a script-only stage
        assert!(workflow.video_tools(dir).is_empty());
    }

    #[test]
    fn test_campaign_dir_naming() {
        let workflow = MarketingWorkflow::new(quiet_config(), caps(&[])).unwrap();
        let dir = workflow.new_campaign_dir();
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(dir.starts_with("artifacts/campaigns"));
        assert!(name.ends_with("_campaign"));
        assert_eq!(name.len(), "20250101_000000_campaign".len());
    }

    #[test]
    fn test_stage_chat_override() {
        let other: Arc<dyn ChatBackend> = Arc::new(ScriptedChat::texts(&[]));
        let caps = caps(&[]).with_stage_chat(StageId::Video, other.clone());
        assert!(Arc::ptr_eq(&caps.chat_for(StageId::Video), &other));
        assert!(!Arc::ptr_eq(&caps.chat_for(StageId::Image), &other));
    }

    #[tokio::test]
    async fn test_run_without_persistence() {
        let replies = [
            r#"{"topic": "Smart Watch", "target_audience": "Runners", "tone_of_voice": "Bold"}"#,
            r#"{"hero_message": "Go further", "blog_article": "Long form"}"#,
            r#"{"prompts": [{"prompt_id": "prompt-01", "prompt": "watch at dawn"}]}"#,
            r#"{"scenes": [{"scene_number": 1, "visuals": "runner"}], "cta": "Buy"}"#,
        ];
        let mut workflow = MarketingWorkflow::new(quiet_config(), caps(&replies)).unwrap();

        let package = workflow.run("Smart Watch").await.unwrap();
        assert_eq!(package.campaign_id, "smart-watch-runners");
        assert_eq!(package.video.cta, "Buy");
        assert!(package.package_path.is_none());
        assert!(workflow.last_run_id().is_some());
    }
}
