//! # Pipeline Stages
//!
//! A stage consumes the whole conversation and returns it with exactly one
//! message of its own appended.
//!
//! ## Modules
//!
//! - `generative` - Single-call stage driven by the tool-use loop
//! - `research` - Plan, research and synthesis in place of the strategy stage
//! - `packaging` - Extracts every artifact and assembles the campaign
//! - `prompts` - Bundled stage instructions

pub mod generative;
pub mod packaging;
pub mod prompts;
pub mod research;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::artifacts::ArtifactKind;
use crate::conversation::Conversation;
use crate::error::WorkflowResult;
use crate::workflow::events::EventSink;

pub use generative::GenerativeStage;
pub use packaging::PackagingStage;
pub use research::DeepResearchStage;

/// Identity of a stage; also the author tag on its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Strategy,
    Copywriting,
    Image,
    Video,
    Packaging,
}

impl StageId {
    pub fn all() -> [StageId; 5] {
        [
            StageId::Strategy,
            StageId::Copywriting,
            StageId::Image,
            StageId::Video,
            StageId::Packaging,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Strategy => "strategy",
            StageId::Copywriting => "copywriting",
            StageId::Image => "image",
            StageId::Video => "video",
            StageId::Packaging => "packaging",
        }
    }

    /// Author name carried on the stage's message
    pub fn author_name(&self) -> &'static str {
        match self {
            StageId::Strategy => "strategy_agent",
            StageId::Copywriting => "copywriting_agent",
            StageId::Image => "image_agent",
            StageId::Video => "video_agent",
            StageId::Packaging => "packaging_executor",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.author_name())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::all()
            .into_iter()
            .find(|id| id.as_str() == s || id.author_name() == s)
            .ok_or_else(|| format!("Unknown stage: {}", s))
    }
}

/// Which stage publishes which artifact, resolved once per pipeline
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    by_kind: HashMap<ArtifactKind, StageId>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stage already registered for `kind`, if any
    pub fn register(&mut self, kind: ArtifactKind, stage: StageId) -> Option<StageId> {
        self.by_kind.insert(kind, stage)
    }

    pub fn stage_for(&self, kind: ArtifactKind) -> Option<StageId> {
        self.by_kind.get(&kind).copied()
    }

    pub fn contains(&self, kind: ArtifactKind) -> bool {
        self.by_kind.contains_key(&kind)
    }
}

/// Per-run context handed to every stage
#[derive(Clone)]
pub struct StageContext {
    pub run_id: String,
    pub events: EventSink,
    pub registry: Arc<ArtifactRegistry>,
}

impl StageContext {
    pub fn new(run_id: impl Into<String>, events: EventSink, registry: Arc<ArtifactRegistry>) -> Self {
        Self {
            run_id: run_id.into(),
            events,
            registry,
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Artifact this stage publishes, if any
    fn artifact(&self) -> Option<ArtifactKind>;

    /// Artifacts that earlier stages must publish
    fn requires(&self) -> Vec<ArtifactKind> {
        Vec::new()
    }

    /// Return `conversation` with exactly one message authored by this stage appended
    async fn run(&self, conversation: &Conversation, ctx: &StageContext) -> WorkflowResult<Conversation>;
}

/// The strategy slot: one generator call, or the three-phase research variant
pub enum StrategyStage {
    Simple(GenerativeStage),
    DeepResearch(DeepResearchStage),
}

#[async_trait]
impl Stage for StrategyStage {
    fn id(&self) -> StageId {
        StageId::Strategy
    }

    fn artifact(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Strategy)
    }

    async fn run(&self, conversation: &Conversation, ctx: &StageContext) -> WorkflowResult<Conversation> {
        match self {
            StrategyStage::Simple(stage) => stage.run(conversation, ctx).await,
            StrategyStage::DeepResearch(stage) => stage.run(conversation, ctx).await,
        }
    }
}
