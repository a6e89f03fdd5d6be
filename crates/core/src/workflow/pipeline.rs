//! Ordered, validated stage list.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{WorkflowError, WorkflowResult};
use crate::stages::{ArtifactRegistry, Stage, StageId};

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    registry: Arc<ArtifactRegistry>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stage_ids()).finish()
    }
}

impl Pipeline {
    /// Validate the stage order and resolve which stage publishes which artifact.
    ///
    /// Rejects an empty list, repeated stage identities, two stages publishing
    /// the same artifact, packaging anywhere but last, and any stage that needs
    /// an artifact no earlier stage publishes.
    pub fn build(stages: Vec<Box<dyn Stage>>) -> WorkflowResult<Self> {
        if stages.is_empty() {
            return Err(WorkflowError::InvalidPipeline("no stages".to_string()));
        }

        let mut seen = HashSet::new();
        let mut registry = ArtifactRegistry::new();
        let last = stages.len() - 1;

        for (index, stage) in stages.iter().enumerate() {
            let id = stage.id();
            if !seen.insert(id) {
                return Err(WorkflowError::InvalidPipeline(format!("stage {} appears twice", id)));
            }
            if id == StageId::Packaging && index != last {
                return Err(WorkflowError::InvalidPipeline(format!(
                    "{} must be the last stage",
                    id
                )));
            }

            for kind in stage.requires() {
                if !registry.contains(kind) {
                    return Err(WorkflowError::InvalidPipeline(format!(
                        "{} needs the {} artifact but no earlier stage publishes it",
                        id,
                        kind.as_str()
                    )));
                }
            }

            if let Some(kind) = stage.artifact() {
                if let Some(previous) = registry.register(kind, id) {
                    return Err(WorkflowError::InvalidPipeline(format!(
                        "{} and {} both publish the {} artifact",
                        previous,
                        id,
                        kind.as_str()
                    )));
                }
            }
        }

        Ok(Self {
            stages,
            registry: Arc::new(registry),
        })
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    pub fn registry(&self) -> Arc<ArtifactRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Whether the final stage assembles the campaign package
    pub fn ends_in_packaging(&self) -> bool {
        self.stages.last().map(|s| s.id()) == Some(StageId::Packaging)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifacts::ArtifactKind;
    use crate::conversation::Conversation;
    use crate::stages::{PackagingStage, StageContext};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Appends a fixed reply; records every conversation it was handed
    pub struct Echo {
        pub id: StageId,
        pub kind: Option<ArtifactKind>,
        pub reply: String,
        pub seen: Arc<Mutex<Vec<Conversation>>>,
    }

    impl Echo {
        pub fn new(id: StageId, kind: Option<ArtifactKind>, reply: &str) -> Box<Self> {
            Box::new(Self {
                id,
                kind,
                reply: reply.to_string(),
                seen: Arc::default(),
            })
        }

        pub fn observing(mut self: Box<Self>, log: Arc<Mutex<Vec<Conversation>>>) -> Box<Self> {
            self.seen = log;
            self
        }
    }

    #[async_trait]
    impl Stage for Echo {
        fn id(&self) -> StageId {
            self.id
        }

        fn artifact(&self) -> Option<ArtifactKind> {
            self.kind
        }

        async fn run(&self, conversation: &Conversation, _ctx: &StageContext) -> WorkflowResult<Conversation> {
            self.seen.lock().unwrap().push(conversation.clone());
            Ok(conversation.with_output(self.id, self.reply.clone()))
        }
    }

    fn full() -> Vec<Box<dyn Stage>> {
        vec![
            Echo::new(StageId::Strategy, Some(ArtifactKind::Strategy), "{}"),
            Echo::new(StageId::Copywriting, Some(ArtifactKind::Copywriting), "{}"),
            Echo::new(StageId::Image, Some(ArtifactKind::Images), "{}"),
            Echo::new(StageId::Video, Some(ArtifactKind::Video), "{}"),
            Box::new(PackagingStage::new()),
        ]
    }

    fn invalid(stages: Vec<Box<dyn Stage>>) -> String {
        match Pipeline::build(stages) {
            Err(WorkflowError::InvalidPipeline(reason)) => reason,
            other => panic!("expected InvalidPipeline, got {:?}", other.map(|p| p.stage_ids())),
        }
    }

    #[test]
    fn test_full_pipeline_resolves_registry() {
        let pipeline = Pipeline::build(full()).unwrap();
        assert_eq!(pipeline.len(), 5);
        assert!(pipeline.ends_in_packaging());
        let registry = pipeline.registry();
        assert_eq!(registry.stage_for(ArtifactKind::Images), Some(StageId::Image));
        assert_eq!(registry.stage_for(ArtifactKind::Video), Some(StageId::Video));
    }

    #[test]
    fn test_packaging_optional() {
        let pipeline = Pipeline::build(vec![Echo::new(StageId::Strategy, None, "a")]).unwrap();
        assert!(!pipeline.ends_in_packaging());
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(invalid(Vec::new()), "no stages");
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let reason = invalid(vec![
            Echo::new(StageId::Strategy, None, "a"),
            Echo::new(StageId::Strategy, None, "b"),
        ]);
        assert!(reason.contains("appears twice"));
    }

    #[test]
    fn test_packaging_must_be_last() {
        let mut stages = full();
        stages.swap(3, 4);
        assert!(invalid(stages).contains("must be the last stage"));
    }

    #[test]
    fn test_missing_artifact_rejected() {
        let mut stages = full();
        stages.remove(2);
        let reason = invalid(stages);
        assert!(reason.contains("images"), "{}", reason);
    }

    #[test]
    fn test_duplicate_artifact_rejected() {
        let reason = invalid(vec![
            Echo::new(StageId::Strategy, Some(ArtifactKind::Strategy), "a"),
            Echo::new(StageId::Copywriting, Some(ArtifactKind::Strategy), "b"),
        ]);
        assert!(reason.contains("both publish"));
    }
}
