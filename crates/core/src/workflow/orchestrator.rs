//! # Sequential Orchestrator
//!
//! Drives a [`Pipeline`] over the conversation one stage at a time. After
//! every stage the append contract is checked, the conversation is
//! checkpointed under the run id and a command channel is polled for
//! cancellation. A fatal stage error ends the run; whatever was
//! checkpointed stays available to [`Orchestrator::resume`].

use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::{EventSink, WorkflowEvent, WorkflowEventKind};
use super::pipeline::Pipeline;
use crate::artifacts::CampaignPackage;
use crate::conversation::{Conversation, Role};
use crate::error::{WorkflowError, WorkflowResult};
use crate::stages::{StageContext, StageId};
use crate::state::{Checkpoint, CheckpointStore};

/// Commands accepted between stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowCommand {
    /// Stop after the current stage
    Abort,
}

pub struct Orchestrator {
    pipeline: Pipeline,
    checkpoints: Arc<dyn CheckpointStore>,
    events: EventSink,
    command_rx: Option<mpsc::Receiver<WorkflowCommand>>,
    last_run_id: Option<String>,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            pipeline,
            checkpoints,
            events: EventSink::new(),
            command_rx: None,
            last_run_id: None,
        }
    }

    /// Forward events to a channel as well as the history
    pub fn with_event_channel(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.events = EventSink::with_channel(tx);
        self
    }

    /// Accept commands (e.g. abort) from outside the run
    pub fn with_command_channel(mut self, rx: mpsc::Receiver<WorkflowCommand>) -> Self {
        self.command_rx = Some(rx);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Most recent events across runs, oldest dropped first
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.history()
    }

    /// Id of the most recently started (or resumed) run
    pub fn last_run_id(&self) -> Option<&str> {
        self.last_run_id.as_deref()
    }

    /// Run the pipeline on a topic and return the campaign package
    pub async fn run(&mut self, topic: &str) -> WorkflowResult<CampaignPackage> {
        if !self.pipeline.ends_in_packaging() {
            return Err(WorkflowError::InvalidPipeline(
                "run() needs a pipeline that ends in packaging; use execute()".to_string(),
            ));
        }
        let conversation = self.execute(topic).await?;
        package_from(&conversation)
    }

    /// Run the pipeline on a topic and return the final conversation
    #[tracing::instrument(skip(self), fields(topic_preview = %topic.chars().take(50).collect::<String>()))]
    pub async fn execute(&mut self, topic: &str) -> WorkflowResult<Conversation> {
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(run_id = %run_id, stages = ?self.pipeline.stage_ids(), "Starting run");
        self.last_run_id = Some(run_id.clone());
        self.drive(&run_id, Conversation::seed(topic), 0).await
    }

    /// Continue a run from the stage after its latest checkpoint
    #[tracing::instrument(skip(self))]
    pub async fn resume(&mut self, run_id: &str) -> WorkflowResult<Conversation> {
        let checkpoint = self
            .checkpoints
            .latest(run_id)?
            .ok_or_else(|| WorkflowError::NoCheckpoint(run_id.to_string()))?;

        let expected = self.pipeline.stages().get(checkpoint.stage_index).map(|s| s.id());
        if expected != Some(checkpoint.stage) {
            return Err(WorkflowError::InvalidPipeline(format!(
                "checkpoint of run {} was taken after {} at position {}, which this pipeline does not match",
                run_id, checkpoint.stage, checkpoint.stage_index
            )));
        }

        tracing::info!(
            run_id = %run_id,
            after_stage = %checkpoint.stage,
            messages = checkpoint.conversation.len(),
            "Resuming run"
        );
        self.last_run_id = Some(run_id.to_string());
        self.drive(run_id, checkpoint.conversation, checkpoint.stage_index + 1).await
    }

    async fn drive(&mut self, run_id: &str, mut conversation: Conversation, start: usize) -> WorkflowResult<Conversation> {
        let ctx = StageContext::new(run_id, self.events.clone(), self.pipeline.registry());
        let total = self.pipeline.len();

        self.events
            .emit(WorkflowEvent::new(WorkflowEventKind::RunStarted).with_data(json!({
                "run_id": run_id,
                "stages": self.pipeline.stage_ids(),
                "start_index": start,
            })))
            .await;

        for (index, stage) in self.pipeline.stages().iter().enumerate().skip(start) {
            let id = stage.id();
            self.events
                .emit(
                    WorkflowEvent::for_stage(WorkflowEventKind::StageStarted, id)
                        .with_data(json!({ "run_id": run_id, "index": index })),
                )
                .await;
            tracing::info!(run_id = %run_id, stage = %id, index, "Stage started");

            let result = match stage.run(&conversation, &ctx).await {
                Ok(next) => check_contract(id, &conversation, &next).map(|_| next),
                Err(e) => Err(e),
            };
            let next = match result {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(run_id = %run_id, stage = %id, error = %e, "Stage failed");
                    self.events
                        .emit(
                            WorkflowEvent::for_stage(WorkflowEventKind::StageFailed, id)
                                .with_data(json!({ "error": e.to_string() })),
                        )
                        .await;
                    fail(&self.events, run_id, &e).await;
                    return Err(e);
                }
            };
            conversation = next;

            self.events
                .emit(WorkflowEvent::for_stage(WorkflowEventKind::StageCompleted, id).with_data(json!({
                    "index": index,
                    "messages": conversation.len(),
                })))
                .await;

            let checkpoint = Checkpoint::new(run_id, id, index, conversation.clone());
            self.checkpoints.save(&checkpoint)?;
            self.events
                .emit(
                    WorkflowEvent::for_stage(WorkflowEventKind::CheckpointSaved, id)
                        .with_data(json!({ "checkpoint_id": checkpoint.id })),
                )
                .await;

            if index + 1 < total && abort_requested(&mut self.command_rx) {
                let e = WorkflowError::Aborted {
                    after_stage: id.to_string(),
                };
                tracing::warn!(run_id = %run_id, after_stage = %id, "Run aborted");
                fail(&self.events, run_id, &e).await;
                return Err(e);
            }
        }

        tracing::info!(run_id = %run_id, messages = conversation.len(), "Run finished");
        self.events
            .emit(WorkflowEvent::new(WorkflowEventKind::RunIdle).with_data(json!({
                "run_id": run_id,
                "messages": conversation.len(),
            })))
            .await;
        Ok(conversation)
    }
}

async fn fail(events: &EventSink, run_id: &str, error: &WorkflowError) {
    events
        .emit(WorkflowEvent::new(WorkflowEventKind::RunFailed).with_data(json!({
            "run_id": run_id,
            "error": error.to_string(),
        })))
        .await;
}

fn abort_requested(rx: &mut Option<mpsc::Receiver<WorkflowCommand>>) -> bool {
    let Some(rx) = rx else {
        return false;
    };
    while let Ok(command) = rx.try_recv() {
        if command == WorkflowCommand::Abort {
            return true;
        }
    }
    false
}

/// One appended message, earlier messages untouched, authored by the stage
fn check_contract(stage: StageId, before: &Conversation, after: &Conversation) -> WorkflowResult<()> {
    let violation = |reason: String| WorkflowError::StageContract { stage, reason };

    if after.len() != before.len() + 1 {
        return Err(violation(format!(
            "expected {} messages, got {}",
            before.len() + 1,
            after.len()
        )));
    }
    if !before.is_prefix_of(after) {
        return Err(violation("earlier messages were changed".to_string()));
    }
    match after.last() {
        Some(m) if m.role == Role::Assistant && m.author == Some(stage) => Ok(()),
        Some(m) => Err(violation(format!("appended message is authored by {}", m.author_name()))),
        None => Err(violation("conversation is empty".to_string())),
    }
}

/// Parse the package out of the final packaging message
pub fn package_from(conversation: &Conversation) -> WorkflowResult<CampaignPackage> {
    let message = conversation
        .latest_from(StageId::Packaging)
        .ok_or_else(|| WorkflowError::missing(StageId::Packaging, "no package in conversation"))?;
    serde_json::from_str(&message.text)
        .map_err(|e| WorkflowError::Other(anyhow::anyhow!("Packaging output is not a campaign package: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactKind;
    use crate::stages::{PackagingStage, Stage};
    use crate::state::InMemoryCheckpointStore;
    use crate::workflow::pipeline::tests::Echo;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Stage that misbehaves in a configurable way
    enum Broken {
        NoAppend,
        WrongAuthor,
        Fails,
    }

    struct BrokenStage(StageId, Broken);

    #[async_trait]
    impl Stage for BrokenStage {
        fn id(&self) -> StageId {
            self.0
        }

        fn artifact(&self) -> Option<ArtifactKind> {
            None
        }

        async fn run(&self, conversation: &Conversation, _ctx: &StageContext) -> WorkflowResult<Conversation> {
            match self.1 {
                Broken::NoAppend => Ok(conversation.clone()),
                Broken::WrongAuthor => Ok(conversation.with_output(StageId::Strategy, "{}")),
                Broken::Fails => Err(WorkflowError::Configuration("AZURE_IMAGE_ENDPOINT not set".into())),
            }
        }
    }

    fn store() -> Arc<InMemoryCheckpointStore> {
        Arc::new(InMemoryCheckpointStore::new())
    }

    fn orchestrator(stages: Vec<Box<dyn Stage>>, store: Arc<InMemoryCheckpointStore>) -> Orchestrator {
        Orchestrator::new(Pipeline::build(stages).unwrap(), store)
    }

    fn full() -> Vec<Box<dyn Stage>> {
        vec![
            Echo::new(
                StageId::Strategy,
                Some(ArtifactKind::Strategy),
                r#"{"topic": "Smart Watch", "target_audience": "Runners", "tone_of_voice": "Bold"}"#,
            ),
            Echo::new(StageId::Copywriting, Some(ArtifactKind::Copywriting), r#"{"hero_message": "Go", "blog_article": "Long form"}"#),
            Echo::new(StageId::Image, Some(ArtifactKind::Images), "{}"),
            Echo::new(StageId::Video, Some(ArtifactKind::Video), "{}"),
            Box::new(PackagingStage::new()),
        ]
    }

    #[tokio::test]
    async fn test_stages_run_in_order_over_growing_history() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Echo::new(StageId::Strategy, None, "first").observing(log.clone()),
            Echo::new(StageId::Copywriting, None, "second").observing(log.clone()),
            Echo::new(StageId::Image, None, "third").observing(log.clone()),
        ];
        let mut orch = orchestrator(stages, store());

        let out = orch.execute("Smart Watch").await.unwrap();

        let seen = log.lock().unwrap();
        assert_eq!(seen.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(seen[1].last().unwrap().text, "first");
        assert_eq!(seen[2].last().unwrap().text, "second");
        assert_eq!(
            out.messages().iter().map(|m| m.author_name()).collect::<Vec<_>>(),
            vec!["user", "strategy_agent", "copywriting_agent", "image_agent"]
        );
    }

    #[tokio::test]
    async fn test_run_returns_package_and_checkpoints_each_stage() {
        let checkpoints = store();
        let (tx, mut rx) = mpsc::channel(256);
        let mut orch = orchestrator(full(), checkpoints.clone()).with_event_channel(tx);

        let package = orch.run("Smart Watch").await.unwrap();
        assert_eq!(package.campaign_id, "smart-watch-runners");
        assert_eq!(package.copywriting.hero_message, "Go");

        let run_id = orch.last_run_id().unwrap().to_string();
        let saved = checkpoints.list(&run_id).unwrap();
        assert_eq!(saved.len(), 5);
        assert_eq!(saved.last().unwrap().stage, StageId::Packaging);
        assert_eq!(saved[0].conversation.len(), 2);

        let kinds: Vec<_> = orch.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds.first(), Some(&WorkflowEventKind::RunStarted));
        assert_eq!(kinds.last(), Some(&WorkflowEventKind::RunIdle));
        assert_eq!(kinds.iter().filter(|k| **k == WorkflowEventKind::CheckpointSaved).count(), 5);
        assert!(kinds.contains(&WorkflowEventKind::PackageReady));
        assert_eq!(rx.recv().await.unwrap().kind, WorkflowEventKind::RunStarted);
    }

    #[tokio::test]
    async fn test_run_requires_packaging() {
        let mut orch = orchestrator(vec![Echo::new(StageId::Strategy, None, "a")], store());
        assert!(matches!(orch.run("x").await, Err(WorkflowError::InvalidPipeline(_))));
    }

    #[tokio::test]
    async fn test_contract_violations_are_fatal() {
        for (broken, needle) in [
            (Broken::NoAppend, "expected 2 messages, got 1"),
            (Broken::WrongAuthor, "authored by strategy_agent"),
        ] {
            let mut orch = orchestrator(vec![Box::new(BrokenStage(StageId::Copywriting, broken))], store());
            let err = orch.execute("x").await.unwrap_err();
            assert!(
                matches!(&err, WorkflowError::StageContract { stage: StageId::Copywriting, .. }),
                "{}",
                err
            );
            assert!(err.to_string().contains(needle), "{}", err);
            assert_eq!(orch.events().last().unwrap().kind, WorkflowEventKind::RunFailed);
        }
    }

    #[tokio::test]
    async fn test_stage_error_stops_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = orchestrator(
            vec![
                Echo::new(StageId::Strategy, None, "a"),
                Box::new(BrokenStage(StageId::Image, Broken::Fails)),
                Echo::new(StageId::Video, None, "never").observing(log.clone()),
            ],
            store(),
        );

        let err = orch.execute("x").await.unwrap_err();
        assert!(err.is_configuration());
        assert!(log.lock().unwrap().is_empty());

        let kinds: Vec<_> = orch.events().iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&WorkflowEventKind::StageFailed));
        assert!(!kinds.contains(&WorkflowEventKind::RunIdle));
    }

    #[tokio::test]
    async fn test_abort_between_stages_then_resume() {
        let checkpoints = store();
        let (tx, rx) = mpsc::channel(4);
        tx.send(WorkflowCommand::Abort).await.unwrap();

        let mut orch = orchestrator(full(), checkpoints.clone()).with_command_channel(rx);
        let err = orch.run("Smart Watch").await.unwrap_err();
        assert_eq!(err.to_string(), "Run aborted after stage strategy_agent");

        let run_id = orch.last_run_id().unwrap().to_string();
        assert_eq!(checkpoints.list(&run_id).unwrap().len(), 1);

        let strategy_log = Arc::new(Mutex::new(Vec::new()));
        let mut stages = full();
        stages[0] = Echo::new(
            StageId::Strategy,
            Some(ArtifactKind::Strategy),
            "{}",
        )
        .observing(strategy_log.clone());
        let mut resumed = orchestrator(stages, checkpoints.clone());

        let out = resumed.resume(&run_id).await.unwrap();
        assert!(strategy_log.lock().unwrap().is_empty());
        assert_eq!(out.len(), 6);
        assert_eq!(package_from(&out).unwrap().strategy.target_audience, "Runners");
        assert_eq!(checkpoints.list(&run_id).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_resume_unknown_run() {
        let mut orch = orchestrator(full(), store());
        assert!(matches!(
            orch.resume("missing").await,
            Err(WorkflowError::NoCheckpoint(id)) if id == "missing"
        ));
    }

    #[tokio::test]
    async fn test_resume_rejects_mismatched_pipeline() {
        let checkpoints = store();
        let convo = Conversation::seed("x").with_output(StageId::Video, "{}");
        checkpoints
            .save(&Checkpoint::new("run-9", StageId::Video, 0, convo))
            .unwrap();

        let mut orch = orchestrator(full(), checkpoints);
        assert!(matches!(orch.resume("run-9").await, Err(WorkflowError::InvalidPipeline(_))));
    }
}
