//! Generative stage: one instruction set, an optional tool box and the shared
//! tool-use loop. The generator sees the entire conversation, with earlier
//! stage outputs attributed by author name.

use async_trait::async_trait;
use std::sync::Arc;

use super::{prompts, Stage, StageContext, StageId};
use crate::artifacts::ArtifactKind;
use crate::conversation::{Conversation, Role};
use crate::error::WorkflowResult;
use crate::llm::{AgentRunner, ChatBackend, ChatConfig, ChatMessage};
use crate::tools::ToolBox;

pub struct GenerativeStage {
    id: StageId,
    kind: ArtifactKind,
    backend: Arc<dyn ChatBackend>,
    config: ChatConfig,
    tools: ToolBox,
    instructions: Option<String>,
    max_rounds: usize,
}

impl GenerativeStage {
    pub fn new(id: StageId, kind: ArtifactKind, backend: Arc<dyn ChatBackend>, config: ChatConfig) -> Self {
        Self {
            id,
            kind,
            backend,
            config,
            tools: ToolBox::new(),
            instructions: None,
            max_rounds: 8,
        }
    }

    pub fn with_tools(mut self, tools: ToolBox) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the bundled instructions
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn tools(&self) -> &ToolBox {
        &self.tools
    }

    pub fn instructions(&self) -> String {
        self.instructions
            .clone()
            .unwrap_or_else(|| prompts::stage_instructions(self.id, self.kind, &self.tools.names()))
    }

    fn chat_history(&self, conversation: &Conversation) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.instructions())];
        messages.extend(conversation.messages().iter().map(|m| match m.role {
            Role::User => ChatMessage::user(&m.text),
            Role::System => ChatMessage::system(&m.text),
            Role::Assistant => ChatMessage::assistant(&m.text).with_name(m.author_name()),
        }));
        messages
    }
}

#[async_trait]
impl Stage for GenerativeStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn artifact(&self) -> Option<ArtifactKind> {
        Some(self.kind)
    }

    async fn run(&self, conversation: &Conversation, ctx: &StageContext) -> WorkflowResult<Conversation> {
        tracing::info!(
            run_id = %ctx.run_id,
            stage = %self.id,
            model = %self.config.model,
            tools = ?self.tools.names(),
            "Generating"
        );

        let text = AgentRunner::new(
            self.backend.as_ref(),
            self.config.clone(),
            &self.tools,
            self.id,
            &ctx.events,
        )
        .with_max_rounds(self.max_rounds)
        .run(self.chat_history(conversation))
        .await?;

        Ok(conversation.with_output(self.id, text.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::agent::tests::ScriptedChat;
    use crate::llm::ChatRole;
    use crate::workflow::events::EventSink;

    fn context() -> StageContext {
        StageContext::new("run-1", EventSink::new(), Arc::default())
    }

    #[tokio::test]
    async fn test_appends_one_authored_message() {
        let chat = Arc::new(ScriptedChat::texts(&["  {\"hero_message\": \"hi\"}  "]));
        let stage = GenerativeStage::new(
            StageId::Copywriting,
            ArtifactKind::Copywriting,
            chat.clone(),
            ChatConfig::default(),
        );

        let convo = Conversation::seed("Smart Watch").with_output(StageId::Strategy, "{}");
        let out = stage.run(&convo, &context()).await.unwrap();

        assert_eq!(out.len(), 3);
        assert!(convo.is_prefix_of(&out));
        let last = out.last().unwrap();
        assert_eq!(last.author, Some(StageId::Copywriting));
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text, "{\"hero_message\": \"hi\"}");
    }

    #[tokio::test]
    async fn test_generator_sees_full_history() {
        let chat = Arc::new(ScriptedChat::texts(&["{}"]));
        let stage = GenerativeStage::new(StageId::Image, ArtifactKind::Images, chat.clone(), ChatConfig::default());

        let convo = Conversation::seed("Smart Watch")
            .with_output(StageId::Strategy, "strategy")
            .with_output(StageId::Copywriting, "copy");
        stage.run(&convo, &context()).await.unwrap();

        let requests = chat.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("Leave the `assets` array empty"));
        assert_eq!(messages[1].content, "Smart Watch");
        assert_eq!(messages[2].name.as_deref(), Some("strategy_agent"));
        assert_eq!(messages[3].name.as_deref(), Some("copywriting_agent"));
    }

    #[tokio::test]
    async fn test_custom_instructions() {
        let chat = Arc::new(ScriptedChat::texts(&["{}"]));
        let stage = GenerativeStage::new(StageId::Video, ArtifactKind::Video, chat.clone(), ChatConfig::default())
            .with_instructions("Write a script.");
        stage.run(&Conversation::seed("x"), &context()).await.unwrap();
        assert_eq!(chat.requests.lock().unwrap()[0].messages[0].content, "Write a script.");
    }
}
