//! Tool-use loop shared by the generative stages.
//!
//! Each round sends the history with the stage's tool definitions. Tool calls
//! are executed through the [`ToolBox`] and their results fed back; text ends
//! the loop. Once the round budget is spent the final turn is streamed without
//! tools, so it must come back as text.

use futures::StreamExt;
use serde_json::json;

use super::{ChatBackend, ChatConfig, ChatMessage, ChatRequest, ChatResponse};
use crate::error::WorkflowResult;
use crate::stages::StageId;
use crate::state::io::truncate;
use crate::tools::ToolBox;
use crate::workflow::events::{EventSink, WorkflowEvent, WorkflowEventKind};

const RESULT_PREVIEW_LEN: usize = 200;

pub struct AgentRunner<'a> {
    backend: &'a dyn ChatBackend,
    config: ChatConfig,
    tools: &'a ToolBox,
    max_rounds: usize,
    stage: StageId,
    events: &'a EventSink,
}

impl<'a> AgentRunner<'a> {
    pub fn new(
        backend: &'a dyn ChatBackend,
        config: ChatConfig,
        tools: &'a ToolBox,
        stage: StageId,
        events: &'a EventSink,
    ) -> Self {
        Self {
            backend,
            config,
            tools,
            max_rounds: 8,
            stage,
            events,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Drive the conversation to a final text answer
    pub async fn run(&self, mut messages: Vec<ChatMessage>) -> WorkflowResult<String> {
        if !self.tools.is_empty() {
            let definitions = self.tools.definitions();
            for round in 0..self.max_rounds {
                let request = ChatRequest::new(self.config.clone(), messages.clone())
                    .with_tools(definitions.clone());

                match self.backend.chat(request).await? {
                    ChatResponse::Text(text) => {
                        self.token(&text).await;
                        return Ok(text);
                    }
                    ChatResponse::ToolCalls(calls) => {
                        tracing::debug!(stage = %self.stage.as_str(), round, calls = calls.len(), "Executing tool calls");
                        messages.push(ChatMessage::assistant_with_tools(calls.clone()));

                        for call in calls {
                            self.events
                                .emit(
                                    WorkflowEvent::for_stage(WorkflowEventKind::ToolCallStarted, self.stage)
                                        .with_data(json!({"tool": call.name, "arguments": call.arguments})),
                                )
                                .await;

                            let result = self.tools.call(&call.name, call.arguments.clone()).await?;
                            let content = result.to_string();

                            self.events
                                .emit(
                                    WorkflowEvent::for_stage(WorkflowEventKind::ToolCallCompleted, self.stage)
                                        .with_data(json!({
                                            "tool": call.name,
                                            "error": result.get("error").cloned(),
                                            "result": truncate(&content, RESULT_PREVIEW_LEN),
                                        })),
                                )
                                .await;

                            messages.push(ChatMessage::tool_result(call.id, content));
                        }
                    }
                }
            }
            tracing::warn!(stage = %self.stage.as_str(), max_rounds = self.max_rounds, "Tool round budget spent, forcing final answer");
        }

        let request = ChatRequest::new(self.config.clone(), messages);
        let mut stream = self.backend.chat_stream(request).await?;
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            self.token(&delta).await;
            text.push_str(&delta);
        }
        Ok(text)
    }

    async fn token(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.events
            .emit(
                WorkflowEvent::for_stage(WorkflowEventKind::StreamedToken, self.stage)
                    .with_data(json!({ "delta": delta })),
            )
            .await;
    }
}
