//! # Stage Tools
//!
//! External capabilities a generative stage may call mid-turn.
//!
//! Tools never fail a stage for ordinary capability trouble: HTTP errors,
//! bad arguments and timeouts come back as a payload with an `error` field
//! so the generator (and the stage) can carry on with partial data. Only a
//! missing credential or endpoint is returned as `Err`.
//!
//! ## Modules
//!
//! - `search` - Web search with a per-run call budget
//! - `image` - Image generation, unthrottled
//! - `video` - Video generation behind the single-flight throttle

pub mod image;
pub mod search;
pub mod video;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::WorkflowResult;
use crate::llm::ToolDefinition;

pub use image::{AzureImageClient, ImageProvider, ImageTool};
pub use search::{SearchProvider, SearchTool, TavilySearch};
pub use video::{SoraClient, VideoBackend, VideoDescriptor, VideoRequest, VideoTool};

/// A function the generator can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool; `Err` only for configuration failures
    async fn call(&self, args: Value) -> WorkflowResult<Value>;
}

/// JSON schema for a tool's argument struct
pub fn parameters_for<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({}));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

/// Decode tool arguments, or produce the error payload to hand back
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, Value> {
    serde_json::from_value(args)
        .map_err(|e| error_payload(format!("Invalid arguments for {}: {}", tool, e)))
}

pub fn error_payload(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

/// The set of tools one stage may use
#[derive(Clone, Default)]
pub struct ToolBox {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.definition().name).collect()
    }

    /// Dispatch by name; unknown names yield an error payload
    pub async fn call(&self, name: &str, args: Value) -> WorkflowResult<Value> {
        match self.tools.iter().find(|t| t.definition().name == name) {
            Some(tool) => tool.call(args).await,
            None => {
                tracing::warn!(tool = name, "Generator requested unknown tool");
                Ok(error_payload(format!("Unknown tool: {}", name)))
            }
        }
    }
}
