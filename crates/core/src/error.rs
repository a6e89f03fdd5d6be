//! # Workflow Errors
//!
//! Fatal error taxonomy for a campaign run. Recoverable failures (malformed
//! generator text, tool invocation errors, polling timeouts) never surface
//! here: they are absorbed into fallback artifacts or `error` fields inside
//! tool payloads.

use thiserror::Error;

use crate::llm::ProviderError;
use crate::stages::StageId;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Packaging could not find (or found an empty) message for a declared stage
    #[error("Missing assistant output from {stage}: {reason}")]
    MissingArtifact { stage: StageId, reason: String },

    /// A required credential or endpoint is absent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The text-generation capability failed outright
    #[error("Generation failed: {0}")]
    Generation(ProviderError),

    /// The stage list handed to `Pipeline::build` is unusable
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A stage returned something other than one appended, self-authored message
    #[error("Stage {stage} broke the append contract: {reason}")]
    StageContract { stage: StageId, reason: String },

    /// The run was cancelled at a stage boundary
    #[error("Run aborted after stage {after_stage}")]
    Aborted { after_stage: String },

    #[error("No checkpoint found for run {0}")]
    NoCheckpoint(String),

    /// Storage and IO failures
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn missing(stage: StageId, reason: impl Into<String>) -> Self {
        Self::MissingArtifact {
            stage,
            reason: reason.into(),
        }
    }

    /// Whether this error names a missing credential or endpoint
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<ProviderError> for WorkflowError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::ConfigError(msg) => Self::Configuration(msg),
            other => Self::Generation(other),
        }
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_error_maps_to_configuration() {
        let err: WorkflowError = ProviderError::ConfigError("OPENAI_API_KEY not set".into()).into();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_missing_artifact_names_author() {
        let err = WorkflowError::missing(StageId::Video, "no message");
        assert!(err.to_string().contains("video_agent"));
    }
}
