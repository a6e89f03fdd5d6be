//! # Workflow
//!
//! - `pipeline` - Validated, ordered stage list
//! - `orchestrator` - Sequential run loop with checkpoints and cancellation
//! - `campaign` - The standard marketing pipeline built from configuration
//! - `events` - Progress events

pub mod campaign;
pub mod events;
pub mod orchestrator;
pub mod pipeline;

pub use campaign::{Capabilities, MarketingWorkflow};
pub use events::{EventSink, WorkflowEvent, WorkflowEventKind};
pub use orchestrator::{package_from, Orchestrator, WorkflowCommand};
pub use pipeline::Pipeline;
