//! # Beacon Core
//!
//! The "Brain" of Beacon - the campaign pipeline, fault-tolerant extraction
//! of structured artifacts, throttled media generation and run state.
//!
//! ## Architecture
//!
//! - `conversation` - Append-only message log threaded through every stage
//! - `stages/` - Strategy (or deep research), copywriting, image, video, packaging
//! - `workflow/` - Pipeline validation, sequential orchestrator, events
//! - `extract/` - Repair-then-fallback JSON recovery from generator text
//! - `throttle` - Single-flight permit and bounded completion polling
//! - `tools/` - Search, image and video capabilities exposed to generators
//! - `llm/` - OpenAI-compatible chat backend and the tool-use loop
//! - `state/` - Checkpoints, SQLite and filesystem helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_core::config::WorkflowConfig;
//! use beacon_core::workflow::{Capabilities, MarketingWorkflow};
//!
//! let config = WorkflowConfig::default();
//! let caps = Capabilities::from_env(&config);
//! let mut workflow = MarketingWorkflow::new(config, caps)?;
//! let package = workflow.run("AI Programming Assistant").await?;
//! ```

pub mod artifacts;
pub mod config;
pub mod conversation;
pub mod error;
pub mod extract;
pub mod language;
pub mod llm;
pub mod models;
pub mod stages;
pub mod state;
pub mod throttle;
pub mod tools;
pub mod workflow;

pub use error::{WorkflowError, WorkflowResult};
