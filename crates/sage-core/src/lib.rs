//! sage-core: Directive-driven streaming dialogue orchestrator
//!
//! This crate owns the conversation state machine: it streams a first
//! completion pass, detects an embedded tool directive in the model's
//! text, optionally drives an external task runner (or the batch
//! pipeline) while folding progress into the pending assistant message,
//! then streams a second summary pass. Consumers observe each turn as a
//! sequence of `(conversation, generating)` snapshots.

pub mod directive;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod runner;
pub mod section;

pub use directive::{Extraction, Status, PIPELINE_TOKEN};
pub use orchestrator::{Conversation, Orchestrator, OrchestratorConfig, Snapshot, SnapshotStream};
pub use pipeline::{BatchPipeline, PipelineStage};
pub use progress::{progress_channel, ProgressLog, ProgressSender};
pub use runner::{RunnerFactory, TaskError, TaskRunner};
