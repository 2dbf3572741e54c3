//! Stemmix Workflow - Mix job orchestration
//!
//! Provides:
//! - The staged pipeline with per-stage progress and timings
//! - Per-job scratch workspaces with guaranteed cleanup
//! - Diagnostics returned with every output
//! - A bounded job queue

pub mod diagnostics;
pub mod orchestrator;
pub mod queue;
pub mod workspace;

pub use diagnostics::{MixDiagnostics, SlotMethods, StageTiming};
pub use orchestrator::{MixProgress, MixRequest, MixStage, Orchestrator, ProgressFn};
pub use queue::MixService;
pub use workspace::JobWorkspace;
