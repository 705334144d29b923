//! Build execution
//!
//! - `executor`: runs a build plan step by step against cache and sandbox
//! - `engine`: one project's end-to-end build pipeline

pub mod engine;
pub mod executor;

pub use engine::{cache_dir, BuildOutcome, Engine, EngineOptions, PlannedBuild};
pub use executor::{Executor, ExecutorOptions, RunSummary, StepEvent, StepReport};
