//! Dependency graph, staleness and build planning
//!
//! Pipeline for one invocation:
//!
//! 1. [`DependencyGraphBuilder`] registers every target and resolves edges
//! 2. [`compute_staleness`] compares sources and artifacts with the cache
//! 3. [`BuildGraph::for_target`] mirrors only what the requested target needs
//! 4. [`BuildPlan`] orders those nodes for execution

pub mod build;
pub mod dependency;
pub mod dot;
pub mod recipe;
pub mod schedule;
pub mod staleness;

pub use build::{BuildGraph, BuildNode, BuildNodeId};
pub use dependency::{DependencyGraph, DependencyGraphBuilder, DependencyNode, NodeId};
pub use dot::{build_graph_dot, dependency_graph_dot};
pub use recipe::{BuildSpec, ExecSpec, Recipe};
pub use schedule::{build_order, BuildPlan, PlanStep, ReadyTracker};
pub use staleness::{compute_staleness, propagate, source_hash, Staleness};
