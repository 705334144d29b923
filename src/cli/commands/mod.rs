//! CLI command implementations

pub mod build;
pub mod cache;
pub mod config;
pub mod graph;
pub mod plan;

pub use build::execute as build;
pub use cache::execute as cache;
pub use config::execute as config;
pub use graph::execute as graph;
pub use plan::execute as plan;
