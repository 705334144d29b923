//! Kiln - incremental container builds
//!
//! Reads a build file of targets, works out which of them are stale
//! against a persistent artifact cache, and rebuilds only those, each
//! step in a fresh container.

pub mod build;
pub mod buildfile;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod journal;
pub mod sandbox;
pub mod ui;

pub use error::{KilnError, KilnResult};
