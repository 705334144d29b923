//! Isolated execution environment abstraction
//!
//! The build executor only needs this capability set. Container engines,
//! VMs or the in-memory test double implement it.

use crate::error::KilnResult;
use async_trait::async_trait;
use std::fmt;

/// Opaque handle to one execution context (e.g. a created container)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle(String);

impl ContextHandle {
    /// Wrap an engine-specific identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Engine-specific identifier
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Shortened identifier for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Terminal state of a command run in a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// Exit code reported by the environment
    pub exit_code: i32,
}

impl Termination {
    /// Whether the command exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Abstract isolated execution environment
///
/// Lifecycle per build step:
/// `ensure_available` → `create_context` → `stage_file`* → `start` →
/// `await_termination` → `extract_file` → `destroy`.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Make the environment usable, provisioning it if absent
    async fn ensure_available(&self, environment: &str) -> KilnResult<()>;

    /// Create a context that will run `command` inside `environment`
    async fn create_context(&self, environment: &str, command: &str) -> KilnResult<ContextHandle>;

    /// Place a file into the context before it starts
    async fn stage_file(&self, ctx: &ContextHandle, path: &str, content: &[u8]) -> KilnResult<()>;

    /// Start the command
    async fn start(&self, ctx: &ContextHandle) -> KilnResult<()>;

    /// Block until the command is no longer running
    async fn await_termination(&self, ctx: &ContextHandle) -> KilnResult<Termination>;

    /// Read a file out of the context
    async fn extract_file(&self, ctx: &ContextHandle, path: &str) -> KilnResult<Vec<u8>>;

    /// Last `lines` lines of command output, for diagnostics
    async fn logs(&self, _ctx: &ContextHandle, _lines: u32) -> KilnResult<String> {
        Ok(String::new())
    }

    /// Tear the context down, stopping the command if still running
    async fn destroy(&self, ctx: &ContextHandle) -> KilnResult<()>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_short_id() {
        let handle = ContextHandle::new("0123456789abcdef0123");
        assert_eq!(handle.short(), "0123456789ab");
        assert_eq!(handle.to_string(), "0123456789ab");
        assert_eq!(ContextHandle::new("ctx-1").short(), "ctx-1");
    }

    #[test]
    fn termination_success() {
        assert!(Termination { exit_code: 0 }.success());
        assert!(!Termination { exit_code: 2 }.success());
    }
}
