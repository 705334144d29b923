//! Isolated execution environments for build steps
//!
//! - `podman`: Podman or Docker CLI, one container per step
//! - `memory`: handler-driven double with no host side effects

mod factory;
pub mod memory;
mod podman;
mod runtime;

pub use factory::create_sandbox;
pub use memory::{MemorySandbox, StepInput, StepOutcome};
pub use podman::PodmanSandbox;
pub use runtime::{ContextHandle, Sandbox, Termination};

/// Max number of output lines to include in build error messages.
pub const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of build output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `BUILD_ERROR_TAIL_LINES`
/// lines.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: &[&str] = if total > BUILD_ERROR_TAIL_LINES {
        &lines[total - BUILD_ERROR_TAIL_LINES..]
    } else {
        &lines
    };
    tail.join("\n")
}
