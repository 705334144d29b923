//! Sandbox factory
//!
//! Picks the execution environment implementation from configuration.

use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::sandbox::podman::PodmanSandbox;
use crate::sandbox::runtime::Sandbox;
use std::sync::Arc;

/// Engines driven through a Podman-compatible CLI
const SUPPORTED_ENGINES: &[&str] = &["podman", "docker"];

/// Create the sandbox configured under `[runtime]`
pub fn create_sandbox(config: &Config) -> KilnResult<Arc<dyn Sandbox>> {
    let engine = config.runtime.engine.as_str();
    if !SUPPORTED_ENGINES.contains(&engine) {
        return Err(KilnError::Internal(format!(
            "unsupported container engine '{}' (expected one of: {})",
            engine,
            SUPPORTED_ENGINES.join(", ")
        )));
    }
    Ok(Arc::new(PodmanSandbox::new(config.runtime.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_engine_is_podman() {
        let sandbox = create_sandbox(&Config::default()).unwrap();
        assert_eq!(sandbox.runtime_name(), "Podman");
    }

    #[test]
    fn unknown_engine_rejected() {
        let mut config = Config::default();
        config.runtime.engine = "lxc".to_string();
        assert!(create_sandbox(&config).is_err());
    }
}
