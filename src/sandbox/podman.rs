//! Container CLI execution environment
//!
//! Implements the Sandbox trait by driving a Podman-compatible CLI
//! (`podman` or `docker`). Each build step gets one created container;
//! files move in and out with `cp`.

use crate::config::schema::RuntimeConfig;
use crate::error::{KilnError, KilnResult};
use crate::sandbox::build_error_output;
use crate::sandbox::runtime::{ContextHandle, Sandbox, Termination};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

/// Sandbox backed by a container engine CLI
pub struct PodmanSandbox {
    config: RuntimeConfig,
}

impl PodmanSandbox {
    /// Create a sandbox using the given runtime settings
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Execute an engine command and return the output
    async fn exec(&self, args: &[&str]) -> KilnResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.config.engine, args);

        Command::new(&self.config.engine)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| KilnError::io(format!("running {} {:?}", self.config.engine, args), e))
    }

    /// Execute an engine command, failing on non-zero exit
    async fn exec_ok(&self, args: &[&str]) -> KilnResult<std::process::Output> {
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(KilnError::Internal(format!(
                "{} {} failed: {}",
                self.config.engine,
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Check if image exists locally
    async fn image_exists(&self, image: &str) -> KilnResult<bool> {
        let output = self.exec(&image_probe_args(&self.config.engine, image)).await?;
        Ok(output.status.success())
    }

    /// Command line for a build command string
    fn command_args(&self, command: &str) -> Vec<String> {
        match self.config.shell.as_deref() {
            Some(shell) => vec![shell.to_string(), "-c".to_string(), command.to_string()],
            None => command.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Absolute path of a target inside the container
    fn container_path(&self, path: &str) -> String {
        container_path(&self.config.workdir, path)
    }
}

/// Arguments that succeed only when `image` is present locally
///
/// Docker has no `image exists`; `image inspect` exits non-zero the same way.
fn image_probe_args<'a>(engine: &str, image: &'a str) -> [&'a str; 3] {
    if engine == "docker" {
        ["image", "inspect", image]
    } else {
        ["image", "exists", image]
    }
}

/// Resolve `path` against the container working directory
fn container_path(workdir: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), path)
    }
}

/// Mirror an absolute container path under a host staging directory
fn staging_path(staging_root: &Path, container_path: &str) -> PathBuf {
    let mut out = staging_root.to_path_buf();
    for component in Path::new(container_path).components() {
        if let Component::Normal(part) = component {
            out.push(part);
        }
    }
    out
}

#[async_trait]
impl Sandbox for PodmanSandbox {
    async fn ensure_available(&self, environment: &str) -> KilnResult<()> {
        let unavailable = |reason: String| KilnError::EnvironmentUnavailable {
            env: environment.to_string(),
            reason,
        };

        let exists = self
            .image_exists(environment)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if exists {
            debug!("Image {} already present", environment);
            return Ok(());
        }

        info!("Pulling image: {}", environment);
        let output = self
            .exec(&["pull", environment])
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn create_context(&self, environment: &str, command: &str) -> KilnResult<ContextHandle> {
        let mut args = vec![
            "create".to_string(),
            "--workdir".to_string(),
            self.config.workdir.clone(),
            "--network".to_string(),
            self.config.network.clone(),
            environment.to_string(),
        ];
        args.extend(self.command_args(command));

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec_ok(&args_refs).await?;

        let handle = ContextHandle::new(String::from_utf8_lossy(&output.stdout).trim());
        debug!("Created container {} for: {}", handle, command);
        Ok(handle)
    }

    async fn stage_file(&self, ctx: &ContextHandle, path: &str, content: &[u8]) -> KilnResult<()> {
        let staging = TempDir::new().map_err(|e| KilnError::io("creating staging directory", e))?;
        let host_file = staging_path(staging.path(), &self.container_path(path));

        if let Some(parent) = host_file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io("creating staging directory", e))?;
        }
        fs::write(&host_file, content)
            .await
            .map_err(|e| KilnError::io(format!("staging {}", path), e))?;

        // Copy the mirrored tree onto / so missing parent directories are created
        let source = format!("{}/.", staging.path().display());
        let dest = format!("{}:/", ctx.id());
        self.exec_ok(&["cp", &source, &dest]).await?;

        debug!("Staged {} into {}", path, ctx);
        Ok(())
    }

    async fn start(&self, ctx: &ContextHandle) -> KilnResult<()> {
        self.exec_ok(&["start", ctx.id()]).await?;
        Ok(())
    }

    async fn await_termination(&self, ctx: &ContextHandle) -> KilnResult<Termination> {
        let output = self.exec_ok(&["wait", ctx.id()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let exit_code = stdout
            .lines()
            .last()
            .and_then(|l| l.trim().parse::<i32>().ok())
            .ok_or_else(|| {
                KilnError::Internal(format!("unexpected wait output: {}", stdout.trim()))
            })?;
        Ok(Termination { exit_code })
    }

    async fn extract_file(&self, ctx: &ContextHandle, path: &str) -> KilnResult<Vec<u8>> {
        let staging = TempDir::new().map_err(|e| KilnError::io("creating extract directory", e))?;
        let host_file = staging.path().join("output");

        let source = format!("{}:{}", ctx.id(), self.container_path(path));
        let dest = host_file.display().to_string();
        self.exec_ok(&["cp", &source, &dest]).await?;

        if !host_file.is_file() {
            return Err(KilnError::Internal(format!("{} is not a regular file", path)));
        }
        fs::read(&host_file)
            .await
            .map_err(|e| KilnError::io(format!("reading extracted {}", path), e))
    }

    async fn logs(&self, ctx: &ContextHandle, lines: u32) -> KilnResult<String> {
        let tail = lines.to_string();
        let output = self.exec(&["logs", "--tail", &tail, ctx.id()]).await?;
        Ok(build_error_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    async fn destroy(&self, ctx: &ContextHandle) -> KilnResult<()> {
        debug!("Removing container: {}", ctx);

        let output = self.exec(&["rm", "-f", ctx.id()]).await?;

        if output.status.success() {
            Ok(())
        } else {
            // Ignore error if container doesn't exist
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("no such container") {
                Ok(())
            } else {
                Err(KilnError::Internal(format!(
                    "removing container {}: {}",
                    ctx,
                    stderr.trim()
                )))
            }
        }
    }

    fn runtime_name(&self) -> &'static str {
        match self.config.engine.as_str() {
            "docker" => "Docker",
            _ => "Podman",
        }
    }
}
