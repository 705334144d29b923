//! In-memory execution environment
//!
//! Each environment id maps to a handler that receives the command and the
//! staged files and returns the files it "produced". Nothing touches the
//! host. Used by tests and for dry runs of build graphs.

use crate::error::{KilnError, KilnResult};
use crate::sandbox::runtime::{ContextHandle, Sandbox, Termination};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Files visible inside a context, keyed by path
pub type Files = BTreeMap<String, Vec<u8>>;

/// Input handed to a step handler
#[derive(Debug)]
pub struct StepInput<'a> {
    /// Environment id the context was created for
    pub environment: &'a str,
    /// Command string
    pub command: &'a str,
    /// Staged files
    pub files: &'a Files,
}

/// What a simulated command did
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// Exit code
    pub exit_code: i32,
    /// Files written by the command
    pub files: Files,
    /// Output lines
    pub log: String,
    /// How long the command runs before terminating
    pub delay: Option<Duration>,
}

impl StepOutcome {
    /// Successful run producing no files
    pub fn ok() -> Self {
        Self::default()
    }

    /// Failed run with an exit code and log text
    pub fn failed(exit_code: i32, log: impl Into<String>) -> Self {
        Self {
            exit_code,
            log: log.into(),
            ..Self::default()
        }
    }

    /// Add a produced file
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Keep the command running for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Simulated command behavior for one environment
pub type StepHandler = Arc<dyn Fn(&StepInput<'_>) -> StepOutcome + Send + Sync>;

/// A command that was started in some context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Environment id
    pub environment: String,
    /// Command string
    pub command: String,
    /// Paths staged before start, in staging order
    pub staged: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryContext {
    environment: String,
    command: String,
    files: Files,
    staged: Vec<String>,
    started: bool,
    exit_code: Option<i32>,
    log: String,
    delay: Option<Duration>,
}

#[derive(Default)]
struct State {
    next_id: usize,
    contexts: HashMap<String, MemoryContext>,
    executions: Vec<ExecutionRecord>,
    provisioned: Vec<String>,
    destroyed: usize,
}

/// Decrements the running counter even when the wait is dropped early
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sandbox that runs handlers instead of commands
#[derive(Default)]
pub struct MemorySandbox {
    handlers: HashMap<String, StepHandler>,
    run_time: Option<Duration>,
    state: Mutex<State>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl MemorySandbox {
    /// Create a sandbox with no environments
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an environment and its command handler
    pub fn with_environment<F>(mut self, environment: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&StepInput<'_>) -> StepOutcome + Send + Sync + 'static,
    {
        self.handlers.insert(environment.into(), Arc::new(handler));
        self
    }

    /// Make commands without their own delay take `duration` to terminate
    pub fn with_run_time(mut self, duration: Duration) -> Self {
        self.run_time = Some(duration);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unknown(ctx: &ContextHandle) -> KilnError {
        KilnError::Internal(format!("no such context: {}", ctx.id()))
    }

    /// Commands started so far, in start order
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.state().executions.clone()
    }

    /// Environments that were provisioned, in first-use order
    pub fn provisioned(&self) -> Vec<String> {
        self.state().provisioned.clone()
    }

    /// Contexts created and not yet destroyed
    pub fn live_contexts(&self) -> usize {
        self.state().contexts.len()
    }

    /// Contexts destroyed so far
    pub fn destroyed(&self) -> usize {
        self.state().destroyed
    }

    /// Highest number of commands awaiting termination at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    async fn ensure_available(&self, environment: &str) -> KilnResult<()> {
        if !self.handlers.contains_key(environment) {
            return Err(KilnError::EnvironmentUnavailable {
                env: environment.to_string(),
                reason: "no such environment".to_string(),
            });
        }
        let mut state = self.state();
        if !state.provisioned.iter().any(|e| e == environment) {
            state.provisioned.push(environment.to_string());
        }
        Ok(())
    }

    async fn create_context(&self, environment: &str, command: &str) -> KilnResult<ContextHandle> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        state.contexts.insert(
            id.clone(),
            MemoryContext {
                environment: environment.to_string(),
                command: command.to_string(),
                ..MemoryContext::default()
            },
        );
        Ok(ContextHandle::new(id))
    }

    async fn stage_file(&self, ctx: &ContextHandle, path: &str, content: &[u8]) -> KilnResult<()> {
        let mut state = self.state();
        let context = state.contexts.get_mut(ctx.id()).ok_or_else(|| Self::unknown(ctx))?;
        if context.started {
            return Err(KilnError::Internal(format!(
                "cannot stage {} into started context",
                path
            )));
        }
        context.files.insert(path.to_string(), content.to_vec());
        context.staged.push(path.to_string());
        Ok(())
    }

    async fn start(&self, ctx: &ContextHandle) -> KilnResult<()> {
        let mut state = self.state();
        let context = state.contexts.get_mut(ctx.id()).ok_or_else(|| Self::unknown(ctx))?;

        let handler = self
            .handlers
            .get(&context.environment)
            .cloned()
            .ok_or_else(|| KilnError::Internal(format!("unknown environment {}", context.environment)))?;

        let outcome = handler(&StepInput {
            environment: &context.environment,
            command: &context.command,
            files: &context.files,
        });
        debug!("{}: {} -> exit {}", ctx, context.command, outcome.exit_code);

        context.started = true;
        context.exit_code = Some(outcome.exit_code);
        context.log = outcome.log;
        context.delay = outcome.delay;
        context.files.extend(outcome.files);

        let record = ExecutionRecord {
            environment: context.environment.clone(),
            command: context.command.clone(),
            staged: context.staged.clone(),
        };
        state.executions.push(record);
        Ok(())
    }

    async fn await_termination(&self, ctx: &ContextHandle) -> KilnResult<Termination> {
        let delay = {
            let state = self.state();
            let context = state.contexts.get(ctx.id()).ok_or_else(|| Self::unknown(ctx))?;
            context.delay.or(self.run_time)
        };

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        let running = RunningGuard(&self.running);

        if let Some(duration) = delay {
            tokio::time::sleep(duration).await;
        }
        drop(running);

        let state = self.state();
        let context = state.contexts.get(ctx.id()).ok_or_else(|| Self::unknown(ctx))?;
        let exit_code = context
            .exit_code
            .ok_or_else(|| KilnError::Internal(format!("context {} was never started", ctx)))?;
        Ok(Termination { exit_code })
    }

    async fn extract_file(&self, ctx: &ContextHandle, path: &str) -> KilnResult<Vec<u8>> {
        let state = self.state();
        let context = state.contexts.get(ctx.id()).ok_or_else(|| Self::unknown(ctx))?;
        context
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| KilnError::Internal(format!("{} does not exist", path)))
    }

    async fn logs(&self, ctx: &ContextHandle, _lines: u32) -> KilnResult<String> {
        let state = self.state();
        Ok(state
            .contexts
            .get(ctx.id())
            .map(|c| c.log.clone())
            .unwrap_or_default())
    }

    async fn destroy(&self, ctx: &ContextHandle) -> KilnResult<()> {
        let mut state = self.state();
        if state.contexts.remove(ctx.id()).is_some() {
            state.destroyed += 1;
        }
        Ok(())
    }

    fn runtime_name(&self) -> &'static str {
        "In-memory"
    }
}
