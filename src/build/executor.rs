//! Build step execution
//!
//! Runs the steps of a [`BuildPlan`] with at most `jobs` in flight. A step
//! starts only once every step it waits on has committed its artifact to the
//! cache. The first failure broadcasts a cancel signal; running steps tear
//! their contexts down and the executor drains them before returning.

use crate::cache::{Cache, CacheEntry, ContentHash};
use crate::error::{KilnError, KilnResult};
use crate::graph::{BuildGraph, BuildPlan, ExecSpec, Recipe};
use crate::sandbox::{ContextHandle, Sandbox, BUILD_ERROR_TAIL_LINES};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum number of steps running at once
    pub jobs: usize,
    /// Fail a step when a dependency has no cached artifact
    pub strict_staging: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            strict_staging: true,
        }
    }
}

/// Progress notification for one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    Started { target: String },
    Finished { target: String, hash: ContentHash },
    Failed { target: String, reason: String },
}

/// A step that committed its artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Target path
    pub target: String,
    /// Hash of the cached artifact
    pub hash: ContentHash,
    /// Whether the step read a source file rather than running a command
    pub source: bool,
}

/// Result of running a plan
#[derive(Debug)]
pub struct RunSummary {
    /// Steps that committed, in completion order
    pub completed: Vec<StepReport>,
    /// The failure that aborted the run
    pub failure: Option<KilnError>,
}

impl RunSummary {
    /// Completed steps, or the failure
    pub fn into_result(self) -> KilnResult<Vec<StepReport>> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.completed),
        }
    }
}

/// Owned description of one step, moved into its task
struct StepJob {
    target: String,
    recipe: Recipe,
    dependencies: Vec<String>,
}

/// Shared handles each step task needs
#[derive(Clone)]
struct StepContext {
    cache: Arc<Cache>,
    sandbox: Arc<dyn Sandbox>,
    root: Arc<PathBuf>,
    strict_staging: bool,
    cancel: watch::Receiver<bool>,
}

impl StepContext {
    fn check_cancelled(&self, target: &str) -> KilnResult<()> {
        if *self.cancel.borrow() {
            return Err(KilnError::Cancelled(target.to_string()));
        }
        Ok(())
    }
}

/// Runs build plans against a cache and a sandbox
pub struct Executor {
    cache: Arc<Cache>,
    sandbox: Arc<dyn Sandbox>,
    root: Arc<PathBuf>,
    options: ExecutorOptions,
}

impl Executor {
    /// Create an executor reading sources relative to `root`
    pub fn new(
        cache: Arc<Cache>,
        sandbox: Arc<dyn Sandbox>,
        root: impl Into<PathBuf>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            cache,
            sandbox,
            root: Arc::new(root.into()),
            options,
        }
    }

    /// Execute every step of `plan`
    ///
    /// `observer` is called from the scheduling loop, never from step tasks.
    pub async fn run(
        &self,
        graph: &BuildGraph,
        plan: &BuildPlan,
        observer: &(dyn Fn(&StepEvent) + Send + Sync),
    ) -> RunSummary {
        let jobs = self.options.jobs.max(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tracker = plan.tracker();
        let mut tasks: JoinSet<(usize, KilnResult<StepReport>)> = JoinSet::new();
        let mut completed = Vec::new();
        let mut failure: Option<KilnError> = None;

        let target_of = |step: usize| graph.node(plan.steps()[step].node).path().to_string();

        loop {
            if failure.is_none() {
                while tasks.len() < jobs {
                    let Some(step) = tracker.next_ready() else {
                        break;
                    };
                    let job = self.job(graph, plan, step);
                    info!("Building {}", job.target);
                    observer(&StepEvent::Started {
                        target: job.target.clone(),
                    });

                    let ctx = self.context(cancel_rx.clone());
                    tasks.spawn(async move {
                        let result = run_step(&ctx, &job).await;
                        (step, result)
                    });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((step, Ok(report))) => {
                    tracker.complete(plan, step);
                    info!("Built {} ({})", report.target, report.hash);
                    observer(&StepEvent::Finished {
                        target: report.target.clone(),
                        hash: report.hash,
                    });
                    completed.push(report);
                }
                Ok((step, Err(e))) => {
                    let target = target_of(step);
                    if e.is_cancellation() {
                        debug!("{} cancelled", target);
                    } else {
                        warn!("{} failed: {}", target, e);
                    }
                    observer(&StepEvent::Failed {
                        target,
                        reason: e.to_string(),
                    });
                    if failure.is_none() {
                        failure = Some(e);
                        cancel_tx.send_replace(true);
                    }
                }
                Err(join_error) => {
                    if failure.is_none() {
                        failure = Some(KilnError::Internal(format!(
                            "build step task failed: {}",
                            join_error
                        )));
                        cancel_tx.send_replace(true);
                    }
                }
            }
        }

        if failure.is_none() && !tracker.is_finished() {
            failure = Some(KilnError::Internal(format!(
                "build plan stalled after {} of {} steps",
                tracker.completed(),
                plan.len()
            )));
        }

        RunSummary { completed, failure }
    }

    fn job(&self, graph: &BuildGraph, plan: &BuildPlan, step: usize) -> StepJob {
        let node = graph.node(plan.steps()[step].node);
        StepJob {
            target: node.path().to_string(),
            recipe: node.recipe().clone(),
            dependencies: node
                .dependencies()
                .iter()
                .map(|dep| graph.node(*dep).path().to_string())
                .collect(),
        }
    }

    fn context(&self, cancel: watch::Receiver<bool>) -> StepContext {
        StepContext {
            cache: Arc::clone(&self.cache),
            sandbox: Arc::clone(&self.sandbox),
            root: Arc::clone(&self.root),
            strict_staging: self.options.strict_staging,
            cancel,
        }
    }
}

async fn run_step(ctx: &StepContext, job: &StepJob) -> KilnResult<StepReport> {
    ctx.check_cancelled(&job.target)?;

    let content = match &job.recipe {
        Recipe::Source => read_source(&ctx.root, &job.target).await?,
        Recipe::Exec(spec) => run_exec(ctx, job, spec).await?,
    };

    let entry = CacheEntry::new(job.target.clone(), content);
    ctx.cache.set(&job.target, &entry).await?;

    Ok(StepReport {
        target: job.target.clone(),
        hash: entry.hash(),
        source: job.recipe.is_source(),
    })
}

async fn read_source(root: &Path, target: &str) -> KilnResult<Vec<u8>> {
    tokio::fs::read(root.join(target))
        .await
        .map_err(|e| KilnError::SourceRead {
            target: target.to_string(),
            source: e,
        })
}

async fn run_exec(ctx: &StepContext, job: &StepJob, spec: &ExecSpec) -> KilnResult<Vec<u8>> {
    ctx.sandbox.ensure_available(&spec.environment).await?;
    ctx.check_cancelled(&job.target)?;

    let handle = ctx
        .sandbox
        .create_context(&spec.environment, &spec.command)
        .await
        .map_err(|e| KilnError::execution(&job.target, e.to_string()))?;
    debug!("Context {} created for {}", handle, job.target);

    let result = drive_context(ctx, job, spec, &handle).await;

    if let Err(e) = ctx.sandbox.destroy(&handle).await {
        warn!("Failed to remove context {} for {}: {}", handle, job.target, e);
    }
    result
}

async fn drive_context(
    ctx: &StepContext,
    job: &StepJob,
    spec: &ExecSpec,
    handle: &ContextHandle,
) -> KilnResult<Vec<u8>> {
    let exec_err = |e: KilnError| KilnError::execution(&job.target, e.to_string());

    for dep in &job.dependencies {
        match ctx.cache.get(dep).await? {
            Some(entry) => {
                ctx.sandbox
                    .stage_file(handle, dep, entry.content())
                    .await
                    .map_err(exec_err)?;
            }
            None if ctx.strict_staging => {
                return Err(KilnError::MissingDependencyArtifact {
                    target: job.target.clone(),
                    dependency: dep.clone(),
                });
            }
            None => warn!("No cached artifact for {}, building {} without it", dep, job.target),
        }
    }

    ctx.check_cancelled(&job.target)?;
    ctx.sandbox.start(handle).await.map_err(exec_err)?;

    let mut cancel = ctx.cancel.clone();
    let termination = tokio::select! {
        result = ctx.sandbox.await_termination(handle) => result.map_err(exec_err)?,
        _ = cancelled(&mut cancel) => return Err(KilnError::Cancelled(job.target.clone())),
    };

    if !termination.success() {
        let output = ctx
            .sandbox
            .logs(handle, BUILD_ERROR_TAIL_LINES as u32)
            .await
            .unwrap_or_else(|e| {
                debug!("No logs for {}: {}", handle, e);
                String::new()
            });
        return Err(KilnError::BuildStepFailed {
            target: job.target.clone(),
            code: termination.exit_code,
            output,
        });
    }

    let output_path = spec.output_for(&job.target);
    ctx.sandbox
        .extract_file(handle, output_path)
        .await
        .map_err(|e| KilnError::OutputExtraction {
            target: job.target.clone(),
            path: output_path.to_string(),
            reason: e.to_string(),
        })
}

/// Resolves once the cancel flag is raised; never if the sender is gone
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{propagate, BuildSpec, DependencyGraph};
    use crate::sandbox::{MemorySandbox, StepOutcome};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        cache: Arc<Cache>,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.c"), "int a;").unwrap();
        std::fs::write(root.join("b.c"), "int b;").unwrap();
        let cache = Arc::new(Cache::open(temp.path().join("cache")).await.unwrap());
        Fixture {
            _temp: temp,
            root,
            cache,
        }
    }

    fn compiler() -> MemorySandbox {
        MemorySandbox::new().with_environment("cc", |input| {
            let mut out = Vec::new();
            for content in input.files.values() {
                out.extend_from_slice(content);
            }
            let target = input.command.rsplit(' ').next().unwrap_or_default();
            StepOutcome::ok().with_file(target, out)
        })
    }

    fn chain() -> DependencyGraph {
        DependencyGraph::from_specs([
            BuildSpec::source("a.c"),
            BuildSpec::derived("a.o", "cc", "cc -c a.o").depends_on(["a.c"]),
            BuildSpec::derived("app", "cc", "cc -o out").depends_on(["a.o"]).with_output("out"),
        ])
        .unwrap()
    }

    fn plan_for(graph: &DependencyGraph, target: &str) -> (BuildGraph, BuildPlan) {
        let staleness = propagate(graph, graph.ids());
        let bg = BuildGraph::for_target(graph, &staleness, target).unwrap();
        let plan = BuildPlan::new(&bg);
        (bg, plan)
    }

    #[tokio::test]
    async fn builds_chain_into_cache() {
        let fx = fixture().await;
        let sandbox = Arc::new(compiler());
        let executor = Executor::new(
            Arc::clone(&fx.cache),
            sandbox.clone(),
            &fx.root,
            ExecutorOptions::default(),
        );

        let graph = chain();
        let (bg, plan) = plan_for(&graph, "app");
        let events = Mutex::new(Vec::new());
        let summary = executor
            .run(&bg, &plan, &|e: &StepEvent| events.lock().unwrap().push(e.clone()))
            .await;
        let reports = summary.into_result().unwrap();

        let built: Vec<&str> = reports.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(built, vec!["a.c", "a.o", "app"]);
        assert!(reports[0].source);

        // The link step's output path differs from its target path
        let app = fx.cache.get("app").await.unwrap().unwrap();
        assert_eq!(app.target_path(), "app");
        assert_eq!(app.content(), b"int a;");

        assert_eq!(sandbox.executions()[1].staged, vec!["a.o"]);
        assert_eq!(sandbox.live_contexts(), 0);
        assert_eq!(events.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn missing_source_fails_with_source_read() {
        let fx = fixture().await;
        std::fs::remove_file(fx.root.join("a.c")).unwrap();
        let executor = Executor::new(
            Arc::clone(&fx.cache),
            Arc::new(compiler()),
            &fx.root,
            ExecutorOptions::default(),
        );

        let graph = chain();
        let (bg, plan) = plan_for(&graph, "app");
        let summary = executor.run(&bg, &plan, &|_: &StepEvent| {}).await;

        assert!(summary.completed.is_empty());
        assert!(matches!(summary.failure, Some(KilnError::SourceRead { .. })));
        assert!(!fx.cache.contains("a.o").await.unwrap());
    }

    #[tokio::test]
    async fn non_zero_exit_reports_log_and_cleans_up() {
        let fx = fixture().await;
        let sandbox = Arc::new(
            MemorySandbox::new()
                .with_environment("cc", |_| StepOutcome::failed(1, "a.c:1: error: expected ';'")),
        );
        let executor = Executor::new(
            Arc::clone(&fx.cache),
            sandbox.clone(),
            &fx.root,
            ExecutorOptions::default(),
        );

        let graph = chain();
        let (bg, plan) = plan_for(&graph, "app");
        let err = executor.run(&bg, &plan, &|_: &StepEvent| {}).await.into_result().unwrap_err();

        match err {
            KilnError::BuildStepFailed {
                target,
                code,
                output,
            } => {
                assert_eq!(target, "a.o");
                assert_eq!(code, 1);
                assert!(output.contains("expected ';'"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sandbox.live_contexts(), 0);
        assert_eq!(sandbox.destroyed(), 1);
        assert!(!fx.cache.contains("a.o").await.unwrap());
    }

    #[tokio::test]
    async fn missing_output_is_extraction_error() {
        let fx = fixture().await;
        let sandbox = Arc::new(MemorySandbox::new().with_environment("cc", |_| StepOutcome::ok()));
        let executor = Executor::new(
            Arc::clone(&fx.cache),
            sandbox.clone(),
            &fx.root,
            ExecutorOptions::default(),
        );

        let graph = chain();
        let (bg, plan) = plan_for(&graph, "a.o");
        let err = executor.run(&bg, &plan, &|_: &StepEvent| {}).await.into_result().unwrap_err();

        assert!(matches!(err, KilnError::OutputExtraction { ref path, .. } if path == "a.o"));
        assert_eq!(sandbox.live_contexts(), 0);
    }

    #[tokio::test]
    async fn unknown_environment_is_unavailable() {
        let fx = fixture().await;
        let executor = Executor::new(
            Arc::clone(&fx.cache),
            Arc::new(MemorySandbox::new()),
            &fx.root,
            ExecutorOptions::default(),
        );

        let graph = chain();
        let (bg, plan) = plan_for(&graph, "a.o");
        let err = executor.run(&bg, &plan, &|_: &StepEvent| {}).await.into_result().unwrap_err();
        assert!(matches!(err, KilnError::EnvironmentUnavailable { .. }));
    }

    #[tokio::test]
    async fn strict_staging_rejects_missing_dependency() {
        let fx = fixture().await;
        let graph = chain();
        // Only a.o is scheduled; a.c is treated as cached but has no entry
        let staleness = propagate(&graph, [graph.lookup("a.o").unwrap()]);
        let bg = BuildGraph::for_target(&graph, &staleness, "a.o").unwrap();
        let plan = BuildPlan::new(&bg);

        let strict = Executor::new(
            Arc::clone(&fx.cache),
            Arc::new(compiler()),
            &fx.root,
            ExecutorOptions::default(),
        );
        let err = strict.run(&bg, &plan, &|_: &StepEvent| {}).await.into_result().unwrap_err();
        assert!(matches!(
            err,
            KilnError::MissingDependencyArtifact { ref dependency, .. } if dependency == "a.c"
        ));

        let sandbox = Arc::new(compiler());
        let lenient = Executor::new(
            Arc::clone(&fx.cache),
            sandbox.clone(),
            &fx.root,
            ExecutorOptions {
                jobs: 1,
                strict_staging: false,
            },
        );
        lenient.run(&bg, &plan, &|_: &StepEvent| {}).await.into_result().unwrap();
        assert!(sandbox.executions()[0].staged.is_empty());
    }

    fn diamond() -> DependencyGraph {
        DependencyGraph::from_specs([
            BuildSpec::source("a.c"),
            BuildSpec::source("b.c"),
            BuildSpec::derived("a.o", "slow", "cc -c a.o").depends_on(["a.c"]),
            BuildSpec::derived("b.o", "slow", "cc -c b.o").depends_on(["b.c"]),
            BuildSpec::derived("app", "slow", "cc -o app").depends_on(["a.o", "b.o"]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn independent_steps_run_concurrently() {
        let fx = fixture().await;
        let sandbox = Arc::new(MemorySandbox::new().with_environment("slow", |input| {
            let target = input.command.rsplit(' ').next().unwrap_or_default();
            StepOutcome::ok()
                .with_file(target, "obj")
                .with_delay(Duration::from_millis(50))
        }));
        let executor = Executor::new(
            Arc::clone(&fx.cache),
            sandbox.clone(),
            &fx.root,
            ExecutorOptions {
                jobs: 4,
                strict_staging: true,
            },
        );

        let graph = diamond();
        let (bg, plan) = plan_for(&graph, "app");
        let reports = executor
            .run(&bg, &plan, &|_: &StepEvent| {})
            .await
            .into_result()
            .unwrap();

        assert_eq!(reports.len(), 5);
        assert_eq!(reports.last().unwrap().target, "app");
        assert_eq!(sandbox.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn jobs_bound_concurrency() {
        let fx = fixture().await;
        let sandbox = Arc::new(MemorySandbox::new().with_environment("slow", |input| {
            let target = input.command.rsplit(' ').next().unwrap_or_default();
            StepOutcome::ok()
                .with_file(target, "obj")
                .with_delay(Duration::from_millis(20))
        }));
        let executor = Executor::new(
            Arc::clone(&fx.cache),
            sandbox.clone(),
            &fx.root,
            ExecutorOptions::default(),
        );

        let graph = diamond();
        let (bg, plan) = plan_for(&graph, "app");
        executor.run(&bg, &plan, &|_: &StepEvent| {}).await.into_result().unwrap();
        assert_eq!(sandbox.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn failure_cancels_running_siblings() {
        let fx = fixture().await;
        let sandbox = Arc::new(MemorySandbox::new().with_environment("slow", |input| {
            if input.command.ends_with("a.o") {
                StepOutcome::failed(2, "boom").with_delay(Duration::from_millis(10))
            } else {
                StepOutcome::ok()
                    .with_file("b.o", "obj")
                    .with_delay(Duration::from_secs(30))
            }
        }));
        let executor = Executor::new(
            Arc::clone(&fx.cache),
            sandbox.clone(),
            &fx.root,
            ExecutorOptions {
                jobs: 4,
                strict_staging: true,
            },
        );

        let graph = diamond();
        let (bg, plan) = plan_for(&graph, "app");
        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            executor.run(&bg, &plan, &|_: &StepEvent| {}),
        )
        .await
        .expect("cancellation should stop the slow sibling");

        assert!(matches!(
            summary.failure,
            Some(KilnError::BuildStepFailed { ref target, .. }) if target == "a.o"
        ));
        assert_eq!(sandbox.live_contexts(), 0);
        assert!(!fx.cache.contains("b.o").await.unwrap());
        assert!(!fx.cache.contains("app").await.unwrap());
    }
}
