//! Build orchestration
//!
//! [`Engine`] ties one project's dependency graph to its cache and sandbox:
//! staleness, build graph derivation, planning, execution, failure policy
//! and artifact delivery.

use crate::build::executor::{Executor, ExecutorOptions, StepEvent, StepReport};
use crate::buildfile;
use crate::cache::{Cache, ContentHash};
use crate::config::{Config, FailurePolicy};
use crate::error::{KilnError, KilnResult};
use crate::graph::{compute_staleness, BuildGraph, BuildPlan, DependencyGraph, Staleness};
use crate::journal::{BuildJournal, JournalEvent};
use crate::sandbox::{create_sandbox, Sandbox};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Settings for one engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of steps running at once
    pub jobs: usize,
    /// Fail steps whose dependencies have no cached artifact
    pub strict_staging: bool,
    /// Cache handling after a failed build
    pub on_failure: FailurePolicy,
    /// Where the requested artifact is written; `None` means the project root
    pub output_dir: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            strict_staging: true,
            on_failure: FailurePolicy::default(),
            output_dir: None,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            jobs: config.build.jobs,
            strict_staging: config.build.strict_staging,
            on_failure: config.cache.on_failure,
            output_dir: config.build.output_dir.clone(),
        }
    }
}

/// Everything needed to execute one request
pub struct PlannedBuild {
    pub staleness: Staleness,
    pub graph: BuildGraph,
    pub plan: BuildPlan,
}

impl PlannedBuild {
    /// Target paths in build order
    pub fn order(&self) -> Vec<String> {
        self.plan
            .order()
            .into_iter()
            .map(|id| self.graph.node(id).path().to_string())
            .collect()
    }
}

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub run_id: Uuid,
    pub target: String,
    /// Target paths in build order
    pub order: Vec<String>,
    /// Steps that ran
    pub built: Vec<StepReport>,
    /// Hash of the delivered artifact
    pub hash: ContentHash,
    /// Where the artifact was written
    pub artifact: PathBuf,
}

impl BuildOutcome {
    /// Whether the artifact came straight from the cache
    pub fn up_to_date(&self) -> bool {
        self.built.is_empty()
    }
}

/// Cache entries one run refreshed or left stale
#[derive(Debug, Default)]
struct RunLedger {
    /// Targets stale at planning time, across the whole graph
    stale: Vec<String>,
    /// Targets whose step committed a new entry
    completed: Vec<String>,
}

impl RunLedger {
    /// Stale targets this run did not rebuild
    ///
    /// Their dependencies may now hold fresh entries, so keeping theirs
    /// would hide the staleness from the next pass.
    fn leftover(&self) -> impl Iterator<Item = &str> {
        self.stale
            .iter()
            .filter(|t| !self.completed.contains(*t))
            .map(String::as_str)
    }
}

/// Incremental build orchestrator for one project
pub struct Engine {
    root: PathBuf,
    graph: DependencyGraph,
    cache: Arc<Cache>,
    sandbox: Arc<dyn Sandbox>,
    options: EngineOptions,
    journal: BuildJournal,
}

impl Engine {
    /// Assemble an engine from its parts
    pub fn new(
        root: impl Into<PathBuf>,
        graph: DependencyGraph,
        cache: Arc<Cache>,
        sandbox: Arc<dyn Sandbox>,
        options: EngineOptions,
    ) -> Self {
        Self {
            root: root.into(),
            graph,
            cache,
            sandbox,
            options,
            journal: BuildJournal::disabled(),
        }
    }

    /// Record runs in `journal`
    pub fn with_journal(mut self, journal: BuildJournal) -> Self {
        self.journal = journal;
        self
    }

    /// Load the project at `root` as configured
    pub async fn from_config(root: &Path, config: &Config) -> KilnResult<Self> {
        let graph = buildfile::load_graph(&root.join(&config.build.build_file)).await?;
        let cache = Arc::new(Cache::open(cache_dir(root, config)).await?);
        let sandbox = create_sandbox(config)?;

        Ok(Self::new(root, graph, cache, sandbox, EngineOptions::from(config))
            .with_journal(BuildJournal::new(config)))
    }

    /// Project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The project's dependency graph
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The artifact cache
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Display name of the execution environment backend
    pub fn runtime_name(&self) -> &'static str {
        self.sandbox.runtime_name()
    }

    /// Staleness of every target against the cache
    pub async fn staleness(&self) -> KilnResult<Staleness> {
        compute_staleness(&self.graph, &self.cache, &self.root).await
    }

    /// Work out what building `target` requires, without running anything
    pub async fn plan(&self, target: &str) -> KilnResult<PlannedBuild> {
        if self.graph.lookup(target).is_none() {
            return Err(KilnError::TargetNotFound(target.to_string()));
        }

        let staleness = self.staleness().await?;
        let graph = BuildGraph::for_target(&self.graph, &staleness, target)?;
        let plan = BuildPlan::new(&graph);
        debug!("{} of {} nodes need building for {}", plan.len(), graph.len(), target);

        Ok(PlannedBuild {
            staleness,
            graph,
            plan,
        })
    }

    /// Bring `target` up to date and deliver its artifact
    ///
    /// An unknown target fails before the cache is touched. Any other
    /// failure applies the configured failure policy and writes no artifact.
    pub async fn build(
        &self,
        target: &str,
        observer: &(dyn Fn(&StepEvent) + Send + Sync),
    ) -> KilnResult<BuildOutcome> {
        if self.graph.lookup(target).is_none() {
            return Err(KilnError::TargetNotFound(target.to_string()));
        }

        let run_id = Uuid::new_v4();
        let mut ledger = RunLedger::default();

        match self.run(run_id, target, observer, &mut ledger).await {
            Ok(outcome) => {
                let retired = self.remove_entries(ledger.leftover()).await;
                if retired > 0 {
                    info!("Dropped {} stale cache entries outside {}", retired, target);
                }
                self.journal
                    .record(
                        run_id,
                        JournalEvent::RunFinished {
                            target: target.to_string(),
                            built: outcome.built.len(),
                        },
                    )
                    .await;
                Ok(outcome)
            }
            Err(e) => {
                self.journal
                    .record(
                        run_id,
                        JournalEvent::RunFailed {
                            target: target.to_string(),
                            error: e.to_string(),
                        },
                    )
                    .await;
                self.apply_failure_policy(&ledger).await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        run_id: Uuid,
        target: &str,
        observer: &(dyn Fn(&StepEvent) + Send + Sync),
        ledger: &mut RunLedger,
    ) -> KilnResult<BuildOutcome> {
        let planned = self.plan(target).await?;
        ledger.stale = planned
            .staleness
            .stale_paths(&self.graph)
            .into_iter()
            .map(str::to_string)
            .collect();
        let order = planned.order();
        info!("Build order for {}: {:?}", target, order);

        self.journal
            .record(
                run_id,
                JournalEvent::RunStarted {
                    target: target.to_string(),
                    steps: order.len(),
                },
            )
            .await;

        let executor = Executor::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.sandbox),
            self.root.clone(),
            ExecutorOptions {
                jobs: self.options.jobs,
                strict_staging: self.options.strict_staging,
            },
        );
        let summary = executor.run(&planned.graph, &planned.plan, observer).await;

        for report in &summary.completed {
            ledger.completed.push(report.target.clone());
            self.journal
                .record(
                    run_id,
                    JournalEvent::StepDone {
                        target: report.target.clone(),
                        hash: report.hash.to_hex(),
                    },
                )
                .await;
        }
        let built = summary.into_result()?;

        let entry = self.cache.get(target).await?.ok_or_else(|| {
            KilnError::Internal(format!("no cached artifact for {} after build", target))
        })?;
        let artifact = self.deliver(target, entry.content()).await?;

        Ok(BuildOutcome {
            run_id,
            target: target.to_string(),
            order,
            built,
            hash: entry.hash(),
            artifact,
        })
    }

    /// Write the artifact for `target` under the output directory
    async fn deliver(&self, target: &str, content: &[u8]) -> KilnResult<PathBuf> {
        let dest = self
            .options
            .output_dir
            .as_deref()
            .map(|dir| self.root.join(dir))
            .unwrap_or_else(|| self.root.clone())
            .join(target);

        let is_source = self
            .graph
            .lookup(target)
            .map(|id| self.graph.node(id).recipe().is_source())
            .unwrap_or(false);
        if is_source && dest == self.root.join(target) {
            return Ok(dest);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;
        }
        fs::write(&dest, content)
            .await
            .map_err(|e| KilnError::io(format!("writing artifact {}", dest.display()), e))?;

        debug!("Wrote {} ({} bytes)", dest.display(), content.len());
        Ok(dest)
    }

    async fn apply_failure_policy(&self, ledger: &RunLedger) {
        let removed = match self.options.on_failure {
            FailurePolicy::Purge => {
                if let Err(e) = self.cache.purge().await {
                    warn!("Failed to purge cache: {}", e);
                }
                return;
            }
            FailurePolicy::Invalidate => {
                let written = ledger.completed.iter().map(String::as_str);
                self.remove_entries(written.chain(ledger.leftover())).await
            }
            // Completed steps stay; whatever they made stale must go
            FailurePolicy::Keep => self.remove_entries(ledger.leftover()).await,
        };
        if removed > 0 {
            info!(
                "Invalidated {} cache entries after the failed run ({} policy)",
                removed,
                self.options.on_failure.as_str()
            );
        }
    }

    async fn remove_entries<'a>(&self, targets: impl IntoIterator<Item = &'a str>) -> usize {
        let mut removed = 0;
        for target in targets {
            match self.cache.remove(target).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to invalidate {}: {}", target, e),
            }
        }
        removed
    }
}

/// Cache directory for a project, resolving relative paths under `root`
pub fn cache_dir(root: &Path, config: &Config) -> PathBuf {
    root.join(&config.cache.dir)
}
