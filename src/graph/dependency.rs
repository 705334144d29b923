//! Whole-project dependency graph
//!
//! Nodes live in an arena addressed by [`NodeId`]. Construction is
//! two-phase: every target is registered first, then forward edges are
//! resolved by path, so declaration order never matters. Reverse edges
//! ("depended on by") are derived once from the forward edges. After
//! [`DependencyGraphBuilder::build`] the structure is immutable.

use crate::error::{KilnError, KilnResult};
use crate::graph::recipe::{BuildSpec, Recipe};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::debug;

/// Stable index of a node in a [`DependencyGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena index
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A target in the dependency graph
#[derive(Debug, Clone)]
pub struct DependencyNode {
    path: String,
    recipe: Recipe,
    dependencies: Vec<NodeId>,
    dependents: Vec<NodeId>,
}

impl DependencyNode {
    /// Target path (unique key)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Build metadata
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Nodes this node depends on, in declaration order
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    /// Nodes that depend on this node
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }
}

/// Collects targets and resolves them into a [`DependencyGraph`]
#[derive(Debug, Default)]
pub struct DependencyGraphBuilder {
    nodes: Vec<DependencyNode>,
    pending: Vec<Vec<String>>,
    index: HashMap<String, NodeId>,
    sources: Vec<NodeId>,
}

impl DependencyGraphBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target with its dependency paths
    ///
    /// Dependencies may name targets that are registered later.
    pub fn add_node<I, S>(
        &mut self,
        path: impl Into<String>,
        recipe: Recipe,
        deps: I,
    ) -> KilnResult<NodeId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path = path.into();
        if self.index.contains_key(&path) {
            return Err(KilnError::DuplicateTarget(path));
        }

        let id = NodeId(self.nodes.len());
        if recipe.is_source() {
            self.sources.push(id);
        }

        self.index.insert(path.clone(), id);
        self.pending.push(deps.into_iter().map(Into::into).collect());
        self.nodes.push(DependencyNode {
            path,
            recipe,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        });

        Ok(id)
    }

    /// Register a target from a build file record
    pub fn add_spec(&mut self, spec: BuildSpec) -> KilnResult<NodeId> {
        self.add_node(spec.target, spec.recipe, spec.dependencies)
    }

    /// Resolve edges and validate the graph
    pub fn build(mut self) -> KilnResult<DependencyGraph> {
        let pending = std::mem::take(&mut self.pending);
        for (i, deps) in pending.into_iter().enumerate() {
            let mut resolved = Vec::with_capacity(deps.len());
            for dep in deps {
                let dep_id = *self.index.get(&dep).ok_or_else(|| KilnError::UnknownDependency {
                    target: self.nodes[i].path.clone(),
                    dependency: dep.clone(),
                })?;
                if !resolved.contains(&dep_id) {
                    resolved.push(dep_id);
                }
            }
            self.nodes[i].dependencies = resolved;
        }

        let mut graph = DependencyGraph {
            nodes: self.nodes,
            index: self.index,
            sources: self.sources,
        };
        graph.calculate_dependents();
        graph.check_acyclic()?;

        debug!(
            "Dependency graph: {} targets, {} sources",
            graph.len(),
            graph.sources.len()
        );
        Ok(graph)
    }
}

/// Immutable project dependency graph
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    index: HashMap<String, NodeId>,
    sources: Vec<NodeId>,
}

impl DependencyGraph {
    /// Build a graph from build file records
    pub fn from_specs(specs: impl IntoIterator<Item = BuildSpec>) -> KilnResult<Self> {
        let mut builder = DependencyGraphBuilder::new();
        for spec in specs {
            builder.add_spec(spec)?;
        }
        builder.build()
    }

    /// Populate reverse edges from forward edges in one pass
    fn calculate_dependents(&mut self) {
        for i in 0..self.nodes.len() {
            for j in 0..self.nodes[i].dependencies.len() {
                let dep = self.nodes[i].dependencies[j];
                self.nodes[dep.0].dependents.push(NodeId(i));
            }
        }
    }

    /// Kahn's algorithm over dependency counts
    fn check_acyclic(&self) -> KilnResult<()> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut queue: VecDeque<NodeId> = self
            .ids()
            .filter(|id| remaining[id.0] == 0)
            .collect();
        let mut seen = 0;

        while let Some(id) = queue.pop_front() {
            seen += 1;
            for dependent in &self.nodes[id.0].dependents {
                remaining[dependent.0] -= 1;
                if remaining[dependent.0] == 0 {
                    queue.push_back(*dependent);
                }
            }
        }

        if seen == self.nodes.len() {
            return Ok(());
        }

        let on_cycle = self
            .ids()
            .find(|id| remaining[id.0] > 0)
            .map(|id| self.nodes[id.0].path.clone())
            .unwrap_or_default();
        Err(KilnError::DependencyCycle(on_cycle))
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no targets
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id.0]
    }

    /// Look up a target by path
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    /// Source-file nodes, in registration order
    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }
}
