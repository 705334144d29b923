//! Per-target build graph derivation
//!
//! A [`BuildGraph`] is a pruned, independently owned mirror of the part of
//! the dependency graph reachable from one requested target. Up-to-date
//! nodes are kept as `from_cache` leaves with no dependency edges; only
//! stale nodes have their dependencies materialized.

use crate::error::{KilnError, KilnResult};
use crate::graph::dependency::{DependencyGraph, DependencyNode, NodeId};
use crate::graph::recipe::Recipe;
use crate::graph::staleness::Staleness;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Stable index of a node in a [`BuildGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildNodeId(usize);

impl BuildNodeId {
    /// Arena index
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BuildNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A target in a build graph
#[derive(Debug, Clone)]
pub struct BuildNode {
    path: String,
    recipe: Recipe,
    from_cache: bool,
    dependencies: Vec<BuildNodeId>,
}

impl BuildNode {
    fn mirror(source: &DependencyNode) -> Self {
        Self {
            path: source.path().to_string(),
            recipe: source.recipe().clone(),
            from_cache: false,
            dependencies: Vec::new(),
        }
    }

    /// Target path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Build metadata
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Whether the cached artifact is already valid
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Materialized dependencies (empty for `from_cache` nodes)
    pub fn dependencies(&self) -> &[BuildNodeId] {
        &self.dependencies
    }
}

/// Pruned build graph for one requested target
#[derive(Debug, Clone)]
pub struct BuildGraph {
    nodes: Vec<BuildNode>,
    index: HashMap<String, BuildNodeId>,
    root: BuildNodeId,
}

impl BuildGraph {
    /// Derive the build graph for `target`
    ///
    /// Fails with `TargetNotFound` when `target` is not in `graph`.
    pub fn for_target(
        graph: &DependencyGraph,
        staleness: &Staleness,
        target: &str,
    ) -> KilnResult<Self> {
        let root_dep = graph
            .lookup(target)
            .ok_or_else(|| KilnError::TargetNotFound(target.to_string()))?;

        let mut build = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            root: BuildNodeId(0),
        };
        let (root, _) = build.get_or_mirror(graph.node(root_dep));
        build.root = root;

        let mut worklist: Vec<(NodeId, BuildNodeId)> = vec![(root_dep, root)];
        while let Some((dep_id, build_id)) = worklist.pop() {
            let source = graph.node(dep_id);
            let mirrored = &build.nodes[build_id.0];
            if mirrored.path != source.path() {
                return Err(KilnError::GraphConsistency {
                    expected: source.path().to_string(),
                    actual: mirrored.path.clone(),
                });
            }

            if !staleness.is_stale(dep_id) {
                build.nodes[build_id.0].from_cache = true;
                continue;
            }

            for &child in source.dependencies() {
                let (child_id, created) = build.get_or_mirror(graph.node(child));
                if created {
                    worklist.push((child, child_id));
                }
                build.nodes[build_id.0].dependencies.push(child_id);
            }
        }

        debug!(
            "Build graph for {}: {} nodes, {} from cache",
            target,
            build.len(),
            build.nodes.iter().filter(|n| n.from_cache).count()
        );
        Ok(build)
    }

    fn get_or_mirror(&mut self, source: &DependencyNode) -> (BuildNodeId, bool) {
        if let Some(id) = self.index.get(source.path()) {
            return (*id, false);
        }
        let id = BuildNodeId(self.nodes.len());
        self.nodes.push(BuildNode::mirror(source));
        self.index.insert(source.path().to_string(), id);
        (id, true)
    }

    /// The requested target
    pub fn root(&self) -> BuildNodeId {
        self.root
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in creation order
    pub fn ids(&self) -> impl Iterator<Item = BuildNodeId> + '_ {
        (0..self.nodes.len()).map(BuildNodeId)
    }

    /// Node by id
    pub fn node(&self, id: BuildNodeId) -> &BuildNode {
        &self.nodes[id.0]
    }

    /// Look up a node by target path
    pub fn lookup(&self, path: &str) -> Option<BuildNodeId> {
        self.index.get(path).copied()
    }
}
