//! Staleness computation
//!
//! A node is stale ("needs update") when its output is not guaranteed to
//! reflect its transitive source inputs. Staleness originates at:
//!
//! - source files with no cache entry, or whose live content hash differs
//!   from the cached hash
//! - derived targets with no cache entry
//!
//! and spreads to every node that transitively depends on an origin. The
//! result is a separate [`Staleness`] set; the graph itself is not mutated.

use crate::cache::{Cache, ContentHash};
use crate::error::{KilnError, KilnResult};
use crate::graph::dependency::{DependencyGraph, NodeId};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// Per-node "needs update" flags for one graph load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staleness {
    stale: Vec<bool>,
}

impl Staleness {
    /// Whether `id` needs to be rebuilt
    pub fn is_stale(&self, id: NodeId) -> bool {
        self.stale.get(id.index()).copied().unwrap_or(false)
    }

    /// Number of stale nodes
    pub fn stale_count(&self) -> usize {
        self.stale.iter().filter(|s| **s).count()
    }

    /// Paths of stale nodes, in graph order
    pub fn stale_paths<'a>(&'a self, graph: &'a DependencyGraph) -> Vec<&'a str> {
        graph
            .ids()
            .filter(|id| self.is_stale(*id))
            .map(|id| graph.node(id).path())
            .collect()
    }
}

/// Mark `origins` and everything reachable through dependent edges
///
/// Worklist traversal; an already-stale node is never expanded twice.
pub fn propagate(graph: &DependencyGraph, origins: impl IntoIterator<Item = NodeId>) -> Staleness {
    let mut stale = vec![false; graph.len()];
    let mut worklist: Vec<NodeId> = origins.into_iter().collect();

    while let Some(id) = worklist.pop() {
        if stale[id.index()] {
            continue;
        }
        stale[id.index()] = true;

        for dependent in graph.node(id).dependents() {
            if !stale[dependent.index()] {
                debug!(
                    "{} is stale because {} is",
                    graph.node(*dependent).path(),
                    graph.node(id).path()
                );
                worklist.push(*dependent);
            }
        }
    }

    Staleness { stale }
}

/// Hash the live content of a source file under `root`
pub async fn source_hash(root: &Path, target: &str) -> KilnResult<ContentHash> {
    let content = fs::read(root.join(target))
        .await
        .map_err(|e| KilnError::SourceRead {
            target: target.to_string(),
            source: e,
        })?;
    Ok(ContentHash::of(&content))
}

/// Compute staleness for every node against the cache
///
/// Only reads from the cache.
pub async fn compute_staleness(
    graph: &DependencyGraph,
    cache: &Cache,
    root: &Path,
) -> KilnResult<Staleness> {
    let mut origins = Vec::new();

    for &id in graph.sources() {
        let path = graph.node(id).path();
        match cache.get(path).await? {
            None => {
                info!("Source {} is not cached", path);
                origins.push(id);
            }
            Some(entry) => {
                let live = source_hash(root, path).await?;
                if live != entry.hash() {
                    info!("Source {} changed ({} -> {})", path, entry.hash(), live);
                    origins.push(id);
                }
            }
        }
    }

    for id in graph.ids() {
        let node = graph.node(id);
        if node.recipe().is_source() {
            continue;
        }
        if !cache.contains(node.path()).await? {
            info!("Target {} has no cached artifact", node.path());
            origins.push(id);
        }
    }

    let staleness = propagate(graph, origins);
    debug!(
        "{} of {} targets need update",
        staleness.stale_count(),
        graph.len()
    );
    Ok(staleness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::graph::dependency::DependencyGraphBuilder;
    use crate::graph::recipe::Recipe;
    use tempfile::TempDir;

    fn none() -> Vec<String> {
        Vec::new()
    }

    /// a.c -> a.o -> app <- b.o <- b.c
    fn diamond() -> DependencyGraph {
        let mut b = DependencyGraphBuilder::new();
        b.add_node("a.c", Recipe::source(), none()).unwrap();
        b.add_node("b.c", Recipe::source(), none()).unwrap();
        b.add_node("a.o", Recipe::exec("gcc", "gcc -c a.c"), ["a.c"]).unwrap();
        b.add_node("b.o", Recipe::exec("gcc", "gcc -c b.c"), ["b.c"]).unwrap();
        b.add_node("app", Recipe::exec("gcc", "gcc a.o b.o"), ["a.o", "b.o"]).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn propagation_reaches_all_dependents() {
        let g = diamond();
        let s = propagate(&g, [g.lookup("a.c").unwrap()]);
        assert_eq!(s.stale_paths(&g), vec!["a.c", "a.o", "app"]);
    }

    #[test]
    fn propagation_is_idempotent() {
        let g = diamond();
        let a = g.lookup("a.c").unwrap();
        let once = propagate(&g, [a]);
        let twice = propagate(&g, [a, a, g.lookup("a.o").unwrap()]);
        assert_eq!(once, twice);
    }

    #[test]
    fn no_origins_no_staleness() {
        let g = diamond();
        let s = propagate(&g, Vec::new());
        assert_eq!(s.stale_count(), 0);
    }

    async fn seed(cache: &Cache, root: &Path, path: &str, content: &[u8]) {
        std::fs::write(root.join(path), content).unwrap();
        cache
            .set(path, &CacheEntry::new(path, content.to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_cache_marks_everything() {
        let root = TempDir::new().unwrap();
        let cache = Cache::open(root.path().join(".cache")).await.unwrap();
        let g = diamond();
        std::fs::write(root.path().join("a.c"), b"a").unwrap();
        std::fs::write(root.path().join("b.c"), b"b").unwrap();

        let s = compute_staleness(&g, &cache, root.path()).await.unwrap();
        assert_eq!(s.stale_count(), 5);
    }

    #[tokio::test]
    async fn changed_source_marks_its_dependents_only() {
        let root = TempDir::new().unwrap();
        let cache = Cache::open(root.path().join(".cache")).await.unwrap();
        let g = diamond();

        seed(&cache, root.path(), "a.c", b"a").await;
        seed(&cache, root.path(), "b.c", b"b").await;
        for t in ["a.o", "b.o", "app"] {
            cache.set(t, &CacheEntry::new(t, b"bin".to_vec())).await.unwrap();
        }

        let s = compute_staleness(&g, &cache, root.path()).await.unwrap();
        assert_eq!(s.stale_count(), 0);

        std::fs::write(root.path().join("b.c"), b"b changed").unwrap();
        let s = compute_staleness(&g, &cache, root.path()).await.unwrap();
        assert_eq!(s.stale_paths(&g), vec!["b.c", "b.o", "app"]);
    }

    #[tokio::test]
    async fn missing_derived_artifact_is_stale() {
        let root = TempDir::new().unwrap();
        let cache = Cache::open(root.path().join(".cache")).await.unwrap();
        let g = diamond();

        seed(&cache, root.path(), "a.c", b"a").await;
        seed(&cache, root.path(), "b.c", b"b").await;
        for t in ["a.o", "app"] {
            cache.set(t, &CacheEntry::new(t, b"bin".to_vec())).await.unwrap();
        }

        let s = compute_staleness(&g, &cache, root.path()).await.unwrap();
        assert_eq!(s.stale_paths(&g), vec!["b.o", "app"]);
    }

    #[tokio::test]
    async fn unreadable_cached_source_is_error() {
        let root = TempDir::new().unwrap();
        let cache = Cache::open(root.path().join(".cache")).await.unwrap();
        let g = diamond();

        cache
            .set("a.c", &CacheEntry::new("a.c", b"a".to_vec()))
            .await
            .unwrap();

        let err = compute_staleness(&g, &cache, root.path()).await.unwrap_err();
        assert!(matches!(err, KilnError::SourceRead { ref target, .. } if target == "a.c"));
    }
}
