//! Build ordering
//!
//! [`build_order`] flattens a build graph into a dependency-respecting
//! sequence. [`BuildPlan`] keeps the same nodes as a partial order so an
//! executor can run independent steps side by side.
//!
//! The flat order is deterministic: a depth-first walk from the requested
//! target visiting dependencies in declaration order. Among independent
//! siblings no other tie-break is applied. [`ReadyTracker`] always hands
//! out the earliest ready step of that order, so running one step at a
//! time reproduces the flat order exactly.

use crate::graph::build::{BuildGraph, BuildNodeId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Topological order of every node that must be built
///
/// `from_cache` nodes are skipped; each remaining node appears once and
/// after all of its dependencies.
pub fn build_order(graph: &BuildGraph) -> Vec<BuildNodeId> {
    let mut order = Vec::new();
    let mut visited = vec![false; graph.len()];
    let mut stack: Vec<(BuildNodeId, usize)> = Vec::new();

    for start in std::iter::once(graph.root()).chain(graph.ids()) {
        if visited[start.index()] || graph.node(start).from_cache() {
            continue;
        }
        visited[start.index()] = true;
        stack.push((start, 0));

        while let Some(frame) = stack.last_mut() {
            let deps = graph.node(frame.0).dependencies();
            if frame.1 < deps.len() {
                let dep = deps[frame.1];
                frame.1 += 1;
                if !visited[dep.index()] && !graph.node(dep).from_cache() {
                    visited[dep.index()] = true;
                    stack.push((dep, 0));
                }
            } else {
                order.push(frame.0);
                stack.pop();
            }
        }
    }

    order
}

/// One scheduled build step
#[derive(Debug, Clone)]
pub struct PlanStep {
    /// Node to build
    pub node: BuildNodeId,
    /// Steps (by position) that must finish first
    pub waits_on: Vec<usize>,
    /// Steps (by position) waiting on this one
    pub unblocks: Vec<usize>,
}

/// Partial order over the nodes of a build graph that need building
#[derive(Debug, Clone)]
pub struct BuildPlan {
    steps: Vec<PlanStep>,
}

impl BuildPlan {
    /// Plan the non-cached nodes of `graph`
    pub fn new(graph: &BuildGraph) -> Self {
        let order = build_order(graph);
        let position: HashMap<BuildNodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut steps: Vec<PlanStep> = order
            .iter()
            .map(|id| PlanStep {
                node: *id,
                waits_on: Vec::new(),
                unblocks: Vec::new(),
            })
            .collect();

        for (i, id) in order.iter().enumerate() {
            for dep in graph.node(*id).dependencies() {
                if let Some(&j) = position.get(dep) {
                    steps[i].waits_on.push(j);
                    steps[j].unblocks.push(i);
                }
            }
        }

        Self { steps }
    }

    /// Steps in flat topological order
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Node ids in flat topological order
    pub fn order(&self) -> Vec<BuildNodeId> {
        self.steps.iter().map(|s| s.node).collect()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether nothing needs building
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Fresh readiness tracker for executing this plan
    pub fn tracker(&self) -> ReadyTracker {
        let pending: Vec<usize> = self.steps.iter().map(|s| s.waits_on.len()).collect();
        let ready = pending
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        ReadyTracker {
            pending,
            ready,
            completed: 0,
        }
    }
}

/// Tracks which plan steps may start
#[derive(Debug, Clone)]
pub struct ReadyTracker {
    pending: Vec<usize>,
    ready: BinaryHeap<Reverse<usize>>,
    completed: usize,
}

impl ReadyTracker {
    /// Take the next step whose dependencies are all done
    pub fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop().map(|Reverse(step)| step)
    }

    /// Record `step` as done, releasing steps that waited only on it
    pub fn complete(&mut self, plan: &BuildPlan, step: usize) {
        self.completed += 1;
        for &next in &plan.steps[step].unblocks {
            self.pending[next] -= 1;
            if self.pending[next] == 0 {
                self.ready.push(Reverse(next));
            }
        }
    }

    /// Number of completed steps
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Whether every step has completed
    pub fn is_finished(&self) -> bool {
        self.completed == self.pending.len()
    }
}
