//! Graphviz rendering for diagnostics

use crate::graph::build::BuildGraph;
use crate::graph::dependency::DependencyGraph;
use crate::graph::staleness::Staleness;
use std::fmt::Write;

/// Render the dependency graph; sources are blue, stale targets red
pub fn dependency_graph_dot(graph: &DependencyGraph, staleness: &Staleness) -> String {
    let mut out = String::from("digraph G {\n");

    for id in graph.ids() {
        let node = graph.node(id);
        let color = if node.recipe().is_source() {
            "blue"
        } else if staleness.is_stale(id) {
            "red"
        } else {
            "black"
        };

        let _ = writeln!(
            out,
            "  {:?} [label={:?} color={:?}];",
            node.path(),
            node.path(),
            color
        );
        for dep in node.dependencies() {
            let _ = writeln!(out, "  {:?} -> {:?};", node.path(), graph.node(*dep).path());
        }
    }

    out.push_str("}\n");
    out
}

/// Render a build graph; cached nodes are blue
pub fn build_graph_dot(graph: &BuildGraph) -> String {
    let mut out = String::from("digraph G {\n");

    for id in graph.ids() {
        let node = graph.node(id);
        let color = if node.from_cache() { "blue" } else { "black" };

        let _ = writeln!(
            out,
            "  {:?} [label={:?} color={:?}];",
            node.path(),
            node.path(),
            color
        );
        for dep in node.dependencies() {
            let _ = writeln!(out, "  {:?} -> {:?};", node.path(), graph.node(*dep).path());
        }
    }

    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::dependency::DependencyGraphBuilder;
    use crate::graph::recipe::Recipe;
    use crate::graph::staleness::propagate;

    #[test]
    fn renders_colors_and_edges() {
        let mut b = DependencyGraphBuilder::new();
        b.add_node("main.c", Recipe::source(), Vec::<String>::new()).unwrap();
        b.add_node("main.o", Recipe::exec("gcc", "gcc -c main.c"), ["main.c"]).unwrap();
        let g = b.build().unwrap();
        let s = propagate(&g, g.sources().to_vec());

        let dot = dependency_graph_dot(&g, &s);
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("\"main.c\" [label=\"main.c\" color=\"blue\"];"));
        assert!(dot.contains("\"main.o\" [label=\"main.o\" color=\"red\"];"));
        assert!(dot.contains("\"main.o\" -> \"main.c\";"));

        let bg = BuildGraph::for_target(&g, &s, "main.o").unwrap();
        let dot = build_graph_dot(&bg);
        assert!(dot.contains("\"main.o\" [label=\"main.o\" color=\"black\"];"));
    }
}
