// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 firmament contributors

//! Container link dependency graph
//!
//! Turns `HostConfig.Links` declarations into a startup order in which every
//! linked container is created before the containers linking to it.

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::errors::FirmamentError;
use crate::pipeline::ContainerSpec;

struct Node {
    name: String,
    dependencies: Vec<String>,
}

/// Dependency graph over container names, kept in insertion order
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    graph: DiGraph<String, ()>,
    graph_nodes: Vec<NodeIndex>,
}

/// One frame of the depth-first work stack
struct Frame {
    node: usize,
    next_dependency: usize,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            graph: DiGraph::new(),
            graph_nodes: Vec::new(),
        }
    }

    /// Build the graph of a cluster's links
    pub fn from_specs(specs: &[ContainerSpec]) -> Result<Self, FirmamentError> {
        let mut graph = Self::new();
        for spec in specs {
            graph.add_node(&spec.name, spec.dependencies())?;
        }
        Ok(graph)
    }

    /// Add a node with its dependency names. Dependencies may be added later.
    pub fn add_node(
        &mut self,
        name: &str,
        dependencies: Vec<String>,
    ) -> Result<(), FirmamentError> {
        if self.index.contains_key(name) {
            return Err(FirmamentError::DuplicateName {
                name: name.to_string(),
            });
        }

        let idx = self.nodes.len();
        self.index.insert(name.to_string(), idx);
        self.graph_nodes.push(self.graph.add_node(name.to_string()));

        // Edges point from dependency to dependent
        for dep in &dependencies {
            if let Some(&dep_idx) = self.index.get(dep) {
                self.graph
                    .update_edge(self.graph_nodes[dep_idx], self.graph_nodes[idx], ());
            }
        }
        for (other_idx, other) in self.nodes.iter().enumerate() {
            if other.dependencies.iter().any(|d| d == name) {
                self.graph
                    .update_edge(self.graph_nodes[idx], self.graph_nodes[other_idx], ());
            }
        }

        self.nodes.push(Node {
            name: name.to_string(),
            dependencies,
        });

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve the startup order.
    ///
    /// Roots are visited in insertion order and dependencies in declaration
    /// order; each node is emitted after all of its dependencies. The
    /// ancestor chain is the work stack itself, so a dependency found on the
    /// stack is a cycle. Any failure aborts the whole resolution.
    pub fn resolve(&self) -> Result<Vec<String>, FirmamentError> {
        let mut sorted = Vec::with_capacity(self.nodes.len());
        let mut visited = vec![false; self.nodes.len()];

        for root in 0..self.nodes.len() {
            if visited[root] {
                continue;
            }

            visited[root] = true;
            let mut stack = vec![Frame {
                node: root,
                next_dependency: 0,
            }];

            while let Some(frame) = stack.last_mut() {
                let node = &self.nodes[frame.node];

                let Some(dep) = node.dependencies.get(frame.next_dependency) else {
                    sorted.push(node.name.clone());
                    stack.pop();
                    continue;
                };
                frame.next_dependency += 1;

                let dep_idx = *self.index.get(dep).ok_or_else(|| {
                    FirmamentError::UnresolvedDependency {
                        container: node.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;

                if stack.iter().any(|f| f.node == dep_idx) {
                    let mut path: Vec<String> = stack
                        .iter()
                        .map(|f| self.nodes[f.node].name.clone())
                        .collect();
                    path.push(dep.clone());

                    return Err(FirmamentError::CircularDependency {
                        dependency: dep.clone(),
                        dependent: node.name.clone(),
                        path,
                    });
                }

                if !visited[dep_idx] {
                    visited[dep_idx] = true;
                    stack.push(Frame {
                        node: dep_idx,
                        next_dependency: 0,
                    });
                }
            }
        }

        Ok(sorted)
    }

    /// Direct dependencies of a container, as declared
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        let idx = self.index.get(name)?;
        Some(&self.nodes[*idx].dependencies)
    }

    /// Containers linking directly to `name`
    pub fn dependents(&self, name: &str) -> Option<Vec<String>> {
        let idx = self.index.get(name)?;
        let mut dependents: Vec<String> = self
            .graph
            .neighbors_directed(self.graph_nodes[*idx], petgraph::Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect();
        dependents.sort_by_key(|d| self.index[d]);
        Some(dependents)
    }

    /// Check if `a` depends (directly or transitively) on `b`
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(a), self.index.get(b)) else {
            return false;
        };

        petgraph::algo::has_path_connecting(
            &self.graph,
            self.graph_nodes[b],
            self.graph_nodes[a],
            None,
        )
    }

    /// Generate Mermaid diagram of the graph
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for node in &self.nodes {
            out.push_str(&format!("    {}[{}]\n", node.name, node.name));
        }

        for node in &self.nodes {
            for dep in &node.dependencies {
                out.push_str(&format!("    {} --> {}\n", dep, node.name));
            }
        }

        out
    }

    /// Generate DOT diagram of the graph
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph cluster {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for node in &self.nodes {
            let isolated = node.dependencies.is_empty()
                && self.dependents(&node.name).unwrap_or_default().is_empty();
            if isolated {
                out.push_str(&format!("    \"{}\";\n", node.name));
            }
            for dep in &node.dependencies {
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", dep, node.name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of the startup order
    pub fn to_text(&self) -> Result<String, FirmamentError> {
        let order = self.resolve()?;
        let mut out = String::new();

        for (i, name) in order.iter().enumerate() {
            out.push_str(&format!("{}. {}", i + 1, name));

            let deps = self.dependencies(name).unwrap_or_default();
            if !deps.is_empty() {
                out.push_str(&format!(" [links: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_graph(nodes: Vec<(&str, Vec<&str>)>) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (name, deps) in nodes {
            graph
                .add_node(name, deps.into_iter().map(String::from).collect())
                .unwrap();
        }
        graph
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_web_after_db() {
        let mut web = ContainerSpec::new("web", "web");
        web.host_config.links = vec!["db:db".into()];
        let db = ContainerSpec::new("db", "mysql");

        let graph = DependencyGraph::from_specs(&[web, db]).unwrap();
        assert_eq!(graph.resolve().unwrap(), vec!["db", "web"]);
    }

    #[test]
    fn test_linear_chain() {
        let graph = make_graph(vec![("c", vec!["b"]), ("b", vec!["a"]), ("a", vec![])]);
        assert_eq!(graph.resolve().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_independent_nodes_keep_insertion_order() {
        let graph = make_graph(vec![("x", vec![]), ("m", vec![]), ("a", vec![])]);
        assert_eq!(graph.resolve().unwrap(), vec!["x", "m", "a"]);
    }

    #[test]
    fn test_diamond() {
        let graph = make_graph(vec![
            ("d", vec!["b", "c"]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("a", vec![]),
        ]);

        let order = graph.resolve().unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_every_dependency_precedes_dependent() {
        let graph = make_graph(vec![
            ("lb", vec!["web1", "web2"]),
            ("web1", vec!["db", "cache"]),
            ("web2", vec!["db", "cache", "queue"]),
            ("worker", vec!["queue", "db"]),
            ("queue", vec![]),
            ("cache", vec![]),
            ("db", vec![]),
        ]);

        let order = graph.resolve().unwrap();
        assert_eq!(order.len(), 7);

        let mut unique = order.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 7);

        for name in &order {
            for dep in graph.dependencies(name).unwrap() {
                assert!(position(&order, dep) < position(&order, name), "{dep} before {name}");
            }
        }
    }

    #[test]
    fn test_repeated_link_is_harmless() {
        let graph = make_graph(vec![("web", vec!["db", "db"]), ("db", vec![])]);
        assert_eq!(graph.resolve().unwrap(), vec!["db", "web"]);
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = make_graph(vec![("a", vec!["b"]), ("b", vec!["a"])]);

        match graph.resolve() {
            Err(FirmamentError::CircularDependency {
                dependency,
                dependent,
                path,
            }) => {
                assert_eq!(dependency, "a");
                assert_eq!(dependent, "b");
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("expected circular dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_self_link_is_cycle() {
        let graph = make_graph(vec![("a", vec!["a"])]);
        assert!(matches!(
            graph.resolve(),
            Err(FirmamentError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_cycle_behind_acyclic_prefix() {
        let graph = make_graph(vec![
            ("ok", vec![]),
            ("x", vec!["y"]),
            ("y", vec!["z"]),
            ("z", vec!["x"]),
        ]);

        match graph.resolve() {
            Err(FirmamentError::CircularDependency { path, .. }) => {
                assert_eq!(path, vec!["x", "y", "z", "x"]);
            }
            other => panic!("expected circular dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_dependency() {
        let graph = make_graph(vec![("web", vec!["nonexistent"])]);

        match graph.resolve() {
            Err(FirmamentError::UnresolvedDependency {
                container,
                dependency,
            }) => {
                assert_eq!(container, "web");
                assert_eq!(dependency, "nonexistent");
            }
            other => panic!("expected unresolved dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_name() {
        let a = ContainerSpec::new("a", "x");
        let b = ContainerSpec::new("a", "y");

        assert!(matches!(
            DependencyGraph::from_specs(&[a, b]),
            Err(FirmamentError::DuplicateName { name }) if name == "a"
        ));
    }

    #[test]
    fn test_dependents_and_transitive_depends_on() {
        let graph = make_graph(vec![("c", vec!["b"]), ("b", vec!["a"]), ("a", vec![])]);

        assert_eq!(graph.dependents("a").unwrap(), vec!["b"]);
        assert_eq!(graph.dependents("c").unwrap(), Vec::<String>::new());
        assert!(graph.depends_on("c", "a"));
        assert!(graph.depends_on("b", "a"));
        assert!(!graph.depends_on("a", "c"));
        assert!(!graph.depends_on("a", "missing"));
    }

    #[test]
    fn test_renderings() {
        let graph = make_graph(vec![("web", vec!["db"]), ("db", vec![]), ("solo", vec![])]);

        assert!(graph.to_mermaid().contains("db --> web"));

        let dot = graph.to_dot();
        assert!(dot.contains("\"db\" -> \"web\";"));
        assert!(dot.contains("\"solo\";"));

        let text = graph.to_text().unwrap();
        assert_eq!(text, "1. db\n2. web [links: db]\n3. solo\n");
    }

    #[test]
    fn test_dot_snapshot() {
        let graph = make_graph(vec![
            ("web", vec!["db", "cache"]),
            ("db", vec![]),
            ("cache", vec![]),
        ]);

        insta::assert_snapshot!(graph.to_dot(), @r###"
        digraph cluster {
            rankdir=TB;
            node [shape=box, style=rounded];

            "db" -> "web";
            "cache" -> "web";
        }
        "###);
    }
}
