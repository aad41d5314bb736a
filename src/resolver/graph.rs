// src/resolver/graph.rs

//! Dependency graph data structures and algorithms
//!
//! Provides graph construction, topological sorting and cycle detection
//! over canonical package names. The graph is cheap to build and is rebuilt
//! from the package ledger on every reconciliation pass.

use std::collections::HashMap;
use thiserror::Error;

/// Errors from graph mutation and sorting
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node was added twice
    #[error("node {0} already exists")]
    DuplicateNode(String),

    /// Edge endpoint was never added as a node
    #[error("node {node} does not exist (edge {from} -> {to})")]
    UnknownNode { node: String, from: String, to: String },

    /// Traversal reached a node that is still on the stack
    #[error("detected cycle: {node}")]
    Cycle { node: String },
}

/// Visitation state for the depth-first sort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    OnStack,
    Finished,
}

/// Directed graph from package name to the names it depends on
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Outgoing edges per node
    edges: HashMap<String, Vec<String>>,
    /// Nodes in insertion order, so traversal is deterministic
    order: Vec<String>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package node to the graph
    pub fn add_node(&mut self, name: impl Into<String>) -> Result<(), GraphError> {
        let name = name.into();
        if self.edges.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        self.edges.insert(name.clone(), Vec::new());
        self.order.push(name);
        Ok(())
    }

    /// Add several nodes, stopping at the first duplicate
    pub fn add_nodes<I, S>(&mut self, names: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.add_node(name)?;
        }
        Ok(())
    }

    pub fn node_exists(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Add a dependency edge `from -> to`
    ///
    /// Both endpoints must already exist. On failure the graph is unchanged.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        for node in [from, to] {
            if !self.edges.contains_key(node) {
                return Err(GraphError::UnknownNode {
                    node: node.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        if let Some(deps) = self.edges.get_mut(from) {
            deps.push(to.to_string());
        }
        Ok(())
    }

    /// Add every edge `from -> dep` in order
    ///
    /// Stops at the first failure. Edges added before the failure stay in the
    /// graph; callers discard the whole graph on error.
    pub fn add_edges<S: AsRef<str>>(&mut self, from: &str, deps: &[S]) -> Result<(), GraphError> {
        for dep in deps {
            self.add_edge(from, dep.as_ref())?;
        }
        Ok(())
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.edges.get(name).map(Vec::as_slice)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Topological sort, dependencies before dependents
    ///
    /// Depth-first with an explicit stack and three colours. Reaching a node
    /// that is still on the stack fails immediately with that node's name.
    pub fn sort(&self) -> Result<Vec<String>, GraphError> {
        let mut colors: HashMap<&str, Color> = self
            .order
            .iter()
            .map(|n| (n.as_str(), Color::Unvisited))
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        for start in &self.order {
            if colors.get(start.as_str()) != Some(&Color::Unvisited) {
                continue;
            }

            // (node, index of the next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            colors.insert(start.as_str(), Color::OnStack);

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let deps = self.edges.get(node).map(Vec::as_slice).unwrap_or(&[]);

                if top.1 < deps.len() {
                    let dep = deps[top.1].as_str();
                    top.1 += 1;
                    match colors.get(dep).copied().unwrap_or(Color::Unvisited) {
                        Color::Unvisited => {
                            colors.insert(dep, Color::OnStack);
                            stack.push((dep, 0));
                        }
                        Color::OnStack => {
                            return Err(GraphError::Cycle { node: dep.to_string() });
                        }
                        Color::Finished => {}
                    }
                } else {
                    colors.insert(node, Color::Finished);
                    sorted.push(node.to_string());
                    stack.pop();
                }
            }
        }

        Ok(sorted)
    }
}
