//! core::graph
//!
//! Dependency graph over named nodes.
//!
//! # Architecture
//!
//! The dependency graph is a DAG where:
//! - Nodes are dimension element names
//! - Edges point from an element to each element it depends on
//! - Dependencies are visited in the order they were declared
//!
//! # Invariants
//!
//! - Graph must be acyclic; traversal reports the first cycle found
//! - Every edge target must be a known node
//! - Orders are deterministic: declaration order breaks all ties

use std::collections::HashMap;

use thiserror::Error;

/// Errors from graph traversal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A traversal reached a node that is still on the DFS stack.
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A node or edge target that was never declared.
    #[error("unknown node: {0}")]
    UnknownNode(String),
}

/// DFS visitation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not yet reached.
    White,
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

/// A directed graph from each node to the nodes it depends on.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Nodes in declaration order.
    nodes: Vec<String>,
    /// Dependencies per node, in declaration order.
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its dependencies.
    ///
    /// Re-adding a node appends to its dependency list.
    pub fn add_node(&mut self, node: impl Into<String>, dependencies: impl IntoIterator<Item = String>) {
        let node = node.into();
        if !self.edges.contains_key(&node) {
            self.nodes.push(node.clone());
        }
        self.edges.entry(node).or_default().extend(dependencies);
    }

    /// Get the direct dependencies of a node.
    pub fn dependencies(&self, node: &str) -> Option<&[String]> {
        self.edges.get(node).map(Vec::as_slice)
    }

    /// Get all nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Check whether the graph contains a node.
    pub fn contains(&self, node: &str) -> bool {
        self.edges.contains_key(node)
    }

    /// Find a cycle anywhere in the graph.
    ///
    /// Returns the cycle path (first node repeated at the end) if one exists.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        match self.closure(self.nodes.iter().map(String::as_str)) {
            Err(GraphError::CycleDetected(path)) => Some(path),
            _ => None,
        }
    }

    /// Compute the dependency closure of `roots` in topological order.
    ///
    /// Dependencies always precede their dependents. Traversal is a
    /// three-color DFS; reaching a gray node is a cycle. Nothing is returned
    /// unless the whole traversal succeeds.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownNode`] if a root or edge target is not declared
    /// - [`GraphError::CycleDetected`] with the offending path
    ///
    /// # Example
    ///
    /// ```
    /// use dimcat::core::graph::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_node("instrument", vec![]);
    /// graph.add_node("visit", vec!["instrument".to_string()]);
    /// graph.add_node("exposure", vec!["instrument".to_string(), "visit".to_string()]);
    ///
    /// let order = graph.closure(["exposure"]).unwrap();
    /// assert_eq!(order, vec!["instrument", "visit", "exposure"]);
    /// ```
    pub fn closure<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<String>, GraphError> {
        let mut colors: HashMap<&str, Color> = HashMap::new();
        let mut order = Vec::new();
        let mut path = Vec::new();

        for root in roots {
            if !self.contains(root) {
                return Err(GraphError::UnknownNode(root.to_string()));
            }
            self.visit(root, &mut colors, &mut path, &mut order)?;
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        match colors.get(node).copied().unwrap_or(Color::White) {
            Color::Black => return Ok(()),
            Color::Gray => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(node.to_string());
                return Err(GraphError::CycleDetected(cycle));
            }
            Color::White => {}
        }

        let dependencies = self
            .edges
            .get(node)
            .ok_or_else(|| GraphError::UnknownNode(node.to_string()))?;

        colors.insert(node, Color::Gray);
        path.push(node);
        for dependency in dependencies {
            if !self.contains(dependency) {
                return Err(GraphError::UnknownNode(dependency.clone()));
            }
            self.visit(dependency, colors, path, order)?;
        }
        path.pop();
        colors.insert(node, Color::Black);
        order.push(node.to_string());
        Ok(())
    }
}
