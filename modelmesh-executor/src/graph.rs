//! Dependency graph staging.
//!
//! Nodes are operation ids; edges are "must-complete-before" relationships.
//! `execution_order` runs a Kahn-style staged topological sort: each stage
//! is the maximal set of not-yet-visited nodes whose dependencies are all
//! already visited, so everything in one stage can run in parallel.
//!
//! Cycle handling is a hard error (see DESIGN.md): a cycle makes
//! `execution_order` return `GraphError::CycleDetected` rather than
//! silently dropping the unreachable remainder into a final stage.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency graph contains a cycle among: {0:?}")]
    CycleDetected(Vec<String>),
    #[error("unknown node referenced: {0}")]
    UnknownNode(String),
}

#[derive(Debug, Default)]
pub struct DependencyGraph<T> {
    nodes: HashMap<String, T>,
    /// id -> set of ids that must complete before it.
    depends_on: HashMap<String, HashSet<String>>,
}

impl<T> DependencyGraph<T> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            depends_on: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, id: impl Into<String>, data: T) {
        let id = id.into();
        self.depends_on.entry(id.clone()).or_default();
        self.nodes.insert(id, data);
    }

    pub fn add_dependency(
        &mut self,
        id: &str,
        depends_on_id: &str,
    ) -> Result<(), GraphError> {
        if !self.nodes.contains_key(id) {
            return Err(GraphError::UnknownNode(id.to_string()));
        }
        if !self.nodes.contains_key(depends_on_id) {
            return Err(GraphError::UnknownNode(depends_on_id.to_string()));
        }
        self.depends_on
            .get_mut(id)
            .unwrap()
            .insert(depends_on_id.to_string());
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&T> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_cycles(&self) -> bool {
        self.execution_order().is_err()
    }

    /// Partition node ids into parallel-safe stages such that every edge
    /// `(u depends_on v)` has `stage(v) < stage(u)`. Every node appears in
    /// exactly one stage and the union of stages equals the node set, as
    /// long as the graph is acyclic.
    pub fn execution_order(&self) -> Result<Vec<HashSet<String>>, GraphError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut stages = Vec::new();
        let mut remaining: HashSet<String> = self.nodes.keys().cloned().collect();

        while !remaining.is_empty() {
            let stage: HashSet<String> = remaining
                .iter()
                .filter(|id| {
                    self.depends_on[id.as_str()]
                        .iter()
                        .all(|dep| visited.contains(dep))
                })
                .cloned()
                .collect();

            if stage.is_empty() {
                let mut cyclic: Vec<String> = remaining.into_iter().collect();
                cyclic.sort();
                return Err(GraphError::CycleDetected(cyclic));
            }

            for id in &stage {
                remaining.remove(id);
                visited.insert(id.clone());
            }
            stages.push(stage);
        }

        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain_produces_one_stage_each() {
        let mut g: DependencyGraph<()> = DependencyGraph::new();
        g.add_node("a", ());
        g.add_node("b", ());
        g.add_node("c", ());
        g.add_dependency("b", "a").unwrap();
        g.add_dependency("c", "b").unwrap();

        let stages = g.execution_order().unwrap();
        assert_eq!(stages.len(), 3);
        assert!(stages[0].contains("a"));
        assert!(stages[1].contains("b"));
        assert!(stages[2].contains("c"));
    }

    #[test]
    fn independent_nodes_share_a_stage() {
        let mut g: DependencyGraph<()> = DependencyGraph::new();
        g.add_node("a", ());
        g.add_node("b", ());
        g.add_node("c", ());
        g.add_dependency("c", "a").unwrap();

        let stages = g.execution_order().unwrap();
        // a and b have no unmet dependencies -> same first stage.
        assert_eq!(stages[0], HashSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(stages[1], HashSet::from(["c".to_string()]));
    }

    #[test]
    fn cycle_is_a_hard_error() {
        let mut g: DependencyGraph<()> = DependencyGraph::new();
        g.add_node("a", ());
        g.add_node("b", ());
        g.add_dependency("a", "b").unwrap();
        g.add_dependency("b", "a").unwrap();

        assert!(g.has_cycles());
        let err = g.execution_order().unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected(_)));
    }

    #[test]
    fn stages_partition_every_node_exactly_once() {
        let mut g: DependencyGraph<()> = DependencyGraph::new();
        for id in ["a", "b", "c", "d", "e"] {
            g.add_node(id, ());
        }
        g.add_dependency("c", "a").unwrap();
        g.add_dependency("c", "b").unwrap();
        g.add_dependency("d", "c").unwrap();
        g.add_dependency("e", "a").unwrap();

        let stages = g.execution_order().unwrap();
        let mut seen: HashSet<String> = HashSet::new();
        for stage in &stages {
            for id in stage {
                assert!(seen.insert(id.clone()), "node {id} appeared twice");
            }
        }
        assert_eq!(seen.len(), 5);
    }
}
