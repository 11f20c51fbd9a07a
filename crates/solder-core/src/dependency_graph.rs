//! File ordering so that base definitions are merged before their dependents

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::{self, node_type};
use crate::error::{CoreError, Result};
use crate::loader::LoadedSources;

/// How the merge orders source files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStrategy {
    /// Stable ascending sort by the root contract's direct dependency count
    #[default]
    DependencyCount,
    /// Dependencies first, ties broken by dependency count then load order
    Topological,
}

/// A source file in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub path: String,
    pub dependency_count: usize,
    /// Load order, used as the last tie breaker
    pub position: usize,
}

/// Dependency graph over source files. An edge `a -> b` means `a` depends on `b`.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<FileNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a set of loaded sources.
    ///
    /// Each contract's `contractDependencies` is resolved inside the file's own
    /// compilation group, so ids never cross compilation boundaries here.
    pub fn from_sources(loaded: &LoadedSources) -> Self {
        let mut graph = Self::new();
        for unit in &loaded.main_units {
            graph.add_file(unit.absolute_path(), unit.dependency_count());
        }

        for unit in &loaded.main_units {
            let path = unit.absolute_path();
            let Some(group) = loaded.group(path) else {
                continue;
            };
            for contract in ast::find_all(unit.tree(), node_type::CONTRACT_DEFINITION) {
                for dependency in ast::id_list(contract.node, "contractDependencies") {
                    if let Some((owner, _)) = group.contract_by_id(dependency) {
                        graph.add_dependency(path, owner.absolute_path());
                    }
                }
            }
        }
        graph
    }

    /// Add a file node; adding a known path returns the existing node
    pub fn add_file(&mut self, path: &str, dependency_count: usize) -> NodeIndex {
        if let Some(&idx) = self.index.get(path) {
            return idx;
        }
        let idx = self.graph.add_node(FileNode {
            path: path.to_string(),
            dependency_count,
            position: self.graph.node_count(),
        });
        self.index.insert(path.to_string(), idx);
        idx
    }

    /// Record that `from` depends on `to`. Self edges and unknown files are ignored.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        match (self.index.get(from), self.index.get(to)) {
            (Some(&from_idx), Some(&to_idx)) => {
                self.graph.update_edge(from_idx, to_idx, ());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Direct dependencies of a file, in no particular order
    pub fn dependencies_of(&self, path: &str) -> Vec<&str> {
        self.index
            .get(path)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .map(|dep| self.graph[dep].path.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn order(&self, strategy: OrderStrategy) -> Result<Vec<String>> {
        match strategy {
            OrderStrategy::DependencyCount => Ok(self.order_by_dependency_count()),
            OrderStrategy::Topological => self.topological_order(),
        }
    }

    /// Files with fewer direct dependencies first, load order among ties
    pub fn order_by_dependency_count(&self) -> Vec<String> {
        let mut nodes: Vec<&FileNode> = self.graph.node_weights().collect();
        nodes.sort_by_key(|node| (node.dependency_count, node.position));
        nodes.into_iter().map(|node| node.path.clone()).collect()
    }

    /// Kahn's algorithm with a priority queue: a file is emitted only once
    /// every file it depends on has been emitted.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                let deps = self
                    .graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .count();
                (idx, deps)
            })
            .collect();

        let mut ready = BinaryHeap::new();
        for (&idx, &deps) in &remaining {
            if deps == 0 {
                ready.push(self.priority(idx));
            }
        }

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, _, idx))) = ready.pop() {
            order.push(self.graph[idx].path.clone());

            for dependent in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if let Some(deps) = remaining.get_mut(&dependent) {
                    *deps = deps.saturating_sub(1);
                    if *deps == 0 {
                        ready.push(self.priority(dependent));
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let cycle = self.find_cycle();
            return Err(CoreError::CircularDependency(cycle.join(" -> ")));
        }

        debug!("Topological file order: {:?}", order);
        Ok(order)
    }

    fn priority(&self, idx: NodeIndex) -> Reverse<(usize, usize, NodeIndex)> {
        let node = &self.graph[idx];
        Reverse((node.dependency_count, node.position, idx))
    }

    /// Files of one dependency cycle, in load order
    fn find_cycle(&self) -> Vec<String> {
        tarjan_scc(&self.graph)
            .into_iter()
            .find(|component| component.len() > 1)
            .map(|mut component| {
                component.sort_by_key(|&idx| self.graph[idx].position);
                component
                    .into_iter()
                    .map(|idx| self.graph[idx].path.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
