//! Dependency graph over resource declarations.
//!
//! Every edge is explicit: a resource depends on whatever its properties
//! reference plus its declared `depends_on`. The graph is validated when it
//! is built and yields a deterministic apply order: Kahn's algorithm that
//! always emits the earliest-declared resource among those ready.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::error::GraphError;
use crate::resource::{LogicalId, Resource};

/// A validated DAG with a computed apply order.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    /// Declaration order.
    nodes: Vec<LogicalId>,
    /// resource -> resources it depends on
    adjacency: HashMap<LogicalId, Vec<LogicalId>>,
    /// resource -> resources that depend on it
    reverse_adjacency: HashMap<LogicalId, Vec<LogicalId>>,
    apply_order: Vec<LogicalId>,
}

impl ResourceGraph {
    /// Build the graph for a set of declared resources.
    ///
    /// # Errors
    /// - `GraphError::DuplicateResource` if a logical id is declared twice
    /// - `GraphError::SelfReference` if a resource references itself
    /// - `GraphError::UnknownReference` if a resource references an undeclared id
    /// - `GraphError::Cycle` if the references form a cycle
    pub fn build(resources: &[Resource]) -> Result<Self, GraphError> {
        Self::from_edges(
            resources
                .iter()
                .map(|r| (r.logical_id.clone(), r.dependencies())),
        )
    }

    /// Build the graph from `(node, dependencies)` pairs in declaration order.
    pub fn from_edges(
        edges: impl IntoIterator<Item = (LogicalId, Vec<LogicalId>)>,
    ) -> Result<Self, GraphError> {
        let edges: Vec<(LogicalId, Vec<LogicalId>)> = edges.into_iter().collect();

        let mut nodes = Vec::with_capacity(edges.len());
        let mut seen = HashSet::new();
        for (id, _) in &edges {
            if !seen.insert(id.clone()) {
                return Err(GraphError::DuplicateResource(id.clone()));
            }
            nodes.push(id.clone());
        }

        let mut adjacency: HashMap<LogicalId, Vec<LogicalId>> = HashMap::new();
        let mut reverse_adjacency: HashMap<LogicalId, Vec<LogicalId>> =
            nodes.iter().map(|id| (id.clone(), Vec::new())).collect();

        for (id, deps) in edges {
            let mut unique = Vec::with_capacity(deps.len());
            for dep in deps {
                if dep == id {
                    return Err(GraphError::SelfReference(id));
                }
                if !seen.contains(&dep) {
                    return Err(GraphError::UnknownReference {
                        resource: id,
                        missing: dep,
                    });
                }
                if !unique.contains(&dep) {
                    unique.push(dep);
                }
            }
            for dep in &unique {
                if let Some(dependents) = reverse_adjacency.get_mut(dep) {
                    dependents.push(id.clone());
                }
            }
            adjacency.insert(id, unique);
        }

        // Keep dependents in declaration order so the sort is stable.
        let position: HashMap<&LogicalId, usize> =
            nodes.iter().enumerate().map(|(i, id)| (id, i)).collect();
        for dependents in reverse_adjacency.values_mut() {
            dependents.sort_by_key(|id| position[id]);
        }

        let mut graph = Self {
            nodes,
            adjacency,
            reverse_adjacency,
            apply_order: Vec::new(),
        };

        if let Some(cycle) = graph.detect_cycle() {
            return Err(GraphError::Cycle(cycle));
        }
        graph.apply_order = graph.topological_sort()?;

        Ok(graph)
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// Returns the cycle path (first node repeated at the end) if found.
    fn detect_cycle(&self) -> Option<Vec<LogicalId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit<'a>(
            graph: &'a ResourceGraph,
            node: &'a LogicalId,
            color: &mut HashMap<&'a LogicalId, Color>,
            stack: &mut Vec<&'a LogicalId>,
        ) -> Option<Vec<LogicalId>> {
            color.insert(node, Color::Gray);
            stack.push(node);

            for dep in graph.dependencies(node) {
                match color.get(dep).copied().unwrap_or(Color::White) {
                    Color::White => {
                        if let Some(cycle) = visit(graph, dep, color, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<LogicalId> =
                            stack[start..].iter().map(|n| (*n).clone()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            }

            stack.pop();
            color.insert(node, Color::Black);
            None
        }

        let mut color: HashMap<&LogicalId, Color> = HashMap::new();
        let mut stack = Vec::new();
        for node in &self.nodes {
            if color.get(node).copied().unwrap_or(Color::White) == Color::White {
                if let Some(cycle) = visit(self, node, &mut color, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn topological_sort(&self) -> Result<Vec<LogicalId>, GraphError> {
        let position: HashMap<&LogicalId, usize> =
            self.nodes.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut in_degree: HashMap<&LogicalId, usize> = HashMap::new();
        // Min-heap on declaration position.
        let mut ready: BinaryHeap<Reverse<usize>> = BinaryHeap::new();
        let mut result = Vec::with_capacity(self.nodes.len());

        for (i, node) in self.nodes.iter().enumerate() {
            let degree = self.dependencies(node).len();
            in_degree.insert(node, degree);
            if degree == 0 {
                ready.push(Reverse(i));
            }
        }

        while let Some(Reverse(i)) = ready.pop() {
            let node = &self.nodes[i];
            result.push(node.clone());
            for dependent in self.dependents(node) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(position[dependent]));
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            // detect_cycle runs first, so this only trips on a bug.
            let stuck = self
                .nodes
                .iter()
                .filter(|n| !result.contains(*n))
                .cloned()
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(result)
    }

    /// Creation order: every resource after everything it depends on.
    pub fn apply_order(&self) -> &[LogicalId] {
        &self.apply_order
    }

    /// Teardown order: the apply order reversed.
    pub fn destroy_order(&self) -> Vec<LogicalId> {
        self.apply_order.iter().rev().cloned().collect()
    }

    /// Index of `id` in the apply order.
    pub fn position(&self, id: &LogicalId) -> Option<usize> {
        self.apply_order.iter().position(|n| n == id)
    }

    /// Direct dependencies of `id`.
    pub fn dependencies(&self, id: &LogicalId) -> &[LogicalId] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resources that directly depend on `id`.
    pub fn dependents(&self, id: &LogicalId) -> &[LogicalId] {
        self.reverse_adjacency
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `a` depends on `b`, directly or transitively.
    pub fn depends_on(&self, a: &LogicalId, b: &LogicalId) -> bool {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&LogicalId> = self.dependencies(a).iter().collect();
        while let Some(node) = queue.pop_front() {
            if node == b {
                return true;
            }
            if visited.insert(node) {
                queue.extend(self.dependencies(node));
            }
        }
        false
    }

    pub fn contains(&self, id: &LogicalId) -> bool {
        self.adjacency.contains_key(id)
    }
}
