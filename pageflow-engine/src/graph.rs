//! Dependency DAG over a page's data sources.

use crate::error::CycleError;
use pageflow_model::DataSource;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{BTreeSet, HashMap};

/// Topologically ordered view of the data sources of one page.
///
/// Edges point from a dependency to its dependents. Dependencies on ids
/// that are not declared are ignored here; schema validation reports them.
#[derive(Debug, Clone)]
pub struct SourceGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    order: Vec<String>,
    position: HashMap<String, usize>,
}

impl SourceGraph {
    /// Builds the graph, rejecting any dependency cycle.
    pub fn build(sources: &[DataSource]) -> Result<Self, CycleError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for source in sources {
            index
                .entry(source.id.clone())
                .or_insert_with(|| graph.add_node(source.id.clone()));
        }
        for source in sources {
            let to = index[&source.id];
            for dep in &source.dependencies {
                if let Some(&from) = index.get(dep) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        let sorted = toposort(&graph, None).map_err(|_| cycle_error(&graph))?;
        let order: Vec<String> = sorted.into_iter().map(|ix| graph[ix].clone()).collect();
        let position = order.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        Ok(Self {
            graph,
            index,
            order,
            position,
        })
    }

    /// Every source id, dependencies before dependents.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Direct dependencies of `id` that are declared on the page.
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.neighbors(id, petgraph::Direction::Incoming)
    }

    /// Direct dependents of `id`.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.neighbors(id, petgraph::Direction::Outgoing)
    }

    /// All transitive dependents of `id`, in topological order, excluding `id`.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut reached = Vec::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(ix) = dfs.next(&self.graph) {
            if ix != start {
                reached.push(self.graph[ix].clone());
            }
        }
        reached.sort_by_key(|id| self.position.get(id).copied().unwrap_or(usize::MAX));
        reached
    }

    fn neighbors(&self, id: &str, direction: petgraph::Direction) -> Vec<String> {
        let Some(&ix) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<String> = self
            .graph
            .neighbors_directed(ix, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort_by_key(|id| self.position.get(id).copied().unwrap_or(usize::MAX));
        out
    }
}

/// Names every node on a cycle: members of non-trivial strongly connected
/// components plus self-dependent nodes.
fn cycle_error(graph: &DiGraph<String, ()>) -> CycleError {
    let mut ids = BTreeSet::new();
    for component in tarjan_scc(graph) {
        let on_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&ix| graph.contains_edge(ix, ix));
        if on_cycle {
            ids.extend(component.into_iter().map(|ix| graph[ix].clone()));
        }
    }
    CycleError {
        ids: ids.into_iter().collect(),
    }
}
