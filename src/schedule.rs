//! Round computation: a layered topological sort over transformer and
//! anchor ids.

use crate::error::Error;
use petgraph::{
    graph::{DiGraph, NodeIndex},
    Direction,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Anchor run in the round where the vanilla classes become readable.
pub const READ_VANILLA: &str = "READ_VANILLA";

/// Anchor marking the last round before trees are handed to the writer.
pub const NO_WRITE: &str = "NO_WRITE";

pub(crate) fn default_anchors() -> Vec<String> {
    vec![READ_VANILLA.to_string(), NO_WRITE.to_string()]
}

/// Dependency graph over string ids. Ids are interned on first mention, so
/// edges may name ids that were never registered; those become virtual
/// nodes that schedule but never execute.
struct DepGraph {
    inner: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl DepGraph {
    fn new() -> Self {
        Self { inner: DiGraph::default(), indices: HashMap::default() }
    }

    fn intern(&mut self, id: &str) -> NodeIndex {
        let Self { inner, indices } = self;
        *indices.entry(id.to_string()).or_insert_with(|| inner.add_node(id.to_string()))
    }

    fn edge(&mut self, parent: &str, child: &str) {
        let parent = self.intern(parent);
        let child = self.intern(child);
        self.inner.update_edge(parent, child, ());
    }

    /// Kahn's algorithm with depth accumulation: every discharged edge lifts
    /// the child to at least one layer below its parent. An undrained
    /// residue is a cycle.
    fn layer(&self) -> crate::Result<HashMap<NodeIndex, usize>> {
        let graph = &self.inner;
        let mut indegree: HashMap<NodeIndex, usize> = graph
            .node_indices()
            .map(|i| (i, graph.neighbors_directed(i, Direction::Incoming).count()))
            .collect();
        let mut queue: VecDeque<NodeIndex> =
            graph.node_indices().filter(|i| indegree[i] == 0).collect();
        let mut depth: HashMap<NodeIndex, usize> = queue.iter().map(|i| (*i, 0)).collect();

        let mut visited = 0;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            let parent_depth = depth[&node];
            for child in graph.neighbors_directed(node, Direction::Outgoing) {
                let entry = depth.entry(child).or_insert(0);
                *entry = (*entry).max(parent_depth + 1);
                let remaining = indegree.get_mut(&child).expect("all nodes have an indegree");
                *remaining -= 1;
                if *remaining == 0 {
                    queue.push_back(child);
                }
            }
        }

        if visited != graph.node_count() {
            let mut residue: Vec<String> = graph
                .node_indices()
                .filter(|i| indegree[i] > 0)
                .map(|i| graph[i].clone())
                .collect();
            residue.sort();
            return Err(Error::CyclicDependency(residue));
        }
        Ok(depth)
    }
}

/// Layer depth per id for an arbitrary dependency map. Used to order writes
/// within a class by their transformer's position in the write-dependency
/// graph.
pub(crate) fn layer_depths(
    ids: &[String],
    dependents: &HashMap<String, Vec<String>>,
) -> crate::Result<HashMap<String, usize>> {
    let mut graph = DepGraph::new();
    for id in ids {
        graph.intern(id);
    }
    add_edges(&mut graph, dependents);
    let by_index = graph.layer()?;
    Ok(by_index.into_iter().map(|(i, d)| (graph.inner[i].clone(), d)).collect())
}

/// Buckets transformers into ordered rounds.
///
/// Anchors join the graph as virtual transformers, with consecutive anchors
/// chained. After the Kahn pass each anchor sinks to the latest layer its
/// dependents allow, so a trailing anchor like [`NO_WRITE`] lands in the
/// final round rather than right after its own dependencies. Buckets that
/// hold no real transformer are dropped, preserving order; the returned
/// rounds keep anchor ids for inspection.
pub(crate) fn rounds(
    transformers: &[String],
    anchors: &[String],
    dependents: &HashMap<String, Vec<String>>,
) -> crate::Result<Vec<Vec<String>>> {
    let mut graph = DepGraph::new();
    for anchor in anchors {
        graph.intern(anchor);
    }
    for id in transformers {
        graph.intern(id);
    }
    for pair in anchors.windows(2) {
        graph.edge(&pair[0], &pair[1]);
    }
    add_edges(&mut graph, dependents);

    let mut depth: HashMap<NodeIndex, usize> = graph.layer()?;
    let max_depth = depth.values().copied().max().unwrap_or(0);

    // later anchors first, so an anchor chain settles back to front
    for anchor in anchors.iter().rev() {
        let index = graph.indices[anchor];
        let sunk = graph
            .inner
            .neighbors_directed(index, Direction::Outgoing)
            .map(|child| depth[&child])
            .min()
            .map(|earliest| earliest - 1)
            .unwrap_or(max_depth);
        let entry = depth.get_mut(&index).expect("layer covers every node");
        *entry = (*entry).max(sunk);
    }

    let mut buckets: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for index in graph.inner.node_indices() {
        buckets.entry(depth[&index]).or_default().push(graph.inner[index].clone());
    }

    let real: HashSet<&String> = transformers.iter().collect();
    Ok(buckets
        .into_iter()
        .map(|(_, ids)| ids)
        .filter(|ids| ids.iter().any(|id| real.contains(id)))
        .collect())
}

fn add_edges(graph: &mut DepGraph, dependents: &HashMap<String, Vec<String>>) {
    let mut parents: Vec<&String> = dependents.keys().collect();
    parents.sort();
    for parent in parents {
        for child in &dependents[parent] {
            graph.edge(parent, child);
        }
    }
}
