//! Dependency resolver.
//!
//! Builds the must-come-before graph from three edge sources:
//! - explicit `depends_on` declarations
//! - every [`AttrRef`](crate::attr::AttrRef) found while walking a node's
//!   attributes (including refs inside templates)
//! - structural links (security group peers, route targets, listener to
//!   target group, container to task definition, log destinations)
//!
//! Cycles are found with a DFS colouring pass that reports the full cycle.
//! The order is produced by Kahn's algorithm whose ready set is keyed by
//! declaration index, so the same registry always resolves to the same
//! order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::attr::{NodeId, Reference};
use crate::error::{Error, Result};
use crate::plan::{EdgeKind, Plan};
use crate::registry::Registry;
use crate::workload::validate_tasks;

/// Check plan-time invariants, then resolve.
///
/// This is what a provisioning engine should be handed: it adds the
/// essential-container check on top of [`resolve`].
pub fn build_plan(registry: &Registry) -> Result<Plan> {
    validate_tasks(registry)?;
    resolve(registry)
}

/// Resolve the registry into a [`Plan`].
///
/// Node indices in the underlying graph equal declaration indices, which is
/// what the deterministic tie-break relies on.
///
/// # Errors
///
/// - [`Error::UnresolvedReference`] if any dependency, ref or link names an
///   id that is not registered
/// - [`Error::Cycle`] with the cycle path if the graph is not acyclic
pub fn resolve(registry: &Registry) -> Result<Plan> {
    let mut graph: DiGraph<NodeId, EdgeKind> =
        DiGraph::with_capacity(registry.len(), registry.len() * 2);
    let mut index: HashMap<NodeId, NodeIndex> = HashMap::with_capacity(registry.len());
    for node in registry.iter() {
        let idx = graph.add_node(node.id().clone());
        index.insert(node.id().clone(), idx);
    }

    let mut secret_consumers: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();

    for node in registry.iter() {
        let to = index[node.id()];

        for dep in node.depends_on() {
            let from = *index.get(dep).ok_or_else(|| Error::UnresolvedReference {
                node: node.id().clone(),
                reference: format!("dependsOn {dep}"),
            })?;
            add_edge(&mut graph, from, to, EdgeKind::Explicit);
        }

        for (path, reference) in node.references() {
            let target = reference.target();
            let from = *index.get(target).ok_or_else(|| Error::UnresolvedReference {
                node: node.id().clone(),
                reference: match reference {
                    Reference::Attr(r) => r.to_string(),
                    Reference::Link(id) => id.to_string(),
                },
            })?;
            let kind = match reference {
                Reference::Attr(r) => {
                    if r.sensitive {
                        secret_consumers
                            .entry(r.target.clone())
                            .or_default()
                            .insert(node.id().clone());
                    }
                    EdgeKind::Reference {
                        attribute: path,
                        output: r.attribute.clone(),
                    }
                }
                Reference::Link(_) => EdgeKind::Link { attribute: path },
            };
            add_edge(&mut graph, from, to, kind);
        }
    }

    if let Some(path) = find_cycle(&graph) {
        return Err(Error::Cycle { path });
    }

    let order = toposort(&graph);
    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Resolved dependency graph"
    );

    Ok(Plan::new(
        graph,
        registry.iter().cloned().collect(),
        index,
        order,
        secret_consumers,
    ))
}

/// Add an edge unless one already connects the pair; the first source wins.
fn add_edge(graph: &mut DiGraph<NodeId, EdgeKind>, from: NodeIndex, to: NodeIndex, kind: EdgeKind) {
    if graph.find_edge(from, to).is_none() {
        graph.add_edge(from, to, kind);
    }
}

/// Successors sorted by descending declaration index, so `pop()` yields
/// them in declaration order.
fn successors_desc(graph: &DiGraph<NodeId, EdgeKind>, idx: NodeIndex) -> Vec<NodeIndex> {
    let mut next: Vec<NodeIndex> = graph.neighbors_directed(idx, Direction::Outgoing).collect();
    next.sort_unstable_by(|a, b| b.cmp(a));
    next.dedup();
    next
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// DFS colouring. Returns the first cycle found as a path whose first and
/// last entries are the same node.
fn find_cycle(graph: &DiGraph<NodeId, EdgeKind>) -> Option<Vec<NodeId>> {
    let mut color = vec![Color::White; graph.node_count()];

    for start in graph.node_indices() {
        if color[start.index()] != Color::White {
            continue;
        }
        color[start.index()] = Color::Gray;
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = vec![(start, successors_desc(graph, start))];

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            let node = frame.0;
            match frame.1.pop() {
                Some(next) => match color[next.index()] {
                    Color::White => {
                        color[next.index()] = Color::Gray;
                        stack.push((next, successors_desc(graph, next)));
                    }
                    Color::Gray => {
                        let first = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        let mut path: Vec<NodeId> =
                            stack[first..].iter().map(|(n, _)| graph[*n].clone()).collect();
                        path.push(graph[next].clone());
                        return Some(path);
                    }
                    Color::Black => {}
                },
                None => {
                    color[node.index()] = Color::Black;
                    stack.pop();
                }
            }
        }
    }

    None
}

/// Kahn's algorithm, always taking the earliest-declared ready node.
fn toposort(graph: &DiGraph<NodeId, EdgeKind>) -> Vec<NodeId> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(graph[idx].clone());
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            let deg = &mut in_degree[next.index()];
            *deg = deg.saturating_sub(1);
            if *deg == 0 {
                ready.push(Reverse(next));
            }
        }
    }
    order
}
