//! Resolved execution plan.
//!
//! A [`Plan`] is the frozen output of [`resolve`](crate::resolver::resolve):
//! the declared nodes, the deduplicated dependency edges and a total creation
//! order. Destruction order is the exact reverse of creation order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;

use crate::attr::NodeId;
use crate::registry::ResourceNode;

/// Why an edge exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeKind {
    /// Declared with `depends_on`.
    Explicit,
    /// An attribute reads an output of the upstream node.
    Reference { attribute: String, output: String },
    /// A structural link at the given attribute path.
    Link { attribute: String },
}

/// A borrowed view of one dependency edge.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Edge<'a> {
    /// The node that must exist first.
    pub from: &'a NodeId,
    /// The node that needs it.
    pub to: &'a NodeId,
    pub kind: &'a EdgeKind,
}

#[derive(Debug, Clone)]
pub struct Plan {
    graph: DiGraph<NodeId, EdgeKind>,
    nodes: Vec<ResourceNode>,
    index: HashMap<NodeId, NodeIndex>,
    order: Vec<NodeId>,
    secret_consumers: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Plan {
    pub(crate) fn new(
        graph: DiGraph<NodeId, EdgeKind>,
        nodes: Vec<ResourceNode>,
        index: HashMap<NodeId, NodeIndex>,
        order: Vec<NodeId>,
        secret_consumers: BTreeMap<NodeId, BTreeSet<NodeId>>,
    ) -> Self {
        Self {
            graph,
            nodes,
            index,
            order,
            secret_consumers,
        }
    }

    /// Nodes ordered so every node follows all of its dependencies.
    pub fn creation_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Reverse of [`creation_order`](Self::creation_order): dependents go
    /// before what they depend on.
    pub fn destruction_order(&self) -> Vec<NodeId> {
        self.order.iter().rev().cloned().collect()
    }

    pub fn node(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.index
            .get(id)
            .and_then(|idx| self.nodes.get(idx.index()))
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of a node, in declaration order.
    pub fn upstream(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a node, in declaration order.
    pub fn downstream(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<&NodeId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort_unstable();
        found.into_iter().map(|n| &self.graph[n]).collect()
    }

    /// True if `to` directly depends on `from`.
    pub fn has_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.find_edge(a, b).is_some(),
            _ => false,
        }
    }

    /// Every edge, sorted by (from, to) declaration index.
    pub fn edges(&self) -> Vec<Edge<'_>> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| (e.source(), e.target(), e.weight()))
            .collect();
        edges.sort_unstable_by_key(|(from, to, _)| (*from, *to));
        edges
            .into_iter()
            .map(|(from, to, kind)| Edge {
                from: &self.graph[from],
                to: &self.graph[to],
                kind,
            })
            .collect()
    }

    /// Nodes holding a secret-derived ref to `secret`.
    pub fn secret_consumers(&self, secret: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.secret_consumers.get(secret)
    }

    pub fn is_secret_consumer(&self, secret: &NodeId, node: &NodeId) -> bool {
        self.secret_consumers
            .get(secret)
            .is_some_and(|consumers| consumers.contains(node))
    }

    /// Graphviz rendering. Explicit edges are bold, links are dashed.
    pub fn to_dot(&self, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape(name));
        let _ = writeln!(out, "  rankdir=LR;");
        let _ = writeln!(out, "  node [shape=box];");
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{}\\n({})\"];",
                escape(node.id().as_str()),
                escape(node.id().as_str()),
                node.kind()
            );
        }
        for edge in self.edges() {
            let style = match edge.kind {
                EdgeKind::Explicit => " [style=bold]",
                EdgeKind::Reference { .. } => "",
                EdgeKind::Link { .. } => " [style=dashed]",
            };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\"{};",
                escape(edge.from.as_str()),
                escape(edge.to.as_str()),
                style
            );
        }
        out.push_str("}\n");
        out
    }

    /// Serializable summary of the plan.
    pub fn document(&self) -> PlanDocument<'_> {
        PlanDocument {
            creation_order: &self.order,
            nodes: self.nodes.iter().collect(),
            edges: self.edges(),
            secret_consumers: &self.secret_consumers,
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// JSON shape of a plan.
#[derive(Debug, Serialize)]
pub struct PlanDocument<'a> {
    pub creation_order: &'a [NodeId],
    pub nodes: Vec<&'a ResourceNode>,
    pub edges: Vec<Edge<'a>>,
    pub secret_consumers: &'a BTreeMap<NodeId, BTreeSet<NodeId>>,
}

#[cfg(test)]
mod tests {
    use crate::attr::{AttrRef, AttrValue};
    use crate::registry::{Declaration, Registry};
    use crate::resolver::resolve;
    use crate::secrets::{self, GenerationPolicy};
    use phoenix_stack_common::ResourceKind;

    use super::*;

    fn small_plan() -> Plan {
        let mut reg = Registry::new();
        let role = reg
            .register(Declaration::new(ResourceKind::Role).id("Role"))
            .unwrap();
        let bucket = reg
            .register(Declaration::new(ResourceKind::Bucket).id("Bucket"))
            .unwrap();
        reg.register(
            Declaration::new(ResourceKind::NotebookInstance)
                .id("Notebook")
                .attr("roleArn", AttrRef::arn(&role))
                .attr("logs", AttrValue::link(&bucket)),
        )
        .unwrap();
        resolve(&reg).unwrap()
    }

    #[test]
    fn test_destruction_is_reverse_of_creation() {
        let plan = small_plan();
        let mut reversed = plan.destruction_order();
        reversed.reverse();
        assert_eq!(reversed, plan.creation_order());
    }

    #[test]
    fn test_upstream_and_downstream() {
        let plan = small_plan();
        let notebook = NodeId::from("Notebook");
        let up: Vec<&str> = plan.upstream(&notebook).into_iter().map(NodeId::as_str).collect();
        assert_eq!(up, vec!["Role", "Bucket"]);
        let down = plan.downstream(&NodeId::from("Role"));
        assert_eq!(down, vec![&notebook]);
        assert!(plan.upstream(&NodeId::from("missing")).is_empty());
    }

    #[test]
    fn test_edges_carry_their_source() {
        let plan = small_plan();
        let edges = plan.edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(
            edges[0].kind,
            &EdgeKind::Reference {
                attribute: "roleArn".to_string(),
                output: "arn".to_string()
            }
        );
        assert_eq!(
            edges[1].kind,
            &EdgeKind::Link {
                attribute: "logs".to_string()
            }
        );
    }

    #[test]
    fn test_dot_output() {
        let dot = small_plan().to_dot("demo");
        assert!(dot.starts_with("digraph \"demo\" {"));
        assert!(dot.contains("\"Role\" -> \"Notebook\";"));
        assert!(dot.contains("\"Bucket\" -> \"Notebook\" [style=dashed];"));
        assert!(dot.contains("\"Notebook\" [label=\"Notebook\\n(NotebookInstance)\"];"));
    }

    #[test]
    fn test_document_serializes() {
        let plan = small_plan();
        let doc = serde_json::to_value(plan.document()).unwrap();
        assert_eq!(doc["creation_order"][2], "Notebook");
        assert_eq!(doc["edges"][1]["kind"]["type"], "link");
        assert_eq!(doc["nodes"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_secret_consumers_tracked() {
        let mut reg = Registry::new();
        let handle = secrets::issue(&mut reg, "Secret", "db", &GenerationPolicy::default()).unwrap();
        let password = secrets::derive(&handle, "password").unwrap();
        let app = reg
            .register(
                Declaration::new(ResourceKind::Container)
                    .id("App")
                    .attr("password", password),
            )
            .unwrap();
        let other = reg
            .register(
                Declaration::new(ResourceKind::Role)
                    .id("Reader")
                    .attr("secretArn", AttrRef::arn(handle.id())),
            )
            .unwrap();

        let plan = resolve(&reg).unwrap();
        assert!(plan.is_secret_consumer(handle.id(), &app));
        assert!(!plan.is_secret_consumer(handle.id(), &other));
        assert_eq!(plan.secret_consumers(handle.id()).map(BTreeSet::len), Some(1));
    }
}
