//! Materialized state: which nodes exist and what they reported.

use std::collections::BTreeMap;

use phoenix_stack_common::ResourceKind;
use phoenix_stack_core::NodeId;

use crate::provider::Outputs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedNode {
    pub kind: ResourceKind,
    pub outputs: Outputs,
}

#[derive(Debug, Clone, Default)]
pub struct MaterializedState {
    nodes: BTreeMap<NodeId, MaterializedNode>,
}

impl MaterializedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, kind: ResourceKind, outputs: Outputs) {
        self.nodes.insert(id, MaterializedNode { kind, outputs });
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<MaterializedNode> {
        self.nodes.remove(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&MaterializedNode> {
        self.nodes.get(id)
    }

    pub fn outputs(&self, id: &NodeId) -> Option<&Outputs> {
        self.nodes.get(id).map(|n| &n.outputs)
    }

    /// A single reported output of a materialized node.
    pub fn output(&self, id: &NodeId, attribute: &str) -> Option<&str> {
        self.outputs(id)?.get(attribute).map(String::as_str)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
