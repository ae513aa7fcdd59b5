//! Resource registry: the arena of declared nodes.
//!
//! Nodes are stored in declaration order and indexed by id. The registry is
//! an explicitly passed value with a bounded lifetime (build, resolve, hand
//! to the engine, drop); there is no global instance.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use phoenix_stack_common::ResourceKind;
use serde::Serialize;
use tracing::debug;

use crate::attr::{AttrValue, NodeId, Reference};
use crate::error::{Error, Result};

/// A declared unit of infrastructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNode {
    id: NodeId,
    kind: ResourceKind,
    attributes: BTreeMap<String, AttrValue>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    depends_on: BTreeSet<NodeId>,
}

impl ResourceNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Explicitly declared dependencies.
    pub fn depends_on(&self) -> &BTreeSet<NodeId> {
        &self.depends_on
    }

    /// Every attribute-derived reference, with its attribute path.
    pub fn references(&self) -> Vec<(String, Reference<'_>)> {
        let mut found = Vec::new();
        for (name, value) in &self.attributes {
            value.visit_references(name, &mut |path, r| found.push((path.to_string(), r)));
        }
        found
    }
}

/// Declaration of a node, consumed by [`Registry::register`].
#[derive(Debug, Clone)]
pub struct Declaration {
    kind: ResourceKind,
    id: Option<NodeId>,
    attributes: BTreeMap<String, AttrValue>,
    depends_on: BTreeSet<NodeId>,
}

impl Declaration {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            id: None,
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Start a declaration from a kind name.
    pub fn named_kind(kind: &str) -> Result<Self> {
        Ok(Self::new(kind.parse()?))
    }

    /// Use a caller-chosen id instead of a generated one.
    pub fn id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn depends_on(mut self, id: &NodeId) -> Self {
        self.depends_on.insert(id.clone());
        self
    }
}

/// In-memory table of declared nodes.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    nodes: Vec<ResourceNode>,
    index: HashMap<NodeId, usize>,
    counters: HashMap<ResourceKind, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its id.
    ///
    /// Generated ids are `<Kind><n>` with a per-kind counter, skipping ids a
    /// caller already took, so they only depend on declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if a caller-supplied id is taken.
    pub fn register(&mut self, declaration: Declaration) -> Result<NodeId> {
        let Declaration {
            kind,
            id,
            attributes,
            depends_on,
        } = declaration;

        let id = match id {
            Some(id) => {
                if self.index.contains_key(&id) {
                    return Err(Error::DuplicateId { id });
                }
                id
            }
            None => self.generate_id(kind),
        };

        debug!(node = %id, kind = %kind, "Registered node");
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(ResourceNode {
            id: id.clone(),
            kind,
            attributes,
            depends_on,
        });
        Ok(id)
    }

    fn generate_id(&mut self, kind: ResourceKind) -> NodeId {
        let counter = self.counters.entry(kind).or_insert(0);
        loop {
            *counter += 1;
            let candidate = NodeId::new(format!("{}{}", kind.as_str(), counter));
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Look up a node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] for an unregistered id.
    pub fn get(&self, id: &NodeId) -> Result<&ResourceNode> {
        self.index
            .get(id)
            .and_then(|&i| self.nodes.get(i))
            .ok_or_else(|| Error::NodeNotFound { id: id.clone() })
    }

    /// Look up a node and check its kind.
    pub fn get_kind(&self, id: &NodeId, expected: ResourceKind) -> Result<&ResourceNode> {
        let node = self.get(id)?;
        if node.kind != expected {
            return Err(Error::KindMismatch {
                id: id.clone(),
                expected,
                actual: node.kind,
            });
        }
        Ok(node)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Declaration index of a node.
    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Nodes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    pub fn nodes_of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut ResourceNode> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| Error::NodeNotFound { id: id.clone() })?;
        self.nodes
            .get_mut(i)
            .ok_or_else(|| Error::NodeNotFound { id: id.clone() })
    }

    /// Append to a list attribute, creating it if absent.
    pub(crate) fn push_attribute(&mut self, id: &NodeId, name: &str, value: AttrValue) -> Result<()> {
        let node = self.node_mut(id)?;
        match node
            .attributes
            .entry(name.to_string())
            .or_insert_with(|| AttrValue::List(Vec::new()))
        {
            AttrValue::List(items) => items.push(value),
            other => *other = AttrValue::List(vec![other.clone(), value]),
        }
        Ok(())
    }

    pub(crate) fn add_dependency(&mut self, id: &NodeId, on: &NodeId) -> Result<()> {
        self.node_mut(id)?.depends_on.insert(on.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let mut reg = Registry::new();
        let id = reg
            .register(
                Declaration::new(ResourceKind::Secret)
                    .id("DBCredentialsSecret")
                    .attr("secretName", "phoenix-demo-db-credential"),
            )
            .unwrap();

        let node = reg.get(&id).unwrap();
        assert_eq!(node.kind(), ResourceKind::Secret);
        assert_eq!(
            node.attribute("secretName").and_then(AttrValue::as_str),
            Some("phoenix-demo-db-credential")
        );
    }

    #[test]
    fn test_duplicate_id() {
        let mut reg = Registry::new();
        reg.register(Declaration::new(ResourceKind::Network).id("VPC"))
            .unwrap();
        let err = reg
            .register(Declaration::new(ResourceKind::Bucket).id("VPC"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId { id } if id.as_str() == "VPC"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_generated_ids_are_stable() {
        let build = || {
            let mut reg = Registry::new();
            let a = reg.register(Declaration::new(ResourceKind::Role)).unwrap();
            let b = reg.register(Declaration::new(ResourceKind::Role)).unwrap();
            let c = reg.register(Declaration::new(ResourceKind::Bucket)).unwrap();
            (a, b, c)
        };
        let first = build();
        assert_eq!(first, build());
        assert_eq!(first.0.as_str(), "Role1");
        assert_eq!(first.1.as_str(), "Role2");
        assert_eq!(first.2.as_str(), "Bucket1");
    }

    #[test]
    fn test_generated_ids_skip_taken() {
        let mut reg = Registry::new();
        reg.register(Declaration::new(ResourceKind::Role).id("Role1"))
            .unwrap();
        let generated = reg.register(Declaration::new(ResourceKind::Role)).unwrap();
        assert_eq!(generated.as_str(), "Role2");
    }

    #[test]
    fn test_unknown_kind_name() {
        let err = Declaration::named_kind("Mainframe").unwrap_err();
        assert!(matches!(err, Error::UnknownKind(_)));
        assert!(Declaration::named_kind("LoadBalancer").is_ok());
    }

    #[test]
    fn test_declaration_order_preserved() {
        let mut reg = Registry::new();
        for id in ["c", "a", "b"] {
            reg.register(Declaration::new(ResourceKind::Bucket).id(id))
                .unwrap();
        }
        let ids: Vec<_> = reg.iter().map(|n| n.id().as_str().to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(reg.position(&NodeId::from("a")), Some(1));
    }

    #[test]
    fn test_get_missing_and_kind_mismatch() {
        let mut reg = Registry::new();
        let id = reg
            .register(Declaration::new(ResourceKind::Bucket).id("Bucket"))
            .unwrap();
        assert!(matches!(
            reg.get(&NodeId::from("nope")),
            Err(Error::NodeNotFound { .. })
        ));
        assert!(matches!(
            reg.get_kind(&id, ResourceKind::Role),
            Err(Error::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_push_attribute_creates_list() {
        let mut reg = Registry::new();
        let id = reg
            .register(Declaration::new(ResourceKind::Service).id("Service"))
            .unwrap();
        reg.push_attribute(&id, "loadBalancers", AttrValue::from("a"))
            .unwrap();
        reg.push_attribute(&id, "loadBalancers", AttrValue::from("b"))
            .unwrap();
        let list = reg.get(&id).unwrap().attribute("loadBalancers").unwrap();
        assert_eq!(list.as_list().map(<[AttrValue]>::len), Some(2));
    }
}
