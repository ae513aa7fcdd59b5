//! The seam between the engine and whatever actually creates resources.

use std::collections::BTreeMap;

use async_trait::async_trait;
use phoenix_stack_common::ResourceKind;
use phoenix_stack_core::{NodeId, Sensitive};

use crate::provider_error::ProviderError;

/// Outputs a provider reports for a materialized node, keyed by
/// [`phoenix_stack_core::outputs`] names.
pub type Outputs = BTreeMap<String, String>;

/// An attribute value with every reference replaced by upstream outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Resolved>),
    Map(BTreeMap<String, Resolved>),
    /// Provider id of a linked node
    Link(String),
    /// Secret-derived value; only ever handed to the deriving node
    Secret(Sensitive<String>),
}

impl Resolved {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Resolved::Str(s) | Resolved::Link(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Resolved>> {
        match self {
            Resolved::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&Sensitive<String>> {
        match self {
            Resolved::Secret(s) => Some(s),
            _ => None,
        }
    }
}

/// Everything a provider needs to create one node.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub id: NodeId,
    pub kind: ResourceKind,
    pub attributes: BTreeMap<String, Resolved>,
    pub tags: BTreeMap<String, String>,
}

impl CreateRequest {
    pub fn attribute(&self, name: &str) -> Option<&Resolved> {
        self.attributes.get(name)
    }
}

/// Backend that materializes nodes.
///
/// Implementations classify their failures as [`ProviderError`]; the engine
/// retries the transient ones and never calls `create` for a node before
/// every upstream node is ready.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn create(&self, request: &CreateRequest) -> Result<Outputs, ProviderError>;

    /// Whether a created node can be used by its dependents yet.
    async fn is_ready(&self, _id: &NodeId, _kind: ResourceKind) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn delete(&self, id: &NodeId, kind: ResourceKind, outputs: &Outputs) -> Result<(), ProviderError>;
}
