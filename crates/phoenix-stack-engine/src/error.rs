//! Engine error types

use phoenix_stack_core::NodeId;
use thiserror::Error;

use crate::provider_error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A referenced output was not produced by the upstream node
    #[error("node {node}: reference {reference} has no materialized value")]
    UnresolvedReference { node: NodeId, reference: String },

    #[error("provider failed to apply {node}: {source}")]
    ProviderApply {
        node: NodeId,
        #[source]
        source: ProviderError,
    },

    #[error("provider failed to destroy {node}: {source}")]
    ProviderDestroy {
        node: NodeId,
        #[source]
        source: ProviderError,
    },

    /// A node asked for a secret value it was never derived for
    #[error("node {node} was not derived from secret {secret}")]
    SecretNotDerived { node: NodeId, secret: NodeId },

    #[error("{node}: never became ready: {reason}")]
    NotReady { node: NodeId, reason: String },

    #[error("{node}: cancelled")]
    Cancelled { node: NodeId },

    /// The task working on the node panicked or was aborted
    #[error("{node}: task aborted: {reason}")]
    Aborted { node: NodeId, reason: String },
}

impl EngineError {
    /// How to fix the provider failure behind this error, if known.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            EngineError::ProviderApply { source, .. } | EngineError::ProviderDestroy { source, .. } => {
                source.suggestion()
            }
            _ => None,
        }
    }

    pub fn node(&self) -> &NodeId {
        match self {
            EngineError::UnresolvedReference { node, .. }
            | EngineError::ProviderApply { node, .. }
            | EngineError::ProviderDestroy { node, .. }
            | EngineError::SecretNotDerived { node, .. }
            | EngineError::NotReady { node, .. }
            | EngineError::Cancelled { node }
            | EngineError::Aborted { node, .. } => node,
        }
    }
}
