//! Events emitted by [`Engine`](crate::Engine) while it walks a plan
//!
//! Consumers (the CLI simulation, tests) subscribe with
//! [`Engine::with_events`](crate::Engine::with_events) and decide how to
//! present them. Events never carry attribute values.

use phoenix_stack_common::ResourceKind;
use phoenix_stack_core::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// Node created and reported ready
    Created { node: NodeId, kind: ResourceKind },
    /// Provider call failed after retries
    Failed { node: NodeId, error: String },
    /// Never started because an upstream node did not materialize
    Skipped { node: NodeId, blocked_by: Vec<NodeId> },
    /// Node deleted (or already gone)
    Destroyed { node: NodeId },
    /// Left in place because a dependent could not be destroyed
    Retained { node: NodeId },
}

impl StackEvent {
    pub fn node(&self) -> &NodeId {
        match self {
            StackEvent::Created { node, .. }
            | StackEvent::Failed { node, .. }
            | StackEvent::Skipped { node, .. }
            | StackEvent::Destroyed { node }
            | StackEvent::Retained { node } => node,
        }
    }
}
