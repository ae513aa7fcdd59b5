//! Errors raised while building and resolving the resource graph.
//!
//! Every variant names the node id(s) it concerns. All of these are raised
//! before a plan exists, so no partial graph ever reaches a provisioning
//! engine.

use crate::attr::NodeId;
use phoenix_stack_common::{ConfigError, ResourceKind, UnknownKindError};

/// The result type used throughout phoenix-stack-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while declaring or resolving a stack.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied id is already registered.
    #[error("duplicate node id: {id}")]
    DuplicateId {
        /// The colliding id.
        id: NodeId,
    },

    /// A kind name did not parse.
    #[error(transparent)]
    UnknownKind(#[from] UnknownKindError),

    /// Stack configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A lookup named an id that is not registered.
    #[error("node not found: {id}")]
    NodeNotFound {
        /// The missing id.
        id: NodeId,
    },

    /// A node was used where a different kind is required.
    #[error("node {id} is a {actual}, expected a {expected}")]
    KindMismatch {
        /// The offending node.
        id: NodeId,
        /// The kind the caller needed.
        expected: ResourceKind,
        /// The kind the node was declared with.
        actual: ResourceKind,
    },

    /// The dependency graph contains a cycle.
    #[error("cycle detected in dependency graph: {}", format_path(path))]
    Cycle {
        /// The cycle, first node repeated at the end.
        path: Vec<NodeId>,
    },

    /// A security rule failed validation.
    #[error("invalid rule on security group {group}: {reason}")]
    InvalidRule {
        /// The security group the rule belongs to.
        group: NodeId,
        /// What is wrong with the rule.
        reason: String,
    },

    /// Two listeners on one load balancer claim the same port and protocol.
    #[error("port {port}/{protocol} already bound on load balancer {load_balancer} by {existing}")]
    PortConflict {
        /// The load balancer.
        load_balancer: NodeId,
        /// The contested port.
        port: u16,
        /// The contested protocol.
        protocol: String,
        /// The listener that already holds the pair.
        existing: NodeId,
    },

    /// A reference points at something the graph does not contain.
    #[error("unresolved reference from {node} to {reference}")]
    UnresolvedReference {
        /// The node holding the reference.
        node: NodeId,
        /// What was referenced (`Target.attribute`, a container, ...).
        reference: String,
    },

    /// A route binding does not match its listener.
    #[error("invalid route binding on listener {listener}: {reason}")]
    InvalidBinding {
        /// The listener being bound.
        listener: NodeId,
        /// What is wrong with the binding.
        reason: String,
    },

    /// A task definition has no essential container.
    #[error("task definition {task} has no essential container")]
    NoEssentialContainer {
        /// The task definition.
        task: NodeId,
    },

    /// CPU/memory combination not offered for serverless tasks.
    #[error("task definition {task}: unsupported size {cpu} CPU units / {memory} MiB")]
    InvalidTaskSize {
        /// The task definition.
        task: NodeId,
        /// Requested CPU units.
        cpu: u32,
        /// Requested memory in MiB.
        memory: u32,
    },

    /// A policy grant with no actions or no resources.
    #[error("policy grant for role {role} has no {missing}")]
    EmptyGrant {
        /// The role receiving the grant.
        role: NodeId,
        /// `"actions"` or `"resources"`.
        missing: &'static str,
    },

    /// A secret-read grant is not scoped to an issued secret.
    #[error("secret-read grant for role {role} is too broad: {reason}")]
    WildcardSecretGrant {
        /// The role receiving the grant.
        role: NodeId,
        /// Why the grant is rejected.
        reason: String,
    },

    /// A secret generation policy that cannot produce a value.
    #[error("invalid generation policy for secret {secret}: {reason}")]
    InvalidSecretPolicy {
        /// The secret node.
        secret: NodeId,
        /// What is wrong.
        reason: String,
    },

    /// The network address space cannot host the requested layout.
    #[error("invalid network {network}: {reason}")]
    InvalidNetwork {
        /// The network id.
        network: NodeId,
        /// What is wrong.
        reason: String,
    },
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl Error {
    /// The node ids this error concerns.
    pub fn node_ids(&self) -> Vec<&NodeId> {
        match self {
            Error::DuplicateId { id } | Error::NodeNotFound { id } | Error::KindMismatch { id, .. } => {
                vec![id]
            }
            Error::UnknownKind(_) | Error::Config(_) => Vec::new(),
            Error::Cycle { path } => path.iter().collect(),
            Error::InvalidRule { group, .. } => vec![group],
            Error::PortConflict {
                load_balancer,
                existing,
                ..
            } => vec![load_balancer, existing],
            Error::UnresolvedReference { node, .. } => vec![node],
            Error::InvalidBinding { listener, .. } => vec![listener],
            Error::NoEssentialContainer { task } | Error::InvalidTaskSize { task, .. } => vec![task],
            Error::EmptyGrant { role, .. } | Error::WildcardSecretGrant { role, .. } => vec![role],
            Error::InvalidSecretPolicy { secret, .. } => vec![secret],
            Error::InvalidNetwork { network, .. } => vec![network],
        }
    }
}
