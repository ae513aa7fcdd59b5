//! Resource kinds declared by phoenix-stack
//!
//! A kind is fixed when a node is declared and never changes afterwards.
//! Kinds round-trip through their string form so declarations and CLI
//! filters can name them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Types of infrastructure resources a stack can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Isolated virtual network
    Network,
    /// Subnet inside a network (one per AZ and tier)
    Subnet,
    /// Stateful firewall attached to network interfaces
    SecurityGroup,
    /// Platform-generated credential
    Secret,
    /// Managed relational database cluster
    DatabaseCluster,
    /// Container orchestration cluster
    Cluster,
    /// Task definition grouping containers
    TaskDefinition,
    /// Container inside a task definition
    Container,
    /// Long-running service keeping tasks alive
    Service,
    /// Application load balancer
    LoadBalancer,
    /// Load balancer listener (port + protocol)
    Listener,
    /// Target group routing listener traffic to containers
    TargetGroup,
    /// Execution identity
    Role,
    /// Allow statement attached to a role
    PolicyStatement,
    /// Managed notebook instance
    NotebookInstance,
    /// Object storage bucket (load balancer access logs)
    Bucket,
    /// Log group receiving container output
    LogGroup,
}

/// Returned when parsing a kind name that is not a [`ResourceKind`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownKindError(pub String);

impl ResourceKind {
    /// Every kind, in the order the variants are declared
    pub const ALL: [ResourceKind; 17] = [
        ResourceKind::Network,
        ResourceKind::Subnet,
        ResourceKind::SecurityGroup,
        ResourceKind::Secret,
        ResourceKind::DatabaseCluster,
        ResourceKind::Cluster,
        ResourceKind::TaskDefinition,
        ResourceKind::Container,
        ResourceKind::Service,
        ResourceKind::LoadBalancer,
        ResourceKind::Listener,
        ResourceKind::TargetGroup,
        ResourceKind::Role,
        ResourceKind::PolicyStatement,
        ResourceKind::NotebookInstance,
        ResourceKind::Bucket,
        ResourceKind::LogGroup,
    ];

    /// Canonical name, also used as the prefix of generated node ids
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Network => "Network",
            ResourceKind::Subnet => "Subnet",
            ResourceKind::SecurityGroup => "SecurityGroup",
            ResourceKind::Secret => "Secret",
            ResourceKind::DatabaseCluster => "DatabaseCluster",
            ResourceKind::Cluster => "Cluster",
            ResourceKind::TaskDefinition => "TaskDefinition",
            ResourceKind::Container => "Container",
            ResourceKind::Service => "Service",
            ResourceKind::LoadBalancer => "LoadBalancer",
            ResourceKind::Listener => "Listener",
            ResourceKind::TargetGroup => "TargetGroup",
            ResourceKind::Role => "Role",
            ResourceKind::PolicyStatement => "PolicyStatement",
            ResourceKind::NotebookInstance => "NotebookInstance",
            ResourceKind::Bucket => "Bucket",
            ResourceKind::LogGroup => "LogGroup",
        }
    }

    /// Provider service namespace, used when synthesizing ARN-like identifiers
    pub fn service(self) -> &'static str {
        match self {
            ResourceKind::Network | ResourceKind::Subnet | ResourceKind::SecurityGroup => "ec2",
            ResourceKind::Secret => "secretsmanager",
            ResourceKind::DatabaseCluster => "rds",
            ResourceKind::Cluster
            | ResourceKind::TaskDefinition
            | ResourceKind::Container
            | ResourceKind::Service => "ecs",
            ResourceKind::LoadBalancer | ResourceKind::Listener | ResourceKind::TargetGroup => {
                "elasticloadbalancing"
            }
            ResourceKind::Role | ResourceKind::PolicyStatement => "iam",
            ResourceKind::NotebookInstance => "sagemaker",
            ResourceKind::Bucket => "s3",
            ResourceKind::LogGroup => "logs",
        }
    }

    /// Whether materializing this kind produces a provider-side object of its own.
    ///
    /// Containers and policy statements are folded into their parent
    /// (task definition, role) by the provider.
    pub fn is_standalone(self) -> bool {
        !matches!(self, ResourceKind::Container | ResourceKind::PolicyStatement)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownKindError(s.to_string()))
    }
}
