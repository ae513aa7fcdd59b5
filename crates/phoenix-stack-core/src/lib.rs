//! phoenix-stack-core - Declared resource graph and dependency resolution
//!
//! Graph-build is synchronous and single-threaded: builders register nodes
//! into an explicitly passed [`Registry`], and [`build_plan`] turns the
//! registry into a [`Plan`] that a provisioning engine walks.
//!
//! ## Modules
//!
//! - [`attr`]: Node ids, attribute values and references
//! - [`registry`]: The arena of declared nodes
//! - [`resolver`]: Edge inference, cycle detection, topological order
//! - [`plan`]: The resolved graph handed to an engine
//! - [`secrets`]: Secret broker and value generation
//! - [`network`]: Network, subnets and security groups
//! - [`database`]: Database cluster
//! - [`workload`]: Tasks, containers, services, notebook
//! - [`routing`]: Load balancers, listeners, target groups
//! - [`policy`]: Roles and grants
//! - [`topology`]: The demo environment

pub mod attr;
pub mod database;
pub mod error;
pub mod network;
pub mod plan;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod routing;
pub mod secrets;
pub mod topology;
pub mod workload;

pub use attr::{AttrRef, AttrValue, NodeId, Reference, Template, TemplatePart, outputs};
pub use error::{Error, Result};
pub use plan::{Edge, EdgeKind, Plan, PlanDocument};
pub use registry::{Declaration, Registry, ResourceNode};
pub use resolver::{build_plan, resolve};
pub use secrets::{GenerationPolicy, SecretHandle, SecretValue, Sensitive};
pub use topology::{Stack, phoenix_demo};
