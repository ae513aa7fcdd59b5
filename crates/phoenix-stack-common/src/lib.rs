//! phoenix-stack-common - Shared types and utilities
//!
//! This crate provides the types shared by the graph builder, the
//! provisioning engine and the CLI, without any async dependencies.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`error`]: Configuration errors
//! - [`resource_kind`]: Kinds of declarable resources
//! - [`stack_config`]: Demo stack configuration
//! - [`tags`]: Resource tag constants for discovery and teardown

pub mod defaults;
pub mod error;
pub mod resource_kind;
pub mod stack_config;
pub mod tags;

// Re-export commonly used types
pub use error::ConfigError;
pub use resource_kind::{ResourceKind, UnknownKindError};
pub use stack_config::StackConfig;

