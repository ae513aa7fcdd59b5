//! Shared test utilities for phoenix-stack
//!
//! This crate provides common fixtures that can be used across the
//! integration tests of several crates without circular dependencies.
//!
//! ## Modules
//!
//! - [`ids`]: Unique stack names for test runs
//! - [`fixtures`]: Small declared graphs and config files

pub mod fixtures;
pub mod ids;

pub use fixtures::{Scenario, scenario, write_config};
pub use ids::test_stack_name;
