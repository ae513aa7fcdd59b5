//! phoenix-stack-engine - Reference provisioning engine
//!
//! Walks a [`Plan`](phoenix_stack_core::Plan) against a [`Provider`]:
//! dependencies before dependents on apply, dependents before dependencies on
//! destroy, independent branches in parallel.
//!
//! ## Modules
//!
//! - [`engine`]: Apply and destroy scheduling
//! - [`provider`]: The provider trait and resolved attribute values
//! - [`provider_error`]: Provider failure classification
//! - [`memory`]: In-memory provider
//! - [`vault`]: Lazy, single-resolution secret values
//! - [`wait`]: Readiness polling with backoff

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
mod inject;
pub mod memory;
pub mod provider;
pub mod provider_error;
pub mod state;
pub mod vault;
pub mod wait;

pub use config::{EngineConfig, RetryConfig};
pub use engine::{ApplyReport, DestroyReport, Engine};
pub use error::EngineError;
pub use events::StackEvent;
pub use memory::{MemoryProvider, ProviderCall};
pub use provider::{CreateRequest, Outputs, Provider, Resolved};
pub use provider_error::ProviderError;
pub use state::MaterializedState;
pub use wait::WaitConfig;
