//! Provider error classification
//!
//! Providers report failures as an error code plus message; the engine only
//! cares which of them are worth retrying and which mean "already gone".

use phoenix_stack_common::ResourceKind;
use thiserror::Error;

/// Provider failure categories for retry and teardown logic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Resource was not found (safe to skip during destroy)
    #[error("Resource not found: {kind} '{id}'")]
    NotFound { kind: ResourceKind, id: String },

    /// Resource already exists
    #[error("Resource already exists")]
    AlreadyExists,

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource has dependent objects (retryable, e.g. a firewall still attached)
    #[error("Resource has dependent objects")]
    DependencyViolation,

    /// Anything else, with the provider's code and message
    #[error("Provider error: {message}")]
    Other {
        code: Option<String>,
        message: String,
    },
}

impl ProviderError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled | ProviderError::DependencyViolation
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ProviderError::AlreadyExists)
    }

    pub fn other(message: impl Into<String>) -> Self {
        ProviderError::Other {
            code: None,
            message: message.into(),
        }
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::Other { code: Some(c), .. } => suggestion_for_code(c),
            _ => None,
        }
    }
}

const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "NoSuchEntity",
    "NoSuchBucket",
    "InvalidGroup.NotFound",
    "InvalidVpcID.NotFound",
    "DBClusterNotFoundFault",
    "ClusterNotFoundException",
    "LoadBalancerNotFound",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "ResourceExistsException",
    "EntityAlreadyExists",
    "InvalidGroup.Duplicate",
    "DBClusterAlreadyExistsFault",
    "BucketAlreadyOwnedByYou",
];

const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

const DEPENDENCY_CODES: &[&str] = &["DependencyViolation", "ResourceInUse", "InvalidDBClusterStateFault"];

/// Classify a provider failure by its error code.
pub fn classify(kind: ResourceKind, code: Option<&str>, message: Option<&str>) -> ProviderError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => ProviderError::NotFound { kind, id: message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => ProviderError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => ProviderError::Throttled,
        Some(c) if DEPENDENCY_CODES.contains(&c) => ProviderError::DependencyViolation,
        _ => ProviderError::Other {
            code: code.map(str::to_string),
            message,
        },
    }
}

fn suggestion_for_code(code: &str) -> Option<&'static str> {
    match code {
        "UnauthorizedOperation" | "AccessDenied" | "AccessDeniedException" => {
            Some("Check that the deploying identity has permission for this resource kind.")
        }
        "VcpuLimitExceeded" | "LimitExceededException" => {
            Some("A service quota was reached. Request an increase or remove unused resources.")
        }
        "InvalidParameterValue" | "ValidationException" => {
            Some("The provider rejected an attribute value. Check the declared configuration.")
        }
        _ => None,
    }
}
