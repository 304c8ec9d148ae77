//! Error types for the standalone PostgreSQL operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Every pipeline step returns these unchanged up to the controller, which
//! classifies them to pick a requeue strategy.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Optimistic concurrency conflict: the object changed since it was read
    #[error("conflict writing {kind} {name}: object was modified concurrently")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Resource name (namespace/name for namespaced resources)
        name: String,
    },

    /// A resource that must exist was not found
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Resource name (namespace/name for namespaced resources)
        name: String,
    },

    /// Validation error for instance or config specs
    #[error("validation error for {instance}: {message}")]
    Validation {
        /// Name of the instance with invalid configuration
        instance: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.parameters.resources.storageCapacity")
        field: Option<String>,
    },

    /// Zero or more than one operator config matched a major version
    #[error("expected exactly one operator config for major version {major_version}, found {found}")]
    OperatorConfigLookup {
        /// Major version label value that was searched
        major_version: String,
        /// Number of matching configs
        found: usize,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A step read a context key that no earlier step populated.
    ///
    /// This is a programming defect, not a runtime condition.
    #[error("internal precondition violated: context key '{key}' is unset")]
    MissingContextKey {
        /// Name of the missing key
        key: String,
    },

    /// The reconcile deadline expired before the pipeline finished
    #[error("reconcile deadline of {seconds}s exceeded")]
    DeadlineExceeded {
        /// Configured deadline in seconds
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "store", "pipeline")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            instance: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with instance context
    pub fn validation_for(instance: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            instance: instance.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with instance context and field path
    pub fn validation_for_field(
        instance: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            instance: instance.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a conflict error for a resource
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-found error for a resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a missing-context-key error
    pub fn missing_context_key(key: impl Into<String>) -> Self {
        Self::MissingContextKey { key: key.into() }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec or config fix.
    /// A missing context key is a defect and retrying cannot help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Conflict { .. } => true,
            Error::NotFound { .. } => true,
            Error::Validation { .. } => false,
            Error::OperatorConfigLookup { .. } => true,
            Error::Serialization { .. } => false,
            Error::MissingContextKey { .. } => false,
            Error::DeadlineExceeded { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// True for optimistic-concurrency (stale write) failures
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// True when a resource was not found
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// True for internal precondition violations that must halt loudly
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, Error::MissingContextKey { .. })
    }

    /// Short, low-cardinality label for metrics
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "kube",
            Error::Conflict { .. } => "conflict",
            Error::NotFound { .. } => "not_found",
            Error::Validation { .. } => "validation",
            Error::OperatorConfigLookup { .. } => "config_lookup",
            Error::Serialization { .. } => "serialization",
            Error::MissingContextKey { .. } => "precondition",
            Error::DeadlineExceeded { .. } => "deadline",
            Error::Internal { .. } => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
