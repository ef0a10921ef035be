//! Error types for the Spark History Server operator
//!
//! Errors carry enough structure for the reconciler to decide how a failed
//! pass is surfaced: as a durable validation condition, as a reference
//! condition that heals once the missing object appears, or as a transient
//! failure that is retried with backoff.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// How a failed reconcile pass is reported and retried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Local spec problem; durable condition, never retried on an unchanged spec
    Validation,
    /// A named external object is missing; durable condition, re-evaluated every pass
    Reference,
    /// Backing-store hiccup; requeued with backoff, escalated after repeated failures
    Transient,
}

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

    /// Validation error for a SparkHistoryServer spec
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the SparkHistoryServer with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.node.roleGroups.default.config")
        field: Option<String>,
    },

    /// An explicitly named external object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    Reference {
        /// Kind of the referenced object (S3Bucket, S3Connection, ...)
        kind: String,
        /// Namespace the object was looked up in (empty for cluster-scoped kinds)
        namespace: String,
        /// Name of the referenced object
        name: String,
    },

    /// Two configuration levels could not be merged
    #[error("cannot merge configuration at {path}: {message}")]
    Merge {
        /// JSON path where the conflict occurred
        path: String,
        /// Description of the conflict
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// The reconcile pass was cancelled while an external call was in flight
    #[error("reconcile pass cancelled")]
    Cancelled,

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "store", "controller")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a reference error for a missing named object
    pub fn reference(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::Reference {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a merge error at the given path
    pub fn merge(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Merge {
            path: path.into(),
            message: msg.into(),
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

    /// Classify the error for status reporting and retry scheduling
    ///
    /// Only 400 and 422 mean the generated object itself was rejected, which
    /// only a spec change can fix. Every other API error, including 401, 403
    /// (RBAC not bound yet), 404 and 410, is retried with backoff.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if matches!(ae.code, 400 | 422) => ErrorCategory::Validation,
                _ => ErrorCategory::Transient,
            },
            Error::Validation { .. } | Error::Merge { .. } | Error::Serialization { .. } => {
                ErrorCategory::Validation
            }
            Error::Reference { .. } => ErrorCategory::Reference,
            Error::Cancelled | Error::Internal { .. } => ErrorCategory::Transient,
        }
    }

    /// Check if this error is retryable with backoff
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Validation { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
