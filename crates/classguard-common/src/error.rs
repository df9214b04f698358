//! Error types for the classguard controllers
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the class or resource it concerns so a failed
//! reconcile can be traced back to the object that caused it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for classguard operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The object vanished from the store
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// `namespace/name` of the missing object
        name: String,
    },

    /// Optimistic concurrency failure: the stored resourceVersion moved on
    #[error("conflict updating {kind} {name}: object was modified")]
    Conflict {
        /// Kind of the object being updated
        kind: String,
        /// `namespace/name` of the object being updated
        name: String,
    },

    /// Schema validation error for a machine class
    #[error("validation error for {class}: {message}")]
    Validation {
        /// `kind namespace/name` of the invalid class
        class: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.subnetInfo.vnetName")
        field: Option<String>,
    },

    /// The dependency cache has not completed its initial list yet
    #[error("dependency cache for {kind} is not synced")]
    CacheNotSynced {
        /// Dependent kind whose watch has not finished listing
        kind: String,
    },

    /// A work queue key that cannot be split into namespace and name
    #[error("invalid object key {key:?}: expected namespace/name")]
    InvalidKey {
        /// The offending key
        key: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "watcher", "worker")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given kind and object
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error for the given kind and object
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error with class context and field path
    pub fn validation_for_field(
        class: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            class: class.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a cache-not-synced error for a dependent kind
    pub fn cache_not_synced(kind: impl Into<String>) -> Self {
        Self::CacheNotSynced { kind: kind.into() }
    }

    /// Create an invalid-key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
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

    /// Check if this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube { source } => matches!(source, kube::Error::Api(ae) if ae.code == 409),
            _ => false,
        }
    }

    /// Check if this error means the object no longer exists
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube { source } => matches!(source, kube::Error::Api(ae) if ae.code == 404),
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and key errors are not retryable (they need an object edit).
    /// Kubernetes errors are retried unless they are 4xx client errors other
    /// than 409 Conflict and 429 Too Many Requests.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae)
                    if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::NotFound { .. } => false,
            Error::Conflict { .. } => true,
            Error::Validation { .. } => false,
            Error::CacheNotSynced { .. } => true,
            Error::InvalidKey { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the class this error is associated with, if any
    pub fn class(&self) -> Option<&str> {
        match self {
            Error::Validation { class, .. } => Some(class),
            Error::Conflict { name, .. } | Error::NotFound { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Short label for metrics: transient or permanent
    pub fn error_type(&self) -> &'static str {
        if self.is_retryable() {
            "transient"
        } else {
            "permanent"
        }
    }
}
