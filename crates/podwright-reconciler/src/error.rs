// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use podwright_core::PodwrightError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a cluster client
#[derive(Error, Debug, Diagnostic)]
pub enum ClusterError {
    /// The pod does not exist
    #[error("Pod {namespace}/{name} not found")]
    #[diagnostic(code(podwright::cluster::not_found))]
    NotFound {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
    },

    /// A create collided with an existing pod
    #[error("Pod {namespace}/{name} already exists")]
    #[diagnostic(code(podwright::cluster::already_exists))]
    AlreadyExists {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
    },

    /// The write carried a stale resourceVersion
    #[error("Conflicting write: {message}")]
    #[diagnostic(
        code(podwright::cluster::conflict),
        help("The object was modified concurrently. Re-read it and retry")
    )]
    Conflict {
        #[allow(unused)]
        message: String,
    },

    /// The API server refused a well-formed request
    #[error("Request rejected with status {status} ({reason}): {message}")]
    #[diagnostic(code(podwright::cluster::rejected))]
    Rejected {
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        message: String,
    },

    /// The request did not complete
    #[error("Transport error: {message}")]
    #[diagnostic(
        code(podwright::cluster::transport),
        help("Check that the API server URL is correct and reachable")
    )]
    Transport {
        #[allow(unused)]
        message: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode response: {message}")]
    #[diagnostic(code(podwright::cluster::decode))]
    Decode {
        #[allow(unused)]
        message: String,
    },
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    pub fn not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn rejected(status: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Coarse class of a reconcile failure, for callers deciding what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or ambiguous spec, rejected before any cluster call
    Validation,
    /// The pod is gone; drift, not a failure
    NotFound,
    /// Concurrent modification; re-read and retry
    Conflict,
    /// Readiness not reached within the bound
    Timeout,
    /// The caller aborted
    Cancelled,
    /// Not retryable
    Fatal,
    /// The request did not complete
    Transport,
}

/// Reconciler error type
#[derive(Error, Debug, Diagnostic)]
pub enum ReconcileError {
    #[error("Pod {id} not found")]
    #[diagnostic(
        code(podwright::reconcile::not_found),
        help("The pod was deleted outside of Podwright. Re-create it with `podwright apply`")
    )]
    NotFound {
        #[allow(unused)]
        id: String,
    },

    #[error("Conflict on pod {id}: {message}")]
    #[diagnostic(
        code(podwright::reconcile::conflict),
        help("The pod was modified concurrently. Read it again and retry the operation")
    )]
    Conflict {
        #[allow(unused)]
        id: String,
        #[allow(unused)]
        message: String,
    },

    #[error("Timed out after {waited:?} waiting for pod {id} to {operation}: {last_status}")]
    #[diagnostic(
        code(podwright::reconcile::timeout),
        help("The pod may still become ready. Inspect it with `podwright read` before deciding to keep or delete it")
    )]
    Timeout {
        #[allow(unused)]
        id: String,
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        waited: Duration,
        #[allow(unused)]
        last_status: String,
    },

    #[error("Cancelled while waiting for pod {id} to {operation}")]
    #[diagnostic(
        code(podwright::reconcile::cancelled),
        help("Changes the cluster already accepted are not rolled back")
    )]
    Cancelled {
        #[allow(unused)]
        id: String,
        #[allow(unused)]
        operation: String,
    },

    #[error("Failed to {operation} pod {id}: {message}")]
    #[diagnostic(code(podwright::reconcile::fatal))]
    Fatal {
        #[allow(unused)]
        id: String,
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },

    #[error("Cluster call '{operation}' failed for pod {id}")]
    #[diagnostic(code(podwright::reconcile::cluster))]
    Cluster {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        id: String,
        #[source]
        source: ClusterError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] PodwrightError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

impl ReconcileError {
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    pub fn conflict(id: impl ToString, message: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(
        id: impl ToString,
        operation: impl Into<String>,
        waited: Duration,
        last_status: impl Into<String>,
    ) -> Self {
        Self::Timeout {
            id: id.to_string(),
            operation: operation.into(),
            waited,
            last_status: last_status.into(),
        }
    }

    pub fn cancelled(id: impl ToString, operation: impl Into<String>) -> Self {
        Self::Cancelled {
            id: id.to_string(),
            operation: operation.into(),
        }
    }

    pub fn fatal(id: impl ToString, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            id: id.to_string(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Attach operation and identity to a cluster failure
    pub fn cluster(operation: impl Into<String>, id: impl ToString, source: ClusterError) -> Self {
        Self::Cluster {
            operation: operation.into(),
            id: id.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Fatal { .. } => ErrorKind::Fatal,
            Self::Cluster { source, .. } => match source {
                ClusterError::NotFound { .. } => ErrorKind::NotFound,
                ClusterError::AlreadyExists { .. } | ClusterError::Conflict { .. } => {
                    ErrorKind::Conflict
                }
                ClusterError::Rejected { .. } => ErrorKind::Fatal,
                ClusterError::Transport { .. } | ClusterError::Decode { .. } => ErrorKind::Transport,
            },
            Self::Core(e) if e.is_validation() => ErrorKind::Validation,
            Self::Core(_) => ErrorKind::Fatal,
        }
    }
}
