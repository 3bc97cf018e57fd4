//! Error types for the OCM Backup Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Listing a resource the reconciler depends on failed
    #[error("unable to list {kind}: {source}")]
    DependencyList {
        kind: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Creating the Velero Backup for an intent failed
    #[error("unable to create Velero backup {key}: {source}")]
    JobCreate {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// Persisting a Backup status failed
    #[error("unable to update status {key}: {source}")]
    StatusUpdate {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// Propagating a Velero Backup onto its Backup failed
    #[error("unable to sync backup {key} from Velero backup: {source}")]
    IntentSync {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// No managed cluster qualified for backup
    #[error("no managedclusters found, nothing to backup")]
    NoTargets,

    /// Object does not exist
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    /// Object already exists or its resourceVersion is stale
    #[error("conflict on {kind} {key}: {message}")]
    Conflict {
        kind: &'static str,
        key: String,
        message: String,
    },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Reconcile pass was cancelled before the call completed
    #[error("reconcile cancelled")]
    Cancelled,

    /// Object is missing metadata the operator relies on
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an invalid object error
    pub fn invalid_object(msg: impl Into<String>) -> Self {
        Error::InvalidObject(msg.into())
    }

    /// Wrap `self` as the source of a contextual error.
    ///
    /// `Cancelled` passes through untouched so callers can tell an abandoned
    /// pass from a failed one.
    pub fn wrap(self, with: impl FnOnce(Box<Error>) -> Error) -> Self {
        match self {
            Error::Cancelled => Error::Cancelled,
            other => with(Box::new(other)),
        }
    }

    /// Whether the error (or the error it wraps) is a NotFound
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::JobCreate { source, .. }
            | Error::StatusUpdate { source, .. }
            | Error::IntentSync { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether the error (or the error it wraps) is a Conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            Error::JobCreate { source, .. }
            | Error::StatusUpdate { source, .. }
            | Error::IntentSync { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Map a kube error for `kind`/`key` onto the operator's taxonomy
    pub fn from_kube(kind: &'static str, key: impl Into<String>, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
                kind,
                key: key.into(),
            },
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
                kind,
                key: key.into(),
                message: resp.message,
            },
            other => Error::Kube(other),
        }
    }
}
