// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for Chef FS

use crate::ChefPath;
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type CfsResult<T> = Result<T, CfsError>;

/// The entry operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Children,
    Exists,
    Read,
    Write,
    CreateChild,
    Delete,
    Compare,
    Upload,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Children => "list children",
            Operation::Exists => "check existence",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::CreateChild => "create child",
            Operation::Delete => "delete",
            Operation::Compare => "compare",
            Operation::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Failure reported by a backend (HTTP server, filesystem, JSON parser)
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("permission '{permission}': {source}")]
    Permission {
        permission: String,
        #[source]
        source: Box<BackendError>,
    },

    #[error("{} failures: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<BackendError>),

    #[error("{0}")]
    Other(String),
}

fn join_errors(errors: &[BackendError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BackendError {
    /// HTTP status carried by this error, looking through permission wrappers
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Http { status, .. } => Some(*status),
            BackendError::Permission { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum CfsError {
    #[error("{path}: not found")]
    NotFound {
        path: ChefPath,
        #[source]
        cause: Option<BackendError>,
    },

    #[error("{path}: already exists")]
    AlreadyExists {
        path: ChefPath,
        #[source]
        cause: Option<BackendError>,
    },

    #[error("{path}: cannot {operation}: {reason}")]
    OperationNotAllowed {
        path: ChefPath,
        operation: Operation,
        reason: String,
    },

    #[error("{path}: failed to {operation}: {cause}")]
    OperationFailed {
        path: ChefPath,
        operation: Operation,
        #[source]
        cause: BackendError,
    },

    #[error("{path}: directory is not empty, delete recursively")]
    MustDeleteRecursively { path: ChefPath },

    #[error("{path}: cookbook version is frozen")]
    CookbookFrozen {
        path: ChefPath,
        #[source]
        cause: Option<BackendError>,
    },

    #[error("{path}: name must be '{expected}' (is '{actual}')")]
    NameMismatch {
        path: ChefPath,
        expected: String,
        actual: String,
    },
}

impl CfsError {
    pub fn not_found(path: &ChefPath) -> Self {
        CfsError::NotFound { path: path.clone(), cause: None }
    }

    pub fn already_exists(path: &ChefPath) -> Self {
        CfsError::AlreadyExists { path: path.clone(), cause: None }
    }

    pub fn not_allowed(path: &ChefPath, operation: Operation, reason: impl Into<String>) -> Self {
        CfsError::OperationNotAllowed {
            path: path.clone(),
            operation,
            reason: reason.into(),
        }
    }

    pub fn failed(path: &ChefPath, operation: Operation, cause: impl Into<BackendError>) -> Self {
        CfsError::OperationFailed {
            path: path.clone(),
            operation,
            cause: cause.into(),
        }
    }

    /// Translate a backend failure into the taxonomy by HTTP status:
    /// 404 is not-found, 409 is a conflict, anything else a failed operation.
    pub fn from_backend(path: &ChefPath, operation: Operation, cause: BackendError) -> Self {
        match cause.status() {
            Some(404) => CfsError::NotFound { path: path.clone(), cause: Some(cause) },
            Some(409) => CfsError::AlreadyExists { path: path.clone(), cause: Some(cause) },
            _ => CfsError::failed(path, operation, cause),
        }
    }

    /// Entry the error is about
    pub fn path(&self) -> &ChefPath {
        match self {
            CfsError::NotFound { path, .. }
            | CfsError::AlreadyExists { path, .. }
            | CfsError::OperationNotAllowed { path, .. }
            | CfsError::OperationFailed { path, .. }
            | CfsError::MustDeleteRecursively { path }
            | CfsError::CookbookFrozen { path, .. }
            | CfsError::NameMismatch { path, .. } => path,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CfsError::NotFound { .. })
    }

    /// Backend failures may succeed on retry; structural refusals never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CfsError::OperationFailed { .. })
    }
}
