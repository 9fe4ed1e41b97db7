use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Coarse classification shared by every failure the mirror layer can see.
/// Logged as the `kind` field so persistence, transient and validation
/// failures stay distinguishable even where they are recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Local store unavailable, quota exceeded, unreadable or unwritable.
    Persistence,
    /// Network failure, timeout, 5xx, 429 or an undecodable response.
    Transient,
    /// The remote understood the request and refused it (4xx).
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Persistence => "persistence",
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
        };
        f.write_str(s)
    }
}

/// Local persistence error. Never surfaced to the user on its own.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Local store unavailable: {0}")]
    Unavailable(String),

    #[error("Local store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Local store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A partial update for a record the mirror does not hold.
    #[error("Record {id} is not in local mirror {key}")]
    NotMirrored { key: String, id: i64 },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Persistence
    }
}

/// Remote API adapter error. The adapter never retries; callers decide.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Response decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Http(_) | RemoteError::Decode(_) => ErrorKind::Transient,
            RemoteError::Api { status, .. } => classify_status(*status),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Whether sending the same request again can help. A decode failure
    /// means the server already answered 2xx; resending could duplicate a
    /// create.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::Decode(_)) && self.is_transient()
    }
}

/// 408, 429 and 5xx are worth another attempt; every other non-2xx is the
/// caller's fault.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        408 | 429 => ErrorKind::Transient,
        s if s >= 500 => ErrorKind::Transient,
        _ => ErrorKind::Validation,
    }
}

/// Failure of a reconciling mutation as seen by the editor.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Cannot create record {id}: missing required field `{field}`")]
    Incomplete { id: i64, field: &'static str },

    #[error("Write rejected by both channels (local: {local}; remote: {remote})")]
    Rejected {
        local: StoreError,
        remote: RemoteFailure,
    },

    #[error("Remote rejected the write: {0}")]
    RemoteRejected(RemoteError),

    #[error("Application {0} is not interviewing; interview stages are not accepted")]
    NotInterviewing(i64),
}

impl MutationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MutationError::Incomplete { .. } | MutationError::NotInterviewing(_) => {
                ErrorKind::Validation
            }
            MutationError::Rejected { remote, .. } => remote.kind(),
            MutationError::RemoteRejected(e) => e.kind(),
        }
    }
}

/// Why the remote half of a mutation did not land.
#[derive(Debug, Error)]
pub enum RemoteFailure {
    #[error("{0}")]
    Error(#[from] RemoteError),

    /// Client-only namespace; there is no remote channel to fall back on.
    #[error("no remote route for this collection")]
    NoRoute,
}

impl RemoteFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteFailure::Error(e) => e.kind(),
            RemoteFailure::NoRoute => ErrorKind::Persistence,
        }
    }
}
