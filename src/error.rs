//! Errors returned by mutating session operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::client::ClientError;
use crate::sessions::records::RecordError;

/// Errors raised by create, delete, flush and webhook changes.
///
/// Status queries never return this type; they fold failures into a
/// [`Validation`](crate::sessions::Validation) instead.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session identifier was empty or whitespace.
    #[error("session id is required")]
    MissingSessionId,

    /// The supplied webhook URL is not an absolute http(s) URL.
    #[error("invalid webhook url: {url}")]
    InvalidWebhookUrl {
        /// URL as supplied by the caller.
        url: String,
    },

    /// The session is not registered in this process.
    #[error("session not found: {session_id}")]
    NotFound {
        /// Identifier that was looked up.
        session_id: String,
    },

    /// The identifier would resolve outside the sessions root.
    #[error("session path escapes the sessions directory: {session_id}")]
    PathTraversal {
        /// Offending identifier.
        session_id: String,
    },

    /// Reading or writing the session records file failed.
    #[error(transparent)]
    Records(#[from] RecordError),

    /// A filesystem operation on session state failed.
    #[error("filesystem error at {}", path.display())]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The automation client rejected an operation.
    #[error("automation client error: {0}")]
    Client(#[from] ClientError),

    /// A bounded wait gave up.
    #[error("timed out after {} waiting for {operation}", humantime::format_duration(*after))]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
        /// Configured ceiling.
        after: Duration,
    },
}

impl SessionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SessionError::Io {
            path: path.into(),
            source,
        }
    }
}
