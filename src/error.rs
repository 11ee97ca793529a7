//! Error types for flowplane.

/// Result type alias using [`FlowError`].
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A required argument was missing or malformed. No state was mutated.
    #[error("invalid argument for {operation}: {message}")]
    InvalidArgument {
        /// The attempted operation.
        operation: &'static str,
        /// What was wrong with the input.
        message: String,
    },

    /// The named stream does not exist.
    #[error("stream not found: {stream} (during {operation})")]
    StreamNotFound {
        /// Stream name.
        stream: String,
        /// The attempted operation.
        operation: &'static str,
    },

    /// The requested release version does not exist for the stream.
    #[error("release not found: {stream} version {version}")]
    ReleaseNotFound {
        /// Stream name.
        stream: String,
        /// Requested version.
        version: u64,
    },

    /// A stream with this name already exists.
    #[error("stream already exists: {stream}")]
    DuplicateStream {
        /// Stream name.
        stream: String,
    },

    /// The operation is not permitted in the stream's current state.
    #[error("conflict on {stream} during {operation}: {reason}")]
    Conflict {
        /// Stream name.
        stream: String,
        /// The attempted operation.
        operation: &'static str,
        /// Why the operation was rejected.
        reason: String,
    },

    /// Rollback target version is out of range or absent from history.
    #[error("invalid rollback version {version} for {stream}")]
    InvalidVersion {
        /// Stream name.
        stream: String,
        /// Requested target version.
        version: u64,
    },

    /// The deploy backend reported failure; the deployment is now FAILED.
    #[error("deploy failed for {stream}: {message}")]
    DeployFailed {
        /// Stream name.
        stream: String,
        /// Backend failure detail.
        message: String,
    },

    /// The deploy backend rejected an update; the prior release is retained.
    #[error("update failed for {stream}: {message}")]
    UpdateFailed {
        /// Stream name.
        stream: String,
        /// Backend failure detail.
        message: String,
    },

    /// An optimistic-lock write clashed with a concurrent modification.
    #[error("concurrent modification of {stream}")]
    ConcurrentModification {
        /// Stream name.
        stream: String,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Deploy backend communication error (transient, retried).
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Create an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation,
            message: message.into(),
        }
    }

    /// Create a not-found error for a stream.
    #[must_use]
    pub fn not_found(stream: impl Into<String>, operation: &'static str) -> Self {
        Self::StreamNotFound {
            stream: stream.into(),
            operation,
        }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(
        stream: impl Into<String>,
        operation: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            stream: stream.into(),
            operation,
            reason: reason.into(),
        }
    }

    /// Create a backend error.
    #[must_use]
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry of the failed backend call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Http(_))
    }
}
