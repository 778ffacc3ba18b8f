//! Server error types.

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Socket-level failure after binding.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The global metrics recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}
