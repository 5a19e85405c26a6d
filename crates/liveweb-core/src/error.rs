use thiserror::Error;

/// Failures that escape classification.
///
/// Anything the fetcher can map onto a [`FetchOutcome`](crate::FetchOutcome)
/// is returned as an outcome, never as one of these. What remains is
/// unexpected and fatal for the call that produced it.
#[derive(Error, Debug)]
pub enum LiveWebError {
    /// HTTP transport failed in a way that is neither a connect failure nor
    /// a timeout (e.g. the connection reset while reading the body).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Local I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value was rejected.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LiveWebError {
    /// Returns true if this error is transient and worth retrying.
    ///
    /// The fetcher itself never retries; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            LiveWebError::HttpError(msg) => {
                msg.contains("reset") || msg.contains("closed") || msg.contains("broken pipe")
            }
            LiveWebError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            LiveWebError::ConfigError(_) => false,
        }
    }
}

/// Failure reported by a [`ContainerDecoder`](crate::traits::ContainerDecoder).
///
/// Every variant means the same thing to the fetcher: the live document
/// cannot be produced from this payload.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The container framing could not be parsed.
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// The record parsed but does not carry a usable resource.
    #[error("Record unavailable: {0}")]
    Unavailable(String),

    /// Reading the decompressed stream failed.
    #[error("Record read failed: {0}")]
    Io(#[from] std::io::Error),
}
