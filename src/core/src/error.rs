use thiserror::Error;

/// Watchz error types
#[derive(Error, Debug)]
pub enum WatchError {
    /// Invalid configuration (bad flag value, bad host URI). Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The container engine socket cannot be reached.
    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The container engine returned a non-2xx response.
    #[error("Engine error: HTTP {status}: {message}")]
    EngineError { status: u16, message: String },

    /// Registry authentication failed after token discovery and one retry.
    #[error("Registry authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Manifest request failed with an HTTP status.
    #[error("Manifest fetch failed: HTTP {status}: {message}")]
    ManifestFetchFailed { status: u16, message: String },

    /// Registry returned 200 but no Docker-Content-Digest header.
    #[error("No content digest returned for {0}")]
    DigestNotFound(String),

    /// Image reference string could not be parsed.
    #[error("Invalid image reference: {0}")]
    InvalidImageReference(String),

    /// Digest string is not a supported algorithm:hex form.
    #[error("Invalid digest format: {0}")]
    InvalidDigestFormat(String),

    /// Manifest or token response body could not be interpreted.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Notification dispatch error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for WatchError {
    fn from(err: serde_json::Error) -> Self {
        WatchError::Serialization(err.to_string())
    }
}

impl WatchError {
    /// Whether the retry policy may re-attempt the operation.
    ///
    /// Transient: connection reset/refused/timeout, unexpected EOF, and 5xx
    /// manifest failures. Everything else (4xx, parse errors, auth failures)
    /// is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            WatchError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::Interrupted
            ),
            WatchError::Timeout(_) => true,
            WatchError::ManifestFetchFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for watchz operations
pub type Result<T> = std::result::Result<T, WatchError>;
