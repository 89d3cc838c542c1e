//! Error types for the update pipeline.

/// Top-level error type for checking, fetching, installing and patching.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Transport-level failure talking to the update server.
    #[error("network error: {0}")]
    Network(String),

    /// The remote update descriptor is missing, malformed or incomplete.
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// A version string could not be parsed.
    #[error("version error: {0}")]
    Version(String),

    /// Package download error.
    #[error("download error: {0}")]
    Download(String),

    /// Archive extraction or staging error.
    #[error("archive error: {0}")]
    Archive(String),

    /// Error while moving staged files over the installation.
    #[error("patch error: {0}")]
    Patch(String),

    /// The patcher or main executable could not be started.
    #[error("launch error: {0}")]
    Launch(String),

    /// Another update attempt is already in flight on this session.
    #[error("an update attempt is already in progress")]
    Busy,

    /// The attempt was cancelled by the caller.
    #[error("update cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UpdateError>;
