use thiserror::Error;

/// Backing store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path escapes the store root.
    #[error("Path resolves outside the store root: {0}")]
    SandboxViolation(String),

    /// Native IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing directory or file.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A file operation targeted a directory or the reverse.
    #[error("Wrong entry kind at {0}")]
    WrongKind(String),

    /// The write would exceed the store's capacity.
    #[error("No space left: need {needed} bytes, {available} available")]
    NoSpace {
        /// Bytes the write requires.
        needed: u64,
        /// Bytes still free.
        available: u64,
    },
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
