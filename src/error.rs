use thiserror::Error;

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors produced by the archive engine.
///
/// `Format` means the file is not a valid archive and decoding cannot
/// continue. `Io` covers short reads and writes; inside a record decode a
/// short read means the position tracking is gone, so callers should treat
/// it as end-of-usable-data rather than skip-and-continue. `State` is a
/// mutation precondition failure and leaves the file unmodified.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Bad magic, unsupported version, or a block-table invariant violation
    #[error("invalid archive: {0}")]
    Format(String),

    /// Short read/write or any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Mutation precondition violated; the file was left unmodified
    #[error("invalid mutation: {0}")]
    State(String),

    /// A null-terminated string ran past the end of the input
    #[error("unterminated string before end of input")]
    TruncatedInput,
}

impl ArchiveError {
    pub fn format(msg: impl Into<String>) -> Self {
        ArchiveError::Format(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        ArchiveError::State(msg.into())
    }
}
