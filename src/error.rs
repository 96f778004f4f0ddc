//! Error types for index building and searching.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GeotierError>;

/// All errors surfaced by this crate.
///
/// Geometry edge cases (degenerate bounding boxes, unclosed shapes where
/// closure is required) are never errors; the affected assignment or
/// candidate is skipped instead.
#[derive(Debug, Error)]
pub enum GeotierError {
    /// Underlying file I/O failed. Fatal to a build; there is no retry.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file opened as an index does not start with the format magic.
    #[error("file is not a location index")]
    NotAnIndex,

    /// The index was built from a different dataset snapshot.
    #[error("location index does not match the dataset")]
    ChecksumMismatch,

    /// The index file or a temp record stream is structurally invalid.
    #[error("corrupt index data: {0}")]
    Corrupt(String),

    /// A sorted-only operation was called before sorting completed.
    #[error("record access before sort completed")]
    Unsorted,

    /// Indexed record access past the end of a sorted run.
    #[error("record index {index} out of bounds (len {len})")]
    OutOfBounds { index: u64, len: u64 },

    /// Invalid caller-supplied configuration or arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GeotierError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        GeotierError::Corrupt(msg.into())
    }
}
