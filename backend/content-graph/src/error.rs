/// Error types for the content graph
///
/// `ContentError` is what every public operation returns. The transport
/// layer that sits in front of this crate maps `ErrorKind` to status codes.
use crate::models::{CommentId, PostId};
use thiserror::Error;

/// Result type for content-graph operations
pub type Result<T> = std::result::Result<T, ContentError>;

/// Result type for store-level operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures raised by a `ContentStore` backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database operation failed (connection, deadlock, timeout, constraint)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness constraint rejected the write
    #[error("Unique constraint violated")]
    UniqueViolation,

    /// Failure armed on the in-memory store
    #[error("Injected failure at {0}")]
    Injected(&'static str),
}

/// Application error taxonomy
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Post not found: {0}")]
    PostNotFound(PostId),

    #[error("Comment not found: {0}")]
    CommentNotFound(CommentId),

    #[error("Parent comment not found: {0}")]
    ParentNotFound(CommentId),

    #[error("Target already liked by user")]
    AlreadyLiked,

    #[error("Target not liked by user")]
    NotLiked,

    #[error("Maximum comment nesting level reached")]
    MaxNestingExceeded,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

/// Coarse classification used to pick a transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Rejected,
    Invalid,
    Unavailable,
}

impl ContentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContentError::PostNotFound(_)
            | ContentError::CommentNotFound(_)
            | ContentError::ParentNotFound(_) => ErrorKind::NotFound,
            ContentError::AlreadyLiked | ContentError::NotLiked => ErrorKind::Conflict,
            ContentError::MaxNestingExceeded => ErrorKind::Rejected,
            ContentError::InvalidInput(_) => ErrorKind::Invalid,
            ContentError::Store(_) => ErrorKind::Unavailable,
        }
    }

    /// Only store failures may be retried: a failed transaction has been
    /// rolled back in full, every other variant is a terminal rejection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContentError::Store(_))
    }
}

impl From<sqlx::Error> for ContentError {
    fn from(err: sqlx::Error) -> Self {
        ContentError::Store(StoreError::Database(err))
    }
}

impl From<validator::ValidationErrors> for ContentError {
    fn from(err: validator::ValidationErrors) -> Self {
        ContentError::InvalidInput(err.to_string())
    }
}
