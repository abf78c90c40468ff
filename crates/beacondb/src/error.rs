use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// Closed error taxonomy of the storage core.
///
/// Kinds are matched exhaustively at retry sites and by embedders mapping to
/// transport status codes; the core itself knows nothing about HTTP. The enum
/// is `Clone` because a chunk abort in the batch coordinator records the same
/// terminal error for every index the chunk covered.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    #[error("not found: {id}")]
    NotFound { id: Uuid },

    #[error("invalid user input: {0}")]
    InvalidUserInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Reserved; not currently produced by the core.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// A vector-index add/delete failed after the KV commit succeeded. The
    /// object store keeps its state; the index entry can be re-issued.
    #[error("vector index failure: {0}")]
    VectorIndexFailure(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidUserInput(msg.into())
    }

    pub fn not_found(id: Uuid) -> Self {
        Error::NotFound { id }
    }

    /// Only `Transient` is eligible for the shard-local retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        match err {
            redb::StorageError::Corrupted(msg) => Error::CorruptRecord(msg),
            other => Error::Transient(other.to_string()),
        }
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        match err {
            redb::DatabaseError::Storage(inner) => inner.into(),
            other => Error::Transient(other.to_string()),
        }
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        match err {
            redb::TransactionError::Storage(inner) => inner.into(),
            other => Error::Transient(other.to_string()),
        }
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        match err {
            redb::TableError::Storage(inner) => inner.into(),
            other => Error::Transient(other.to_string()),
        }
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        match err {
            redb::CommitError::Storage(inner) => inner.into(),
            other => Error::Transient(other.to_string()),
        }
    }
}
