use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Write conflict on {collection}/{id}, the transaction was aborted")]
    WriteConflict { collection: String, id: Uuid },

    #[error("Duplicate key {id} in {collection}")]
    DuplicateKey { collection: String, id: Uuid },

    #[error("Invalid transaction state: {0}")]
    TransactionState(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Errors a caller may resolve by retrying against fresh data.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::WriteConflict { .. })
    }
}

pub type DbResult<T> = Result<T, DatabaseError>;
