// Error taxonomy shared by every provider.
//
// Lower-level driver errors (I/O, SQL, Git) are caught at the provider boundary and
// re-raised as one of the kinds below with a human-readable message, per the
// propagation policy: internal invariant violations fail fast, nothing crosses a
// provider boundary as a raw driver error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("merge conflict: {0}")]
    MergeConflict(String),
}

impl StoreError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    pub fn merge_conflict(msg: impl Into<String>) -> Self {
        Self::MergeConflict(msg.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Query(err.to_string())
    }
}

#[cfg(feature = "git-sync")]
impl From<git2::Error> for StoreError {
    fn from(err: git2::Error) -> Self {
        Self::Sync(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_category() {
        assert_eq!(
            StoreError::validation("bad id").to_string(),
            "validation error: bad id"
        );
        assert_eq!(
            StoreError::unsupported("beginTransaction").to_string(),
            "unsupported operation: beginTransaction"
        );
    }

    #[test]
    fn io_error_maps_to_connection() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Connection(_)));
    }
}
