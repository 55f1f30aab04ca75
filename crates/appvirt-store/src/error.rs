//! Error types for the appvirt-store crate.

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the property store.  The fingerprint cache itself never
/// fails.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected a statement or could not be opened.
    #[error("property database: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file was written by a newer schema.
    #[error("unsupported property store schema version {found} (expected <= {supported})")]
    SchemaVersion { found: i64, supported: i64 },

    /// A key, value or TTL the store cannot accept.
    #[error("rejected property operation: {0}")]
    InvalidArgument(String),

    /// The blocking worker running a statement died, or a previous one
    /// panicked while holding the connection.
    #[error("property store worker lost: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_store() {
        let err = StoreError::InvalidArgument("ttl must be positive, got 0".into());
        assert_eq!(err.to_string(), "rejected property operation: ttl must be positive, got 0");

        let err = StoreError::SchemaVersion { found: 3, supported: 1 };
        assert!(err.to_string().contains("version 3"));
    }
}
