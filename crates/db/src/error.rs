use oracle_core::error::PersistenceError;

/// Connection resets, pool timeouts, and I/O errors are treated as
/// transient (worth retrying at the call site); everything else — a
/// constraint violation, a bad column mapping — is a hard `Other`.
pub fn map_sqlx_error(err: sqlx::Error) -> PersistenceError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PersistenceError::Transient(err.to_string())
        }
        _ => PersistenceError::Other(err.to_string()),
    }
}
