//! Mapping of driver errors onto [`SyncError`].

use dualsync_engine::SyncError;

/// SQLSTATE of `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// Converts a driver error.
///
/// Unreachable servers and closed pools become [`SyncError::Connection`],
/// which aborts a run. Waiting too long for a pooled connection is a
/// [`SyncError::Timeout`]; like everything else it fails only the current
/// table.
pub fn store_error(err: sqlx::Error) -> SyncError {
    match &err {
        sqlx::Error::Database(db) => classify(db.code().as_deref(), db.message()),
        sqlx::Error::PoolTimedOut => SyncError::Timeout(err.to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SyncError::Connection(err.to_string()),
        _ => SyncError::store_fatal(err.to_string()),
    }
}

/// Classifies a server error by SQLSTATE.
fn classify(code: Option<&str>, message: &str) -> SyncError {
    let Some(code) = code else {
        return SyncError::store_fatal(message);
    };
    match code {
        "57014" => SyncError::Timeout(message.to_string()),
        "40001" | "40P01" => SyncError::store_retryable(format!("{message} ({code})")),
        "57P01" | "57P02" | "57P03" => SyncError::Connection(message.to_string()),
        c if c.starts_with("23") => SyncError::Constraint(message.to_string()),
        c if c.starts_with("08") => SyncError::Connection(message.to_string()),
        c if c.starts_with("53") => SyncError::store_retryable(format!("{message} ({code})")),
        _ => SyncError::store_fatal(format!("{message} ({code})")),
    }
}

/// True if the error says the queried table does not exist.
pub(crate) fn is_undefined_table(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNDEFINED_TABLE),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_classes() {
        assert!(matches!(
            classify(Some("57014"), "canceling statement due to statement timeout"),
            SyncError::Timeout(_)
        ));
        assert!(matches!(
            classify(Some("23503"), "violates foreign key constraint"),
            SyncError::Constraint(_)
        ));
        assert!(matches!(
            classify(Some("23505"), "duplicate key value"),
            SyncError::Constraint(_)
        ));
        assert!(matches!(
            classify(Some("08006"), "connection failure"),
            SyncError::Connection(_)
        ));
        assert!(matches!(
            classify(Some("57P01"), "terminating connection"),
            SyncError::Connection(_)
        ));
    }

    #[test]
    fn retry_classification() {
        assert!(classify(Some("40001"), "could not serialize access").is_retryable());
        assert!(classify(Some("53300"), "too many connections").is_retryable());

        let err = classify(Some("42703"), "column \"x\" does not exist");
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("42703"));

        assert!(!classify(None, "unknown").is_retryable());
    }

    #[test]
    fn driver_errors() {
        let timed_out = store_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(timed_out, SyncError::Timeout(_)));
        assert!(!timed_out.is_fatal());
        assert!(store_error(sqlx::Error::PoolClosed).is_fatal());
        assert!(!store_error(sqlx::Error::RowNotFound).is_fatal());
        assert!(!is_undefined_table(&sqlx::Error::RowNotFound));
    }
}
