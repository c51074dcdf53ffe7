use sqlx::error::{DatabaseError, ErrorKind};

use crate::application::repos::RepoError;

/// Postgres `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => map_database_error(&*db),
        other => RepoError::from_persistence(other),
    }
}

fn map_database_error(db: &dyn DatabaseError) -> RepoError {
    let constraint = db.constraint().unwrap_or("unknown").to_string();
    match db.kind() {
        ErrorKind::UniqueViolation => RepoError::Duplicate { constraint },
        ErrorKind::ForeignKeyViolation => RepoError::InvalidInput {
            message: db.message().to_string(),
        },
        ErrorKind::CheckViolation | ErrorKind::NotNullViolation => RepoError::Integrity {
            message: format!("{} ({constraint})", db.message()),
        },
        _ if db.code().as_deref() == Some(QUERY_CANCELED) => RepoError::Timeout,
        _ => RepoError::from_persistence(db.message()),
    }
}
