//! # Error Handling
//!
//! Error types shared across the provisioner: the normalized cluster error
//! taxonomy, repository errors wrapping SeaORM, and the service facade error.

use std::time::Duration;

use thiserror::Error;

/// Normalized failure classes for every cluster and chart-installer call.
///
/// Downstream logic branches on the class, never on the transport's error shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Unknown(String),
}

impl ClusterError {
    /// Timeout raised locally after waiting `after` for `operation`.
    pub fn timeout<S: AsRef<str>>(operation: S, after: Duration) -> Self {
        ClusterError::Timeout(format!(
            "{} timed out after {}s",
            operation.as_ref(),
            after.as_secs()
        ))
    }

    pub fn unknown<S: Into<String>>(detail: S) -> Self {
        ClusterError::Unknown(detail.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClusterError::Timeout(_))
    }
}

/// Errors raised by the repository layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("{0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl RepositoryError {
    pub fn database_error(err: sea_orm::DbErr) -> Self {
        RepositoryError::Database(err)
    }

    pub fn validation_error<S: Into<String>>(message: S) -> Self {
        RepositoryError::Validation(message.into())
    }

    /// True when the underlying database rejected a duplicate key.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            RepositoryError::Database(err) => is_unique_violation(err),
            _ => false,
        }
    }
}

/// Errors returned by the [`StoreService`](crate::service::StoreService) facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("store '{0}' not found")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unsupported engine '{0}'")]
    UnsupportedEngine(String),
    #[error("owner has reached the limit of {limit} stores")]
    QuotaExceeded { limit: u32 },
}

impl From<sea_orm::DbErr> for ServiceError {
    fn from(err: sea_orm::DbErr) -> Self {
        ServiceError::Repository(RepositoryError::Database(err))
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code_str = code.as_ref();
        code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str)
    })
}
