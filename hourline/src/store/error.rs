use either::{Either, Left};
use thiserror::Error;

use crate::error::{MetricLabel, SharedString};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database call failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("unexpected value in column {column}: {reason}")]
    UnexpectedValue { column: String, reason: String },
}

impl MetricLabel for StoreError {
    fn slug(&self) -> SharedString {
        "store".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::Sqlx(sqlx::Error::PoolTimedOut) => Left("sqlx::pool_timeout".into()),
            Self::Sqlx(sqlx::Error::Io(_)) => Left("sqlx::io".into()),
            Self::Sqlx(sqlx::Error::Database(_)) => Left("sqlx::database".into()),
            Self::Sqlx(_) => Left("sqlx".into()),
            Self::UnexpectedValue { .. } => Left("unexpected_value".into()),
        }
    }
}
