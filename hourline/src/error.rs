use std::borrow::Cow;
use std::fmt::Debug;

use either::{Either, Left, Right};
use thiserror::Error;

use crate::store::StoreError;

pub type SharedString = Cow<'static, str>;

/// Builds the hierarchical `error_type` label used on error counters, e.g. `rollup::store::sqlx`.
pub trait MetricLabel {
    fn slug(&self) -> SharedString;

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>>;

    fn label(&self) -> SharedString {
        match self.next() {
            Left(leaf) => format!("{}::{}", self.slug(), leaf).into(),
            Right(inner) => format!("{}::{}", self.slug(), inner.label()).into(),
        }
    }
}

/// Failure of a single aggregation attempt. Every variant is retried by the owning worker.
#[derive(Debug, Error)]
pub enum RollupError {
    /// A metric marked active that the rollup dispatch table does not recognize.
    #[error("unsupported metric kind: {0}")]
    UnsupportedMetric(String),

    #[error("rollup storage failed: {0}")]
    Store(#[from] StoreError),
}

impl MetricLabel for RollupError {
    fn slug(&self) -> SharedString {
        "rollup".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::UnsupportedMetric(_) => Left("unsupported_metric".into()),
            Self::Store(err) => Right(Box::new(err)),
        }
    }
}
