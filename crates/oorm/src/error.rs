use oorm_schema::{Hook, HookError, SchemaError};
use thiserror::Error;

/// Boxed backend error for [`Connection`](crate::Connection) implementations
/// other than the bundled MySQL one.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found")]
    NotFound,

    #[error("missing condition: refusing to {action} `{table}` without a filter or primary key")]
    MissingCondition { table: String, action: &'static str },

    #[error("missing table name")]
    MissingTableName,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[cfg(feature = "mysql")]
    #[error("mysql error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[source] BoxError),

    #[error("cannot read live schema of `{table}`: {message}")]
    LiveSchema { table: String, message: String },

    #[error("migration of `{table}` failed at `{statement}`: {source}")]
    Migration {
        table: String,
        statement: String,
        #[source]
        source: Box<Error>,
    },

    #[error("unknown relation `{name}` on `{table}`")]
    UnknownRelation { table: String, name: String },

    #[error("{hook:?} hook failed: {source}")]
    Hook {
        hook: Hook,
        #[source]
        source: HookError,
    },

    #[error("task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("transaction already finished")]
    TransactionFinished,

    #[error("nested transactions are not supported")]
    NestedTransaction,

    #[error("not inside a transaction")]
    NotInTransaction,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{}", join(.0))]
    Many(Vec<Error>),
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub(crate) fn missing_condition(table: &str, action: &'static str) -> Self {
        Error::MissingCondition {
            table: table.to_owned(),
            action,
        }
    }

    pub(crate) fn hook(hook: Hook, source: HookError) -> Self {
        Error::Hook { hook, source }
    }

    /// True for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    /// Every error carried by this one, flattening [`Error::Many`].
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Error> + '_> {
        match self {
            Error::Many(errors) => Box::new(errors.iter().flat_map(Error::iter)),
            other => Box::new(std::iter::once(other)),
        }
    }
}

/// Collects errors from concurrent tasks.
///
/// Every task runs to completion; the first error is kept in front and later
/// ones are appended after it.
#[derive(Debug, Default)]
pub(crate) struct ErrorCollector {
    errors: Vec<Error>,
}

impl ErrorCollector {
    pub(crate) fn push(&mut self, error: Error) {
        match error {
            Error::Many(errors) => self.errors.extend(errors),
            error => self.errors.push(error),
        }
    }

    /// Keep the value of `result`, or record its error.
    pub(crate) fn take<T>(&mut self, result: Result<T, Error>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.push(error);
                None
            }
        }
    }

    pub(crate) fn finish(mut self) -> Result<(), Error> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Many(self.errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_collector_keeps_first_error_in_front() {
        let mut errors = ErrorCollector::default();
        assert_eq!(errors.take(Ok::<_, Error>(1)), Some(1));
        errors.push(Error::NotFound);
        errors.push(Error::MissingTableName);

        let err = errors.finish().unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"record not found; missing table name");
        assert_eq!(err.iter().count(), 2);
    }

    #[test]
    fn test_collector_single_error_is_not_wrapped() {
        let mut errors = ErrorCollector::default();
        errors.push(Error::NotFound);
        assert!(errors.finish().unwrap_err().is_not_found());
    }

    #[test]
    fn test_collector_flattens_nested_many() {
        let mut errors = ErrorCollector::default();
        errors.push(Error::Many(vec![Error::NotFound, Error::MissingTableName]));
        errors.push(Error::InvalidParameter("x".into()));
        match errors.finish().unwrap_err() {
            Error::Many(all) => assert_eq!(all.len(), 3),
            other => panic!("expected Many, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_collector_is_ok() {
        assert!(ErrorCollector::default().finish().is_ok());
    }

    proptest! {
        #[test]
        fn test_collector_loses_no_error(n in 1usize..20) {
            let mut errors = ErrorCollector::default();
            for i in 0..n {
                errors.push(Error::InvalidParameter(i.to_string()));
            }
            let err = errors.finish().unwrap_err();
            prop_assert_eq!(err.iter().count(), n);
            prop_assert!(matches!(err.iter().next(), Some(Error::InvalidParameter(first)) if first == "0"));
        }
    }
}
