// SPDX-License-Identifier: PMPL-1.0-or-later
//! Translator error types.

use docbridge_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while translating or executing a query.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("unknown aggregate function: {0}")]
    UnknownAggregate(String),

    #[error("malformed regular expression {0:?}: expected /pattern/flags")]
    MalformedRegex(String),

    #[error("invalid unwind path {0:?}: only one '.*.' marker is supported")]
    InvalidUnwindPath(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("{strategy} results cannot be consumed lazily")]
    IncompatibleMode { strategy: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueryError {
    /// True for errors caused by a malformed query rather than by the store
    /// or the caller's choice of consumption mode. These are never worth
    /// retrying.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            QueryError::UnknownOperator(_)
                | QueryError::UnknownAggregate(_)
                | QueryError::MalformedRegex(_)
                | QueryError::InvalidUnwindPath(_)
                | QueryError::InvalidUpdate(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programming_error_taxonomy() {
        assert!(QueryError::UnknownOperator("~~".into()).is_programming_error());
        assert!(QueryError::MalformedRegex("/abc".into()).is_programming_error());
        assert!(QueryError::InvalidUpdate("not a map".into()).is_programming_error());
        assert!(!QueryError::IncompatibleMode { strategy: "distinct" }.is_programming_error());
        assert!(
            !QueryError::Storage(StorageError::BackendUnavailable("down".into()))
                .is_programming_error()
        );
    }

    #[test]
    fn test_storage_error_passes_through_display() {
        let err: QueryError = StorageError::BackendUnavailable("connection reset".into()).into();
        assert_eq!(err.to_string(), "backend unavailable: connection reset");
    }
}
