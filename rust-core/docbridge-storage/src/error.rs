// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types for the DocBridge collection abstraction.
//
// Covers the failure modes a document collection may report back to the
// translator: commands it cannot interpret, operators it does not support,
// values of the wrong shape for an update operator, and an unavailable
// backend. The translator passes these through to its caller unmodified.

use thiserror::Error;

/// Errors that can occur when a collection executes a command.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The command document is structurally invalid.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The command uses an operator this backend does not implement.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// An update operator was applied to a value of the wrong type.
    #[error("type mismatch at '{path}': {reason}")]
    TypeMismatch {
        /// Dotted path of the offending field.
        path: String,
        /// What was expected at that path.
        reason: String,
    },

    /// The backend is not available (e.g., connection lost).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<regex::Error> for StorageError {
    fn from(e: regex::Error) -> Self {
        StorageError::InvalidCommand(format!("bad regular expression: {e}"))
    }
}
