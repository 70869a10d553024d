//! Typed errors for the engine
//!
//! Pipeline failures never cross the query boundary: they are collected as
//! `PredicateError`s in diagnostics. Edit and persistence failures are
//! returned to the caller as values.

use thiserror::Error;

use crate::data::datatable::RowId;

/// Errors raised while building or mutating the dataset index
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatasetError {
    #[error("row has no identity (id extractor returned nothing)")]
    MissingRowId,

    #[error("duplicate row id: {0}")]
    DuplicateRowId(RowId),

    #[error("row not found: {0}")]
    RowNotFound(RowId),

    #[error("edit would change the identity of row {0}")]
    IdentityChange(RowId),
}

/// Failure reported by a save/load collaborator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistenceError {
    #[error("save rejected for {row_id}.{field}: {reason}")]
    Rejected {
        row_id: RowId,
        field: String,
        reason: String,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored session is corrupt: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the edit transaction manager
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("row not found: {0}")]
    UnknownRow(RowId),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("column '{0}' is not editable")]
    NotEditable(String),

    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("no transaction with id {0}")]
    UnknownTransaction(u64),

    #[error("transaction {0} is already committing")]
    AlreadyCommitting(u64),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl EditError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EditError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Validation and persistence failures roll back; the rest reject the request up front
    pub fn is_rollback(&self) -> bool {
        matches!(self, EditError::Validation { .. } | EditError::Persistence(_))
    }
}

/// A custom filter predicate or comparator failed for one row
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("filter on '{column}' failed for row {row_id}: {message}")]
    Filter {
        column: String,
        row_id: RowId,
        message: String,
    },

    #[error("comparator on '{column}' failed: {message}")]
    Comparator { column: String, message: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration")]
    Serialize(#[from] toml::ser::Error),
}
