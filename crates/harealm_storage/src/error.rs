//! Error types for storage operations.

use crate::cell::{ColumnType, RowKey};
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The storage image is corrupted or has an unknown layout.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The group could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The named table does not exist.
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// A table with this name already exists.
    #[error("table already exists: {0}")]
    DuplicateTable(String),

    /// The column does not exist in the table.
    #[error("no such column {column} in table {table}")]
    NoSuchColumn {
        /// Table name.
        table: String,
        /// Column name or `#index`.
        column: String,
    },

    /// A column with this name already exists.
    #[error("column {column} already exists in table {table}")]
    DuplicateColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The row key is not live in the table.
    #[error("no such row {row} in table {table}")]
    NoSuchRow {
        /// Table name.
        table: String,
        /// The missing row key.
        row: RowKey,
    },

    /// A cell of the wrong type was written to a column.
    #[error("type mismatch in {table}.{column}: expected {expected:?}")]
    TypeMismatch {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// The column's declared type.
        expected: ColumnType,
    },

    /// A search index was requested on a column type that cannot be indexed.
    #[error("column {table}.{column} cannot be indexed")]
    NotIndexable {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A write was attempted on a read-only store.
    #[error("storage is read-only")]
    ReadOnly,
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a codec error.
    pub fn codec(message: impl ToString) -> Self {
        Self::Codec(message.to_string())
    }
}
