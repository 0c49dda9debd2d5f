use crate::types::ColumnType;
use std::path::PathBuf;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("row length mismatch: expected {expected} values, got {actual}")]
    RowLength { expected: usize, actual: usize },

    #[error("invalid column name {0:?}: use letters, digits and underscores")]
    InvalidColumnName(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("corrupt column data: {0}")]
    Corrupt(String),

    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("{} is not a table directory", .0.display())]
    NotATable(PathBuf),
}
