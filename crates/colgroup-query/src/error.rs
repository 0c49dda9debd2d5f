use colgroup_columnar::{ColumnType, StoreError};

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid filter operator {operator:?} for column {column}")]
    InvalidFilterOperator { column: String, operator: String },

    #[error("invalid filter value for {column} {operator}: {reason}")]
    InvalidFilterValue {
        column: String,
        operator: String,
        reason: String,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("unsupported aggregation {0:?} (expected \"sum\" or \"sum_na\")")]
    UnsupportedAggregation(String),

    #[error("one or more aggregation operations need to be defined")]
    EmptyAggregationSpec,

    #[error("type mismatch for {context}: expected {expected}, got {actual}")]
    TypeMismatch {
        context: String,
        expected: String,
        actual: ColumnType,
    },

    #[error("group space of {columns} columns exceeds the limit of {limit} combinations")]
    CardinalityOverflow { columns: usize, limit: u64 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    pub(crate) fn unknown_column(name: &str) -> Self {
        Self::InvalidArgument(format!("unknown column: {name}"))
    }
}
