//! Factorization-based group-by and predicate filtering over `colgroup-columnar` tables.
//!
//! A group-by factorizes each key column into dense labels (optionally reusing an on-disk
//! factor cache), combines them into one group identifier per row, and sums the measure
//! columns per group in a single streaming pass. Filter terms and expressions produce row
//! masks that can restrict a group-by or drive row iteration.

#![forbid(unsafe_code)]

mod aggregate;
mod cache;
mod engine;
mod error;
mod expr;
mod factorize;
mod filter;
mod group_index;
mod rows;

pub use crate::aggregate::{aggregate, AggOp, AggPlan, AggSpec};
pub use crate::cache::{build_entry, get_or_build, load_entry, load_or_factorize, EntryPaths};
pub use crate::engine::{QueryEngine, QueryOptions};
pub use crate::error::{QueryError, QueryResult};
pub use crate::expr::{evaluate, parse as parse_expr, BinaryOp, Evaluated, Expr, UnaryOp};
pub use crate::factorize::{factorize, factorize_into, Factorization, Factorizer, LabelSink};
pub use crate::filter::{where_terms, Term, TermValue};
pub use crate::group_index::GroupIndex;
pub use crate::rows::{parse_outcols, where_rows, Predicate, Row, RowIter, ROW_NUMBER};

pub use colgroup_columnar::{
    BitVec, ChunkData, ColumnSchema, ColumnType, ColumnarTable, ColumnarTableBuilder,
    TableOptions, Value,
};
