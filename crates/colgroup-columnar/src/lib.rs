//! Chunked columnar storage for colgroup.
//!
//! This crate focuses on:
//! - Fixed-type columns split into equally sized chunks shared by every column of a table.
//! - Optional persistence to a directory (one sub-directory per column), decoded on demand
//!   through an LRU of chunks so tables larger than memory can be scanned.
//! - Streaming writers, positional reads and boolean-mask filtered iteration.

#![forbid(unsafe_code)]

mod atomic;
mod bitmap;
mod chunk;
mod column;
mod error;
mod table;
mod types;

pub use crate::atomic::{commit_dir, stage_dir, write_file_atomic};
pub use crate::bitmap::{BitVec, MaskRows};
pub use crate::chunk::ChunkData;
pub use crate::column::{CacheStats, ChunkCacheConfig, Column, ColumnWriter, MaskedIter};
pub use crate::error::{StoreError, StoreResult};
pub use crate::table::{ColumnSchema, ColumnarTable, ColumnarTableBuilder, TableOptions};
pub use crate::types::{ColumnType, Value};
