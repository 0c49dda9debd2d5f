use crate::atomic::write_file_atomic;
use crate::column::{ChunkCacheConfig, Column, ColumnWriter};
use crate::chunk::ChunkData;
use crate::error::{StoreError, StoreResult};
use crate::types::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "table.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// Rows per chunk. Every column of a table shares the same chunk boundaries.
    pub chunk_len: usize,
    pub cache: ChunkCacheConfig,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            chunk_len: 65_536,
            cache: ChunkCacheConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TableManifest {
    columns: Vec<ColumnSchema>,
    rows: usize,
    chunk_len: usize,
}

fn validate_schema(schema: &[ColumnSchema]) -> StoreResult<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(schema.len());
    for (idx, col) in schema.iter().enumerate() {
        let valid = !col.name.is_empty()
            && col.name.chars().all(|c| c.is_alphanumeric() || c == '_');
        if !valid {
            return Err(StoreError::InvalidColumnName(col.name.clone()));
        }
        if index.insert(col.name.clone(), idx).is_some() {
            return Err(StoreError::DuplicateColumn(col.name.clone()));
        }
    }
    Ok(index)
}

/// An ordered, named collection of equally long columns.
///
/// A table created with [`ColumnarTableBuilder::create`] (or reopened with
/// [`ColumnarTable::open`]) lives in a root directory; that directory is its persistent identity.
#[derive(Debug)]
pub struct ColumnarTable {
    schema: Vec<ColumnSchema>,
    columns: Vec<Column>,
    column_index: HashMap<String, usize>,
    rows: usize,
    options: TableOptions,
    rootdir: Option<PathBuf>,
}

impl ColumnarTable {
    /// Whether `rootdir` holds a complete persisted table.
    pub fn exists(rootdir: impl AsRef<Path>) -> bool {
        rootdir.as_ref().join(MANIFEST_FILE).is_file()
    }

    pub fn open(rootdir: impl AsRef<Path>, options: TableOptions) -> StoreResult<Self> {
        let rootdir = rootdir.as_ref().to_path_buf();
        if !Self::exists(&rootdir) {
            return Err(StoreError::NotATable(rootdir));
        }
        let manifest: TableManifest =
            serde_json::from_slice(&fs::read(rootdir.join(MANIFEST_FILE))?)?;
        let column_index = validate_schema(&manifest.columns)?;

        let mut columns = Vec::with_capacity(manifest.columns.len());
        for schema in &manifest.columns {
            let column = Column::open(rootdir.join(&schema.name), options.cache)?;
            if column.column_type() != schema.column_type {
                return Err(StoreError::TypeMismatch {
                    column: schema.name.clone(),
                    expected: schema.column_type,
                    actual: column.column_type(),
                });
            }
            if column.len() != manifest.rows || column.chunk_len() != manifest.chunk_len {
                return Err(StoreError::Corrupt(format!(
                    "column {} has {} rows in chunks of {}, table expects {} in chunks of {}",
                    schema.name,
                    column.len(),
                    column.chunk_len(),
                    manifest.rows,
                    manifest.chunk_len
                )));
            }
            columns.push(column);
        }

        log::debug!(
            "opened table {} ({} rows, {} columns)",
            rootdir.display(),
            manifest.rows,
            columns.len()
        );
        Ok(Self {
            schema: manifest.columns,
            columns,
            column_index,
            rows: manifest.rows,
            options: TableOptions {
                chunk_len: manifest.chunk_len,
                cache: options.cache,
            },
            rootdir: Some(rootdir),
        })
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.schema.iter().map(|c| c.name.as_str())
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    pub fn chunk_len(&self) -> usize {
        self.options.chunk_len
    }

    pub fn chunk_count(&self) -> usize {
        (self.rows + self.options.chunk_len - 1) / self.options.chunk_len
    }

    pub fn rootdir(&self) -> Option<&Path> {
        self.rootdir.as_deref()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    pub fn column(&self, name: &str) -> StoreResult<&Column> {
        self.column_index(name)
            .map(|idx| &self.columns[idx])
            .ok_or_else(|| StoreError::UnknownColumn(name.to_owned()))
    }

    pub fn column_at(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    /// Directory of a persisted column (`<rootdir>/<name>`).
    pub fn column_dir(&self, name: &str) -> Option<PathBuf> {
        let idx = self.column_index(name)?;
        self.columns[idx].dir().map(Path::to_path_buf)
    }

    pub fn get_cell(&self, row: usize, col: usize) -> StoreResult<Value> {
        let column = self
            .columns
            .get(col)
            .ok_or_else(|| StoreError::UnknownColumn(format!("#{col}")))?;
        column.get(row)
    }
}

/// Builds a [`ColumnarTable`] either row by row or column by column.
pub struct ColumnarTableBuilder {
    schema: Vec<ColumnSchema>,
    options: TableOptions,
    writers: Vec<ColumnWriter>,
    rootdir: Option<PathBuf>,
}

impl ColumnarTableBuilder {
    /// In-memory table builder.
    pub fn new(schema: Vec<ColumnSchema>, options: TableOptions) -> Self {
        let writers = schema
            .iter()
            .map(|c| ColumnWriter::in_memory(c.name.clone(), c.column_type, options.chunk_len))
            .collect();
        Self {
            schema,
            options,
            writers,
            rootdir: None,
        }
    }

    /// Builder for a table persisted under `rootdir`, which must not already hold a table.
    pub fn create(
        rootdir: impl AsRef<Path>,
        schema: Vec<ColumnSchema>,
        options: TableOptions,
    ) -> StoreResult<Self> {
        let rootdir = rootdir.as_ref().to_path_buf();
        validate_schema(&schema)?;
        if ColumnarTable::exists(&rootdir) {
            return Err(StoreError::AlreadyExists(rootdir));
        }
        fs::create_dir_all(&rootdir)?;
        let writers = schema
            .iter()
            .map(|c| {
                ColumnWriter::create(
                    rootdir.join(&c.name),
                    c.column_type,
                    options.chunk_len,
                    options.cache,
                )
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Self {
            schema,
            options,
            writers,
            rootdir: Some(rootdir),
        })
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn append_row(&mut self, row: &[Value]) -> StoreResult<()> {
        if row.len() != self.writers.len() {
            return Err(StoreError::RowLength {
                expected: self.writers.len(),
                actual: row.len(),
            });
        }
        // Check every value before writing any, so a bad row leaves the columns aligned.
        for (schema, value) in self.schema.iter().zip(row) {
            if value.column_type() != schema.column_type {
                return Err(StoreError::TypeMismatch {
                    column: schema.name.clone(),
                    expected: schema.column_type,
                    actual: value.column_type(),
                });
            }
        }
        for (writer, value) in self.writers.iter_mut().zip(row) {
            writer.push(value.clone())?;
        }
        Ok(())
    }

    /// Append a run of values to a single column. Columns must line up again by `finalize`.
    pub fn extend_column(&mut self, col: usize, values: &ChunkData) -> StoreResult<()> {
        let writer = self
            .writers
            .get_mut(col)
            .ok_or_else(|| StoreError::UnknownColumn(format!("#{col}")))?;
        writer.extend_chunk(values)
    }

    pub fn finalize(self) -> StoreResult<ColumnarTable> {
        let column_index = validate_schema(&self.schema)?;
        let rows = self.writers.first().map(ColumnWriter::len).unwrap_or(0);
        if let Some(bad) = self.writers.iter().find(|w| w.len() != rows) {
            return Err(StoreError::RowLength {
                expected: rows,
                actual: bad.len(),
            });
        }

        let columns = self
            .writers
            .into_iter()
            .map(ColumnWriter::finish)
            .collect::<StoreResult<Vec<_>>>()?;

        if let Some(rootdir) = &self.rootdir {
            let manifest = TableManifest {
                columns: self.schema.clone(),
                rows,
                chunk_len: self.options.chunk_len.max(1),
            };
            write_file_atomic(
                &rootdir.join(MANIFEST_FILE),
                &serde_json::to_vec_pretty(&manifest)?,
            )?;
            log::debug!("persisted table {} ({rows} rows)", rootdir.display());
        }

        Ok(ColumnarTable {
            schema: self.schema,
            columns,
            column_index,
            rows,
            options: TableOptions {
                chunk_len: self.options.chunk_len.max(1),
                cache: self.options.cache,
            },
            rootdir: self.rootdir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn schema() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("cat", ColumnType::String),
            ColumnSchema::new("x", ColumnType::Float64),
        ]
    }

    fn options() -> TableOptions {
        TableOptions {
            chunk_len: 4,
            cache: ChunkCacheConfig { max_entries: 2 },
        }
    }

    #[test]
    fn bad_row_leaves_columns_aligned() {
        let mut builder = ColumnarTableBuilder::new(schema(), options());
        builder
            .append_row(&[Value::from("A"), Value::Float64(1.0)])
            .unwrap();
        let err = builder
            .append_row(&[Value::from("B"), Value::Int64(2)])
            .unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        assert!(matches!(
            builder.append_row(&[Value::from("B")]),
            Err(StoreError::RowLength { expected: 2, actual: 1 })
        ));

        let table = builder.finalize().unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.get_cell(0, 0).unwrap(), Value::String(Arc::from("A")));
    }

    #[test]
    fn persisted_table_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("t");
        let mut builder = ColumnarTableBuilder::create(&root, schema(), options()).unwrap();
        for i in 0..10 {
            builder
                .append_row(&[Value::from(["A", "B"][i % 2]), Value::Float64(i as f64)])
                .unwrap();
        }
        assert!(!ColumnarTable::exists(&root));
        let table = builder.finalize().unwrap();
        assert!(ColumnarTable::exists(&root));
        assert_eq!(table.chunk_count(), 3);

        let reopened = ColumnarTable::open(&root, TableOptions::default()).unwrap();
        assert_eq!(reopened.chunk_len(), 4);
        assert_eq!(reopened.row_count(), 10);
        assert_eq!(reopened.names().collect::<Vec<_>>(), vec!["cat", "x"]);
        assert_eq!(reopened.get_cell(9, 1).unwrap(), Value::Float64(9.0));
        assert_eq!(reopened.column_dir("x"), Some(root.join("x")));

        assert!(matches!(
            ColumnarTableBuilder::create(&root, schema(), options()),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn column_wise_build_checks_lengths() {
        let mut builder = ColumnarTableBuilder::new(schema(), options());
        builder
            .extend_column(0, &ChunkData::String(vec![Arc::from("a")]))
            .unwrap();
        assert!(matches!(
            builder.finalize(),
            Err(StoreError::RowLength { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn schema_validation() {
        let dup = vec![
            ColumnSchema::new("a", ColumnType::Int32),
            ColumnSchema::new("a", ColumnType::Int64),
        ];
        assert!(matches!(
            ColumnarTableBuilder::new(dup, options()).finalize(),
            Err(StoreError::DuplicateColumn(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        let bad = vec![ColumnSchema::new("../escape", ColumnType::Int32)];
        assert!(matches!(
            ColumnarTableBuilder::create(dir.path(), bad, options()),
            Err(StoreError::InvalidColumnName(_))
        ));
    }
}
