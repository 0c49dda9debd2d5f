//! On-disk factorizations stored next to the columns of a persisted table.
//!
//! The entry for column directory `<root>/<col>` is the pair `<root>/<col>.factor` (labels, an
//! Int64 column) and `<root>/<col>.values` (unique values, same type as the column). Each part
//! is written into a hidden staging directory beside its destination and renamed into place,
//! values before labels, so a reader that sees a complete labels part also sees its values. An
//! entry with a missing, incomplete or inconsistent part is treated as absent.

use crate::error::{QueryError, QueryResult};
use crate::factorize::{factorize, factorize_into, Factorization};
use colgroup_columnar::{
    commit_dir, stage_dir, ChunkData, Column, ColumnType, ColumnWriter, ColumnarTable,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const FACTOR_SUFFIX: &str = "factor";
const VALUES_SUFFIX: &str = "values";

/// Paths of the two parts of a column's cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPaths {
    pub factor: PathBuf,
    pub values: PathBuf,
}

impl EntryPaths {
    pub fn for_column_dir(column_dir: &Path) -> Self {
        Self {
            factor: sibling(column_dir, FACTOR_SUFFIX),
            values: sibling(column_dir, VALUES_SUFFIX),
        }
    }

    pub fn is_complete(&self) -> bool {
        Column::is_complete(&self.factor) && Column::is_complete(&self.values)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn source_column<'a>(table: &'a ColumnarTable, column: &str) -> QueryResult<&'a Column> {
    table
        .column(column)
        .map_err(|_| QueryError::unknown_column(column))
}

fn entry_paths(table: &ColumnarTable, column: &str) -> QueryResult<EntryPaths> {
    source_column(table, column)?;
    let dir = table.column_dir(column).ok_or_else(|| {
        QueryError::UnsupportedOperation("caching requires an addressable table".into())
    })?;
    Ok(EntryPaths::for_column_dir(&dir))
}

/// Cached factorization of `column`, if a complete and well-typed entry exists.
pub fn load_entry(table: &ColumnarTable, column: &str) -> QueryResult<Option<Factorization>> {
    let paths = entry_paths(table, column)?;
    let source = source_column(table, column)?;
    if !paths.is_complete() {
        if paths.factor.exists() || paths.values.exists() {
            log::warn!("ignoring incomplete factor cache entry for {column}");
        }
        return Ok(None);
    }

    let cache = table.options().cache;
    let (labels, values) = match (
        Column::open(&paths.factor, cache),
        Column::open(&paths.values, cache),
    ) {
        (Ok(labels), Ok(values)) => (labels, values),
        (Err(err), _) | (_, Err(err)) => {
            log::warn!("ignoring unreadable factor cache entry for {column}: {err}");
            return Ok(None);
        }
    };
    if labels.column_type() != ColumnType::Int64
        || labels.len() != source.len()
        || values.column_type() != source.column_type()
    {
        log::warn!(
            "ignoring factor cache entry for {column}: {} labels of {}, {} values, column is {} rows of {}",
            labels.len(),
            labels.column_type(),
            values.column_type(),
            source.len(),
            source.column_type()
        );
        return Ok(None);
    }
    let values = values.read(0, values.len())?;
    if let Some(label) = first_label_out_of_range(&labels, values.len())? {
        log::warn!(
            "ignoring factor cache entry for {column}: label {label} outside 0..{}",
            values.len()
        );
        return Ok(None);
    }
    Ok(Some(Factorization::new(labels, values)?))
}

fn first_label_out_of_range(labels: &Column, cardinality: usize) -> QueryResult<Option<i64>> {
    for chunk in labels.iter_chunks() {
        let chunk = chunk?;
        let ChunkData::Int64(chunk) = &*chunk else {
            continue;
        };
        if let Some(label) = chunk
            .iter()
            .find(|l| usize::try_from(**l).map_or(true, |l| l >= cardinality))
        {
            return Ok(Some(*label));
        }
    }
    Ok(None)
}

/// Factorize `column` and persist the result, replacing any existing entry.
pub fn build_entry(table: &ColumnarTable, column: &str) -> QueryResult<Factorization> {
    let paths = entry_paths(table, column)?;
    let source = source_column(table, column)?;
    let cache = table.options().cache;
    // Labels go first so the entry reads as absent for the whole rebuild.
    remove_dir_if_exists(&paths.factor)?;
    remove_dir_if_exists(&paths.values)?;

    let factor_stage = stage_dir(&paths.factor)?;
    let mut labels =
        ColumnWriter::create(factor_stage.path(), ColumnType::Int64, source.chunk_len(), cache)?;
    let values = factorize_into(source, &mut labels)?;
    labels.finish()?;

    let values_stage = stage_dir(&paths.values)?;
    let mut values_writer = ColumnWriter::create(
        values_stage.path(),
        source.column_type(),
        source.chunk_len(),
        cache,
    )?;
    values_writer.extend_chunk(&values)?;
    values_writer.finish()?;

    commit_dir(values_stage, &paths.values)?;
    commit_dir(factor_stage, &paths.factor)?;
    log::debug!(
        "built factor cache for {column}: {} distinct values",
        values.len()
    );
    Factorization::new(Column::open(&paths.factor, cache)?, values)
}

/// Cached factorization unless `refresh` is set or no entry exists; otherwise rebuild it.
/// Tables without a root directory fail with `UnsupportedOperation`.
pub fn get_or_build(table: &ColumnarTable, column: &str, refresh: bool) -> QueryResult<Factorization> {
    entry_paths(table, column)?;
    if !refresh {
        if let Some(factorization) = load_entry(table, column)? {
            log::debug!("factor cache hit for {column}");
            return Ok(factorization);
        }
        log::debug!("factor cache miss for {column}");
    }
    build_entry(table, column)
}

/// Cached factorization when the table has one for `column`, else a fresh in-memory one.
/// Never writes to disk.
pub fn load_or_factorize(table: &ColumnarTable, column: &str) -> QueryResult<Factorization> {
    if table.rootdir().is_some() {
        if let Some(factorization) = load_entry(table, column)? {
            log::debug!("using cached factorization of {column}");
            return Ok(factorization);
        }
    }
    factorize(source_column(table, column)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use colgroup_columnar::{ColumnSchema, ColumnarTableBuilder, TableOptions, Value};
    use pretty_assertions::assert_eq;

    fn persisted(dir: &Path) -> ColumnarTable {
        let mut builder = ColumnarTableBuilder::create(
            dir,
            vec![ColumnSchema::new("k", ColumnType::String)],
            TableOptions {
                chunk_len: 2,
                ..TableOptions::default()
            },
        )
        .unwrap();
        for k in ["x", "y", "x", "z", "y"] {
            builder.append_row(&[Value::from(k)]).unwrap();
        }
        builder.finalize().unwrap()
    }

    #[test]
    fn entry_paths_are_column_siblings() {
        let paths = EntryPaths::for_column_dir(Path::new("/data/t/f0"));
        assert_eq!(paths.factor, PathBuf::from("/data/t/f0.factor"));
        assert_eq!(paths.values, PathBuf::from("/data/t/f0.values"));
    }

    #[test]
    fn build_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let table = persisted(dir.path());
        assert!(load_entry(&table, "k").unwrap().is_none());

        let built = get_or_build(&table, "k", false).unwrap();
        assert_eq!(built.labels_to_vec().unwrap(), vec![0, 1, 0, 2, 1]);
        assert!(dir.path().join("k.factor").join("meta.json").is_file());
        let staged = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".k."))
            .count();
        assert_eq!(staged, 0);

        let loaded = load_entry(&table, "k").unwrap().unwrap();
        assert_eq!(loaded.labels_to_vec().unwrap(), built.labels_to_vec().unwrap());
        assert_eq!(loaded.values(), built.values());
    }

    #[test]
    fn half_written_entry_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let table = persisted(dir.path());
        build_entry(&table, "k").unwrap();
        fs::remove_file(dir.path().join("k.values").join("meta.json")).unwrap();
        assert!(load_entry(&table, "k").unwrap().is_none());

        let rebuilt = get_or_build(&table, "k", false).unwrap();
        assert_eq!(rebuilt.cardinality(), 3);
        assert!(load_entry(&table, "k").unwrap().is_some());
    }

    #[test]
    fn labels_past_the_values_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let table = persisted(dir.path());
        build_entry(&table, "k").unwrap();

        let values = dir.path().join("k.values");
        fs::remove_dir_all(&values).unwrap();
        let mut writer = ColumnWriter::create(&values, ColumnType::String, 2, Default::default())
            .unwrap();
        writer.extend_chunk(&ChunkData::String(vec!["x".into()])).unwrap();
        writer.finish().unwrap();
        assert!(load_entry(&table, "k").unwrap().is_none());
        assert_eq!(load_or_factorize(&table, "k").unwrap().cardinality(), 3);

        let rebuilt = get_or_build(&table, "k", false).unwrap();
        assert_eq!(rebuilt.labels_to_vec().unwrap(), vec![0, 1, 0, 2, 1]);
        assert!(load_entry(&table, "k").unwrap().is_some());
    }

    #[test]
    fn in_memory_tables_cannot_cache() {
        let mut builder = ColumnarTableBuilder::new(
            vec![ColumnSchema::new("k", ColumnType::Int32)],
            TableOptions::default(),
        );
        builder.append_row(&[Value::Int32(1)]).unwrap();
        let table = builder.finalize().unwrap();
        assert!(matches!(
            get_or_build(&table, "k", false),
            Err(QueryError::UnsupportedOperation(_))
        ));
        assert_eq!(load_or_factorize(&table, "k").unwrap().cardinality(), 1);
    }
}
