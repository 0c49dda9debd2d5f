use colgroup_columnar::{ChunkCacheConfig, ColumnWriter};
use colgroup_query::{
    get_or_build, load_entry, AggSpec, ChunkData, ColumnSchema, ColumnType, ColumnarTable,
    ColumnarTableBuilder, EntryPaths, QueryEngine, QueryError, TableOptions, Value,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn schema() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("city", ColumnType::String),
        ColumnSchema::new("year", ColumnType::Int32),
        ColumnSchema::new("sales", ColumnType::Float64),
    ]
}

fn options() -> TableOptions {
    TableOptions {
        chunk_len: 8,
        ..TableOptions::default()
    }
}

fn rows() -> Vec<[Value; 3]> {
    (0..50)
        .map(|i| {
            [
                Value::from(["Oslo", "Lima", "Pune", "Oslo"][i % 4]),
                Value::Int32(2020 + (i % 3) as i32),
                Value::Float64(i as f64),
            ]
        })
        .collect()
}

fn persisted(root: &Path) -> ColumnarTable {
    let mut builder = ColumnarTableBuilder::create(root, schema(), options()).unwrap();
    for row in rows() {
        builder.append_row(&row).unwrap();
    }
    builder.finalize().unwrap()
}

#[test]
fn repeated_builds_reuse_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let table = persisted(&dir.path().join("t"));
    let engine = QueryEngine::default();

    let first = engine
        .build_factor_cache(&table, &["city", "year"], false)
        .unwrap();
    let paths = EntryPaths::for_column_dir(&table.column_dir("city").unwrap());
    assert!(paths.is_complete());
    let modified = fs::metadata(paths.factor.join("meta.json"))
        .unwrap()
        .modified()
        .unwrap();

    let second = engine
        .build_factor_cache(&table, &["city", "year"], false)
        .unwrap();
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.labels_to_vec().unwrap(), b.labels_to_vec().unwrap());
        assert_eq!(a.values(), b.values());
    }
    assert_eq!(
        fs::metadata(paths.factor.join("meta.json"))
            .unwrap()
            .modified()
            .unwrap(),
        modified
    );
    assert_eq!(first[0].cardinality(), 3);
    assert_eq!(first[1].cardinality(), 3);
}

#[test]
fn refresh_rebuilds_a_damaged_entry() {
    let dir = tempfile::tempdir().unwrap();
    let table = persisted(&dir.path().join("t"));
    let engine = QueryEngine::default();
    let built = engine.build_factor_cache(&table, &["city"], false).unwrap();

    let paths = EntryPaths::for_column_dir(&table.column_dir("city").unwrap());
    fs::remove_file(paths.values.join("meta.json")).unwrap();
    assert!(load_entry(&table, "city").unwrap().is_none());

    let rebuilt = engine.build_factor_cache(&table, &["city"], true).unwrap();
    assert!(paths.is_complete());
    assert_eq!(
        rebuilt[0].labels_to_vec().unwrap(),
        built[0].labels_to_vec().unwrap()
    );
}

fn replace_values(paths: &EntryPaths, values: ChunkData) {
    fs::remove_dir_all(&paths.values).unwrap();
    let mut writer = ColumnWriter::create(
        &paths.values,
        values.column_type(),
        8,
        ChunkCacheConfig::default(),
    )
    .unwrap();
    writer.extend_chunk(&values).unwrap();
    writer.finish().unwrap();
}

fn assert_rebuilt_and_grouped(table: &ColumnarTable) {
    let grouped = QueryEngine::default()
        .group_by(table, &["city"], &[AggSpec::sum("sales")], None, None)
        .unwrap();
    assert_eq!(grouped.row_count(), 3);
    assert_eq!(grouped.get_cell(2, 0).unwrap(), Value::from("Pune"));

    let rebuilt = get_or_build(table, "city", false).unwrap();
    assert_eq!(rebuilt.values().column_type(), ColumnType::String);
    assert_eq!(rebuilt.cardinality(), 3);
    assert!(load_entry(table, "city").unwrap().is_some());
}

#[test]
fn values_of_the_wrong_type_are_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let table = persisted(&dir.path().join("t"));
    QueryEngine::default()
        .build_factor_cache(&table, &["city"], false)
        .unwrap();

    let paths = EntryPaths::for_column_dir(&table.column_dir("city").unwrap());
    replace_values(&paths, ChunkData::Int64(vec![10, 20, 30]));
    assert!(paths.is_complete());
    assert!(load_entry(&table, "city").unwrap().is_none());
    assert_rebuilt_and_grouped(&table);
}

#[test]
fn labels_beyond_the_values_are_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let table = persisted(&dir.path().join("t"));
    QueryEngine::default()
        .build_factor_cache(&table, &["city"], false)
        .unwrap();

    let paths = EntryPaths::for_column_dir(&table.column_dir("city").unwrap());
    replace_values(&paths, ChunkData::String(vec!["Oslo".into()]));
    assert!(paths.is_complete());
    assert!(load_entry(&table, "city").unwrap().is_none());
    assert_rebuilt_and_grouped(&table);
}

#[test]
fn rebuilds_leave_no_staging_directories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");
    let table = persisted(&root);
    let engine = QueryEngine::default();
    engine.build_factor_cache(&table, &["city"], false).unwrap();
    engine.build_factor_cache(&table, &["city"], true).unwrap();

    let hidden: Vec<_> = fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect();
    assert_eq!(hidden, Vec::<String>::new());
}

#[test]
fn entries_are_found_after_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");
    let engine = QueryEngine::default();
    engine
        .build_factor_cache(&persisted(&root), &["city"], false)
        .unwrap();

    let table = ColumnarTable::open(&root, options()).unwrap();
    let cached = load_entry(&table, "city").unwrap().unwrap();
    assert_eq!(cached.len(), 50);
    assert_eq!(cached.value(1), Some(Value::from("Lima")));
    assert!(load_entry(&table, "year").unwrap().is_none());

    let with_cache = engine
        .group_by(&table, &["city"], &[AggSpec::sum("sales")], None, None)
        .unwrap();
    assert_eq!(with_cache.row_count(), 3);
    assert_eq!(with_cache.get_cell(0, 0).unwrap(), Value::from("Oslo"));
    // Oslo takes rows with i % 4 in {0, 3}.
    let oslo: f64 = (0..50).filter(|i| i % 4 == 0 || i % 4 == 3).map(f64::from).sum();
    assert_eq!(with_cache.get_cell(0, 1).unwrap(), Value::Float64(oslo));
}

#[test]
fn in_memory_tables_cannot_be_cached() {
    let mut builder = ColumnarTableBuilder::new(schema(), options());
    for row in rows() {
        builder.append_row(&row).unwrap();
    }
    let table = builder.finalize().unwrap();
    let engine = QueryEngine::default();
    assert!(matches!(
        engine.build_factor_cache(&table, &["city"], false),
        Err(QueryError::UnsupportedOperation(_))
    ));
    // Group-by still works, factorizing on the fly.
    let grouped = engine
        .group_by(&table, &["year"], &[AggSpec::sum("sales")], None, None)
        .unwrap();
    assert_eq!(grouped.row_count(), 3);
}

#[test]
fn unknown_column_is_an_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();
    let table = persisted(&dir.path().join("t"));
    assert!(matches!(
        QueryEngine::default().build_factor_cache(&table, &["nope"], false),
        Err(QueryError::InvalidArgument(_))
    ));
}
