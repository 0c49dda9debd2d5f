use colgroup_query::{
    parse_outcols, BitVec, ColumnSchema, ColumnType, ColumnarTable, ColumnarTableBuilder,
    Evaluated, Predicate, QueryEngine, QueryError, QueryResult, Row, TableOptions, Term, Value,
    ROW_NUMBER,
};
use pretty_assertions::assert_eq;

/// `f0[i] = f1[i] = i` for `i` in `0..20000`.
fn counting_table() -> ColumnarTable {
    let schema = vec![
        ColumnSchema::new("f0", ColumnType::Int64),
        ColumnSchema::new("f1", ColumnType::Int64),
    ];
    let mut builder = ColumnarTableBuilder::new(
        schema,
        TableOptions {
            chunk_len: 1024,
            ..TableOptions::default()
        },
    );
    for i in 0..20_000i64 {
        builder
            .append_row(&[Value::Int64(i), Value::Int64(i)])
            .unwrap();
    }
    builder.finalize().unwrap()
}

fn bools(mask: &BitVec) -> Vec<bool> {
    (0..mask.len()).map(|i| mask.get(i)).collect()
}

#[test]
fn greater_than_term() {
    let table = counting_table();
    let mask = QueryEngine::default()
        .where_terms(&table, &[Term::cmp("f0", ">", 10_000i64)])
        .unwrap();
    let expected: Vec<bool> = (0..20_000).map(|x| x > 10_000).collect();
    assert_eq!(bools(&mask), expected);
}

#[test]
fn less_or_equal_term() {
    let table = counting_table();
    let mask = QueryEngine::default()
        .where_terms(&table, &[Term::cmp("f0", "<=", 10_000i64)])
        .unwrap();
    assert_eq!(mask.count_ones(), 10_001);
    assert!(mask.get(10_000));
    assert!(!mask.get(10_001));
}

#[test]
fn not_in_term_clears_exactly_the_listed_rows() {
    let table = counting_table();
    let exclude = [0i64, 1, 2, 3, 11, 12, 13];
    let mask = QueryEngine::default()
        .where_terms(&table, &[Term::not_in("f0", exclude)])
        .unwrap();
    let expected: Vec<bool> = (0..20_000).map(|x| !exclude.contains(&x)).collect();
    assert_eq!(bools(&mask), expected);
}

#[test]
fn in_term_selects_exactly_the_listed_rows() {
    let table = counting_table();
    let include = [0i64, 1, 2, 3, 11, 12, 13];
    let mask = QueryEngine::default()
        .where_terms(&table, &[Term::is_in("f0", include)])
        .unwrap();
    assert_eq!(
        mask.iter_ones().collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 11, 12, 13]
    );
}

#[test]
fn single_value_in_term() {
    let table = counting_table();
    let mask = QueryEngine::default()
        .where_terms(&table, &[Term::is_in("f0", [0i64])])
        .unwrap();
    assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![0]);
}

#[test]
fn every_term_narrows_the_mask() {
    let table = counting_table();
    let engine = QueryEngine::default();
    let mut terms = vec![Term::cmp("f0", ">=", 100i64), Term::cmp("f1", "<", 200i64)];
    let base = engine.where_terms(&table, &terms).unwrap();
    assert_eq!(base.count_ones(), 100);

    terms.push(Term::is_in("f1", [150i64, 160, 170, 5000]));
    let narrowed = engine.where_terms(&table, &terms).unwrap();
    assert_eq!(narrowed.iter_ones().collect::<Vec<_>>(), vec![150, 160, 170]);

    terms.push(Term::not_in("f0", [160i64, 9999]));
    let narrowest = engine.where_terms(&table, &terms).unwrap();
    assert_eq!(narrowest.iter_ones().collect::<Vec<_>>(), vec![150, 170]);
}

#[test]
fn malformed_terms_are_rejected() {
    let table = counting_table();
    let engine = QueryEngine::default();
    assert!(matches!(
        engine.where_terms(&table, &[Term::cmp("f0", "between", 1i64)]),
        Err(QueryError::InvalidFilterOperator { .. })
    ));
    assert!(matches!(
        engine.where_terms(&table, &[Term::not_in("f0", Vec::<i64>::new())]),
        Err(QueryError::InvalidFilterValue { .. })
    ));
}

#[test]
fn where_rows_with_expression_outcols_and_row_number() {
    let table = counting_table();
    let outcols = parse_outcols("nrow__, f1");
    let outcols: Vec<&str> = outcols.iter().map(String::as_str).collect();
    let rows: Vec<Row> = QueryEngine::default()
        .where_rows(&table, "f0 > 19990", Some(outcols.as_slice()), Some(3), 2)
        .unwrap()
        .collect::<QueryResult<_>>()
        .unwrap();
    let got: Vec<(Value, Value)> = rows
        .iter()
        .map(|r| (r[0].clone(), r.get("f1").cloned().unwrap()))
        .collect();
    assert_eq!(
        got,
        vec![
            (Value::Int64(19_993), Value::Int64(19_993)),
            (Value::Int64(19_994), Value::Int64(19_994)),
            (Value::Int64(19_995), Value::Int64(19_995)),
        ]
    );
    assert_eq!(rows[0].names(), &[ROW_NUMBER.to_string(), "f1".to_string()]);
}

#[test]
fn where_rows_accepts_masks_from_where_terms() {
    let table = counting_table();
    let engine = QueryEngine::default();
    let mask = engine
        .where_terms(&table, &[Term::is_in("f0", [7i64, 70, 700])])
        .unwrap();
    let values: Vec<Value> = engine
        .where_rows(&table, Predicate::Mask(mask), Some(&["f0"][..]), None, 0)
        .unwrap()
        .map(|row| row.map(|r| r[0].clone()))
        .collect::<QueryResult<_>>()
        .unwrap();
    assert_eq!(
        values,
        vec![Value::Int64(7), Value::Int64(70), Value::Int64(700)]
    );
}

#[test]
fn eval_returns_numeric_and_mask_columns() {
    let table = counting_table();
    let engine = QueryEngine::default();
    match engine.eval(&table, "f0 + f1").unwrap() {
        Evaluated::Int64(v) => {
            assert_eq!(v.len(), 20_000);
            assert_eq!(v[123], 246);
        }
        other => panic!("unexpected {other:?}"),
    }
    let mask = engine
        .eval(&table, "(f0 >= 5) & (f1 < 8)")
        .unwrap()
        .into_mask()
        .unwrap();
    assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![5, 6, 7]);
}
