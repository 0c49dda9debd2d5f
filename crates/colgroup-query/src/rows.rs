//! Row selection and projection for `where` queries.

use crate::error::{QueryError, QueryResult};
use crate::expr::{evaluate, parse};
use colgroup_columnar::{BitVec, ColumnarTable, MaskRows, MaskedIter, Value};
use std::ops::Index;
use std::sync::Arc;

/// Pseudo output column holding the row number of each selected row.
pub const ROW_NUMBER: &str = "nrow__";

/// Row selection for [`where_rows`]: an expression string or a precomputed mask.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Expression(String),
    Mask(BitVec),
}

impl From<&str> for Predicate {
    fn from(expr: &str) -> Self {
        Predicate::Expression(expr.to_string())
    }
}

impl From<String> for Predicate {
    fn from(expr: String) -> Self {
        Predicate::Expression(expr)
    }
}

impl From<BitVec> for Predicate {
    fn from(mask: BitVec) -> Self {
        Predicate::Mask(mask)
    }
}

/// Split an output column list given as one string, e.g. `"f0 f1"` or `"f0, f1"`.
pub fn parse_outcols(spec: &str) -> Vec<String> {
    spec.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// One selected row, addressable by position or by output column name.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let idx = self.names.iter().position(|n| n == name)?;
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, idx: usize) -> &Value {
        &self.values[idx]
    }
}

enum Source<'a> {
    RowNumber,
    Column(MaskedIter<'a>),
}

/// Lazy iterator over the rows selected by [`where_rows`].
pub struct RowIter<'a> {
    names: Arc<[String]>,
    rows: MaskRows,
    sources: Vec<Source<'a>>,
}

impl RowIter<'_> {
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Iterator for RowIter<'_> {
    type Item = QueryResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        let mut values = Vec::with_capacity(self.sources.len());
        for source in &mut self.sources {
            let value = match source {
                Source::RowNumber => Value::Int64(row as i64),
                Source::Column(iter) => match iter.next() {
                    Some(Ok((_, value))) => value,
                    Some(Err(err)) => return Some(Err(err.into())),
                    None => {
                        return Some(Err(QueryError::InvalidArgument(format!(
                            "column ended before row {row}"
                        ))))
                    }
                },
            };
            values.push(value);
        }
        Some(Ok(Row {
            names: self.names.clone(),
            values,
        }))
    }
}

/// Rows of `table` selected by `predicate`, projected onto `outcols` (all columns when `None`
/// or empty), skipping the first `skip` matches and yielding at most `limit`.
pub fn where_rows<'a>(
    table: &'a ColumnarTable,
    predicate: Predicate,
    outcols: Option<&[&str]>,
    limit: Option<usize>,
    skip: usize,
) -> QueryResult<RowIter<'a>> {
    let names: Vec<String> = match outcols {
        Some(cols) if !cols.is_empty() => cols.iter().map(|c| c.to_string()).collect(),
        _ => table.names().map(str::to_string).collect(),
    };
    for name in &names {
        if name != ROW_NUMBER && table.column_index(name).is_none() {
            return Err(QueryError::unknown_column(name));
        }
    }

    let mask = match predicate {
        Predicate::Expression(src) => {
            let expr = parse(&src)?;
            evaluate(table, &expr)?.into_mask().ok_or_else(|| {
                QueryError::InvalidArgument(format!("expression {src:?} is not boolean"))
            })?
        }
        Predicate::Mask(mask) => mask,
    };
    if mask.len() != table.row_count() {
        return Err(QueryError::InvalidArgument(format!(
            "mask has {} entries, table has {} rows",
            mask.len(),
            table.row_count()
        )));
    }
    log::debug!(
        "where selected {} of {} rows",
        mask.count_ones(),
        mask.len()
    );

    let mask = Arc::new(mask);
    let mut sources = Vec::with_capacity(names.len());
    for name in &names {
        if name == ROW_NUMBER {
            sources.push(Source::RowNumber);
        } else {
            let column = table.column(name)?;
            sources.push(Source::Column(column.iter_masked(mask.clone(), limit, skip)?));
        }
    }
    Ok(RowIter {
        names: names.into(),
        rows: MaskRows::new(mask, limit, skip),
        sources,
    })
}
