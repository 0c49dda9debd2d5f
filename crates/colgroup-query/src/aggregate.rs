//! Aggregation plans and the single-pass executor behind `group_by`.

use crate::error::{QueryError, QueryResult};
use crate::group_index::GroupIndex;
use colgroup_columnar::{
    ChunkData, ColumnSchema, ColumnType, ColumnarTable, ColumnarTableBuilder, TableOptions,
};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Supported aggregation operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggOp {
    /// Plain sum; NaN propagates.
    Sum,
    /// Sum ignoring NaN inputs.
    SumNa,
}

impl AggOp {
    pub fn name(self) -> &'static str {
        match self {
            AggOp::Sum => "sum",
            AggOp::SumNa => "sum_na",
        }
    }
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggOp {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(AggOp::Sum),
            "sum_na" => Ok(AggOp::SumNa),
            other => Err(QueryError::UnsupportedAggregation(other.to_string())),
        }
    }
}

/// One `(output, input, op)` entry of an aggregation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggSpec {
    pub output: String,
    pub input: String,
    pub op: AggOp,
}

impl AggSpec {
    pub fn new(output: impl Into<String>, input: impl Into<String>, op: AggOp) -> Self {
        Self {
            output: output.into(),
            input: input.into(),
            op,
        }
    }

    /// Sum of `column`, written under the same name.
    pub fn sum(column: impl Into<String>) -> Self {
        let column = column.into();
        Self::new(column.clone(), column, AggOp::Sum)
    }

    /// Sum of `input`, written as `output`.
    pub fn renamed(output: impl Into<String>, input: impl Into<String>) -> Self {
        Self::new(output, input, AggOp::Sum)
    }

    pub fn parse(output: impl Into<String>, input: impl Into<String>, op: &str) -> QueryResult<Self> {
        Ok(Self::new(output, input, op.parse()?))
    }
}

#[derive(Debug)]
struct PlannedAgg {
    spec: AggSpec,
    column: usize,
    column_type: ColumnType,
}

/// A validated group-by: key columns and aggregations resolved against a table.
#[derive(Debug)]
pub struct AggPlan {
    keys: Vec<ColumnSchema>,
    aggs: Vec<PlannedAgg>,
}

impl AggPlan {
    pub fn new(table: &ColumnarTable, groupby_cols: &[&str], specs: &[AggSpec]) -> QueryResult<Self> {
        if specs.is_empty() {
            return Err(QueryError::EmptyAggregationSpec);
        }
        let mut names = HashSet::new();
        let mut keys = Vec::with_capacity(groupby_cols.len());
        for &name in groupby_cols {
            let column = table
                .column(name)
                .map_err(|_| QueryError::unknown_column(name))?;
            if !names.insert(name.to_string()) {
                return Err(QueryError::InvalidArgument(format!(
                    "group-by column {name} listed twice"
                )));
            }
            keys.push(ColumnSchema::new(name, column.column_type()));
        }

        let mut aggs = Vec::with_capacity(specs.len());
        for spec in specs {
            let column = table
                .column_index(&spec.input)
                .ok_or_else(|| QueryError::unknown_column(&spec.input))?;
            let column_type = table.schema()[column].column_type;
            if !column_type.is_numeric() {
                return Err(QueryError::TypeMismatch {
                    context: format!("{} of {}", spec.op, spec.input),
                    expected: "a numeric column".into(),
                    actual: column_type,
                });
            }
            if !names.insert(spec.output.clone()) {
                return Err(QueryError::InvalidArgument(format!(
                    "duplicate output column {}",
                    spec.output
                )));
            }
            aggs.push(PlannedAgg {
                spec: spec.clone(),
                column,
                column_type,
            });
        }
        Ok(Self { keys, aggs })
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys.iter().map(|k| k.name.as_str())
    }

    pub fn specs(&self) -> impl Iterator<Item = &AggSpec> + '_ {
        self.aggs.iter().map(|a| &a.spec)
    }

    /// Key columns followed by one column per aggregation, typed like their inputs.
    pub fn output_schema(&self) -> Vec<ColumnSchema> {
        self.keys
            .iter()
            .cloned()
            .chain(
                self.aggs
                    .iter()
                    .map(|a| ColumnSchema::new(a.spec.output.clone(), a.column_type)),
            )
            .collect()
    }
}

fn slot<T>(sums: &mut [T], id: i64) -> QueryResult<&mut T> {
    let slots = sums.len();
    usize::try_from(id)
        .ok()
        .and_then(|id| sums.get_mut(id))
        .ok_or_else(|| QueryError::InvalidArgument(format!("group id {id} outside {slots} slots")))
}

/// Per-slot running sums in the input column's native type.
#[derive(Debug)]
enum Accumulator {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float64 { sums: Vec<f64>, skip_nan: bool },
}

impl Accumulator {
    fn new(column_type: ColumnType, op: AggOp, slots: usize) -> QueryResult<Self> {
        match column_type {
            ColumnType::Int32 => Ok(Accumulator::Int32(vec![0; slots])),
            ColumnType::Int64 => Ok(Accumulator::Int64(vec![0; slots])),
            ColumnType::Float64 => Ok(Accumulator::Float64 {
                sums: vec![0.0; slots],
                skip_nan: op == AggOp::SumNa,
            }),
            other => Err(QueryError::TypeMismatch {
                context: op.to_string(),
                expected: "a numeric column".into(),
                actual: other,
            }),
        }
    }

    fn add_chunk(&mut self, ids: &[i64], values: &ChunkData) -> QueryResult<()> {
        match (self, values) {
            (Accumulator::Int32(sums), ChunkData::Int32(values)) => {
                for (&id, &v) in ids.iter().zip(values) {
                    let slot = slot(sums, id)?;
                    *slot = slot.wrapping_add(v);
                }
            }
            (Accumulator::Int64(sums), ChunkData::Int64(values)) => {
                for (&id, &v) in ids.iter().zip(values) {
                    let slot = slot(sums, id)?;
                    *slot = slot.wrapping_add(v);
                }
            }
            (Accumulator::Float64 { sums, skip_nan }, ChunkData::Float64(values)) => {
                if *skip_nan {
                    for (&id, &v) in ids.iter().zip(values) {
                        if !v.is_nan() {
                            *slot(sums, id)? += v;
                        }
                    }
                } else {
                    for (&id, &v) in ids.iter().zip(values) {
                        *slot(sums, id)? += v;
                    }
                }
            }
            (acc, values) => {
                let expected = match acc {
                    Accumulator::Int32(_) => ColumnType::Int32,
                    Accumulator::Int64(_) => ColumnType::Int64,
                    Accumulator::Float64 { .. } => ColumnType::Float64,
                };
                return Err(QueryError::TypeMismatch {
                    context: "aggregation input".into(),
                    expected: expected.name().into(),
                    actual: values.column_type(),
                });
            }
        }
        Ok(())
    }

    /// Sums of the valid groups in identifier order; the skip slot is dropped.
    fn finish(self, index: &GroupIndex) -> ChunkData {
        match self {
            Accumulator::Int32(sums) => {
                ChunkData::Int32(index.groups().map(|(id, _)| sums[id]).collect())
            }
            Accumulator::Int64(sums) => {
                ChunkData::Int64(index.groups().map(|(id, _)| sums[id]).collect())
            }
            Accumulator::Float64 { sums, .. } => {
                ChunkData::Float64(index.groups().map(|(id, _)| sums[id]).collect())
            }
        }
    }
}

/// Stream once over `table`, summing every planned input into its group's slot, and build the
/// output table (in memory, or persisted at `location`).
pub fn aggregate(
    table: &ColumnarTable,
    index: &GroupIndex,
    plan: &AggPlan,
    options: TableOptions,
    location: Option<&Path>,
) -> QueryResult<ColumnarTable> {
    let rows = table.row_count();
    if index.ids().len() != rows {
        return Err(QueryError::InvalidArgument(format!(
            "group index covers {} rows, table has {rows}",
            index.ids().len()
        )));
    }
    if index.key_values().len() != plan.keys.len() {
        return Err(QueryError::InvalidArgument(format!(
            "group index has {} key columns, plan has {}",
            index.key_values().len(),
            plan.keys.len()
        )));
    }

    let mut accumulators = plan
        .aggs
        .iter()
        .map(|a| Accumulator::new(a.column_type, a.spec.op, index.slots()))
        .collect::<QueryResult<Vec<_>>>()?;

    for chunk_idx in 0..table.chunk_count() {
        let start = chunk_idx * table.chunk_len();
        let end = (start + table.chunk_len()).min(rows);
        let ChunkData::Int64(ids) = index.ids().read(start, end)? else {
            return Err(QueryError::TypeMismatch {
                context: "group identifiers".into(),
                expected: ColumnType::Int64.name().into(),
                actual: index.ids().column_type(),
            });
        };
        for (agg, acc) in plan.aggs.iter().zip(accumulators.iter_mut()) {
            let column = table
                .column_at(agg.column)
                .ok_or_else(|| QueryError::unknown_column(&agg.spec.input))?;
            acc.add_chunk(&ids, &*column.chunk(chunk_idx)?)?;
        }
        log::trace!("aggregated rows {start}..{end}");
    }

    let schema = plan.output_schema();
    let mut builder = match location {
        Some(path) => ColumnarTableBuilder::create(path, schema, options)?,
        None => ColumnarTableBuilder::new(schema, options),
    };
    for (k, key) in plan.keys.iter().enumerate() {
        let values = &index.key_values()[k];
        let mut column = ChunkData::with_capacity(key.column_type, index.group_count());
        for (id, labels) in index.groups() {
            let value = values.get(labels[k]).ok_or_else(|| {
                QueryError::InvalidArgument(format!("group {id} has no key for {}", key.name))
            })?;
            column.push(value).map_err(|rejected| QueryError::TypeMismatch {
                context: format!("group key {}", key.name),
                expected: key.column_type.name().into(),
                actual: rejected.column_type(),
            })?;
        }
        builder.extend_column(k, &column)?;
    }
    for (j, acc) in accumulators.into_iter().enumerate() {
        builder.extend_column(plan.keys.len() + j, &acc.finish(index))?;
    }
    let output = builder.finalize()?;
    log::debug!(
        "group-by over {rows} rows produced {} groups",
        output.row_count()
    );
    Ok(output)
}
