//! Dense integer labels for column values.
//!
//! A [`Factorization`] pairs a label per row with the table of distinct values, so that
//! `values[labels[i]] == source[i]`. Labels are handed out in first-seen order while streaming
//! the column chunk by chunk; the label output goes to a [`LabelSink`], which lets callers keep
//! labels in memory or stream them straight to disk.

use crate::error::{QueryError, QueryResult};
use colgroup_columnar::{BitVec, ChunkData, Column, ColumnType, ColumnWriter, Value};
use ordered_float::OrderedFloat;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Destination for the labels produced while factorizing one chunk at a time.
pub trait LabelSink {
    fn write_labels(&mut self, labels: Vec<i64>) -> QueryResult<()>;
}

impl LabelSink for Vec<i64> {
    fn write_labels(&mut self, labels: Vec<i64>) -> QueryResult<()> {
        self.extend(labels);
        Ok(())
    }
}

impl LabelSink for ColumnWriter {
    fn write_labels(&mut self, labels: Vec<i64>) -> QueryResult<()> {
        self.extend_chunk(&ChunkData::Int64(labels))?;
        Ok(())
    }
}

enum State {
    Int32 {
        map: HashMap<i32, i64>,
        values: Vec<i32>,
    },
    Int64 {
        map: HashMap<i64, i64>,
        values: Vec<i64>,
    },
    Float64 {
        map: HashMap<OrderedFloat<f64>, i64>,
        values: Vec<f64>,
    },
    Boolean {
        slots: [Option<i64>; 2],
        values: BitVec,
    },
    String {
        map: HashMap<Arc<str>, i64>,
        values: Vec<Arc<str>>,
    },
}

fn intern<K: Hash + Eq>(map: &mut HashMap<K, i64>, key: K, on_new: impl FnOnce()) -> i64 {
    let next = map.len() as i64;
    *map.entry(key).or_insert_with(|| {
        on_new();
        next
    })
}

/// Incremental factorizer: feed chunks in row order, then [`Factorizer::finish`] to obtain the
/// distinct values indexed by label.
pub struct Factorizer {
    state: State,
}

impl Factorizer {
    pub fn new(column_type: ColumnType) -> Self {
        let state = match column_type {
            ColumnType::Int32 => State::Int32 {
                map: HashMap::new(),
                values: Vec::new(),
            },
            ColumnType::Int64 => State::Int64 {
                map: HashMap::new(),
                values: Vec::new(),
            },
            ColumnType::Float64 => State::Float64 {
                map: HashMap::new(),
                values: Vec::new(),
            },
            ColumnType::Boolean => State::Boolean {
                slots: [None, None],
                values: BitVec::new(),
            },
            ColumnType::String => State::String {
                map: HashMap::new(),
                values: Vec::new(),
            },
        };
        Self { state }
    }

    pub fn column_type(&self) -> ColumnType {
        match &self.state {
            State::Int32 { .. } => ColumnType::Int32,
            State::Int64 { .. } => ColumnType::Int64,
            State::Float64 { .. } => ColumnType::Float64,
            State::Boolean { .. } => ColumnType::Boolean,
            State::String { .. } => ColumnType::String,
        }
    }

    /// Number of distinct values seen so far.
    pub fn cardinality(&self) -> usize {
        match &self.state {
            State::Int32 { values, .. } => values.len(),
            State::Int64 { values, .. } => values.len(),
            State::Float64 { values, .. } => values.len(),
            State::Boolean { values, .. } => values.len(),
            State::String { values, .. } => values.len(),
        }
    }

    /// Label every row of `chunk` into `sink`, extending the value table with newly seen values.
    pub fn push_chunk<S: LabelSink + ?Sized>(
        &mut self,
        chunk: &ChunkData,
        sink: &mut S,
    ) -> QueryResult<()> {
        let expected = self.column_type();
        let mut labels = Vec::with_capacity(chunk.len());
        match (&mut self.state, chunk) {
            (State::Int32 { map, values }, ChunkData::Int32(data)) => {
                for &v in data {
                    labels.push(intern(map, v, || values.push(v)));
                }
            }
            (State::Int64 { map, values }, ChunkData::Int64(data)) => {
                for &v in data {
                    labels.push(intern(map, v, || values.push(v)));
                }
            }
            (State::Float64 { map, values }, ChunkData::Float64(data)) => {
                for &v in data {
                    labels.push(intern(map, OrderedFloat(v), || values.push(v)));
                }
            }
            (State::Boolean { slots, values }, ChunkData::Boolean(data)) => {
                for idx in 0..data.len() {
                    let v = data.get(idx);
                    let slot = &mut slots[v as usize];
                    let label = match *slot {
                        Some(label) => label,
                        None => {
                            let label = values.len() as i64;
                            values.push(v);
                            *slot = Some(label);
                            label
                        }
                    };
                    labels.push(label);
                }
            }
            (State::String { map, values }, ChunkData::String(data)) => {
                for v in data {
                    labels.push(intern(map, v.clone(), || values.push(v.clone())));
                }
            }
            _ => {
                return Err(QueryError::TypeMismatch {
                    context: "factorize".into(),
                    expected: expected.name().into(),
                    actual: chunk.column_type(),
                })
            }
        }
        sink.write_labels(labels)
    }

    pub fn finish(self) -> ChunkData {
        match self.state {
            State::Int32 { values, .. } => ChunkData::Int32(values),
            State::Int64 { values, .. } => ChunkData::Int64(values),
            State::Float64 { values, .. } => ChunkData::Float64(values),
            State::Boolean { values, .. } => ChunkData::Boolean(values),
            State::String { values, .. } => ChunkData::String(values),
        }
    }
}

/// Labels for every row of a column plus the distinct values they index.
#[derive(Debug)]
pub struct Factorization {
    labels: Column,
    values: ChunkData,
}

impl Factorization {
    pub fn new(labels: Column, values: ChunkData) -> QueryResult<Self> {
        if labels.column_type() != ColumnType::Int64 {
            return Err(QueryError::TypeMismatch {
                context: "factor labels".into(),
                expected: ColumnType::Int64.name().into(),
                actual: labels.column_type(),
            });
        }
        Ok(Self { labels, values })
    }

    pub fn labels(&self) -> &Column {
        &self.labels
    }

    pub fn values(&self) -> &ChunkData {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of distinct values (labels run over `0..cardinality`).
    pub fn cardinality(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, label: usize) -> Option<Value> {
        self.values.get(label)
    }

    /// Materialize all labels. Intended for small columns and tests.
    pub fn labels_to_vec(&self) -> QueryResult<Vec<i64>> {
        match self.labels.read(0, self.labels.len())? {
            ChunkData::Int64(labels) => Ok(labels),
            other => Err(QueryError::TypeMismatch {
                context: "factor labels".into(),
                expected: ColumnType::Int64.name().into(),
                actual: other.column_type(),
            }),
        }
    }

    pub(crate) fn into_parts(self) -> (Column, ChunkData) {
        (self.labels, self.values)
    }
}

/// Factorize `column` into `sink`, returning the distinct values in label order.
pub fn factorize_into<S: LabelSink + ?Sized>(column: &Column, sink: &mut S) -> QueryResult<ChunkData> {
    let mut factorizer = Factorizer::new(column.column_type());
    for (idx, chunk) in column.iter_chunks().enumerate() {
        factorizer.push_chunk(&*chunk?, sink)?;
        log::trace!(
            "factorized chunk {idx}: {} distinct values so far",
            factorizer.cardinality()
        );
    }
    Ok(factorizer.finish())
}

/// Factorize `column` with labels kept in memory, chunked like the source column.
pub fn factorize(column: &Column) -> QueryResult<Factorization> {
    let mut labels = ColumnWriter::in_memory("labels", ColumnType::Int64, column.chunk_len());
    let values = factorize_into(column, &mut labels)?;
    Factorization::new(labels.finish()?, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn column(values: Vec<Value>, chunk_len: usize) -> Column {
        let column_type = values[0].column_type();
        let mut writer = ColumnWriter::in_memory("c", column_type, chunk_len);
        for v in values {
            writer.push(v).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn labels_follow_first_seen_order_across_chunks() {
        let col = column(
            ["b", "a", "b", "c", "a", "c", "d"]
                .into_iter()
                .map(Value::from)
                .collect(),
            3,
        );
        let f = factorize(&col).unwrap();
        assert_eq!(f.labels_to_vec().unwrap(), vec![0, 1, 0, 2, 1, 2, 3]);
        assert_eq!(
            f.values(),
            &ChunkData::String(["b", "a", "c", "d"].into_iter().map(Arc::from).collect())
        );
        assert_eq!(f.labels().chunk_len(), 3);
    }

    #[test]
    fn floats_group_nan_and_signed_zero() {
        let col = column(
            vec![
                Value::Float64(0.0),
                Value::Float64(f64::NAN),
                Value::Float64(-0.0),
                Value::Float64(f64::NAN),
                Value::Float64(1.5),
            ],
            2,
        );
        let f = factorize(&col).unwrap();
        assert_eq!(f.labels_to_vec().unwrap(), vec![0, 1, 0, 1, 2]);
        assert_eq!(f.cardinality(), 3);
    }

    #[test]
    fn booleans_and_vec_sink() {
        let col = column(
            vec![Value::Boolean(true), Value::Boolean(true), Value::Boolean(false)],
            8,
        );
        let mut labels: Vec<i64> = Vec::new();
        let values = factorize_into(&col, &mut labels).unwrap();
        assert_eq!(labels, vec![0, 0, 1]);
        assert_eq!(values, ChunkData::Boolean(BitVec::from_bools([true, false])));
    }

    #[test]
    fn chunk_type_mismatch() {
        let mut factorizer = Factorizer::new(ColumnType::Int32);
        let mut labels = Vec::new();
        let err = factorizer
            .push_chunk(&ChunkData::Int64(vec![1]), &mut labels)
            .unwrap_err();
        assert!(labels.is_empty());
        assert!(matches!(
            err,
            QueryError::TypeMismatch {
                actual: ColumnType::Int64,
                ..
            }
        ));
    }
}
