//! Row to group-identifier mapping for one group-by query.
//!
//! Several factorized columns are combined into a mixed-radix composite identifier (the last
//! group-by column is the least significant digit), optionally remapped so that rows excluded by
//! a filter share the marker `-1`, and then densified by a second factorization. Only key
//! combinations that actually occur get an identifier; the candidate space is never allocated.

use crate::error::{QueryError, QueryResult};
use crate::factorize::{Factorization, Factorizer};
use colgroup_columnar::{BitVec, ChunkData, Column, ColumnType, ColumnWriter, Value};
use std::iter;

const EXCLUDED: i64 = -1;

/// Dense group identifiers for every row plus the key labels behind each identifier.
///
/// Identifiers run over `0..slots()`, one more than [`GroupIndex::group_count`]. The extra slot is
/// [`GroupIndex::skip_key`]: either the identifier shared by filtered-out rows, or
/// `group_count` when nothing was excluded. Aggregation can therefore size its accumulators to
/// `slots()` and drop the skip slot at the end.
#[derive(Debug)]
pub struct GroupIndex {
    ids: Column,
    group_count: usize,
    skip_key: usize,
    key_values: Vec<ChunkData>,
    slot_keys: Vec<Option<Vec<usize>>>,
}

impl GroupIndex {
    /// Build the index for `rows` rows from the factorizations of the group-by columns, in
    /// group-by order. `max_group_space` bounds the product of the column cardinalities.
    pub fn build(
        factors: Vec<Factorization>,
        rows: usize,
        chunk_len: usize,
        filter: Option<&BitVec>,
        max_group_space: u64,
    ) -> QueryResult<Self> {
        if let Some(mask) = filter {
            if mask.len() != rows {
                return Err(QueryError::InvalidArgument(format!(
                    "filter mask has {} entries, table has {rows} rows",
                    mask.len()
                )));
            }
        }
        if let Some(bad) = factors.iter().find(|f| f.len() != rows) {
            return Err(QueryError::InvalidArgument(format!(
                "factorization has {} labels, table has {rows} rows",
                bad.len()
            )));
        }
        let chunk_len = chunk_len.max(1);
        let (mut labels, key_values): (Vec<Column>, Vec<ChunkData>) =
            factors.into_iter().map(Factorization::into_parts).unzip();

        match (labels.len(), filter) {
            (0, _) => Self::total(rows, chunk_len, filter),
            (1, None) => {
                let cardinality = key_values[0].len();
                let slot_keys = (0..cardinality)
                    .map(|label| Some(vec![label]))
                    .chain(iter::once(None))
                    .collect();
                match labels.pop() {
                    Some(ids) => Ok(Self::assemble(ids, cardinality, key_values, slot_keys)),
                    None => Self::total(rows, chunk_len, filter),
                }
            }
            _ => Self::composite(&labels, key_values, rows, chunk_len, filter, max_group_space),
        }
    }

    /// No group-by columns: a single "Total" group that always exists.
    fn total(rows: usize, chunk_len: usize, filter: Option<&BitVec>) -> QueryResult<Self> {
        let mut ids = ColumnWriter::in_memory("group_ids", ColumnType::Int64, chunk_len);
        let mut start = 0;
        while start < rows {
            let end = (start + chunk_len).min(rows);
            let chunk = match filter {
                Some(mask) => (start..end).map(|row| i64::from(!mask.get(row))).collect(),
                None => vec![0; end - start],
            };
            ids.extend_chunk(&ChunkData::Int64(chunk))?;
            start = end;
        }
        Ok(Self::assemble(
            ids.finish()?,
            1,
            Vec::new(),
            vec![Some(Vec::new()), None],
        ))
    }

    fn composite(
        labels: &[Column],
        key_values: Vec<ChunkData>,
        rows: usize,
        chunk_len: usize,
        filter: Option<&BitVec>,
        max_group_space: u64,
    ) -> QueryResult<Self> {
        let cardinalities: Vec<usize> = key_values.iter().map(ChunkData::len).collect();
        let strides = strides(&cardinalities, max_group_space)?;

        let mut factorizer = Factorizer::new(ColumnType::Int64);
        let mut ids = ColumnWriter::in_memory("group_ids", ColumnType::Int64, chunk_len);
        let mut start = 0;
        while start < rows {
            let end = (start + chunk_len).min(rows);
            let mut composite = vec![0i64; end - start];
            for ((column, &stride), &cardinality) in
                labels.iter().zip(&strides).zip(&cardinalities)
            {
                let ChunkData::Int64(chunk) = column.read(start, end)? else {
                    return Err(QueryError::TypeMismatch {
                        context: "factor labels".into(),
                        expected: ColumnType::Int64.name().into(),
                        actual: column.column_type(),
                    });
                };
                for (id, label) in composite.iter_mut().zip(chunk) {
                    if usize::try_from(label).map_or(true, |l| l >= cardinality) {
                        return Err(QueryError::InvalidArgument(format!(
                            "factor label {label} outside 0..{cardinality}"
                        )));
                    }
                    *id += label * stride;
                }
            }
            if let Some(mask) = filter {
                for (offset, id) in composite.iter_mut().enumerate() {
                    *id = (*id + 1) * i64::from(mask.get(start + offset)) - 1;
                }
            }
            factorizer.push_chunk(&ChunkData::Int64(composite), &mut ids)?;
            log::trace!(
                "group index rows {start}..{end}: {} identifiers so far",
                factorizer.cardinality()
            );
            start = end;
        }

        let ChunkData::Int64(composites) = factorizer.finish() else {
            return Err(QueryError::InvalidArgument(
                "composite identifiers must be Int64".into(),
            ));
        };
        let mut slot_keys = Vec::with_capacity(composites.len() + 1);
        let mut excluded = false;
        for composite in composites {
            if composite == EXCLUDED {
                excluded = true;
                slot_keys.push(None);
            } else {
                slot_keys.push(Some(decode(composite, &strides, &cardinalities)));
            }
        }
        if !excluded {
            slot_keys.push(None);
        }
        let group_count = slot_keys.len() - 1;
        Ok(Self::assemble(
            ids.finish()?,
            group_count,
            key_values,
            slot_keys,
        ))
    }

    fn assemble(
        ids: Column,
        group_count: usize,
        key_values: Vec<ChunkData>,
        slot_keys: Vec<Option<Vec<usize>>>,
    ) -> Self {
        let skip_key = slot_keys
            .iter()
            .position(Option::is_none)
            .unwrap_or(group_count);
        log::debug!(
            "group index over {} rows: {group_count} groups, skip key {skip_key}",
            ids.len()
        );
        Self {
            ids,
            group_count,
            skip_key,
            key_values,
            slot_keys,
        }
    }

    /// Group identifier of every row, as an Int64 column.
    pub fn ids(&self) -> &Column {
        &self.ids
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn skip_key(&self) -> usize {
        self.skip_key
    }

    /// Number of distinct identifiers that may appear in [`GroupIndex::ids`].
    pub fn slots(&self) -> usize {
        self.slot_keys.len()
    }

    /// Unique values of each group-by column, indexed by key label.
    pub fn key_values(&self) -> &[ChunkData] {
        &self.key_values
    }

    /// Key labels (one per group-by column) for a valid group identifier.
    pub fn group_keys(&self, id: usize) -> Option<&[usize]> {
        self.slot_keys.get(id)?.as_deref()
    }

    /// Valid group identifiers in increasing order with their key labels.
    pub fn groups(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.slot_keys
            .iter()
            .enumerate()
            .filter_map(|(id, keys)| Some((id, keys.as_deref()?)))
    }

    /// Key values (one per group-by column) for a valid group identifier.
    pub fn group_key_values(&self, id: usize) -> Option<Vec<Value>> {
        self.group_keys(id)?
            .iter()
            .zip(&self.key_values)
            .map(|(&label, values)| values.get(label))
            .collect()
    }
}

/// Mixed-radix weights, last column first. Fails when the candidate space exceeds `limit`.
fn strides(cardinalities: &[usize], limit: u64) -> QueryResult<Vec<i64>> {
    let limit = limit.min(i64::MAX as u64);
    let overflow = QueryError::CardinalityOverflow {
        columns: cardinalities.len(),
        limit,
    };
    let mut strides = vec![0i64; cardinalities.len()];
    let mut space: u64 = 1;
    for (k, &cardinality) in cardinalities.iter().enumerate().rev() {
        strides[k] = space as i64;
        space = match space.checked_mul(cardinality as u64) {
            Some(next) if next <= limit => next,
            _ => return Err(overflow),
        };
    }
    Ok(strides)
}

fn decode(composite: i64, strides: &[i64], cardinalities: &[usize]) -> Vec<usize> {
    strides
        .iter()
        .zip(cardinalities)
        .map(|(&stride, &cardinality)| ((composite / stride) % cardinality as i64) as usize)
        .collect()
}
