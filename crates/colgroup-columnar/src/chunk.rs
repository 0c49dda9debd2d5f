use crate::bitmap::BitVec;
use crate::error::{StoreError, StoreResult};
use crate::types::{ColumnType, Value};
use std::sync::Arc;

/// One decoded chunk of a column: a dense, typed run of values.
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkData {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Boolean(BitVec),
    String(Vec<Arc<str>>),
}

impl ChunkData {
    pub fn with_capacity(column_type: ColumnType, capacity: usize) -> Self {
        match column_type {
            ColumnType::Int32 => Self::Int32(Vec::with_capacity(capacity)),
            ColumnType::Int64 => Self::Int64(Vec::with_capacity(capacity)),
            ColumnType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
            ColumnType::Boolean => Self::Boolean(BitVec::with_capacity_bits(capacity)),
            ColumnType::String => Self::String(Vec::with_capacity(capacity)),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Int32(_) => ColumnType::Int32,
            Self::Int64(_) => ColumnType::Int64,
            Self::Float64(_) => ColumnType::Float64,
            Self::Boolean(_) => ColumnType::Boolean,
            Self::String(_) => ColumnType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Boolean(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `idx`, or `None` when out of bounds.
    pub fn get(&self, idx: usize) -> Option<Value> {
        if idx >= self.len() {
            return None;
        }
        Some(match self {
            Self::Int32(v) => Value::Int32(v[idx]),
            Self::Int64(v) => Value::Int64(v[idx]),
            Self::Float64(v) => Value::Float64(v[idx]),
            Self::Boolean(v) => Value::Boolean(v.get(idx)),
            Self::String(v) => Value::String(v[idx].clone()),
        })
    }

    /// Append a value of the chunk's own type. Returns the value back on a type mismatch.
    pub fn push(&mut self, value: Value) -> Result<(), Value> {
        match (self, value) {
            (Self::Int32(v), Value::Int32(x)) => v.push(x),
            (Self::Int64(v), Value::Int64(x)) => v.push(x),
            (Self::Float64(v), Value::Float64(x)) => v.push(x),
            (Self::Boolean(v), Value::Boolean(x)) => v.push(x),
            (Self::String(v), Value::String(x)) => v.push(x),
            (_, other) => return Err(other),
        }
        Ok(())
    }

    /// Append rows `start..end` of `other`, which must have the same type.
    pub(crate) fn extend_range(&mut self, other: &ChunkData, start: usize, end: usize) {
        match (self, other) {
            (Self::Int32(v), Self::Int32(o)) => v.extend_from_slice(&o[start..end]),
            (Self::Int64(v), Self::Int64(o)) => v.extend_from_slice(&o[start..end]),
            (Self::Float64(v), Self::Float64(o)) => v.extend_from_slice(&o[start..end]),
            (Self::Boolean(v), Self::Boolean(o)) => v.extend_from(&o.slice(start, end)),
            (Self::String(v), Self::String(o)) => v.extend_from_slice(&o[start..end]),
            (this, other) => debug_assert!(
                false,
                "extend_range type mismatch: {} vs {}",
                this.column_type(),
                other.column_type()
            ),
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Self::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Self::Int64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Self::Float64(v) => v.iter().flat_map(|x| x.to_bits().to_le_bytes()).collect(),
            Self::Boolean(v) => v.as_words().iter().flat_map(|w| w.to_le_bytes()).collect(),
            Self::String(v) => {
                let total: usize = v.iter().map(|s| s.len() + 4).sum();
                let mut buf = Vec::with_capacity(total);
                for s in v {
                    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    buf.extend_from_slice(s.as_bytes());
                }
                buf
            }
        }
    }

    pub(crate) fn decode(column_type: ColumnType, len: usize, bytes: &[u8]) -> StoreResult<Self> {
        fn fixed<const N: usize>(bytes: &[u8], len: usize) -> StoreResult<Vec<[u8; N]>> {
            if bytes.len() != len * N {
                return Err(StoreError::Corrupt(format!(
                    "expected {} bytes for {len} values, found {}",
                    len * N,
                    bytes.len()
                )));
            }
            Ok(bytes
                .chunks_exact(N)
                .map(|c| {
                    let mut out = [0u8; N];
                    out.copy_from_slice(c);
                    out
                })
                .collect())
        }

        Ok(match column_type {
            ColumnType::Int32 => Self::Int32(
                fixed::<4>(bytes, len)?
                    .into_iter()
                    .map(i32::from_le_bytes)
                    .collect(),
            ),
            ColumnType::Int64 => Self::Int64(
                fixed::<8>(bytes, len)?
                    .into_iter()
                    .map(i64::from_le_bytes)
                    .collect(),
            ),
            ColumnType::Float64 => Self::Float64(
                fixed::<8>(bytes, len)?
                    .into_iter()
                    .map(|b| f64::from_bits(u64::from_le_bytes(b)))
                    .collect(),
            ),
            ColumnType::Boolean => {
                let words = fixed::<8>(bytes, (len + 63) / 64)?
                    .into_iter()
                    .map(u64::from_le_bytes)
                    .collect();
                Self::Boolean(BitVec::from_words(words, len))
            }
            ColumnType::String => {
                let mut out = Vec::with_capacity(len);
                let mut pos = 0usize;
                for _ in 0..len {
                    let header = bytes
                        .get(pos..pos + 4)
                        .ok_or_else(|| StoreError::Corrupt("truncated string header".into()))?;
                    let mut n = [0u8; 4];
                    n.copy_from_slice(header);
                    let n = u32::from_le_bytes(n) as usize;
                    pos += 4;
                    let body = bytes
                        .get(pos..pos + n)
                        .ok_or_else(|| StoreError::Corrupt("truncated string body".into()))?;
                    let s = std::str::from_utf8(body)
                        .map_err(|e| StoreError::Corrupt(format!("invalid utf-8: {e}")))?;
                    out.push(Arc::<str>::from(s));
                    pos += n;
                }
                if pos != bytes.len() {
                    return Err(StoreError::Corrupt("trailing bytes after strings".into()));
                }
                Self::String(out)
            }
        })
    }
}
