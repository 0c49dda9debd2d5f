use crate::atomic::write_file_atomic;
use crate::bitmap::{BitVec, MaskRows};
use crate::chunk::ChunkData;
use crate::error::{StoreError, StoreResult};
use crate::types::{ColumnType, Value};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const META_FILE: &str = "meta.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkCacheConfig {
    /// Maximum number of decoded chunks kept per disk-backed column.
    pub max_entries: usize,
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self { max_entries: 16 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnMeta {
    column_type: ColumnType,
    len: usize,
    chunk_len: usize,
    chunk_count: usize,
}

struct DiskCache {
    chunks: LruCache<usize, Arc<ChunkData>>,
    stats: CacheStats,
}

enum Storage {
    Memory(Vec<Arc<ChunkData>>),
    Disk {
        dir: PathBuf,
        cache: Mutex<DiskCache>,
    },
}

/// A fixed-type column split into chunks of `chunk_len` rows.
///
/// Columns are immutable once built; use [`ColumnWriter`] to create one.
pub struct Column {
    column_type: ColumnType,
    len: usize,
    chunk_len: usize,
    chunk_count: usize,
    storage: Storage,
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Column");
        s.field("column_type", &self.column_type)
            .field("len", &self.len)
            .field("chunk_len", &self.chunk_len);
        if let Storage::Disk { dir, .. } = &self.storage {
            s.field("dir", dir);
        }
        s.finish()
    }
}

fn chunk_path(dir: &Path, idx: usize) -> PathBuf {
    dir.join(format!("chunk-{idx:06}.bin"))
}

impl Column {
    /// Open a persisted column directory.
    pub fn open(dir: impl AsRef<Path>, cache: ChunkCacheConfig) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta: ColumnMeta = serde_json::from_slice(&fs::read(dir.join(META_FILE))?)?;
        if meta.chunk_len == 0 {
            return Err(StoreError::Corrupt(format!(
                "{}: chunk_len must be positive",
                dir.display()
            )));
        }
        let capacity = NonZeroUsize::new(cache.max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            column_type: meta.column_type,
            len: meta.len,
            chunk_len: meta.chunk_len,
            chunk_count: meta.chunk_count,
            storage: Storage::Disk {
                dir,
                cache: Mutex::new(DiskCache {
                    chunks: LruCache::new(capacity),
                    stats: CacheStats::default(),
                }),
            },
        })
    }

    /// Whether `dir` holds a fully written column (its metadata is written last).
    pub fn is_complete(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(META_FILE).is_file()
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Directory backing this column, if it is persisted.
    pub fn dir(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Memory(_) => None,
            Storage::Disk { dir, .. } => Some(dir),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        match &self.storage {
            Storage::Memory(_) => CacheStats::default(),
            Storage::Disk { cache, .. } => {
                cache.lock().unwrap_or_else(|e| e.into_inner()).stats
            }
        }
    }

    /// Row range `[start, end)` covered by chunk `idx`.
    pub fn chunk_bounds(&self, idx: usize) -> (usize, usize) {
        let start = (idx * self.chunk_len).min(self.len);
        (start, (start + self.chunk_len).min(self.len))
    }

    pub fn chunk(&self, idx: usize) -> StoreResult<Arc<ChunkData>> {
        if idx >= self.chunk_count {
            return Err(StoreError::Corrupt(format!(
                "chunk {idx} out of range ({} chunks)",
                self.chunk_count
            )));
        }
        match &self.storage {
            Storage::Memory(chunks) => Ok(chunks[idx].clone()),
            Storage::Disk { dir, cache } => {
                {
                    let mut guard = cache.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(hit) = guard.chunks.get(&idx).cloned() {
                        guard.stats.hits += 1;
                        return Ok(hit);
                    }
                    guard.stats.misses += 1;
                }

                let (start, end) = self.chunk_bounds(idx);
                let bytes = fs::read(chunk_path(dir, idx))?;
                let decoded = Arc::new(ChunkData::decode(self.column_type, end - start, &bytes)?);
                log::trace!("loaded chunk {idx} of {}", dir.display());

                let mut guard = cache.lock().unwrap_or_else(|e| e.into_inner());
                guard.chunks.put(idx, decoded.clone());
                Ok(decoded)
            }
        }
    }

    pub fn iter_chunks(&self) -> impl Iterator<Item = StoreResult<Arc<ChunkData>>> + '_ {
        (0..self.chunk_count).map(move |idx| self.chunk(idx))
    }

    /// Copy rows `[start, end)` (clamped to the column length) into one chunk.
    pub fn read(&self, start: usize, end: usize) -> StoreResult<ChunkData> {
        let end = end.min(self.len);
        let start = start.min(end);
        let mut out = ChunkData::with_capacity(self.column_type, end - start);
        let mut row = start;
        while row < end {
            let idx = row / self.chunk_len;
            let (chunk_start, chunk_end) = self.chunk_bounds(idx);
            let take_end = end.min(chunk_end);
            let chunk = self.chunk(idx)?;
            out.extend_range(&chunk, row - chunk_start, take_end - chunk_start);
            row = take_end;
        }
        Ok(out)
    }

    pub fn get(&self, row: usize) -> StoreResult<Value> {
        if row >= self.len {
            return Err(StoreError::Corrupt(format!(
                "row {row} out of range ({} rows)",
                self.len
            )));
        }
        let chunk = self.chunk(row / self.chunk_len)?;
        chunk
            .get(row % self.chunk_len)
            .ok_or_else(|| StoreError::Corrupt(format!("chunk too short for row {row}")))
    }

    /// Lazily yield `(row, value)` for rows whose mask bit is set, skipping the first `skip`
    /// matches and stopping after `limit` of them.
    pub fn iter_masked(
        &self,
        mask: Arc<BitVec>,
        limit: Option<usize>,
        skip: usize,
    ) -> StoreResult<MaskedIter<'_>> {
        if mask.len() != self.len {
            return Err(StoreError::RowLength {
                expected: self.len,
                actual: mask.len(),
            });
        }
        Ok(MaskedIter {
            column: self,
            rows: MaskRows::new(mask, limit, skip),
            current: None,
        })
    }
}

pub struct MaskedIter<'a> {
    column: &'a Column,
    rows: MaskRows,
    current: Option<(usize, Arc<ChunkData>)>,
}

impl Iterator for MaskedIter<'_> {
    type Item = StoreResult<(usize, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        let idx = row / self.column.chunk_len;
        let chunk = match &self.current {
            Some((current_idx, chunk)) if *current_idx == idx => chunk.clone(),
            _ => match self.column.chunk(idx) {
                Ok(chunk) => {
                    self.current = Some((idx, chunk.clone()));
                    chunk
                }
                Err(err) => return Some(Err(err)),
            },
        };
        let value = chunk
            .get(row % self.column.chunk_len)
            .ok_or_else(|| StoreError::Corrupt(format!("chunk too short for row {row}")));
        Some(value.map(|v| (row, v)))
    }
}

enum Target {
    Memory(Vec<Arc<ChunkData>>),
    Disk { dir: PathBuf, chunks_written: usize },
}

/// Streaming column builder: full chunks are flushed as soon as they fill, so only one chunk is
/// ever buffered.
pub struct ColumnWriter {
    name: String,
    column_type: ColumnType,
    chunk_len: usize,
    cache: ChunkCacheConfig,
    current: ChunkData,
    len: usize,
    target: Target,
}

impl fmt::Debug for ColumnWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ColumnWriter");
        s.field("name", &self.name)
            .field("column_type", &self.column_type)
            .field("len", &self.len);
        if let Target::Disk { dir, .. } = &self.target {
            s.field("dir", dir);
        }
        s.finish()
    }
}

impl ColumnWriter {
    pub fn in_memory(name: impl Into<String>, column_type: ColumnType, chunk_len: usize) -> Self {
        let chunk_len = chunk_len.max(1);
        Self {
            name: name.into(),
            column_type,
            chunk_len,
            cache: ChunkCacheConfig::default(),
            current: ChunkData::with_capacity(column_type, chunk_len),
            len: 0,
            target: Target::Memory(Vec::new()),
        }
    }

    /// Start writing a column into `dir`, which must not exist or be empty.
    pub fn create(
        dir: impl AsRef<Path>,
        column_type: ColumnType,
        chunk_len: usize,
        cache: ChunkCacheConfig,
    ) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dir.exists() && fs::read_dir(&dir)?.next().is_some() {
            return Err(StoreError::AlreadyExists(dir));
        }
        fs::create_dir_all(&dir)?;
        let chunk_len = chunk_len.max(1);
        Ok(Self {
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            column_type,
            chunk_len,
            cache,
            current: ChunkData::with_capacity(column_type, chunk_len),
            len: 0,
            target: Target::Disk {
                dir,
                chunks_written: 0,
            },
        })
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: Value) -> StoreResult<()> {
        let column_type = self.column_type;
        self.current
            .push(value)
            .map_err(|rejected| StoreError::TypeMismatch {
                column: self.name.clone(),
                expected: column_type,
                actual: rejected.column_type(),
            })?;
        self.len += 1;
        if self.current.len() == self.chunk_len {
            self.flush()?;
        }
        Ok(())
    }

    /// Append every row of `chunk`, re-splitting it on this writer's chunk boundaries.
    pub fn extend_chunk(&mut self, chunk: &ChunkData) -> StoreResult<()> {
        if chunk.column_type() != self.column_type {
            return Err(StoreError::TypeMismatch {
                column: self.name.clone(),
                expected: self.column_type,
                actual: chunk.column_type(),
            });
        }
        let mut pos = 0;
        while pos < chunk.len() {
            let room = self.chunk_len - self.current.len();
            let end = (pos + room).min(chunk.len());
            self.current.extend_range(chunk, pos, end);
            self.len += end - pos;
            pos = end;
            if self.current.len() == self.chunk_len {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.current.is_empty() {
            return Ok(());
        }
        let full = std::mem::replace(
            &mut self.current,
            ChunkData::with_capacity(self.column_type, self.chunk_len),
        );
        match &mut self.target {
            Target::Memory(chunks) => chunks.push(Arc::new(full)),
            Target::Disk {
                dir,
                chunks_written,
            } => {
                write_file_atomic(&chunk_path(dir, *chunks_written), &full.encode())?;
                *chunks_written += 1;
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> StoreResult<Column> {
        self.flush()?;
        match self.target {
            Target::Memory(chunks) => Ok(Column {
                column_type: self.column_type,
                len: self.len,
                chunk_len: self.chunk_len,
                chunk_count: chunks.len(),
                storage: Storage::Memory(chunks),
            }),
            Target::Disk {
                dir,
                chunks_written,
            } => {
                let meta = ColumnMeta {
                    column_type: self.column_type,
                    len: self.len,
                    chunk_len: self.chunk_len,
                    chunk_count: chunks_written,
                };
                write_file_atomic(&dir.join(META_FILE), &serde_json::to_vec_pretty(&meta)?)?;
                Column::open(&dir, self.cache)
            }
        }
    }
}
