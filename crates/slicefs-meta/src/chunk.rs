//! Chunk slice histories and the records that track slice lifetime.
//!
//! A chunk stores the slices written into it in write order. Reads overlay
//! them so the newest slice wins for every byte; gaps read as zeros.

use serde::{Deserialize, Serialize};
use slicefs_kv::{scan_prefix, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::Result;

use crate::key_prefix::{self, CHUNK_PREFIX, PENDING_DELETE_PREFIX, SLICE_REF_PREFIX};
use crate::types::{Ino, Slice};

/// A slice as stored in a chunk history, with its position in the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRecord {
    pub pos: u32,
    pub id: u64,
    pub size: u32,
    pub off: u32,
    pub len: u32,
}

impl SliceRecord {
    pub fn new(pos: u32, slice: Slice) -> Self {
        Self {
            pos,
            id: slice.chunkid,
            size: slice.size,
            off: slice.off,
            len: slice.len,
        }
    }

    pub fn slice(&self) -> Slice {
        Slice::new(self.id, self.size, self.off, self.len)
    }

    fn end(&self) -> u32 {
        self.pos + self.len
    }
}

/// The slice history of one chunk of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSlices {
    pub ino: Ino,
    pub indx: u32,
    pub records: Vec<SliceRecord>,
}

impl ChunkSlices {
    /// Key format: `[CHUNK_PREFIX] ino indx`
    pub fn pack_key_for(ino: Ino, indx: u32) -> Vec<u8> {
        let mut key = key_prefix::pack1(CHUNK_PREFIX, ino);
        key.extend_from_slice(&indx.to_be_bytes());
        key
    }

    pub fn pack_prefix(ino: Ino) -> Vec<u8> {
        key_prefix::pack1(CHUNK_PREFIX, ino)
    }

    pub fn pack_key(&self) -> Vec<u8> {
        Self::pack_key_for(self.ino, self.indx)
    }

    pub fn unpack(key: &[u8], value: &[u8]) -> Result<Self> {
        key_prefix::expect_key(key, CHUNK_PREFIX, 13)?;
        Ok(Self {
            ino: key_prefix::read_u64(key, 1)?,
            indx: key_prefix::read_u32(key, 9)?,
            records: key_prefix::decode("chunk", value)?,
        })
    }

    /// Load a chunk; a missing chunk has an empty history.
    pub async fn load<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        ino: Ino,
        indx: u32,
        snapshot: bool,
    ) -> Result<Self> {
        let key = Self::pack_key_for(ino, indx);
        let value = if snapshot {
            txn.snapshot_get(&key).await?
        } else {
            txn.get(&key).await?
        };
        match value {
            Some(v) => Self::unpack(&key, &v),
            None => Ok(Self {
                ino,
                indx,
                records: Vec::new(),
            }),
        }
    }

    /// All chunks of a file, ordered by index.
    pub async fn load_all<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        ino: Ino,
        snapshot: bool,
    ) -> Result<Vec<Self>> {
        let kvs = scan_prefix(txn, &Self::pack_prefix(ino), snapshot).await?;
        kvs.iter().map(|kv| Self::unpack(&kv.key, &kv.value)).collect()
    }

    /// Write the history back, clearing the key when it is empty.
    pub async fn store(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        if self.records.is_empty() {
            return txn.clear(&self.pack_key()).await;
        }
        let value = key_prefix::encode("chunk", &self.records)?;
        txn.set(&self.pack_key(), &value).await
    }

    pub fn visible(&self) -> Vec<Slice> {
        build_visible(&self.records)
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: u32,
    end: u32,
    rec: usize,
}

/// Overlay `records` (oldest first) into non-overlapping segments.
fn overlay(records: &[SliceRecord]) -> Vec<Segment> {
    let mut segs: Vec<Segment> = Vec::new();
    for (i, r) in records.iter().enumerate() {
        if r.len == 0 {
            continue;
        }
        let (start, end) = (r.pos, r.end());
        let mut next = Vec::with_capacity(segs.len() + 2);
        for s in segs {
            if s.end <= start || s.start >= end {
                next.push(s);
                continue;
            }
            if s.start < start {
                next.push(Segment { end: start, ..s });
            }
            if s.end > end {
                next.push(Segment { start: end, ..s });
            }
        }
        next.push(Segment { start, end, rec: i });
        next.sort_by_key(|s| s.start);
        segs = next;
    }
    segs
}

/// The slices a reader sees, from position 0 to the end of the last write.
///
/// Gaps are returned as holes.
pub fn build_visible(records: &[SliceRecord]) -> Vec<Slice> {
    let mut out = Vec::new();
    let mut cursor = 0u32;
    for seg in overlay(records) {
        if seg.start > cursor {
            out.push(Slice::hole(seg.start - cursor));
        }
        let r = &records[seg.rec];
        out.push(Slice::new(
            r.id,
            r.size,
            r.off + (seg.start - r.pos),
            seg.end - seg.start,
        ));
        cursor = seg.end;
    }
    out
}

/// Which records still contribute at least one visible byte.
pub fn referenced(records: &[SliceRecord]) -> Vec<bool> {
    let mut used = vec![false; records.len()];
    for seg in overlay(records) {
        used[seg.rec] = true;
    }
    used
}

/// Visible slices covering `[from, from + len)` of a chunk, holes included.
pub fn visible_range(records: &[SliceRecord], from: u32, len: u32) -> Vec<Slice> {
    let to = from + len;
    let mut out = Vec::new();
    let mut pos = 0u32;
    for s in build_visible(records) {
        let (s_start, s_end) = (pos, pos + s.len);
        pos = s_end;
        if s_end <= from || s_start >= to {
            continue;
        }
        let a = s_start.max(from);
        let b = s_end.min(to);
        out.push(Slice::new(s.chunkid, s.size, s.off + (a - s_start), b - a));
    }
    if pos < to {
        let gap_start = pos.max(from);
        out.push(Slice::hole(to - gap_start));
    }
    out
}

/// Extra references to a stored slice, created by `copy_file_range`.
///
/// The first reference is implicit; a slice is retired when it is dropped
/// with no extra reference left.
pub struct SliceRef;

impl SliceRef {
    pub fn pack_key_for(chunkid: u64, size: u32) -> Vec<u8> {
        key_prefix::pack2(SLICE_REF_PREFIX, chunkid, size as u64)
    }

    pub async fn get<T: ReadOnlyTransaction + ?Sized>(txn: &T, chunkid: u64, size: u32) -> Result<u64> {
        match txn.get(&Self::pack_key_for(chunkid, size)).await? {
            Some(v) => key_prefix::decode("slice ref", &v),
            None => Ok(0),
        }
    }

    pub async fn set(
        txn: &mut dyn ReadWriteTransaction,
        chunkid: u64,
        size: u32,
        refs: u64,
    ) -> Result<()> {
        let key = Self::pack_key_for(chunkid, size);
        if refs == 0 {
            return txn.clear(&key).await;
        }
        txn.set(&key, &key_prefix::encode("slice ref", &refs)?).await
    }

    /// `(chunkid, size, extra refs)` of every shared slice.
    pub async fn list<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<(u64, u32, u64)>> {
        let kvs = scan_prefix(txn, &[SLICE_REF_PREFIX], true).await?;
        kvs.iter()
            .map(|kv| {
                key_prefix::expect_key(&kv.key, SLICE_REF_PREFIX, 17)?;
                Ok((
                    key_prefix::read_u64(&kv.key, 1)?,
                    key_prefix::read_u64(&kv.key, 9)? as u32,
                    key_prefix::decode("slice ref", &kv.value)?,
                ))
            })
            .collect()
    }
}

/// A retired slice whose object has not been deleted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub chunkid: u64,
    pub size: u32,
    /// Unix seconds when the slice was retired.
    pub since: i64,
}

impl PendingDelete {
    pub fn pack_key_for(chunkid: u64, size: u32) -> Vec<u8> {
        key_prefix::pack2(PENDING_DELETE_PREFIX, chunkid, size as u64)
    }

    pub async fn store(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        let value = key_prefix::encode("pending delete", &self.since)?;
        txn.set(&Self::pack_key_for(self.chunkid, self.size), &value)
            .await
    }

    pub async fn list<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<Self>> {
        let kvs = scan_prefix(txn, &[PENDING_DELETE_PREFIX], true).await?;
        kvs.iter()
            .map(|kv| {
                key_prefix::expect_key(&kv.key, PENDING_DELETE_PREFIX, 17)?;
                Ok(Self {
                    chunkid: key_prefix::read_u64(&kv.key, 1)?,
                    size: key_prefix::read_u64(&kv.key, 9)? as u32,
                    since: key_prefix::decode("pending delete", &kv.value)?,
                })
            })
            .collect()
    }
}
