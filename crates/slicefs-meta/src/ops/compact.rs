//! Slice compaction, slice listing and pending-delete bookkeeping.

use std::collections::BTreeMap;

use slicefs_kv::{scan_prefix, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::StatusCode;
use slicefs_types::{make_error_msg, Result, Status};

use crate::chunk::{build_visible, referenced, ChunkSlices, PendingDelete, SliceRecord};
use crate::inode::Inode;
use crate::key_prefix::{CHUNK_PREFIX, INODE_PREFIX};
use crate::ops::{destroy_inode, retire_slice, Effects, OpEnv};
use crate::session::Sustained;
use crate::types::{Ino, Slice};

/// Every chunk in the volume as `(ino, indx, record count)`.
pub async fn list_chunks<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<(Ino, u32, usize)>> {
    let kvs = scan_prefix(txn, &[CHUNK_PREFIX], true).await?;
    kvs.iter()
        .map(|kv| {
            let chunk = ChunkSlices::unpack(&kv.key, &kv.value)?;
            Ok((chunk.ino, chunk.indx, chunk.records.len()))
        })
        .collect()
}

/// Drop the records of a chunk that no longer contribute a visible byte.
///
/// Returns the number of pruned records and, when more than one record is
/// left, the visible slices a compaction should rewrite.
pub async fn compact_chunk(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ino: Ino,
    indx: u32,
) -> Result<(u64, Option<Vec<Slice>>)> {
    let mut chunk = ChunkSlices::load(&*txn, ino, indx, false).await?;
    let used = referenced(&chunk.records);
    let mut kept = Vec::with_capacity(chunk.records.len());
    let mut pruned = 0u64;
    for (record, used) in chunk.records.iter().zip(used) {
        if used {
            kept.push(*record);
        } else {
            retire_slice(txn, env, fx, record.id, record.size).await?;
            pruned += 1;
        }
    }
    if pruned > 0 {
        chunk.records = kept;
        chunk.store(txn).await?;
        fx.touched.push(ino);
        tracing::debug!(inode = ino, indx, pruned, "compact: pruned shadowed slices");
    }
    let rewrite = (chunk.records.len() > 1).then(|| chunk.visible());
    Ok((pruned, rewrite))
}

/// Replace the records that produced `origin` with the single compacted
/// `slice`.
pub async fn commit_compaction(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ino: Ino,
    indx: u32,
    origin: &[Slice],
    slice: Slice,
) -> Result<()> {
    let total: u64 = origin.iter().map(|s| s.len as u64).sum();
    if total != slice.len as u64 || slice.is_hole() {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("compacted slice covers {} bytes, origin {}", slice.len, total),
        );
    }
    let mut chunk = ChunkSlices::load(&*txn, ino, indx, false).await?;
    let prefix = (1..=chunk.records.len())
        .find(|&k| build_visible(&chunk.records[..k]) == origin)
        .ok_or_else(|| {
            Status::with_message(
                StatusCode::INVALID_ARG,
                format!("chunk {}:{} changed since compaction started", ino, indx),
            )
        })?;

    let replaced: Vec<SliceRecord> = chunk.records.drain(..prefix).collect();
    chunk.records.insert(0, SliceRecord::new(0, slice));
    chunk.store(txn).await?;
    for r in &replaced {
        retire_slice(txn, env, fx, r.id, r.size).await?;
    }
    fx.touched.push(ino);
    tracing::debug!(inode = ino, indx, chunkid = slice.chunkid, replaced = replaced.len(), "compact: committed");
    Ok(())
}

/// Every stored slice by inode, holes excluded.
pub async fn list_slices<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<BTreeMap<Ino, Vec<Slice>>> {
    let mut out: BTreeMap<Ino, Vec<Slice>> = BTreeMap::new();
    for kv in scan_prefix(txn, &[CHUNK_PREFIX], true).await? {
        let chunk = ChunkSlices::unpack(&kv.key, &kv.value)?;
        let slices = out.entry(chunk.ino).or_default();
        slices.extend(
            chunk
                .records
                .iter()
                .filter(|r| r.id > 0)
                .map(|r| r.slice()),
        );
    }
    out.retain(|_, v| !v.is_empty());
    Ok(out)
}

/// Inodes with no links that no session keeps alive.
pub async fn find_orphans<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<Ino>> {
    let mut out = Vec::new();
    for kv in scan_prefix(txn, &[INODE_PREFIX], true).await? {
        let inode = Inode::unpack(&kv.key, &kv.value)?;
        if inode.attr.nlink == 0 && Sustained::holders(txn, inode.ino).await?.is_empty() {
            out.push(inode.ino);
        }
    }
    Ok(out)
}

/// Delete an orphan found by [`find_orphans`] if it is still one.
pub async fn delete_orphan(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ino: Ino,
) -> Result<bool> {
    match Inode::load(&*txn, ino).await? {
        Some(inode)
            if inode.attr.nlink == 0 && Sustained::holders(&*txn, ino).await?.is_empty() =>
        {
            destroy_inode(txn, env, fx, &inode).await?;
            tracing::info!(inode = ino, "gc: deleted orphan inode");
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub async fn ack_chunk_deleted(txn: &mut dyn ReadWriteTransaction, chunkid: u64, size: u32) -> Result<()> {
    txn.clear(&PendingDelete::pack_key_for(chunkid, size)).await
}
