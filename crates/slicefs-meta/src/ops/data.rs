use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result, Status};

use crate::chunk::{visible_range, ChunkSlices, SliceRecord, SliceRef};
use crate::inode::Inode;
use crate::ops::{charge_space, check_perm, Effects, OpEnv};
use crate::types::{align4k, AccessMask, Context, Ino, Slice, CHUNK_SIZE, MAX_FILE_SIZE};

fn require_file(inode: &Inode) -> Result<()> {
    if inode.attr.is_dir() {
        return make_error(MetaCode::IS_DIRECTORY);
    }
    if !inode.attr.is_file() {
        return make_error(MetaCode::NOT_PERMITTED);
    }
    Ok(())
}

/// Visible slices of one chunk, read from a snapshot.
pub async fn read<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino, indx: u32) -> Result<Vec<Slice>> {
    let inode = Inode::snapshot_load(txn, ino)
        .await?
        .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, format!("inode {}", ino)))?;
    require_file(&inode)?;
    Ok(ChunkSlices::load(txn, ino, indx, true).await?.visible())
}

/// Grow a file to `end` if it is shorter, charging the new space.
async fn extend_to(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    inode: &mut Inode,
    end: u64,
) -> Result<()> {
    if end > inode.attr.length {
        charge_space(txn, env, align4k(end) as i64 - align4k(inode.attr.length) as i64).await?;
        inode.attr.length = end;
    }
    Ok(())
}

fn check_threshold(env: &OpEnv<'_>, fx: &mut Effects, chunk: &ChunkSlices) {
    let threshold = env.config.compact_threshold;
    if threshold > 0 && chunk.records.len() >= threshold {
        fx.compact.push((chunk.ino, chunk.indx));
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn write(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ino: Ino,
    indx: u32,
    off: u32,
    slice: Slice,
) -> Result<()> {
    if off as u64 + slice.len as u64 > CHUNK_SIZE {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("slice of {} bytes at {} crosses the chunk end", slice.len, off),
        );
    }
    if slice.off as u64 + slice.len as u64 > slice.size as u64 {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!(
                "slice [{}, +{}) of chunk {} exceeds its {} bytes",
                slice.off, slice.len, slice.chunkid, slice.size
            ),
        );
    }
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    require_file(&inode)?;
    let mut chunk = ChunkSlices::load(&*txn, ino, indx, false).await?;
    chunk.records.push(SliceRecord::new(off, slice));
    chunk.store(txn).await?;

    let end = indx as u64 * CHUNK_SIZE + off as u64 + slice.len as u64;
    extend_to(txn, env, &mut inode, end).await?;
    inode.attr.touch_mtime(env.now);
    inode.store(txn).await?;
    check_threshold(env, fx, &chunk);
    fx.touched.push(ino);
    tracing::debug!(inode = ino, indx, off, chunkid = slice.chunkid, len = slice.len, "write: recorded slice");
    Ok(())
}

/// Share `size` bytes of `fin` with `fout` by referencing the same slices.
#[allow(clippy::too_many_arguments)]
pub async fn copy_file_range(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ctx: &Context,
    fin: Ino,
    off_in: u64,
    fout: Ino,
    off_out: u64,
    size: u64,
    flags: u32,
) -> Result<u64> {
    if flags != 0 {
        return make_error_msg(StatusCode::INVALID_ARG, format!("copy flags {:#x}", flags));
    }
    let src = Inode::load_existing(&*txn, fin).await?;
    require_file(&src)?;
    let mut dst = Inode::load_existing(&*txn, fout).await?;
    require_file(&dst)?;
    check_perm(env, ctx, &src.attr, AccessMask::READ)?;
    check_perm(env, ctx, &dst.attr, AccessMask::WRITE)?;

    if off_in >= src.attr.length {
        return Ok(0);
    }
    let size = size.min(src.attr.length - off_in);
    if size == 0 {
        return Ok(0);
    }
    if fin == fout && off_in < off_out + size && off_out < off_in + size {
        return make_error_msg(StatusCode::INVALID_ARG, "overlapping ranges in one file");
    }
    let end_out = match off_out.checked_add(size) {
        Some(end) if end <= MAX_FILE_SIZE => end,
        _ => return make_error(MetaCode::FILE_TOO_LARGE),
    };

    let (mut pos_in, mut pos_out, mut left) = (off_in, off_out, size);
    while left > 0 {
        let in_off = (pos_in % CHUNK_SIZE) as u32;
        let out_off = (pos_out % CHUNK_SIZE) as u32;
        let n = left
            .min(CHUNK_SIZE - in_off as u64)
            .min(CHUNK_SIZE - out_off as u64) as u32;

        let src_chunk = ChunkSlices::load(&*txn, fin, (pos_in / CHUNK_SIZE) as u32, false).await?;
        let mut dst_chunk = ChunkSlices::load(&*txn, fout, (pos_out / CHUNK_SIZE) as u32, false).await?;
        let mut p = out_off;
        for piece in visible_range(&src_chunk.records, in_off, n) {
            if !piece.is_hole() {
                let refs = SliceRef::get(&*txn, piece.chunkid, piece.size).await?;
                SliceRef::set(txn, piece.chunkid, piece.size, refs + 1).await?;
            }
            dst_chunk.records.push(SliceRecord::new(p, piece));
            p += piece.len;
        }
        dst_chunk.store(txn).await?;
        check_threshold(env, fx, &dst_chunk);

        pos_in += n as u64;
        pos_out += n as u64;
        left -= n as u64;
    }

    extend_to(txn, env, &mut dst, end_out).await?;
    dst.attr.touch_mtime(env.now);
    dst.store(txn).await?;
    fx.touched.push(fout);
    tracing::debug!(fin, off_in, fout, off_out, size, "copy_file_range: shared slices");
    Ok(size)
}
