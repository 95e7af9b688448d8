use slicefs_kv::ReadWriteTransaction;
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, Result};

use crate::chunk::{ChunkSlices, SliceRecord};
use crate::inode::Inode;
use crate::ops::{charge_space, check_perm, retire_slice, Effects, OpEnv};
use crate::types::{
    align4k, AccessMask, Attr, Context, FallocateMode, Ino, SetAttrMask, Slice, TruncateFlags,
    CHUNK_SIZE, MAX_FILE_SIZE,
};

#[allow(clippy::too_many_arguments)]
pub async fn setattr(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ctx: &Context,
    ino: Ino,
    set: SetAttrMask,
    sggid_clear_mode: u16,
    new: &Attr,
) -> Result<Attr> {
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    let strict = env.config.strict;
    let root = ctx.uid == 0;
    let owner = ctx.uid == inode.attr.uid;
    let attr = &mut inode.attr;

    let uid_change = set.contains(SetAttrMask::UID) && new.uid != attr.uid;
    let gid_change = set.contains(SetAttrMask::GID) && new.gid != attr.gid;
    if strict && !root {
        if uid_change {
            return make_error(MetaCode::NOT_PERMITTED);
        }
        if gid_change && !(owner && ctx.in_group(new.gid)) {
            return make_error(MetaCode::NOT_PERMITTED);
        }
    }
    if uid_change || gid_change {
        attr.mode &= !sggid_clear_mode;
        if uid_change {
            attr.uid = new.uid;
        }
        if gid_change {
            attr.gid = new.gid;
        }
    }

    if set.contains(SetAttrMask::MODE) {
        if strict && !root && !owner {
            return make_error(MetaCode::NOT_PERMITTED);
        }
        let mut mode = new.mode & 0o7777;
        if strict && !root && !ctx.in_group(attr.gid) {
            mode &= !(libc::S_ISGID as u16);
        }
        attr.mode = mode;
    }

    let explicit_times = SetAttrMask::ATIME | SetAttrMask::MTIME | SetAttrMask::CTIME;
    let now_times = SetAttrMask::ATIME_NOW | SetAttrMask::MTIME_NOW;
    if strict && !root && !owner {
        if set.intersects(explicit_times) && !set.intersects(now_times) {
            return make_error(MetaCode::NOT_PERMITTED);
        }
        if set.intersects(now_times) {
            check_perm(env, ctx, attr, AccessMask::WRITE)?;
        }
    }
    if set.contains(SetAttrMask::ATIME_NOW) {
        attr.touch_atime(env.now);
    } else if set.contains(SetAttrMask::ATIME) {
        attr.atime = new.atime;
        attr.atimensec = new.atimensec;
    }
    if set.contains(SetAttrMask::MTIME_NOW) {
        attr.mtime = env.now.sec;
        attr.mtimensec = env.now.nsec;
    } else if set.contains(SetAttrMask::MTIME) {
        attr.mtime = new.mtime;
        attr.mtimensec = new.mtimensec;
    }

    if set.contains(SetAttrMask::SIZE) {
        if inode.attr.is_dir() {
            return make_error(MetaCode::IS_DIRECTORY);
        }
        if !inode.attr.is_file() {
            return make_error(MetaCode::NOT_PERMITTED);
        }
        if new.length > MAX_FILE_SIZE {
            return make_error(MetaCode::FILE_TOO_LARGE);
        }
        if new.length != inode.attr.length {
            resize(txn, env, fx, &mut inode, new.length).await?;
            inode.attr.mtime = env.now.sec;
            inode.attr.mtimensec = env.now.nsec;
        }
    }

    if set.contains(SetAttrMask::CTIME) {
        inode.attr.ctime = new.ctime;
        inode.attr.ctimensec = new.ctimensec;
    } else {
        inode.attr.touch_ctime(env.now);
    }
    inode.store(txn).await?;
    tracing::debug!(inode = ino, set = set.bits(), "setattr: updated");
    Ok(inode.attr)
}

pub async fn truncate(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ctx: &Context,
    ino: Ino,
    flags: TruncateFlags,
    length: u64,
) -> Result<Attr> {
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    if inode.attr.is_dir() {
        return make_error(MetaCode::IS_DIRECTORY);
    }
    if !inode.attr.is_file() {
        return make_error(MetaCode::NOT_PERMITTED);
    }
    if !flags.contains(TruncateFlags::SKIP_PERM_CHECK) {
        check_perm(env, ctx, &inode.attr, AccessMask::WRITE)?;
    }
    if length > MAX_FILE_SIZE {
        return make_error(MetaCode::FILE_TOO_LARGE);
    }
    resize(txn, env, fx, &mut inode, length).await?;
    inode.attr.touch_mtime(env.now);
    inode.store(txn).await?;
    tracing::debug!(inode = ino, length, "truncate: resized");
    Ok(inode.attr)
}

/// Change the length of a file. Shrinking drops the chunks past the new end
/// and masks the tail of the boundary chunk with a hole.
async fn resize(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    inode: &mut Inode,
    length: u64,
) -> Result<()> {
    let old = inode.attr.length;
    if length == old {
        return Ok(());
    }
    charge_space(txn, env, align4k(length) as i64 - align4k(old) as i64).await?;
    if length < old {
        let boundary = (length / CHUNK_SIZE) as u32;
        let off = (length % CHUNK_SIZE) as u32;
        for mut chunk in ChunkSlices::load_all(&*txn, inode.ino, false).await? {
            if chunk.indx > boundary || (chunk.indx == boundary && off == 0) {
                for r in &chunk.records {
                    retire_slice(txn, env, fx, r.id, r.size).await?;
                }
                chunk.records.clear();
                chunk.store(txn).await?;
            } else if chunk.indx == boundary {
                mask_tail(&mut chunk, off);
                chunk.store(txn).await?;
            }
        }
        fx.touched.push(inode.ino);
    }
    inode.attr.length = length;
    Ok(())
}

/// Cover everything from `off` to the end of the written data with a hole.
fn mask_tail(chunk: &mut ChunkSlices, off: u32) {
    let end = chunk.records.iter().map(|r| r.pos + r.len).max().unwrap_or(0);
    if end > off {
        chunk
            .records
            .push(SliceRecord::new(off, Slice::hole(end - off)));
    }
}

/// Overlay holes on the written data in `[from, to)`.
async fn write_holes(txn: &mut dyn ReadWriteTransaction, ino: Ino, from: u64, to: u64) -> Result<()> {
    let mut pos = from;
    while pos < to {
        let indx = (pos / CHUNK_SIZE) as u32;
        let start = (pos % CHUNK_SIZE) as u32;
        let end = (to - indx as u64 * CHUNK_SIZE).min(CHUNK_SIZE) as u32;
        let mut chunk = ChunkSlices::load(&*txn, ino, indx, false).await?;
        if !chunk.records.is_empty() {
            chunk
                .records
                .push(SliceRecord::new(start, Slice::hole(end - start)));
            chunk.store(txn).await?;
        }
        pos = indx as u64 * CHUNK_SIZE + end as u64;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn fallocate(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ctx: &Context,
    ino: Ino,
    mode: FallocateMode,
    off: u64,
    size: u64,
) -> Result<()> {
    if mode.intersects(FallocateMode::COLLAPSE_RANGE | FallocateMode::INSERT_RANGE) {
        return make_error(MetaCode::NOT_SUPPORTED);
    }
    if mode.contains(FallocateMode::PUNCH_HOLE) && !mode.contains(FallocateMode::KEEP_SIZE) {
        return make_error(StatusCode::INVALID_ARG);
    }
    if size == 0 {
        return make_error(StatusCode::INVALID_ARG);
    }
    let end = match off.checked_add(size) {
        Some(end) if end <= MAX_FILE_SIZE => end,
        _ => return make_error(MetaCode::FILE_TOO_LARGE),
    };
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    if inode.attr.is_dir() {
        return make_error(MetaCode::IS_DIRECTORY);
    }
    if !inode.attr.is_file() {
        return make_error(MetaCode::NOT_PERMITTED);
    }
    check_perm(env, ctx, &inode.attr, AccessMask::WRITE)?;

    let old = inode.attr.length;
    if !mode.contains(FallocateMode::KEEP_SIZE) && end > old {
        charge_space(txn, env, align4k(end) as i64 - align4k(old) as i64).await?;
        inode.attr.length = end;
    }
    if mode.intersects(FallocateMode::PUNCH_HOLE | FallocateMode::ZERO_RANGE) {
        let to = end.min(old);
        if off < to {
            write_holes(txn, ino, off, to).await?;
            fx.touched.push(ino);
        }
    }
    inode.attr.touch_mtime(env.now);
    inode.store(txn).await?;
    tracing::debug!(inode = ino, mode = mode.bits(), off, size, "fallocate: done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_tail_only_past_data() {
        let mut chunk = ChunkSlices {
            ino: 2,
            indx: 0,
            records: vec![SliceRecord::new(0, Slice::new(5, 100, 0, 100))],
        };
        mask_tail(&mut chunk, 100);
        assert_eq!(chunk.records.len(), 1);
        mask_tail(&mut chunk, 40);
        assert_eq!(
            chunk.visible(),
            vec![Slice::new(5, 100, 0, 40), Slice::hole(60)]
        );
    }
}
