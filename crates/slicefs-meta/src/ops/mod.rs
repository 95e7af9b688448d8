//! Individual metadata operations.
//!
//! Each operation runs inside a KV transaction supplied by the caller and
//! records the side effects (events, cache invalidations) that must happen
//! only after the transaction commits.

pub mod compact;
pub mod data;
pub mod link;
pub mod lock;
pub mod lookup;
pub mod mknod;
pub mod readdir;
pub mod remove;
pub mod rename;
pub mod session;
pub mod set_attr;
pub mod volume;
pub mod xattr;

use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result, SessionId};

use crate::chunk::{ChunkSlices, PendingDelete, SliceRef};
use crate::config::MetaConfig;
use crate::counter;
use crate::event::MetaEvent;
use crate::format::Format;
use crate::inode::{self, Inode};
use crate::key_prefix::{self, SYMLINK_PREFIX};
use crate::link_parent;
use crate::open_files::OpenFiles;
use crate::types::{align4k, AccessMask, Attr, Context, Ino, Timespec};
use crate::xattr as xattr_table;

/// Volume quotas, 0 meaning unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    pub capacity: u64,
    pub inodes: u64,
}

impl From<&Format> for Limits {
    fn from(f: &Format) -> Self {
        Self {
            capacity: f.capacity,
            inodes: f.inodes,
        }
    }
}

/// Engine state an operation may consult.
pub struct OpEnv<'a> {
    pub config: &'a MetaConfig,
    pub limits: Limits,
    pub sid: Option<SessionId>,
    pub now: Timespec,
    pub open_files: &'a OpenFiles,
}

/// Side effects applied after a successful commit.
#[derive(Debug, Default)]
pub struct Effects {
    pub events: Vec<MetaEvent>,
    /// Inodes whose cached chunks are stale.
    pub touched: Vec<Ino>,
    /// Chunks that crossed the compaction threshold.
    pub compact: Vec<(Ino, u32)>,
}

/// Validate a new entry name.
pub fn check_name(env: &OpEnv<'_>, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return make_error_msg(StatusCode::INVALID_ARG, format!("invalid name {:?}", name));
    }
    if name.len() > env.config.max_name_len {
        return make_error(MetaCode::NAME_TOO_LONG);
    }
    Ok(())
}

/// Permission check, skipped when the engine is not strict.
pub fn check_perm(env: &OpEnv<'_>, ctx: &Context, attr: &Attr, mask: AccessMask) -> Result<()> {
    if !env.config.strict {
        return Ok(());
    }
    inode::check_access(ctx, attr, mask)
}

/// Load a directory that may receive or lose entries.
pub async fn load_dir<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Inode> {
    let dir = Inode::load_existing(txn, ino).await?;
    if !dir.attr.is_dir() {
        return make_error(MetaCode::NOT_DIRECTORY);
    }
    Ok(dir)
}

pub fn symlink_key(ino: Ino) -> Vec<u8> {
    key_prefix::pack1(SYMLINK_PREFIX, ino)
}

/// Charge `delta` bytes to the volume, enforcing the capacity quota on growth.
pub async fn charge_space(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    delta: i64,
) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    let used = counter::add(txn, counter::USED_SPACE, delta).await?;
    if delta > 0 && env.limits.capacity > 0 && used as u64 > env.limits.capacity {
        return make_error(MetaCode::NO_SPACE);
    }
    Ok(())
}

/// Count a new inode against the inode quota.
pub async fn charge_inode(txn: &mut dyn ReadWriteTransaction, env: &OpEnv<'_>) -> Result<()> {
    let total = counter::add(txn, counter::TOTAL_INODES, 1).await?;
    if env.limits.inodes > 0 && total as u64 > env.limits.inodes {
        return make_error(MetaCode::NO_SPACE);
    }
    Ok(())
}

/// Drop one reference to a stored slice. The last reference queues the
/// object for deletion and emits a delete event.
pub async fn retire_slice(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    chunkid: u64,
    size: u32,
) -> Result<()> {
    if chunkid == 0 {
        return Ok(());
    }
    let refs = SliceRef::get(&*txn, chunkid, size).await?;
    if refs > 0 {
        return SliceRef::set(txn, chunkid, size, refs - 1).await;
    }
    PendingDelete {
        chunkid,
        size,
        since: env.now.sec,
    }
    .store(txn)
    .await?;
    fx.events.push(MetaEvent::DeleteChunk { chunkid, size });
    Ok(())
}

/// Remove an inode with no names left, together with its data and xattrs.
pub async fn destroy_inode(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    inode: &Inode,
) -> Result<()> {
    let ino = inode.ino;
    for chunk in ChunkSlices::load_all(&*txn, ino, false).await? {
        for r in &chunk.records {
            retire_slice(txn, env, fx, r.id, r.size).await?;
        }
    }
    let chunks = ChunkSlices::pack_prefix(ino);
    txn.clear_range(&chunks, &slicefs_kv::prefix_list_end_key(&chunks))
        .await?;
    let xattrs = xattr_table::pack_prefix(ino);
    txn.clear_range(&xattrs, &slicefs_kv::prefix_list_end_key(&xattrs))
        .await?;
    txn.clear(&symlink_key(ino)).await?;
    link_parent::clear(txn, ino).await?;
    inode.remove(txn).await?;
    counter::add(txn, counter::TOTAL_INODES, -1).await?;
    charge_space(txn, env, -(align4k(inode.attr.length) as i64)).await?;
    fx.touched.push(ino);
    tracing::debug!(inode = ino, "destroy: removed inode");
    Ok(())
}

/// Required access for an open with `flags`.
pub fn open_mask(flags: i32) -> AccessMask {
    let mut mask = match flags & libc::O_ACCMODE {
        libc::O_WRONLY => AccessMask::WRITE,
        libc::O_RDWR => AccessMask::READ | AccessMask::WRITE,
        _ => AccessMask::READ,
    };
    if flags & libc::O_TRUNC != 0 {
        mask |= AccessMask::WRITE;
    }
    mask
}
