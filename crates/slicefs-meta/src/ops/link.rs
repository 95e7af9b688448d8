use slicefs_kv::ReadWriteTransaction;
use slicefs_types::status_code::MetaCode;
use slicefs_types::{make_error, Result};

use crate::dir_entry::DirEntry;
use crate::inode::Inode;
use crate::link_parent;
use crate::ops::{check_name, check_perm, load_dir, OpEnv};
use crate::types::{AccessMask, Attr, Context, Ino};

/// Add a hard link to `ino` as `name` in `parent`.
pub async fn link(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    ctx: &Context,
    ino: Ino,
    parent: Ino,
    name: &str,
) -> Result<Attr> {
    check_name(env, name)?;
    let mut dir = load_dir(&*txn, parent).await?;
    check_perm(env, ctx, &dir.attr, AccessMask::WRITE | AccessMask::EXEC)?;
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    if inode.attr.is_dir() {
        return make_error(MetaCode::NOT_PERMITTED);
    }
    if DirEntry::load(&*txn, parent, name).await?.is_some() {
        return make_error(MetaCode::EXISTS);
    }

    inode.attr.nlink += 1;
    inode.attr.touch_ctime(env.now);
    if inode.attr.parent == 0 {
        inode.attr.parent = parent;
    }
    inode.store(txn).await?;
    link_parent::adjust(txn, ino, parent, 1).await?;
    dir.attr.touch_mtime(env.now);
    dir.store(txn).await?;
    DirEntry::new(parent, name, ino, inode.attr.typ)
        .store(txn)
        .await?;
    tracing::debug!(inode = ino, parent, name, nlink = inode.attr.nlink, "link: added");
    Ok(inode.attr)
}
