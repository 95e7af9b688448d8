use slicefs_kv::ReadWriteTransaction;
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, Result, SessionId, Status};

use crate::dir_entry::{DirEntry, DirEntryList};
use crate::inode::{self, Inode};
use crate::link_parent;
use crate::ops::{check_perm, destroy_inode, load_dir, Effects, OpEnv};
use crate::session::Sustained;
use crate::types::{AccessMask, Attr, Context, Ino};

pub(crate) fn check_sticky(env: &OpEnv<'_>, ctx: &Context, parent: &Attr, attr: &Attr) -> Result<()> {
    if !env.config.strict {
        return Ok(());
    }
    inode::check_sticky(ctx, parent, attr)
}

/// Drop the entry of `inode` in `parent` from its link count.
///
/// At zero links the inode is deleted, or kept as sustained while this
/// client still has it open.
pub(crate) async fn drop_link(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    inode: &mut Inode,
    parent: Ino,
) -> Result<()> {
    let ino = inode.ino;
    inode.attr.nlink = inode.attr.nlink.saturating_sub(1);
    inode.attr.touch_ctime(env.now);
    let left_here = link_parent::adjust(txn, ino, parent, -1).await?;

    if inode.attr.nlink > 0 {
        if inode.attr.parent == parent && left_here == 0 {
            inode.attr.parent = link_parent::load(&*txn, ino)
                .await?
                .first()
                .map(|(p, _)| *p)
                .unwrap_or(0);
        }
        return inode.store(txn).await;
    }

    match env.sid {
        Some(sid) if env.open_files.is_open(ino) => {
            inode.attr.parent = 0;
            inode.store(txn).await?;
            link_parent::clear(txn, ino).await?;
            Sustained::add(txn, ino, sid).await?;
            tracing::debug!(inode = ino, sid = sid.get(), "unlink: sustained open file");
            Ok(())
        }
        _ => destroy_inode(txn, env, fx, inode).await,
    }
}

pub async fn unlink(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ctx: &Context,
    parent: Ino,
    name: &str,
) -> Result<()> {
    let mut dir = load_dir(&*txn, parent).await?;
    check_perm(env, ctx, &dir.attr, AccessMask::WRITE | AccessMask::EXEC)?;
    let entry = DirEntry::load(&*txn, parent, name)
        .await?
        .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, name.to_string()))?;
    let child = Inode::load(&*txn, entry.inode).await?;
    if let Some(child) = &child {
        if child.attr.is_dir() {
            return make_error(MetaCode::NOT_PERMITTED);
        }
        check_sticky(env, ctx, &dir.attr, &child.attr)?;
    }

    entry.remove(txn).await?;
    dir.attr.touch_mtime(env.now);
    dir.store(txn).await?;
    match child {
        Some(mut child) => drop_link(txn, env, fx, &mut child, parent).await?,
        None => tracing::warn!(parent, name, inode = entry.inode, "unlink: dangling entry removed"),
    }
    tracing::debug!(parent, name, inode = entry.inode, "unlink: removed");
    Ok(())
}

pub async fn rmdir(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ctx: &Context,
    parent: Ino,
    name: &str,
) -> Result<()> {
    match name {
        "." => return make_error(StatusCode::INVALID_ARG),
        ".." => return make_error(MetaCode::NOT_EMPTY),
        _ => {}
    }
    let mut dir = load_dir(&*txn, parent).await?;
    check_perm(env, ctx, &dir.attr, AccessMask::WRITE | AccessMask::EXEC)?;
    let entry = DirEntry::load(&*txn, parent, name)
        .await?
        .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, name.to_string()))?;
    let child = Inode::load_existing(&*txn, entry.inode).await?;
    if !child.attr.is_dir() {
        return make_error(MetaCode::NOT_DIRECTORY);
    }
    check_sticky(env, ctx, &dir.attr, &child.attr)?;
    if !DirEntryList::check_empty(&*txn, child.ino).await? {
        return make_error(MetaCode::NOT_EMPTY);
    }

    entry.remove(txn).await?;
    dir.attr.nlink = dir.attr.nlink.saturating_sub(1);
    dir.attr.touch_mtime(env.now);
    dir.store(txn).await?;
    destroy_inode(txn, env, fx, &child).await?;
    tracing::debug!(parent, name, inode = child.ino, "rmdir: removed");
    Ok(())
}

/// Drop the hold `sid` has on an unlinked inode and delete it once no
/// session holds it any more.
pub async fn release_inode(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ino: Ino,
    sid: SessionId,
) -> Result<bool> {
    if !Sustained::exists(&*txn, ino, sid).await? {
        return Ok(false);
    }
    Sustained::remove(txn, ino, sid).await?;
    if !Sustained::holders(&*txn, ino).await?.is_empty() {
        return Ok(false);
    }
    match Inode::load(&*txn, ino).await? {
        Some(inode) if inode.attr.nlink == 0 => {
            destroy_inode(txn, env, fx, &inode).await?;
            tracing::debug!(inode = ino, sid = sid.get(), "release: deleted sustained inode");
            Ok(true)
        }
        _ => Ok(false),
    }
}
