use slicefs_kv::ReadOnlyTransaction;
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result, Status};

use crate::dir_entry::DirEntry;
use crate::inode::Inode;
use crate::ops::{check_perm, symlink_key, OpEnv};
use crate::types::{AccessMask, Attr, Context, Ino, InodeType, ROOT_INODE};

pub async fn getattr<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Attr> {
    Ok(Inode::load_existing(txn, ino).await?.attr)
}

pub async fn access<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    env: &OpEnv<'_>,
    ctx: &Context,
    ino: Ino,
    mask: AccessMask,
) -> Result<()> {
    let attr = getattr(txn, ino).await?;
    check_perm(env, ctx, &attr, mask)
}

/// Find `name` in `parent`, resolving `.` and `..`.
pub async fn lookup<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    env: &OpEnv<'_>,
    ctx: &Context,
    parent: Ino,
    name: &str,
) -> Result<(Ino, Attr)> {
    let dir = Inode::load_existing(txn, parent).await?;
    if !dir.attr.is_dir() {
        return make_error(MetaCode::NOT_DIRECTORY);
    }
    check_perm(env, ctx, &dir.attr, AccessMask::EXEC)?;
    match name {
        "." => return Ok((parent, dir.attr)),
        ".." => {
            let up = if parent == ROOT_INODE || dir.attr.parent == 0 {
                ROOT_INODE
            } else {
                dir.attr.parent
            };
            return Ok((up, getattr(txn, up).await?));
        }
        _ => {}
    }
    let entry = DirEntry::load(txn, parent, name)
        .await?
        .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, name.to_string()))?;
    match Inode::load(txn, entry.inode).await? {
        Some(inode) => Ok((inode.ino, inode.attr)),
        None => {
            tracing::warn!(parent, name, inode = entry.inode, "lookup: dangling entry");
            make_error_msg(MetaCode::NOT_FOUND, name.to_string())
        }
    }
}

/// Walk `path` component by component from `parent`.
pub async fn resolve<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    env: &OpEnv<'_>,
    ctx: &Context,
    parent: Ino,
    path: &str,
) -> Result<(Ino, Attr)> {
    let mut current = (parent, getattr(txn, parent).await?);
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if current.1.typ == InodeType::Symlink {
            return make_error_msg(
                MetaCode::NOT_SUPPORTED,
                format!("symlink in the middle of {}", path),
            );
        }
        current = lookup(txn, env, ctx, current.0, component).await?;
    }
    Ok(current)
}

pub async fn readlink<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<String> {
    let attr = getattr(txn, ino).await?;
    if attr.typ != InodeType::Symlink {
        return make_error(StatusCode::INVALID_ARG);
    }
    let target = txn
        .snapshot_get(&symlink_key(ino))
        .await?
        .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, format!("symlink {}", ino)))?;
    String::from_utf8(target)
        .map_err(|_| Status::with_message(StatusCode::DATA_CORRUPTION, "symlink target is not UTF-8"))
}
