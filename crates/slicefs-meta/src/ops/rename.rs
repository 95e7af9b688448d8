use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result, Status};

use crate::dir_entry::{DirEntry, DirEntryList};
use crate::inode::Inode;
use crate::link_parent;
use crate::ops::remove::{check_sticky, drop_link};
use crate::ops::{check_name, check_perm, destroy_inode, load_dir, Effects, OpEnv};
use crate::types::{AccessMask, Attr, Context, Ino, RenameFlags, ROOT_INODE};

pub fn check_flags(flags: RenameFlags) -> Result<()> {
    if flags.bits() & !RenameFlags::all().bits() != 0 {
        return make_error_msg(StatusCode::INVALID_ARG, format!("unknown rename flags {:#x}", flags.bits()));
    }
    if flags.contains(RenameFlags::NOREPLACE | RenameFlags::EXCHANGE)
        || flags.contains(RenameFlags::WHITEOUT | RenameFlags::EXCHANGE)
    {
        return make_error_msg(StatusCode::INVALID_ARG, format!("invalid rename flags {:?}", flags));
    }
    if flags.contains(RenameFlags::WHITEOUT) {
        return make_error(MetaCode::NOT_SUPPORTED);
    }
    Ok(())
}

/// Whether `ancestor` is `ino` or one of its parents.
async fn is_ancestor<T: ReadOnlyTransaction + ?Sized>(txn: &T, ancestor: Ino, mut ino: Ino) -> Result<bool> {
    loop {
        if ino == ancestor {
            return Ok(true);
        }
        if ino == ROOT_INODE || ino == 0 {
            return Ok(false);
        }
        let parent = Inode::load_existing(txn, ino).await?.attr.parent;
        if parent == ino {
            return Ok(false);
        }
        ino = parent;
    }
}

/// Move a non-directory's link from `from` to `to` in the link-parent index.
async fn move_link(
    txn: &mut dyn ReadWriteTransaction,
    inode: &mut Inode,
    from: Ino,
    to: Ino,
) -> Result<()> {
    if from == to || inode.attr.is_dir() {
        return Ok(());
    }
    link_parent::adjust(txn, inode.ino, from, -1).await?;
    link_parent::adjust(txn, inode.ino, to, 1).await?;
    if inode.attr.parent == from {
        inode.attr.parent = to;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn rename(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    ctx: &Context,
    ps: Ino,
    ns: &str,
    pd: Ino,
    nd: &str,
    flags: RenameFlags,
) -> Result<(Ino, Attr)> {
    check_flags(flags)?;
    if matches!(ns, "." | "..") || matches!(nd, "." | "..") {
        return make_error(StatusCode::INVALID_ARG);
    }
    check_name(env, nd)?;

    let mut src_dir = load_dir(&*txn, ps).await?;
    check_perm(env, ctx, &src_dir.attr, AccessMask::WRITE | AccessMask::EXEC)?;
    let mut dst_dir = if pd == ps {
        None
    } else {
        let d = load_dir(&*txn, pd).await?;
        check_perm(env, ctx, &d.attr, AccessMask::WRITE | AccessMask::EXEC)?;
        Some(d)
    };
    let dst_dir_attr = dst_dir.as_ref().map(|d| d.attr.clone()).unwrap_or_else(|| src_dir.attr.clone());

    let src_entry = DirEntry::load(&*txn, ps, ns)
        .await?
        .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, ns.to_string()))?;
    let mut src = Inode::load_existing(&*txn, src_entry.inode).await?;
    check_sticky(env, ctx, &src_dir.attr, &src.attr)?;
    if ps == pd && ns == nd {
        return Ok((src.ino, src.attr));
    }
    if src.attr.is_dir() && ps != pd && is_ancestor(&*txn, src.ino, pd).await? {
        return make_error_msg(StatusCode::INVALID_ARG, "cannot move a directory below itself");
    }

    // Link count changes of the source and destination directories.
    let (mut src_delta, mut dst_delta) = (0i64, 0i64);
    let dst_entry = DirEntry::load(&*txn, pd, nd).await?;

    if flags.contains(RenameFlags::EXCHANGE) {
        let dst_entry = dst_entry.ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, nd.to_string()))?;
        let mut dst = Inode::load_existing(&*txn, dst_entry.inode).await?;
        check_sticky(env, ctx, &dst_dir_attr, &dst.attr)?;
        if dst.attr.is_dir() && ps != pd && is_ancestor(&*txn, dst.ino, ps).await? {
            return make_error_msg(StatusCode::INVALID_ARG, "cannot move a directory below itself");
        }
        DirEntry::new(ps, ns, dst.ino, dst.attr.typ).store(txn).await?;
        DirEntry::new(pd, nd, src.ino, src.attr.typ).store(txn).await?;
        if ps != pd {
            match (src.attr.is_dir(), dst.attr.is_dir()) {
                (true, false) => {
                    src_delta -= 1;
                    dst_delta += 1;
                }
                (false, true) => {
                    src_delta += 1;
                    dst_delta -= 1;
                }
                _ => {}
            }
            if src.attr.is_dir() {
                src.attr.parent = pd;
            }
            if dst.attr.is_dir() {
                dst.attr.parent = ps;
            }
        }
        move_link(txn, &mut src, ps, pd).await?;
        move_link(txn, &mut dst, pd, ps).await?;
        dst.attr.touch_ctime(env.now);
        dst.store(txn).await?;
    } else {
        if let Some(dst_entry) = dst_entry {
            if flags.contains(RenameFlags::NOREPLACE) || !env.config.atomic_replace {
                return make_error_msg(MetaCode::EXISTS, nd.to_string());
            }
            if dst_entry.inode == src.ino {
                return Ok((src.ino, src.attr));
            }
            let mut dst = Inode::load_existing(&*txn, dst_entry.inode).await?;
            match (src.attr.is_dir(), dst.attr.is_dir()) {
                (false, true) => return make_error(MetaCode::IS_DIRECTORY),
                (true, false) => return make_error(MetaCode::NOT_DIRECTORY),
                _ => {}
            }
            check_sticky(env, ctx, &dst_dir_attr, &dst.attr)?;
            if dst.attr.is_dir() {
                if !DirEntryList::check_empty(&*txn, dst.ino).await? {
                    return make_error(MetaCode::NOT_EMPTY);
                }
                dst_delta -= 1;
                destroy_inode(txn, env, fx, &dst).await?;
            } else {
                drop_link(txn, env, fx, &mut dst, pd).await?;
            }
            tracing::debug!(parent = pd, name = nd, inode = dst.ino, "rename: replaced target");
        }
        src_entry.remove(txn).await?;
        DirEntry::new(pd, nd, src.ino, src.attr.typ).store(txn).await?;
        if src.attr.is_dir() && ps != pd {
            src_delta -= 1;
            dst_delta += 1;
            src.attr.parent = pd;
        }
        move_link(txn, &mut src, ps, pd).await?;
    }

    src.attr.touch_ctime(env.now);
    src.store(txn).await?;
    match dst_dir.as_mut() {
        Some(d) => {
            apply_nlink(&mut src_dir.attr, src_delta);
            apply_nlink(&mut d.attr, dst_delta);
            d.attr.touch_mtime(env.now);
            d.store(txn).await?;
        }
        None => apply_nlink(&mut src_dir.attr, src_delta + dst_delta),
    }
    src_dir.attr.touch_mtime(env.now);
    src_dir.store(txn).await?;
    tracing::debug!(ps, ns, pd, nd, inode = src.ino, ?flags, "rename: moved");
    Ok((src.ino, src.attr))
}

fn apply_nlink(attr: &mut Attr, delta: i64) {
    attr.nlink = (attr.nlink as i64 + delta).max(0) as u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_validation() {
        assert!(check_flags(RenameFlags::empty()).is_ok());
        assert!(check_flags(RenameFlags::NOREPLACE).is_ok());
        assert!(check_flags(RenameFlags::EXCHANGE).is_ok());
        assert_eq!(
            check_flags(RenameFlags::NOREPLACE | RenameFlags::EXCHANGE)
                .unwrap_err()
                .code(),
            StatusCode::INVALID_ARG
        );
        assert_eq!(
            check_flags(RenameFlags::WHITEOUT | RenameFlags::EXCHANGE)
                .unwrap_err()
                .code(),
            StatusCode::INVALID_ARG
        );
        assert_eq!(
            check_flags(RenameFlags::WHITEOUT).unwrap_err().code(),
            MetaCode::NOT_SUPPORTED
        );
        assert_eq!(
            check_flags(RenameFlags::from_bits_retain(0x10))
                .unwrap_err()
                .code(),
            StatusCode::INVALID_ARG
        );
    }
}
