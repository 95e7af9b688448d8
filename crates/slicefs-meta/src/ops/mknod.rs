use slicefs_kv::ReadWriteTransaction;
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result};

use crate::dir_entry::DirEntry;
use crate::inode::Inode;
use crate::link_parent;
use crate::ops::{
    charge_inode, charge_space, check_name, check_perm, load_dir, open_mask, symlink_key, OpEnv,
};
use crate::types::{align4k, AccessMask, Attr, Context, Ino, InodeType};

/// Everything needed to create one inode under a directory.
#[derive(Debug, Clone)]
pub struct NewNode<'a> {
    pub parent: Ino,
    pub name: &'a str,
    pub typ: InodeType,
    pub mode: u16,
    pub cumask: u16,
    pub rdev: u32,
    /// Target of a symlink.
    pub target: &'a str,
    /// Directories inherit the setgid bit of their parent.
    pub copysgid: bool,
}

impl<'a> NewNode<'a> {
    pub fn new(parent: Ino, name: &'a str, typ: InodeType, mode: u16, cumask: u16) -> Self {
        Self {
            parent,
            name,
            typ,
            mode,
            cumask,
            rdev: 0,
            target: "",
            copysgid: false,
        }
    }
}

/// Create inode `ino` and link it as `node.name` in `node.parent`.
pub async fn mknod(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    ctx: &Context,
    node: &NewNode<'_>,
    ino: Ino,
) -> Result<(Ino, Attr)> {
    check_name(env, node.name)?;
    if node.typ == InodeType::Symlink && node.target.is_empty() {
        return make_error_msg(StatusCode::INVALID_ARG, "empty symlink target");
    }
    let mut dir = load_dir(&*txn, node.parent).await?;
    check_perm(env, ctx, &dir.attr, AccessMask::WRITE | AccessMask::EXEC)?;
    if DirEntry::load(&*txn, node.parent, node.name).await?.is_some() {
        return make_error(MetaCode::EXISTS);
    }

    let mode = if node.typ == InodeType::Symlink {
        0o777
    } else {
        node.mode & !node.cumask & 0o7777
    };
    let mut attr = Attr::new(node.typ, mode, ctx.uid, ctx.gid, env.now);
    let sgid = libc::S_ISGID as u16;
    if dir.attr.mode & sgid != 0 {
        attr.gid = dir.attr.gid;
        if node.typ == InodeType::Directory && node.copysgid {
            attr.mode |= sgid;
        }
    }
    attr.rdev = node.rdev;
    attr.parent = node.parent;
    match node.typ {
        InodeType::Directory => {
            attr.nlink = 2;
            attr.length = 4096;
            dir.attr.nlink += 1;
        }
        InodeType::Symlink => {
            attr.length = node.target.len() as u64;
            txn.set(&symlink_key(ino), node.target.as_bytes()).await?;
        }
        _ => {}
    }

    charge_inode(txn, env).await?;
    charge_space(txn, env, align4k(attr.length) as i64).await?;
    if node.typ != InodeType::Directory {
        link_parent::adjust(txn, ino, node.parent, 1).await?;
    }
    dir.attr.touch_mtime(env.now);
    dir.store(txn).await?;
    let inode = Inode::new(ino, attr);
    inode.store(txn).await?;
    DirEntry::new(node.parent, node.name, ino, node.typ)
        .store(txn)
        .await?;
    tracing::debug!(parent = node.parent, name = node.name, inode = ino, typ = ?node.typ, "mknod: created");
    Ok((ino, inode.attr))
}

/// Create a regular file or open the existing one.
///
/// Returns the inode, its attributes and whether it was created.
#[allow(clippy::too_many_arguments)]
pub async fn create(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    ctx: &Context,
    parent: Ino,
    name: &str,
    mode: u16,
    cumask: u16,
    flags: i32,
    ino: Ino,
) -> Result<(Ino, Attr, bool)> {
    if let Some(entry) = DirEntry::load(&*txn, parent, name).await? {
        if flags & libc::O_EXCL != 0 {
            return make_error(MetaCode::EXISTS);
        }
        let existing = Inode::load_existing(&*txn, entry.inode).await?;
        if !existing.attr.is_file() {
            return make_error(MetaCode::EXISTS);
        }
        check_perm(env, ctx, &existing.attr, open_mask(flags))?;
        return Ok((existing.ino, existing.attr, false));
    }
    let node = NewNode::new(parent, name, InodeType::File, mode, cumask);
    let (ino, attr) = mknod(txn, env, ctx, &node, ino).await?;
    Ok((ino, attr, true))
}
