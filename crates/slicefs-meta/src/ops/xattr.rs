use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result};

use crate::inode::Inode;
use crate::ops::{check_perm, OpEnv};
use crate::types::{AccessMask, Context, Ino, XattrFlags, MAX_XATTR_VALUE};
use crate::xattr;

fn check_xattr_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 || name.contains('\0') {
        return make_error_msg(StatusCode::INVALID_ARG, format!("xattr name {:?}", name));
    }
    Ok(())
}

pub async fn getxattr<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino, name: &str) -> Result<Vec<u8>> {
    check_xattr_name(name)?;
    Inode::load_existing(txn, ino).await?;
    match txn.snapshot_get(&xattr::pack_key_for(ino, name)).await? {
        Some(v) => Ok(v),
        None => make_error(MetaCode::NO_ATTR),
    }
}

/// Every name of `ino`, each terminated by NUL.
pub async fn listxattr<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Vec<u8>> {
    Inode::load_existing(txn, ino).await?;
    let mut out = Vec::new();
    for (name, _) in xattr::load_all(txn, ino, true).await? {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
pub async fn setxattr(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    ctx: &Context,
    ino: Ino,
    name: &str,
    value: &[u8],
    flags: XattrFlags,
) -> Result<()> {
    check_xattr_name(name)?;
    if value.len() > MAX_XATTR_VALUE {
        return make_error_msg(StatusCode::INVALID_ARG, format!("xattr value of {} bytes", value.len()));
    }
    if flags.bits() & !XattrFlags::all().bits() != 0 {
        return make_error(StatusCode::INVALID_ARG);
    }
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    check_perm(env, ctx, &inode.attr, AccessMask::WRITE)?;
    let key = xattr::pack_key_for(ino, name);
    let exists = txn.get(&key).await?.is_some();
    if flags.contains(XattrFlags::CREATE) && exists {
        return make_error(MetaCode::EXISTS);
    }
    if flags.contains(XattrFlags::REPLACE) && !exists {
        return make_error(MetaCode::NO_ATTR);
    }
    txn.set(&key, value).await?;
    inode.attr.touch_ctime(env.now);
    inode.store(txn).await?;
    tracing::debug!(inode = ino, name, len = value.len(), "setxattr: stored");
    Ok(())
}

pub async fn removexattr(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    ctx: &Context,
    ino: Ino,
    name: &str,
) -> Result<()> {
    check_xattr_name(name)?;
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    check_perm(env, ctx, &inode.attr, AccessMask::WRITE)?;
    let key = xattr::pack_key_for(ino, name);
    if txn.get(&key).await?.is_none() {
        return make_error(MetaCode::NO_ATTR);
    }
    txn.clear(&key).await?;
    inode.attr.touch_ctime(env.now);
    inode.store(txn).await
}
