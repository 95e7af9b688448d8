//! Inode records and permission checks.

use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::MetaCode;
use slicefs_types::{make_error, Result, Status};

use crate::key_prefix::{self, INODE_PREFIX};
use crate::types::{AccessMask, Attr, Context, Ino};

/// An inode as stored in the KV store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub ino: Ino,
    pub attr: Attr,
}

impl Inode {
    pub fn new(ino: Ino, attr: Attr) -> Self {
        Self { ino, attr }
    }

    /// Key format: `[INODE_PREFIX] ino`
    pub fn pack_key_for(ino: Ino) -> Vec<u8> {
        key_prefix::pack1(INODE_PREFIX, ino)
    }

    pub fn pack_key(&self) -> Vec<u8> {
        Self::pack_key_for(self.ino)
    }

    pub fn unpack(key: &[u8], value: &[u8]) -> Result<Self> {
        key_prefix::expect_key(key, INODE_PREFIX, 9)?;
        let ino = key_prefix::read_u64(key, 1)?;
        let mut attr: Attr = key_prefix::decode("inode", value)?;
        attr.full = true;
        Ok(Self { ino, attr })
    }

    /// Load without joining the read conflict set.
    pub async fn snapshot_load<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        ino: Ino,
    ) -> Result<Option<Self>> {
        let key = Self::pack_key_for(ino);
        match txn.snapshot_get(&key).await? {
            Some(v) => Ok(Some(Self::unpack(&key, &v)?)),
            None => Ok(None),
        }
    }

    pub async fn load<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Option<Self>> {
        let key = Self::pack_key_for(ino);
        match txn.get(&key).await? {
            Some(v) => Ok(Some(Self::unpack(&key, &v)?)),
            None => Ok(None),
        }
    }

    /// Load, failing with `NOT_FOUND` when missing.
    pub async fn load_existing<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Self> {
        Self::load(txn, ino)
            .await?
            .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, format!("inode {}", ino)))
    }

    pub async fn store(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        let value = key_prefix::encode("inode", &self.attr)?;
        txn.set(&self.pack_key(), &value).await
    }

    pub async fn remove(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        txn.clear(&self.pack_key()).await
    }
}

/// Check `mask` against the permission bits of `attr` for the caller.
///
/// Exactly one of the owner, group and other classes applies, chosen in that
/// order. The superuser passes every check except execute on a file with no
/// execute bit at all.
pub fn check_access(ctx: &Context, attr: &Attr, mask: AccessMask) -> Result<()> {
    if mask.is_empty() {
        return Ok(());
    }
    let mode = attr.mode as u32;
    if ctx.uid == 0 {
        if mask.contains(AccessMask::EXEC) && !attr.is_dir() && mode & 0o111 == 0 {
            return make_error(MetaCode::NO_PERMISSION);
        }
        return Ok(());
    }
    let bits = if ctx.uid == attr.uid {
        (mode >> 6) & 0o7
    } else if ctx.in_group(attr.gid) {
        (mode >> 3) & 0o7
    } else {
        mode & 0o7
    };
    if bits as u8 & mask.bits() != mask.bits() {
        return make_error(MetaCode::NO_PERMISSION);
    }
    Ok(())
}

/// Sticky-bit rule for removing or renaming `attr` out of `parent`.
pub fn check_sticky(ctx: &Context, parent: &Attr, attr: &Attr) -> Result<()> {
    if ctx.uid != 0
        && parent.mode as u32 & libc::S_ISVTX as u32 != 0
        && ctx.uid != parent.uid
        && ctx.uid != attr.uid
    {
        return make_error(MetaCode::NO_PERMISSION);
    }
    Ok(())
}
