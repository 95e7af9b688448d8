use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result};

use crate::counter;
use crate::format::Format;
use crate::inode::Inode;
use crate::key_prefix::{self, KEYSPACE_END, SETTING_KEY};
use crate::ops::Limits;
use crate::types::{Attr, InodeType, StatFs, Timespec, ROOT_INODE};

pub async fn load_format<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Option<Format>> {
    match txn.snapshot_get(SETTING_KEY).await? {
        Some(v) => Ok(Some(key_prefix::decode("format", &v)?)),
        None => Ok(None),
    }
}

/// Write `format` and create the root directory if it is missing.
///
/// Reformatting a volume with a different uuid needs `force`. Without it the
/// existing format may only change its quotas.
pub async fn init(
    txn: &mut dyn ReadWriteTransaction,
    format: &Format,
    force: bool,
    now: Timespec,
) -> Result<()> {
    if let Some(old) = load_format(&*txn).await? {
        if !force {
            if old.uuid != format.uuid {
                return make_error_msg(
                    MetaCode::EXISTS,
                    format!("volume {} is already formatted", old.name),
                );
            }
            if let Err(msg) = old.check_compatible(format) {
                return make_error_msg(StatusCode::INVALID_ARG, msg);
            }
        }
        tracing::info!(name = %format.name, force, "init: updating existing format");
    }
    txn.set(SETTING_KEY, &key_prefix::encode("format", format)?)
        .await?;

    if Inode::load(&*txn, ROOT_INODE).await?.is_none() {
        let mut attr = Attr::new(InodeType::Directory, 0o777, 0, 0, now);
        attr.nlink = 2;
        attr.length = 4096;
        attr.parent = ROOT_INODE;
        Inode::new(ROOT_INODE, attr).store(txn).await?;
        counter::set(txn, counter::NEXT_INODE, ROOT_INODE as i64 + 1).await?;
        counter::set(txn, counter::USED_SPACE, 4096).await?;
        counter::set(txn, counter::TOTAL_INODES, 1).await?;
        tracing::info!(name = %format.name, "init: created root directory");
    }
    Ok(())
}

pub async fn reset(txn: &mut dyn ReadWriteTransaction) -> Result<()> {
    txn.clear_range(&[], KEYSPACE_END).await?;
    tracing::warn!("reset: erased every record");
    Ok(())
}

/// Usage of the whole volume. Without quotas the totals float above usage.
pub async fn stat_fs<T: ReadOnlyTransaction + ?Sized>(txn: &T, limits: Limits) -> Result<StatFs> {
    let used = counter::snapshot_get(txn, counter::USED_SPACE).await?.max(0) as u64;
    let inodes = counter::snapshot_get(txn, counter::TOTAL_INODES).await?.max(0) as u64;

    let total_space = if limits.capacity > 0 {
        limits.capacity
    } else {
        let mut total = 1u64 << 50;
        while total.saturating_mul(8) / 10 < used {
            total = total.saturating_mul(2);
        }
        total
    };
    let avail_inodes = if limits.inodes > 0 {
        limits.inodes.saturating_sub(inodes)
    } else {
        let mut avail = 10u64 << 20;
        while avail.saturating_mul(8) / 10 < inodes {
            avail = avail.saturating_mul(2);
        }
        avail
    };
    Ok(StatFs {
        total_space,
        avail_space: total_space.saturating_sub(used),
        used_inodes: inodes,
        avail_inodes,
    })
}

/// Fail with `NOT_FORMATTED` on a blank store.
pub async fn require_format<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Format> {
    match load_format(txn).await? {
        Some(f) => Ok(f),
        None => make_error(MetaCode::NOT_FORMATTED),
    }
}
