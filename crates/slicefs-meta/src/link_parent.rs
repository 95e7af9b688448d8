//! Index of the directories that hold entries for a non-directory inode.
//!
//! `Attr.parent` names one of them; the index lets unlink and rename pick
//! another one when that entry goes away.

use slicefs_kv::{scan_prefix, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::Result;

use crate::key_prefix::{self, LINK_PARENT_PREFIX};
use crate::types::Ino;

pub fn pack_key_for(ino: Ino, parent: Ino) -> Vec<u8> {
    key_prefix::pack2(LINK_PARENT_PREFIX, ino, parent)
}

/// Add `delta` entries of `ino` in `parent`; returns the new count.
pub async fn adjust(
    txn: &mut dyn ReadWriteTransaction,
    ino: Ino,
    parent: Ino,
    delta: i64,
) -> Result<u64> {
    let key = pack_key_for(ino, parent);
    let current: i64 = match txn.get(&key).await? {
        Some(v) => key_prefix::decode("link parent", &v)?,
        None => 0,
    };
    let next = (current + delta).max(0);
    if next == 0 {
        txn.clear(&key).await?;
    } else {
        txn.set(&key, &key_prefix::encode("link parent", &next)?).await?;
    }
    Ok(next as u64)
}

/// `(parent, count)` for every parent of `ino`.
pub async fn load<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Vec<(Ino, u64)>> {
    let kvs = scan_prefix(txn, &key_prefix::pack1(LINK_PARENT_PREFIX, ino), false).await?;
    kvs.iter()
        .map(|kv| {
            Ok((
                key_prefix::read_u64(&kv.key, 9)?,
                key_prefix::decode("link parent", &kv.value)?,
            ))
        })
        .collect()
}

pub async fn clear(txn: &mut dyn ReadWriteTransaction, ino: Ino) -> Result<()> {
    let prefix = key_prefix::pack1(LINK_PARENT_PREFIX, ino);
    txn.clear_range(&prefix, &slicefs_kv::prefix_list_end_key(&prefix))
        .await
}
