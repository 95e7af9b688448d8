//! Extended attribute records: `[XATTR] ino name -> value`.

use slicefs_kv::{scan_prefix, ReadOnlyTransaction};
use slicefs_types::status_code::StatusCode;
use slicefs_types::{Result, Status};

use crate::key_prefix::{self, XATTR_PREFIX};
use crate::types::Ino;

pub fn pack_key_for(ino: Ino, name: &str) -> Vec<u8> {
    let mut key = pack_prefix(ino);
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn pack_prefix(ino: Ino) -> Vec<u8> {
    key_prefix::pack1(XATTR_PREFIX, ino)
}

/// All `(name, value)` pairs of an inode, ordered by name.
pub async fn load_all<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
    snapshot: bool,
) -> Result<Vec<(String, Vec<u8>)>> {
    let kvs = scan_prefix(txn, &pack_prefix(ino), snapshot).await?;
    kvs.into_iter()
        .map(|kv| {
            let name = String::from_utf8(kv.key[9..].to_vec()).map_err(|_| {
                Status::with_message(StatusCode::DATA_CORRUPTION, "xattr name is not UTF-8")
            })?;
            Ok((name, kv.value))
        })
        .collect()
}
