//! Named integer counters.

use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::StatusCode;
use slicefs_types::{Result, Status};

use crate::key_prefix::COUNTER_PREFIX;

pub const NEXT_INODE: &str = "nextInode";
pub const NEXT_CHUNK: &str = "nextChunk";
pub const NEXT_SESSION: &str = "nextSession";
pub const USED_SPACE: &str = "usedSpace";
pub const TOTAL_INODES: &str = "totalInodes";

pub const ALL: [&str; 5] = [NEXT_INODE, NEXT_CHUNK, NEXT_SESSION, USED_SPACE, TOTAL_INODES];

pub fn pack_key_for(name: &str) -> Vec<u8> {
    let mut key = vec![COUNTER_PREFIX];
    key.extend_from_slice(name.as_bytes());
    key
}

fn decode(value: &[u8]) -> Result<i64> {
    value
        .try_into()
        .map(i64::from_be_bytes)
        .map_err(|_| Status::with_message(StatusCode::DATA_CORRUPTION, "bad counter value"))
}

/// Read a counter; missing counters are 0. Joins the conflict set.
pub async fn get<T: ReadOnlyTransaction + ?Sized>(txn: &T, name: &str) -> Result<i64> {
    match txn.get(&pack_key_for(name)).await? {
        Some(v) => decode(&v),
        None => Ok(0),
    }
}

pub async fn snapshot_get<T: ReadOnlyTransaction + ?Sized>(txn: &T, name: &str) -> Result<i64> {
    match txn.snapshot_get(&pack_key_for(name)).await? {
        Some(v) => decode(&v),
        None => Ok(0),
    }
}

pub async fn set(txn: &mut dyn ReadWriteTransaction, name: &str, value: i64) -> Result<()> {
    txn.set(&pack_key_for(name), &value.to_be_bytes()).await
}

/// Add `delta` and return the new value.
pub async fn add(txn: &mut dyn ReadWriteTransaction, name: &str, delta: i64) -> Result<i64> {
    let value = get(&*txn, name).await? + delta;
    set(txn, name, value).await?;
    Ok(value)
}
