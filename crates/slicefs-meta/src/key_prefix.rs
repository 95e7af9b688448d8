//! Key layout of the metadata KV store.
//!
//! Every record kind owns one prefix byte. Integers in keys are big-endian so
//! that range scans return records in numeric order.

use slicefs_types::status_code::StatusCode;
use slicefs_types::{Result, Status};

/// The volume format.
pub const SETTING_KEY: &[u8] = &[0x00];

/// `[INODE] ino` -> attr.
pub const INODE_PREFIX: u8 = 0x01;
/// `[DENTRY] parent name` -> child inode and type.
pub const DENTRY_PREFIX: u8 = 0x02;
/// `[CHUNK] ino indx(u32)` -> slice history.
pub const CHUNK_PREFIX: u8 = 0x03;
/// `[XATTR] ino name` -> value.
pub const XATTR_PREFIX: u8 = 0x04;
/// `[SYMLINK] ino` -> target.
pub const SYMLINK_PREFIX: u8 = 0x05;
/// `[FLOCK] ino sid owner` -> lock type.
pub const FLOCK_PREFIX: u8 = 0x06;
/// `[PLOCK] ino sid owner` -> record set.
pub const PLOCK_PREFIX: u8 = 0x07;
/// `[SESSION] sid` -> heartbeat.
pub const SESSION_PREFIX: u8 = 0x08;
/// `[SESSION_INFO] sid` -> session info.
pub const SESSION_INFO_PREFIX: u8 = 0x09;
/// `[SUSTAINED] ino sid` -> empty. An unlinked inode still open by a session.
pub const SUSTAINED_PREFIX: u8 = 0x0A;
/// `[SLICE_REF] chunkid size` -> extra references.
pub const SLICE_REF_PREFIX: u8 = 0x0C;
/// `[PENDING_DELETE] chunkid size` -> retirement time.
pub const PENDING_DELETE_PREFIX: u8 = 0x0D;
/// `[LINK_PARENT] ino parent` -> entries of ino in parent.
pub const LINK_PARENT_PREFIX: u8 = 0x0E;
/// `[COUNTER] name` -> i64.
pub const COUNTER_PREFIX: u8 = 0x0F;

/// End of the key space used by the engine.
pub const KEYSPACE_END: &[u8] = &[0xFF];

/// Build `[prefix] a` with `a` big-endian.
pub fn pack1(prefix: u8, a: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(prefix);
    key.extend_from_slice(&a.to_be_bytes());
    key
}

/// Build `[prefix] a b` with both big-endian.
pub fn pack2(prefix: u8, a: u64, b: u64) -> Vec<u8> {
    let mut key = pack1(prefix, a);
    key.extend_from_slice(&b.to_be_bytes());
    key
}

/// Read a big-endian u64 at `at`.
pub fn read_u64(key: &[u8], at: usize) -> Result<u64> {
    key.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| Status::with_message(StatusCode::DATA_CORRUPTION, "truncated key"))
}

/// Read a big-endian u32 at `at`.
pub fn read_u32(key: &[u8], at: usize) -> Result<u32> {
    key.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| Status::with_message(StatusCode::DATA_CORRUPTION, "truncated key"))
}

/// Check the prefix byte and length of a fixed-size key.
pub fn expect_key(key: &[u8], prefix: u8, len: usize) -> Result<()> {
    if key.len() != len || key[0] != prefix {
        return Err(Status::with_message(
            StatusCode::DATA_CORRUPTION,
            format!("invalid key for prefix {:#04x}", prefix),
        ));
    }
    Ok(())
}

/// Decode a JSON value, mapping failures to `DATA_CORRUPTION`.
pub fn decode<T: serde::de::DeserializeOwned>(what: &str, value: &[u8]) -> Result<T> {
    serde_json::from_slice(value).map_err(|e| {
        Status::with_message(
            StatusCode::DATA_CORRUPTION,
            format!("failed to deserialize {}: {}", what, e),
        )
    })
}

/// Encode a JSON value, mapping failures to `DATA_CORRUPTION`.
pub fn encode<T: serde::Serialize>(what: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        Status::with_message(
            StatusCode::DATA_CORRUPTION,
            format!("failed to serialize {}: {}", what, e),
        )
    })
}
