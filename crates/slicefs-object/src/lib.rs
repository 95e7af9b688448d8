//! slicefs-object: the object stores that hold file data blocks.
//!
//! - [`ObjectStorage`] - the interface every store implements
//! - [`MemStorage`] - in-memory store for tests and `mem` volumes
//! - [`DiskStorage`] - objects as files under a local directory
//! - [`WithPrefix`] - view of a store under a key prefix

pub mod disk;
pub mod mem;
pub mod prefix;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use slicefs_meta::Format;
use slicefs_types::status_code::StorageCode;
use slicefs_types::{make_error_msg, Result};

pub use disk::DiskStorage;
pub use mem::MemStorage;
pub use prefix::WithPrefix;

/// Key prefix under which every data block is stored.
pub const CHUNKS_PREFIX: &str = "chunks/";

/// Metadata of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Last modification, unix seconds.
    pub mtime: i64,
    pub is_dir: bool,
}

impl ObjectInfo {
    pub fn file(key: impl Into<String>, size: u64, mtime: i64) -> Self {
        Self {
            key: key.into(),
            size,
            mtime,
            is_dir: false,
        }
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Human readable location, e.g. `file:///data/`.
    fn describe(&self) -> String;

    async fn head(&self, key: &str) -> Result<ObjectInfo>;

    /// Read `limit` bytes from `off`, or to the end when `limit` is `None`.
    async fn get(&self, key: &str, off: u64, limit: Option<u64>) -> Result<Bytes>;

    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Delete `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every object whose key starts with `prefix`. A failed listing yields
    /// an `Err` item and ends the stream.
    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectInfo>>;
}

/// Name of block `indx` of slice `chunkid`; `size` is the block's own size.
pub fn block_name(chunkid: u64, indx: u32, size: u32) -> String {
    format!("{}_{}_{}", chunkid, indx, size)
}

/// Key of a block below [`CHUNKS_PREFIX`], sharded by chunk id.
pub fn block_key(chunkid: u64, indx: u32, size: u32) -> String {
    format!(
        "{}/{}/{}",
        chunkid / 1_000_000,
        chunkid / 1_000,
        block_name(chunkid, indx, size)
    )
}

/// Open the object store a volume is formatted with.
pub fn create_storage(format: &Format) -> Result<Arc<dyn ObjectStorage>> {
    let storage: Arc<dyn ObjectStorage> = match format.storage.as_str() {
        "mem" => Arc::new(MemStorage::new()),
        "file" => Arc::new(DiskStorage::new(&format.bucket)?),
        other => {
            return make_error_msg(
                StorageCode::UNKNOWN_STORAGE,
                format!("unknown object storage {:?}", other),
            )
        }
    };
    tracing::info!(storage = %storage.describe(), "object: opened");
    Ok(storage)
}
