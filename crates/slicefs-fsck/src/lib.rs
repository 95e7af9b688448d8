//! slicefs-fsck: cross-checks the slices recorded in metadata against the
//! blocks present in the object store.

pub mod blocks;
pub mod report;

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use slicefs_meta::{get_path, Context, Ino, Meta, Slice};
use slicefs_object::{ObjectStorage, WithPrefix, CHUNKS_PREFIX};
use slicefs_types::Status;

pub use blocks::{slice_blocks, Block};
pub use report::{FsckReport, FsckStats};

#[derive(Debug, thiserror::Error)]
pub enum FsckError {
    #[error("load setting: {0}")]
    LoadFormat(#[source] Status),
    #[error("list all blocks: {0}")]
    ListBlocks(#[source] Status),
    #[error("list all slices: {0}")]
    ListSlices(#[source] Status),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsckConfig {
    /// Inodes reconciled in parallel.
    pub concurrency: usize,
    /// Key prefix of data blocks in the object store.
    pub prefix: String,
}

impl Default for FsckConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            prefix: CHUNKS_PREFIX.to_string(),
        }
    }
}

/// Block name to size, as listed from the store.
type BlockIndex = HashMap<String, u64>;

async fn index_blocks(store: &dyn ObjectStorage, stats: &mut FsckStats) -> Result<BlockIndex, FsckError> {
    let mut blocks = BlockIndex::new();
    let mut listing = store.list("");
    while let Some(obj) = listing.try_next().await.map_err(FsckError::ListBlocks)? {
        if obj.is_dir {
            continue;
        }
        tracing::debug!(key = %obj.key, "fsck: found block");
        let parts: Vec<&str> = obj.key.split('/').collect();
        if parts.len() != 3 {
            continue;
        }
        stats.found_blocks += 1;
        stats.found_bytes += obj.size;
        blocks.insert(parts[2].to_string(), obj.size);
    }
    Ok(blocks)
}

async fn check_inode(
    meta: &dyn Meta,
    store: &dyn ObjectStorage,
    blocks: &BlockIndex,
    block_size: u32,
    ino: Ino,
    slices: Vec<Slice>,
) -> FsckReport {
    let ctx = Context::background();
    let mut part = FsckReport::default();
    let mut path: Option<String> = None;
    for slice in &slices {
        for block in slice_blocks(slice, block_size) {
            if blocks.contains_key(&block.name()) {
                continue;
            }
            let Err(err) = store.head(&block.key()).await else {
                continue;
            };
            let path = match &path {
                Some(p) => p.clone(),
                None => {
                    let p = match get_path(meta, &ctx, ino).await {
                        Ok(p) => p,
                        Err(st) => {
                            tracing::warn!(inode = ino, error = %st, "fsck: getpath failed");
                            st.to_string()
                        }
                    };
                    path = Some(p.clone());
                    p
                }
            };
            tracing::error!(block = %block.name(), file = %path, error = %err, "fsck: can't find block");
            part.stats.lost_blocks += 1;
            part.stats.lost_bytes += block.size as u64;
        }
        part.stats.scanned_slices += 1;
        part.stats.scanned_bytes += slice.size as u64;
    }
    if let Some(p) = path {
        part.broken.insert(ino, p);
    }
    part
}

/// Find blocks referenced by metadata but missing from `store`.
///
/// `store` is the volume's object store; blocks are looked up below
/// `config.prefix`. A listing failure aborts the check, while missing blocks
/// are collected into the report.
pub async fn check(
    meta: &dyn Meta,
    store: Arc<dyn ObjectStorage>,
    config: &FsckConfig,
) -> Result<FsckReport, FsckError> {
    let format = meta.load().await.map_err(FsckError::LoadFormat)?;
    let block_size = format.block_size.saturating_mul(1024);
    tracing::info!(storage = %store.describe(), "fsck: data store");
    let store = WithPrefix::new(store, config.prefix.clone());

    let mut report = FsckReport::default();
    let blocks = index_blocks(&store, &mut report.stats).await?;
    tracing::info!(
        blocks = report.stats.found_blocks,
        bytes = report.stats.found_bytes,
        "fsck: found blocks"
    );

    let slices = meta
        .list_slices(&Context::background(), false)
        .await
        .map_err(FsckError::ListSlices)?;

    let store = &store;
    let blocks = &blocks;
    let partials: Vec<FsckReport> = stream::iter(slices)
        .map(|(ino, slices)| check_inode(meta, store, blocks, block_size, ino, slices))
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;
    for part in partials {
        report.merge(part);
    }
    tracing::info!(
        slices = report.stats.scanned_slices,
        bytes = report.stats.scanned_bytes,
        "fsck: used by slices"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use slicefs_kv_backends::MemDbEngine;
    use slicefs_meta::{Format, KvMeta, MetaConfig, ROOT_INODE};
    use slicefs_object::{block_key, MemStorage};

    const BS: u32 = 1024;

    async fn volume() -> Arc<KvMeta<MemDbEngine>> {
        let meta = KvMeta::new("mem", MemDbEngine::new(), MetaConfig::default());
        let mut format = Format::new("fsck");
        format.block_size = 1;
        meta.init(format, false).await.unwrap();
        Arc::new(meta)
    }

    async fn write_file(meta: &KvMeta<MemDbEngine>, parent: Ino, name: &str, size: u32) -> (Ino, u64) {
        let ctx = Context::background();
        let (ino, _) = meta.create(&ctx, parent, name, 0o644, 0, 0).await.unwrap();
        let chunkid = meta.new_chunk(&ctx).await.unwrap();
        meta.write(&ctx, ino, 0, 0, Slice::new(chunkid, size, 0, size))
            .await
            .unwrap();
        (ino, chunkid)
    }

    async fn upload(store: &MemStorage, chunkid: u64, size: u32, skip_last: bool) {
        let mut blocks = slice_blocks(&Slice::new(chunkid, size, 0, size), BS);
        if skip_last {
            blocks.pop();
        }
        for b in blocks {
            let key = format!("{}{}", CHUNKS_PREFIX, block_key(chunkid, b.indx, b.size));
            store.put(&key, Bytes::from(vec![0u8; b.size as usize])).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_fully_covered_volume_is_clean() {
        let meta = volume().await;
        let store = Arc::new(MemStorage::new());
        for (i, size) in [BS * 2, BS + 10, 7].into_iter().enumerate() {
            let (_, chunkid) = write_file(&meta, ROOT_INODE, &format!("f{i}"), size).await;
            upload(&store, chunkid, size, false).await;
        }
        store.put("unrelated/key", Bytes::from_static(b"x")).await.unwrap();

        let report = check(meta.as_ref(), store, &FsckConfig::default()).await.unwrap();
        assert!(report.is_ok());
        assert!(report.broken.is_empty());
        assert_eq!(report.stats.found_blocks, 5);
        assert_eq!(report.stats.scanned_slices, 3);
        assert_eq!(report.stats.scanned_bytes, (BS * 3 + 17) as u64);
    }

    #[tokio::test]
    async fn test_missing_last_block_is_reported() {
        let meta = volume().await;
        let ctx = Context::background();
        let store = Arc::new(MemStorage::new());
        let (dir, _) = meta.mkdir(&ctx, ROOT_INODE, "data", 0o755, 0, false).await.unwrap();
        let (ino, chunkid) = write_file(&meta, dir, "broken", BS * 2 + 10).await;
        upload(&store, chunkid, BS * 2 + 10, true).await;
        let (_, ok_chunk) = write_file(&meta, ROOT_INODE, "fine", BS).await;
        upload(&store, ok_chunk, BS, false).await;

        let report = check(meta.as_ref(), store, &FsckConfig::default()).await.unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.stats.lost_blocks, 1);
        assert_eq!(report.stats.lost_bytes, 10);
        assert_eq!(report.broken.len(), 1);
        assert_eq!(report.broken[&ino], "/data/broken");
        assert!(report
            .to_string()
            .starts_with("1 objects are lost (10 bytes), 1 broken files:\n"));
    }

    #[tokio::test]
    async fn test_unresolvable_path_uses_error_text() {
        let meta = volume().await;
        let ctx = Context::background();
        let store = Arc::new(MemStorage::new());
        meta.new_session(slicefs_meta::SessionInfo::for_current_process("/mnt"))
            .await
            .unwrap();
        let (ino, _) = write_file(&meta, ROOT_INODE, "open", 100).await;
        meta.open(&ctx, ino, 0).await.unwrap();
        meta.unlink(&ctx, ROOT_INODE, "open").await.unwrap();

        let report = check(meta.as_ref(), store, &FsckConfig::default()).await.unwrap();
        assert_eq!(report.stats.lost_blocks, 1);
        assert!(!report.broken[&ino].starts_with('/'));
    }

    #[tokio::test]
    async fn test_unformatted_volume_fails() {
        let meta = KvMeta::new("mem", MemDbEngine::new(), MetaConfig::default());
        let err = check(&meta, Arc::new(MemStorage::new()), &FsckConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FsckError::LoadFormat(_)));
    }
}
