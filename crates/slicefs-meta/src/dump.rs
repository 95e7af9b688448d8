//! JSON dump and load of a whole volume or of one subtree.
//!
//! Session-local state (sessions, locks, sustained inodes) is not dumped.

use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Write};

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error_msg, Result, Status};

use crate::chunk::{ChunkSlices, PendingDelete, SliceRecord, SliceRef};
use crate::counter;
use crate::dir_entry::{DirEntry, DirEntryList};
use crate::format::Format;
use crate::inode::Inode;
use crate::key_prefix::{self, SETTING_KEY};
use crate::link_parent;
use crate::ops::symlink_key;
use crate::ops::volume::load_format;
use crate::types::{Attr, Ino, ROOT_INODE};
use crate::xattr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpDocument {
    pub setting: Format,
    pub counters: BTreeMap<String, i64>,
    pub tree: DumpedNode,
    #[serde(default)]
    pub slice_refs: Vec<DumpedSliceRef>,
    #[serde(default)]
    pub pending_deletes: Vec<PendingDelete>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpedNode {
    pub inode: Ino,
    pub attr: Attr,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub xattrs: BTreeMap<String, Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<DumpedChunk>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entries: BTreeMap<String, DumpedNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpedChunk {
    pub indx: u32,
    pub slices: Vec<SliceRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpedSliceRef {
    pub chunkid: u64,
    pub size: u32,
    pub refs: u64,
}

fn dump_node<'a, T>(txn: &'a T, ino: Ino) -> BoxFuture<'a, Result<DumpedNode>>
where
    T: ReadOnlyTransaction + ?Sized,
{
    async move {
        let inode = Inode::snapshot_load(txn, ino)
            .await?
            .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, format!("inode {}", ino)))?;
        let symlink = match txn.snapshot_get(&symlink_key(ino)).await? {
            Some(raw) => Some(String::from_utf8(raw).map_err(|_| {
                Status::with_message(StatusCode::DATA_CORRUPTION, format!("symlink {} is not UTF-8", ino))
            })?),
            None => None,
        };
        let chunks = ChunkSlices::load_all(txn, ino, true)
            .await?
            .into_iter()
            .map(|c| DumpedChunk {
                indx: c.indx,
                slices: c.records,
            })
            .collect();
        let mut entries = BTreeMap::new();
        if inode.attr.is_dir() {
            for entry in DirEntryList::load(txn, ino, true).await? {
                match dump_node(txn, entry.inode).await {
                    Ok(child) => {
                        entries.insert(entry.name, child);
                    }
                    Err(e) if e.code() == MetaCode::NOT_FOUND => {
                        tracing::warn!(parent = ino, name = %entry.name, inode = entry.inode, "dump: skipping dangling entry");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(DumpedNode {
            inode: ino,
            attr: inode.attr,
            xattrs: xattr::load_all(txn, ino, true).await?.into_iter().collect(),
            symlink,
            chunks,
            entries,
        })
    }
    .boxed()
}

/// Snapshot the volume, or the subtree at `root` (`0` for the whole volume).
pub async fn build_document<T: ReadOnlyTransaction + ?Sized>(txn: &T, root: Ino) -> Result<DumpDocument> {
    let setting = match load_format(txn).await? {
        Some(f) => f,
        None => return make_error_msg(MetaCode::NOT_FORMATTED, "nothing to dump"),
    };
    let root = if root == 0 { ROOT_INODE } else { root };
    let mut counters = BTreeMap::new();
    for name in counter::ALL {
        counters.insert(name.to_string(), counter::snapshot_get(txn, name).await?);
    }
    let tree = dump_node(txn, root).await?;
    let slice_refs = SliceRef::list(txn)
        .await?
        .into_iter()
        .map(|(chunkid, size, refs)| DumpedSliceRef { chunkid, size, refs })
        .collect();
    Ok(DumpDocument {
        setting,
        counters,
        tree,
        slice_refs,
        pending_deletes: PendingDelete::list(txn).await?,
    })
}

pub async fn dump<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    w: &mut (dyn Write + Send),
    root: Ino,
) -> Result<()> {
    let doc = build_document(txn, root).await?;
    serde_json::to_writer_pretty(&mut *w, &doc)
        .map_err(|e| Status::with_message(StatusCode::IO_ERROR, format!("write dump: {}", e)))?;
    w.flush()
        .map_err(|e| Status::with_message(StatusCode::IO_ERROR, format!("flush dump: {}", e)))?;
    tracing::info!(root = doc.tree.inode, "dump: written");
    Ok(())
}

pub fn read_document(r: &mut (dyn Read + Send)) -> Result<DumpDocument> {
    serde_json::from_reader(r)
        .map_err(|e| Status::with_message(StatusCode::SERDE_INVALID_JSON, format!("read dump: {}", e)))
}

/// Write `doc` into a blank store. Only whole-volume dumps can be loaded.
pub async fn load(txn: &mut dyn ReadWriteTransaction, doc: &DumpDocument) -> Result<()> {
    if load_format(&*txn).await?.is_some() {
        return make_error_msg(MetaCode::EXISTS, "cannot load into a formatted volume");
    }
    if doc.tree.inode != ROOT_INODE {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("dump is rooted at inode {}, not the volume root", doc.tree.inode),
        );
    }
    txn.set(SETTING_KEY, &key_prefix::encode("format", &doc.setting)?)
        .await?;
    for (name, value) in &doc.counters {
        counter::set(txn, name, *value).await?;
    }

    let mut loaded = HashSet::new();
    let mut stack = vec![&doc.tree];
    while let Some(node) = stack.pop() {
        if loaded.insert(node.inode) {
            Inode::new(node.inode, node.attr.clone()).store(txn).await?;
            for (name, value) in &node.xattrs {
                txn.set(&xattr::pack_key_for(node.inode, name), value).await?;
            }
            if let Some(target) = &node.symlink {
                txn.set(&symlink_key(node.inode), target.as_bytes()).await?;
            }
            for chunk in &node.chunks {
                ChunkSlices {
                    ino: node.inode,
                    indx: chunk.indx,
                    records: chunk.slices.clone(),
                }
                .store(txn)
                .await?;
            }
        }
        for (name, child) in &node.entries {
            DirEntry::new(node.inode, name.as_str(), child.inode, child.attr.typ)
                .store(txn)
                .await?;
            if !child.attr.is_dir() {
                link_parent::adjust(txn, child.inode, node.inode, 1).await?;
            }
            stack.push(child);
        }
    }
    for r in &doc.slice_refs {
        SliceRef::set(txn, r.chunkid, r.size, r.refs).await?;
    }
    for p in &doc.pending_deletes {
        p.store(txn).await?;
    }
    tracing::info!(volume = %doc.setting.name, inodes = loaded.len(), "load: restored dump");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InodeType, Slice, Timespec};
    use slicefs_kv::KvEngine;
    use slicefs_kv_backends::MemDbEngine;

    async fn seed(engine: &MemDbEngine) {
        let now = Timespec::now();
        let mut txn = engine.create_readwrite_transaction();
        crate::ops::volume::init(&mut txn, &Format::new("dump"), false, now)
            .await
            .unwrap();
        let mut dir = Inode::load_existing(&txn, ROOT_INODE).await.unwrap();
        dir.attr.nlink = 3;
        dir.store(&mut txn).await.unwrap();

        let mut sub = Attr::new(InodeType::Directory, 0o755, 0, 0, now);
        sub.nlink = 2;
        sub.parent = ROOT_INODE;
        Inode::new(2, sub).store(&mut txn).await.unwrap();
        DirEntry::new(ROOT_INODE, "sub", 2, InodeType::Directory)
            .store(&mut txn)
            .await
            .unwrap();

        let mut file = Attr::new(InodeType::File, 0o644, 0, 0, now);
        file.nlink = 2;
        file.length = 10;
        file.parent = 2;
        Inode::new(3, file).store(&mut txn).await.unwrap();
        for (parent, name) in [(2, "f"), (ROOT_INODE, "hard")] {
            DirEntry::new(parent, name, 3, InodeType::File)
                .store(&mut txn)
                .await
                .unwrap();
            link_parent::adjust(&mut txn, 3, parent, 1).await.unwrap();
        }
        ChunkSlices {
            ino: 3,
            indx: 0,
            records: vec![SliceRecord::new(0, Slice::new(7, 10, 0, 10))],
        }
        .store(&mut txn)
        .await
        .unwrap();
        txn.set(&xattr::pack_key_for(3, "user.k"), b"v").await.unwrap();
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_dump_and_load_restore_the_tree() {
        let src = MemDbEngine::new();
        seed(&src).await;
        let mut buf = Vec::new();
        dump(&src.create_readonly_transaction(), &mut buf, 0).await.unwrap();

        let doc = read_document(&mut buf.as_slice()).unwrap();
        assert_eq!(doc.tree.entries.len(), 2);
        assert_eq!(doc.tree.entries["sub"].entries["f"].chunks[0].slices[0].id, 7);

        let dst = MemDbEngine::new();
        let mut txn = dst.create_readwrite_transaction();
        load(&mut txn, &doc).await.unwrap();
        txn.commit().await.unwrap();

        let ro = dst.create_readonly_transaction();
        let again = build_document(&ro, 0).await.unwrap();
        assert_eq!(again, doc);
        let parents = link_parent::load(&ro, 3).await.unwrap();
        assert_eq!(parents, vec![(ROOT_INODE, 1), (2, 1)]);
    }

    #[tokio::test]
    async fn test_subtree_dump_cannot_be_loaded() {
        let src = MemDbEngine::new();
        seed(&src).await;
        let doc = build_document(&src.create_readonly_transaction(), 2).await.unwrap();
        assert_eq!(doc.tree.inode, 2);
        assert_eq!(doc.tree.entries.len(), 1);

        let dst = MemDbEngine::new();
        let mut txn = dst.create_readwrite_transaction();
        let err = load(&mut txn, &doc).await.unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
    }

    #[tokio::test]
    async fn test_load_refuses_formatted_volume() {
        let engine = MemDbEngine::new();
        seed(&engine).await;
        let doc = build_document(&engine.create_readonly_transaction(), 0).await.unwrap();
        let mut txn = engine.create_readwrite_transaction();
        let err = load(&mut txn, &doc).await.unwrap_err();
        assert_eq!(err.code(), MetaCode::EXISTS);
    }
}
