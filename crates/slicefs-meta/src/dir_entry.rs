//! Directory entries: `(parent, name) -> child`.
//!
//! Entries of one directory share the key prefix `[DENTRY] parent`, so a
//! directory listing is a single prefix scan.

use serde::{Deserialize, Serialize};
use slicefs_kv::{scan_prefix, KeySelector, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::StatusCode;
use slicefs_types::{Result, Status};

use crate::key_prefix::{self, DENTRY_PREFIX};
use crate::types::{Ino, InodeType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub parent: Ino,
    pub name: String,
    pub inode: Ino,
    pub typ: InodeType,
}

#[derive(Serialize, Deserialize)]
struct DirEntryData {
    inode: Ino,
    #[serde(rename = "type")]
    typ: InodeType,
}

impl DirEntry {
    pub fn new(parent: Ino, name: impl Into<String>, inode: Ino, typ: InodeType) -> Self {
        Self {
            parent,
            name: name.into(),
            inode,
            typ,
        }
    }

    /// Key format: `[DENTRY_PREFIX] parent name`
    pub fn pack_key_for(parent: Ino, name: &str) -> Vec<u8> {
        let mut key = Self::pack_prefix(parent);
        key.extend_from_slice(name.as_bytes());
        key
    }

    pub fn pack_prefix(parent: Ino) -> Vec<u8> {
        key_prefix::pack1(DENTRY_PREFIX, parent)
    }

    pub fn pack_key(&self) -> Vec<u8> {
        Self::pack_key_for(self.parent, &self.name)
    }

    pub fn unpack(key: &[u8], value: &[u8]) -> Result<Self> {
        if key.len() < 9 || key[0] != DENTRY_PREFIX {
            return Err(Status::with_message(
                StatusCode::DATA_CORRUPTION,
                "invalid dir entry key format",
            ));
        }
        let parent = key_prefix::read_u64(key, 1)?;
        let name = std::str::from_utf8(&key[9..])
            .map_err(|_| {
                Status::with_message(
                    StatusCode::DATA_CORRUPTION,
                    "dir entry name is not valid UTF-8",
                )
            })?
            .to_string();
        let data: DirEntryData = key_prefix::decode("dir entry", value)?;
        Ok(Self {
            parent,
            name,
            inode: data.inode,
            typ: data.typ,
        })
    }

    pub async fn snapshot_load<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        parent: Ino,
        name: &str,
    ) -> Result<Option<Self>> {
        let key = Self::pack_key_for(parent, name);
        match txn.snapshot_get(&key).await? {
            Some(v) => Ok(Some(Self::unpack(&key, &v)?)),
            None => Ok(None),
        }
    }

    pub async fn load<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        parent: Ino,
        name: &str,
    ) -> Result<Option<Self>> {
        let key = Self::pack_key_for(parent, name);
        match txn.get(&key).await? {
            Some(v) => Ok(Some(Self::unpack(&key, &v)?)),
            None => Ok(None),
        }
    }

    pub async fn store(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        let value = key_prefix::encode(
            "dir entry",
            &DirEntryData {
                inode: self.inode,
                typ: self.typ,
            },
        )?;
        txn.set(&self.pack_key(), &value).await
    }

    pub async fn remove(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        txn.clear(&self.pack_key()).await
    }
}

/// Operations over all entries of a directory.
pub struct DirEntryList;

impl DirEntryList {
    /// Every entry of `parent`, ordered by name bytes.
    pub async fn load<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        parent: Ino,
        snapshot: bool,
    ) -> Result<Vec<DirEntry>> {
        let kvs = scan_prefix(txn, &DirEntry::pack_prefix(parent), snapshot).await?;
        kvs.iter()
            .map(|kv| DirEntry::unpack(&kv.key, &kv.value))
            .collect()
    }

    /// Whether `parent` has no entries. The probed range joins the conflict set.
    pub async fn check_empty<T: ReadOnlyTransaction + ?Sized>(txn: &T, parent: Ino) -> Result<bool> {
        let prefix = DirEntry::pack_prefix(parent);
        let begin = KeySelector::new(prefix.clone(), true);
        let end = KeySelector::new(slicefs_kv::prefix_list_end_key(&prefix), false);
        let result = txn.get_range(&begin, &end, 1).await?;
        Ok(result.kvs.is_empty())
    }
}
