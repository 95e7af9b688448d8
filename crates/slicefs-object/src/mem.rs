//! In-memory object store backed by a concurrent hash map.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use slicefs_types::status_code::StorageCode;
use slicefs_types::{make_error_msg, Result, Status};

use crate::{ObjectInfo, ObjectStorage};

#[derive(Debug, Default)]
pub struct MemStorage {
    objects: DashMap<String, (Bytes, i64)>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn not_found(key: &str) -> Status {
        Status::with_message(StorageCode::OBJECT_NOT_FOUND, format!("object {} not found", key))
    }
}

#[async_trait]
impl ObjectStorage for MemStorage {
    fn describe(&self) -> String {
        "mem://".to_string()
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo> {
        let entry = self.objects.get(key).ok_or_else(|| Self::not_found(key))?;
        let (data, mtime) = entry.value();
        Ok(ObjectInfo::file(key, data.len() as u64, *mtime))
    }

    async fn get(&self, key: &str, off: u64, limit: Option<u64>) -> Result<Bytes> {
        let entry = self.objects.get(key).ok_or_else(|| Self::not_found(key))?;
        let data = &entry.value().0;
        let len = data.len() as u64;
        if off > len {
            return make_error_msg(
                StorageCode::OBJECT_READ_FAILED,
                format!("offset {} beyond object {} of {} bytes", off, key, len),
            );
        }
        let end = limit.map_or(len, |l| off.saturating_add(l).min(len));
        Ok(data.slice(off as usize..end as usize))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        if key.is_empty() {
            return make_error_msg(StorageCode::INVALID_KEY, "empty object key");
        }
        self.objects
            .insert(key.to_string(), (data, chrono::Utc::now().timestamp()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectInfo>> {
        let mut found: Vec<ObjectInfo> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| ObjectInfo::file(e.key().clone(), e.value().0.len() as u64, e.value().1))
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        stream::iter(found.into_iter().map(Ok)).boxed()
    }
}
