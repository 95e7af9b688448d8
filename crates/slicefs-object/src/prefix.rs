use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use slicefs_types::Result;

use crate::{ObjectInfo, ObjectStorage};

/// A store whose keys are all relative to `prefix` of an inner store.
pub struct WithPrefix {
    inner: Arc<dyn ObjectStorage>,
    prefix: String,
}

impl WithPrefix {
    pub fn new(inner: Arc<dyn ObjectStorage>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    fn full(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl ObjectStorage for WithPrefix {
    fn describe(&self) -> String {
        format!("{}{}", self.inner.describe(), self.prefix)
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo> {
        let mut info = self.inner.head(&self.full(key)).await?;
        info.key = key.to_string();
        Ok(info)
    }

    async fn get(&self, key: &str, off: u64, limit: Option<u64>) -> Result<Bytes> {
        self.inner.get(&self.full(key), off, limit).await
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.inner.put(&self.full(key), data).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.full(key)).await
    }

    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectInfo>> {
        let strip = self.prefix.len();
        self.inner
            .list(&self.full(prefix))
            .map(move |item| {
                item.map(|mut info| {
                    info.key = info.key.get(strip..).unwrap_or_default().to_string();
                    info
                })
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStorage;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_keys_are_relative() {
        let mem = Arc::new(MemStorage::new());
        let store = WithPrefix::new(mem.clone(), "chunks/");
        store.put("0/0/1_0_5", Bytes::from_static(b"12345")).await.unwrap();
        mem.put("other", Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(mem.head("chunks/0/0/1_0_5").await.unwrap().size, 5);
        assert_eq!(store.head("0/0/1_0_5").await.unwrap().key, "0/0/1_0_5");

        let keys: Vec<String> = store.list("").map_ok(|o| o.key).try_collect().await.unwrap();
        assert_eq!(keys, vec!["0/0/1_0_5"]);
        assert_eq!(store.describe(), "mem://chunks/");
    }
}
