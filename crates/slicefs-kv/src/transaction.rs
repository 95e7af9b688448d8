use async_trait::async_trait;
use slicefs_types::Result;

/// Key-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Key selector for range queries.
#[derive(Debug, Clone)]
pub struct KeySelector {
    pub key: Vec<u8>,
    pub inclusive: bool,
}

impl KeySelector {
    pub fn new(key: impl Into<Vec<u8>>, inclusive: bool) -> Self {
        Self {
            key: key.into(),
            inclusive,
        }
    }
}

/// Result of a range query.
#[derive(Debug, Default)]
pub struct GetRangeResult {
    pub kvs: Vec<KeyValue>,
    pub has_more: bool,
}

/// Read-only transaction.
///
/// `snapshot_*` reads never conflict. Plain reads join the read set of a
/// read-write transaction and are validated at commit time.
#[async_trait]
pub trait ReadOnlyTransaction: Send + Sync {
    async fn snapshot_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.snapshot_get(key).await
    }

    async fn snapshot_get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult>;

    async fn get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult>;

    /// Version of the data this transaction reads from.
    fn read_version(&self) -> i64;

    async fn cancel(&mut self) -> Result<()>;

    fn reset(&mut self);
}

/// Read-write transaction.
#[async_trait]
pub trait ReadWriteTransaction: ReadOnlyTransaction {
    async fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    async fn clear(&mut self, key: &[u8]) -> Result<()>;

    /// Remove every key in `[begin, end)`.
    async fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    fn get_committed_version(&self) -> i64;
}
