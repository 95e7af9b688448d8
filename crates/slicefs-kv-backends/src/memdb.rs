//! In-memory KV store backed by a copy-on-write `BTreeMap`.
//!
//! Transactions read from an `Arc` snapshot taken at creation time, buffer
//! their mutations, and validate their read set against the log of commits
//! made since the snapshot (optimistic concurrency control). A conflicting
//! commit fails with `TransactionCode::CONFLICT`.
//!
//! An engine opened with [`MemDbEngine::open`] also writes every committed
//! state to a JSON file and reloads it on the next open.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use slicefs_kv::{
    GetRangeResult, KeySelector, KeyValue, KvEngine, ReadOnlyTransaction, ReadWriteTransaction,
};
use slicefs_types::status_code::{StatusCode, TransactionCode};
use slicefs_types::{make_error_msg, Result, Status};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Number of recent commits kept for conflict validation.
const COMMIT_LOG_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct CommitRecord {
    version: i64,
    keys: Vec<Vec<u8>>,
    ranges: Vec<(Vec<u8>, Vec<u8>)>,
}

struct Shared {
    data: RwLock<Arc<Map>>,
    version: AtomicI64,
    log: Mutex<VecDeque<CommitRecord>>,
    path: Option<PathBuf>,
}

/// In-memory KV engine. Clones share the same store.
#[derive(Clone)]
pub struct MemDbEngine {
    shared: Arc<Shared>,
}

#[derive(Serialize, Deserialize)]
struct PersistedDb {
    version: i64,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl MemDbEngine {
    /// Create a new, empty in-memory database.
    pub fn new() -> Self {
        Self::with_state(Map::new(), 0, None)
    }

    /// Open a database persisted at `path`, creating it on first commit.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            tracing::info!(path = %path.display(), "memdb: creating new database file");
            return Ok(Self::with_state(Map::new(), 0, Some(path)));
        }
        let raw = std::fs::read(&path).map_err(|e| {
            Status::with_message(
                StatusCode::KV_STORE_OPEN_FAILED,
                format!("read {}: {}", path.display(), e),
            )
        })?;
        let db: PersistedDb = serde_json::from_slice(&raw).map_err(|e| {
            Status::with_message(
                StatusCode::KV_STORE_OPEN_FAILED,
                format!("decode {}: {}", path.display(), e),
            )
        })?;
        tracing::info!(
            path = %path.display(),
            keys = db.entries.len(),
            version = db.version,
            "memdb: loaded database file"
        );
        Ok(Self::with_state(
            db.entries.into_iter().collect(),
            db.version,
            Some(path),
        ))
    }

    fn with_state(map: Map, version: i64, path: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                data: RwLock::new(Arc::new(map)),
                version: AtomicI64::new(version),
                log: Mutex::new(VecDeque::new()),
                path,
            }),
        }
    }

    /// Return the number of keys currently stored.
    pub fn len(&self) -> usize {
        self.shared.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.read().is_empty()
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    fn snapshot(&self) -> MemDbReadOnlyTxn {
        let data = self.shared.data.read();
        MemDbReadOnlyTxn {
            snapshot: Arc::clone(&data),
            read_version: self.shared.version.load(Ordering::SeqCst),
        }
    }
}

impl Default for MemDbEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KvEngine for MemDbEngine {
    type RoTxn = MemDbReadOnlyTxn;
    type RwTxn = MemDbReadWriteTxn;

    fn create_readonly_transaction(&self) -> Self::RoTxn {
        self.snapshot()
    }

    fn create_readwrite_transaction(&self) -> Self::RwTxn {
        MemDbReadWriteTxn {
            ro: self.snapshot(),
            overlay: BTreeMap::new(),
            cleared: Vec::new(),
            mutations: Vec::new(),
            read_keys: Mutex::new(Vec::new()),
            read_ranges: Mutex::new(Vec::new()),
            shared: Arc::clone(&self.shared),
            committed_version: -1,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers: ranges
// ---------------------------------------------------------------------------

fn bounds(begin: &KeySelector, end: &KeySelector) -> Option<(Bound<Vec<u8>>, Bound<Vec<u8>>)> {
    let start = if begin.inclusive {
        Bound::Included(begin.key.clone())
    } else {
        Bound::Excluded(begin.key.clone())
    };
    // An empty end key means "no upper bound".
    if end.key.is_empty() {
        return Some((start, Bound::Unbounded));
    }
    if begin.key > end.key || (begin.key == end.key && !(begin.inclusive && end.inclusive)) {
        return None;
    }
    let stop = if end.inclusive {
        Bound::Included(end.key.clone())
    } else {
        Bound::Excluded(end.key.clone())
    };
    Some((start, stop))
}

fn in_range(key: &[u8], begin: &[u8], end: &[u8]) -> bool {
    key >= begin && (end.is_empty() || key < end)
}

fn ranges_overlap(a: &(Vec<u8>, Vec<u8>), b: &(Vec<u8>, Vec<u8>)) -> bool {
    let a_before_b_end = b.1.is_empty() || a.0 < b.1;
    let b_before_a_end = a.1.is_empty() || b.0 < a.1;
    a_before_b_end && b_before_a_end
}

/// Collect key-value pairs from a snapshot according to `begin`/`end` and a limit.
fn collect_range(map: &Map, begin: &KeySelector, end: &KeySelector, limit: i32) -> GetRangeResult {
    let Some(range) = bounds(begin, end) else {
        return GetRangeResult::default();
    };
    let limit = limit.max(0) as usize;
    let mut kvs = Vec::new();
    let mut has_more = false;
    for (k, v) in map.range(range) {
        if kvs.len() >= limit {
            has_more = true;
            break;
        }
        kvs.push(KeyValue {
            key: k.clone(),
            value: v.clone(),
        });
    }
    GetRangeResult { kvs, has_more }
}

// ---------------------------------------------------------------------------
// Read-only transaction
// ---------------------------------------------------------------------------

/// Read-only transaction operating on a point-in-time snapshot.
pub struct MemDbReadOnlyTxn {
    snapshot: Arc<Map>,
    read_version: i64,
}

#[async_trait]
impl ReadOnlyTransaction for MemDbReadOnlyTxn {
    async fn snapshot_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key).cloned())
    }

    async fn snapshot_get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult> {
        Ok(collect_range(&self.snapshot, begin, end, limit))
    }

    async fn get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult> {
        self.snapshot_get_range(begin, end, limit).await
    }

    fn read_version(&self) -> i64 {
        self.read_version
    }

    async fn cancel(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.snapshot = Arc::new(Map::new());
    }
}

// ---------------------------------------------------------------------------
// Read-write transaction
// ---------------------------------------------------------------------------

enum Mutation {
    Set(Vec<u8>, Vec<u8>),
    Clear(Vec<u8>),
    ClearRange(Vec<u8>, Vec<u8>),
}

/// Read-write transaction that buffers mutations and applies them atomically on
/// commit after validating its reads.
pub struct MemDbReadWriteTxn {
    ro: MemDbReadOnlyTxn,
    /// Own writes, visible to subsequent reads in this transaction.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Ranges cleared by this transaction (before any later overlay writes).
    cleared: Vec<(Vec<u8>, Vec<u8>)>,
    mutations: Vec<Mutation>,
    read_keys: Mutex<Vec<Vec<u8>>>,
    read_ranges: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    shared: Arc<Shared>,
    committed_version: i64,
}

impl MemDbReadWriteTxn {
    fn local_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(v) = self.overlay.get(key) {
            return v.clone();
        }
        if self.cleared.iter().any(|(b, e)| in_range(key, b, e)) {
            return None;
        }
        self.ro.snapshot.get(key).cloned()
    }

    /// Merge the snapshot with this transaction's own writes over a range.
    fn local_range(&self, begin: &KeySelector, end: &KeySelector, limit: i32) -> GetRangeResult {
        let Some(range) = bounds(begin, end) else {
            return GetRangeResult::default();
        };
        let limit = limit.max(0) as usize;
        let mut base = self
            .ro
            .snapshot
            .range(range.clone())
            .filter(|(k, _)| {
                !self.overlay.contains_key(*k)
                    && !self.cleared.iter().any(|(b, e)| in_range(k, b, e))
            })
            .peekable();
        let mut own = self
            .overlay
            .range(range)
            .filter_map(|(k, v)| v.as_ref().map(|v| (k, v)))
            .peekable();

        let mut kvs = Vec::new();
        loop {
            let take_base = match (base.peek(), own.peek()) {
                (Some((bk, _)), Some((ok, _))) => Some(bk < ok),
                (Some(_), None) => Some(true),
                (None, Some(_)) => Some(false),
                (None, None) => None,
            };
            let next = match take_base {
                Some(true) => base.next(),
                Some(false) => own.next(),
                None => None,
            };
            let Some((k, v)) = next else {
                return GetRangeResult {
                    kvs,
                    has_more: false,
                };
            };
            if kvs.len() >= limit {
                return GetRangeResult {
                    kvs,
                    has_more: true,
                };
            }
            kvs.push(KeyValue {
                key: k.clone(),
                value: v.clone(),
            });
        }
    }

    fn check_conflicts(&self, log: &VecDeque<CommitRecord>) -> Result<()> {
        let read_version = self.ro.read_version;
        let current = self.shared.version.load(Ordering::SeqCst);
        if current == read_version {
            return Ok(());
        }
        match log.front() {
            Some(oldest) if oldest.version <= read_version + 1 => {}
            _ => {
                return make_error_msg(
                    TransactionCode::TOO_OLD,
                    format!("read version {} fell out of the commit log", read_version),
                )
            }
        }
        let keys = self.read_keys.lock();
        let ranges = self.read_ranges.lock();
        for rec in log.iter().filter(|r| r.version > read_version) {
            let key_hit = rec
                .keys
                .iter()
                .any(|k| keys.contains(k) || ranges.iter().any(|(b, e)| in_range(k, b, e)));
            let range_hit = rec.ranges.iter().any(|r| {
                keys.iter().any(|k| in_range(k, &r.0, &r.1))
                    || ranges.iter().any(|mine| ranges_overlap(mine, r))
            });
            if key_hit || range_hit {
                return make_error_msg(
                    TransactionCode::CONFLICT,
                    format!("conflict with commit {}", rec.version),
                );
            }
        }
        Ok(())
    }

    fn apply(map: &mut Map, mutations: &[Mutation]) {
        for m in mutations {
            match m {
                Mutation::Set(k, v) => {
                    map.insert(k.clone(), v.clone());
                }
                Mutation::Clear(k) => {
                    map.remove(k);
                }
                Mutation::ClearRange(b, e) => {
                    let doomed: Vec<Vec<u8>> = map
                        .range(b.clone()..)
                        .map(|(k, _)| k)
                        .take_while(|k| e.is_empty() || k.as_slice() < e.as_slice())
                        .cloned()
                        .collect();
                    for k in doomed {
                        map.remove(&k);
                    }
                }
            }
        }
    }
}

fn persist(path: &Path, map: &Map, version: i64) -> Result<()> {
    let db = PersistedDb {
        version,
        entries: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    };
    let encoded = serde_json::to_vec(&db)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, encoded)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl ReadOnlyTransaction for MemDbReadWriteTxn {
    async fn snapshot_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.local_get(key))
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read_keys.lock().push(key.to_vec());
        Ok(self.local_get(key))
    }

    async fn snapshot_get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult> {
        Ok(self.local_range(begin, end, limit))
    }

    async fn get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult> {
        self.read_ranges
            .lock()
            .push((begin.key.clone(), end.key.clone()));
        Ok(self.local_range(begin, end, limit))
    }

    fn read_version(&self) -> i64 {
        self.ro.read_version
    }

    async fn cancel(&mut self) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.overlay.clear();
        self.cleared.clear();
        self.mutations.clear();
        self.read_keys.lock().clear();
        self.read_ranges.lock().clear();
    }
}

#[async_trait]
impl ReadWriteTransaction for MemDbReadWriteTxn {
    async fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
        self.mutations.push(Mutation::Set(key.to_vec(), value.to_vec()));
        Ok(())
    }

    async fn clear(&mut self, key: &[u8]) -> Result<()> {
        self.overlay.insert(key.to_vec(), None);
        self.mutations.push(Mutation::Clear(key.to_vec()));
        Ok(())
    }

    async fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        self.overlay.retain(|k, _| !in_range(k, begin, end));
        self.cleared.push((begin.to_vec(), end.to_vec()));
        self.mutations
            .push(Mutation::ClearRange(begin.to_vec(), end.to_vec()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.mutations.is_empty() {
            self.committed_version = self.ro.read_version;
            return Ok(());
        }

        let mut data = self.shared.data.write();
        let mut log = self.shared.log.lock();
        self.check_conflicts(&log)?;

        let new_version = self.shared.version.load(Ordering::SeqCst) + 1;
        if let Some(path) = &self.shared.path {
            let mut next = (**data).clone();
            Self::apply(&mut next, &self.mutations);
            persist(path, &next, new_version)?;
            *data = Arc::new(next);
        } else {
            Self::apply(Arc::make_mut(&mut *data), &self.mutations);
        }
        self.shared.version.store(new_version, Ordering::SeqCst);

        let mut record = CommitRecord {
            version: new_version,
            keys: Vec::new(),
            ranges: Vec::new(),
        };
        for m in self.mutations.drain(..) {
            match m {
                Mutation::Set(k, _) | Mutation::Clear(k) => record.keys.push(k),
                Mutation::ClearRange(b, e) => record.ranges.push((b, e)),
            }
        }
        log.push_back(record);
        while log.len() > COMMIT_LOG_CAPACITY {
            log.pop_front();
        }

        self.overlay.clear();
        self.cleared.clear();
        self.committed_version = new_version;
        Ok(())
    }

    fn get_committed_version(&self) -> i64 {
        self.committed_version
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
