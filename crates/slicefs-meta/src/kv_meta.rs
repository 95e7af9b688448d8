//! [`Meta`] on top of any transactional KV engine.
//!
//! Each request opens a transaction, runs one operation from [`crate::ops`]
//! and commits. Conflicts are retried here with exponential back-off; side
//! effects (events, cache invalidation) are applied only after a commit.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use slicefs_kv::{KvEngine, ReadWriteTransaction};
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result, SessionId, Status};

use crate::background::BackgroundRunner;
use crate::chunk::{ChunkSlices, PendingDelete};
use crate::chunk_cache::{invalidate_inode, ChunkCache};
use crate::config::MetaConfig;
use crate::counter;
use crate::dump;
use crate::event::{EventBus, EventReceiver, MetaEvent};
use crate::format::Format;
use crate::meta::Meta;
use crate::open_files::OpenFiles;
use crate::ops::mknod::NewNode;
use crate::ops::{self, Effects, Limits, OpEnv};
use crate::retry::ExponentialBackoff;
use crate::session::Sustained;
use crate::types::*;

/// Inode ids reserved per counter update.
const INODE_BATCH: u64 = 1024;

/// Wait between attempts of a blocking lock.
const LOCK_POLL_MIN: Duration = Duration::from_millis(1);
const LOCK_POLL_MAX: Duration = Duration::from_millis(500);

/// Run `$body` in a fresh read-write transaction until it commits or fails
/// with a non-retryable error. `$txn`, `$env` and `$fx` are bound for the body.
macro_rules! retry_txn {
    ($self:ident, $op:expr, |$txn:ident, $env:ident, $fx:ident| $body:expr) => {{
        $self.check_readonly()?;
        retry_txn!(@run $self, $op, |$txn, $env, $fx| $body)
    }};
    (@run $self:ident, $op:expr, |$txn:ident, $env:ident, $fx:ident| $body:expr) => {{
        let mut backoff = $self.backoff();
        loop {
            let mut txn_inner = $self.engine.create_readwrite_transaction();
            #[allow(unused_mut)]
            let mut $fx = Effects::default();
            #[allow(unused_variables)]
            let $env = $self.env();
            let result = async {
                let $txn: &mut dyn ReadWriteTransaction = &mut txn_inner;
                let value = $body?;
                $txn.commit().await?;
                Ok::<_, Status>(value)
            }
            .await;
            match result {
                Ok(value) => {
                    $self.apply_effects($fx);
                    break Ok(value);
                }
                Err(e) if e.is_retryable() => match backoff.next_wait() {
                    Some(wait) => {
                        tracing::debug!(op = $op, attempt = backoff.attempts(), code = e.code(), "txn: conflict, retrying");
                        tokio::time::sleep(wait).await;
                    }
                    None => {
                        tracing::warn!(op = $op, attempts = backoff.attempts(), error = %e.describe(), "txn: giving up");
                        break Err(e);
                    }
                },
                Err(e) => break Err(e),
            }
        }
    }};
}

#[derive(Debug, Default)]
struct IdRange {
    next: u64,
    end: u64,
}

impl IdRange {
    fn take(&mut self) -> Option<u64> {
        (self.next < self.end).then(|| {
            self.next += 1;
            self.next - 1
        })
    }
}

/// Metadata engine over a [`KvEngine`].
pub struct KvMeta<E: KvEngine> {
    name: String,
    engine: E,
    config: MetaConfig,
    format: RwLock<Option<Format>>,
    sid: RwLock<Option<SessionId>>,
    open_files: OpenFiles,
    chunk_cache: Mutex<ChunkCache>,
    inode_ids: Mutex<IdRange>,
    chunk_ids: Mutex<IdRange>,
    pending_compact: Mutex<Vec<(Ino, u32)>>,
    events: EventBus,
}

impl<E: KvEngine + 'static> KvMeta<E> {
    pub fn new(name: impl Into<String>, engine: E, config: MetaConfig) -> Self {
        Self {
            name: name.into(),
            engine,
            chunk_cache: Mutex::new(ChunkCache::new(config.chunk_cache_capacity)),
            events: EventBus::new(config.event_capacity),
            config,
            format: RwLock::new(None),
            sid: RwLock::new(None),
            open_files: OpenFiles::new(),
            inode_ids: Mutex::new(IdRange::default()),
            chunk_ids: Mutex::new(IdRange::default()),
            pending_compact: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The session registered by this client, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        *self.sid.read()
    }

    fn check_readonly(&self) -> Result<()> {
        if self.config.readonly {
            return make_error_msg(StatusCode::READ_ONLY_MODE, "metadata engine is read-only");
        }
        Ok(())
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.config.retry_init_wait,
            self.config.retry_max_wait,
            self.config.retries,
        )
    }

    fn limits(&self) -> Limits {
        self.format
            .read()
            .as_ref()
            .map(Limits::from)
            .unwrap_or_default()
    }

    fn env(&self) -> OpEnv<'_> {
        OpEnv {
            config: &self.config,
            limits: self.limits(),
            sid: self.session_id(),
            now: Timespec::now(),
            open_files: &self.open_files,
        }
    }

    fn apply_effects(&self, fx: Effects) {
        if !fx.touched.is_empty() {
            let mut cache = self.chunk_cache.lock();
            for ino in &fx.touched {
                invalidate_inode(&mut cache, *ino);
            }
        }
        if !fx.compact.is_empty() {
            self.pending_compact.lock().extend(fx.compact);
        }
        self.events.publish_all(fx.events);
    }

    /// Remove session `sid` if its heartbeat is still older than `cutoff`
    /// when the removing transaction commits.
    pub async fn reclaim_stale_session(&self, sid: SessionId, cutoff: i64) -> Result<bool> {
        retry_txn!(@run self, "clean_session", |txn, env, fx| {
            ops::session::reclaim_stale_session(txn, &env, &mut fx, sid, cutoff).await
        })
    }

    /// Reserve `batch` values of counter `name`, never handing out 0.
    async fn reserve(&self, name: &'static str, batch: u64) -> Result<(u64, u64)> {
        retry_txn!(@run self, "reserve ids", |txn, env, fx| {
            let start = counter::get(&*txn, name).await?.max(1) as u64;
            counter::set(txn, name, (start + batch) as i64).await?;
            Ok::<_, Status>((start, start + batch))
        })
    }

    async fn alloc_inode(&self) -> Result<Ino> {
        loop {
            if let Some(id) = self.inode_ids.lock().take() {
                return Ok(id);
            }
            let (start, end) = self.reserve(counter::NEXT_INODE, INODE_BATCH).await?;
            if end > TRASH_INODE {
                return make_error(MetaCode::INODE_ID_ALLOC_FAILED);
            }
            *self.inode_ids.lock() = IdRange { next: start, end };
        }
    }

    async fn alloc_chunk_id(&self) -> Result<u64> {
        loop {
            if let Some(id) = self.chunk_ids.lock().take() {
                return Ok(id);
            }
            let batch = self.config.chunk_id_batch.max(1);
            let (start, end) = self.reserve(counter::NEXT_CHUNK, batch).await?;
            *self.chunk_ids.lock() = IdRange { next: start, end };
        }
    }

    async fn create_node(&self, ctx: &Context, node: NewNode<'_>) -> Result<(Ino, Attr)> {
        let ino = self.alloc_inode().await?;
        retry_txn!(self, "mknod", |txn, env, fx| ops::mknod::mknod(txn, &env, ctx, &node, ino).await)
    }

    /// Prune one chunk and ask the data layer to rewrite what is left.
    async fn compact_chunk(&self, ino: Ino, indx: u32) -> Result<(u64, bool)> {
        let (pruned, rewrite) = retry_txn!(self, "compact", |txn, env, fx| {
            ops::compact::compact_chunk(txn, &env, &mut fx, ino, indx).await
        })?;
        let Some(slices) = rewrite else {
            return Ok((pruned, false));
        };
        let chunkid = self.alloc_chunk_id().await?;
        self.events.publish(MetaEvent::CompactChunk {
            inode: ino,
            indx,
            chunkid,
            slices,
        });
        Ok((pruned, true))
    }

    async fn run_pending_compactions(&self) {
        let pending: Vec<(Ino, u32)> = std::mem::take(&mut *self.pending_compact.lock());
        for (ino, indx) in pending {
            if let Err(e) = self.compact_chunk(ino, indx).await {
                tracing::warn!(inode = ino, indx, error = %e.describe(), "compact: failed");
            }
        }
    }

    /// Publish a delete event for every slice still waiting for deletion.
    async fn replay_pending_deletes(&self) -> Result<usize> {
        let txn = self.engine.create_readonly_transaction();
        let pending = PendingDelete::list(&txn).await?;
        let n = pending.len();
        self.events.publish_all(pending.into_iter().map(|p| MetaEvent::DeleteChunk {
            chunkid: p.chunkid,
            size: p.size,
        }));
        Ok(n)
    }

    /// Retry a lock attempt while it would block, until cancelled.
    async fn wait_lock<F, Fut>(&self, ctx: &Context, block: bool, attempt: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut wait = LOCK_POLL_MIN;
        loop {
            match attempt().await {
                Err(e) if block && e.code() == MetaCode::WOULD_BLOCK => {
                    if ctx.is_canceled() {
                        return make_error(StatusCode::INTERRUPTED);
                    }
                    tokio::time::sleep(wait).await;
                    wait = (wait * 2).min(LOCK_POLL_MAX);
                    if ctx.is_canceled() {
                        return make_error(StatusCode::INTERRUPTED);
                    }
                }
                other => return other,
            }
        }
    }

    /// Remove `name` in `parent`, descending into directories.
    async fn remove_tree(&self, ctx: &Context, parent: Ino, name: &str) -> Result<u64> {
        let (ino, attr) = self.lookup(ctx, parent, name).await?;
        if !attr.is_dir() {
            self.unlink(ctx, parent, name).await?;
            return Ok(1);
        }
        let mut removed = 0u64;
        // (parent, name, inode, children already removed)
        let mut stack = vec![(parent, name.to_string(), ino, false)];
        while let Some((p, n, dir, expanded)) = stack.pop() {
            if ctx.is_canceled() {
                return make_error(StatusCode::INTERRUPTED);
            }
            if expanded {
                self.rmdir(ctx, p, &n).await?;
                removed += 1;
                continue;
            }
            stack.push((p, n, dir, true));
            for entry in self.readdir(ctx, dir, true).await? {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                match entry.attr {
                    Some(a) if a.is_dir() => stack.push((dir, entry.name, entry.inode, false)),
                    _ => {
                        self.unlink(ctx, dir, &entry.name).await?;
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Keep the session alive and reclaim stale ones until shut down.
    pub fn spawn_background(self: Arc<Self>) -> BackgroundRunner {
        let mut runner = BackgroundRunner::new();
        let meta = self.clone();
        runner.spawn_periodic(self.config.heartbeat, move || {
            let meta = meta.clone();
            async move {
                if meta.session_id().is_none() {
                    return;
                }
                if let Err(e) = meta.refresh_session().await {
                    tracing::warn!(error = %e.describe(), "session: heartbeat failed");
                }
            }
        });
        let meta = self.clone();
        let clean_every = (self.config.session_expire / 4).max(Duration::from_secs(1));
        runner.spawn_periodic(clean_every, move || {
            let meta = meta.clone();
            async move {
                match meta.clean_stale_sessions().await {
                    Ok(cleaned) if !cleaned.is_empty() => {
                        tracing::info!(count = cleaned.len(), "session: reclaimed stale sessions")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e.describe(), "session: cleanup failed"),
                }
            }
        });
        runner
    }
}

#[async_trait]
impl<E: KvEngine + 'static> Meta for KvMeta<E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, format: Format, force: bool) -> Result<()> {
        let now = Timespec::now();
        retry_txn!(self, "init", |txn, env, fx| ops::volume::init(txn, &format, force, now).await)?;
        tracing::info!(meta = %self.name, volume = %format.name, "init: volume formatted");
        *self.format.write() = Some(format);
        Ok(())
    }

    async fn load(&self) -> Result<Format> {
        let txn = self.engine.create_readonly_transaction();
        let format = ops::volume::require_format(&txn).await?;
        *self.format.write() = Some(format.clone());
        Ok(format)
    }

    async fn reset(&self) -> Result<()> {
        retry_txn!(self, "reset", |txn, env, fx| ops::volume::reset(txn).await)?;
        *self.format.write() = None;
        *self.inode_ids.lock() = IdRange::default();
        *self.chunk_ids.lock() = IdRange::default();
        Ok(())
    }

    async fn stat_fs(&self, _ctx: &Context, _ino: Ino) -> Result<StatFs> {
        let txn = self.engine.create_readonly_transaction();
        ops::volume::stat_fs(&txn, self.limits()).await
    }

    async fn access(&self, ctx: &Context, ino: Ino, mask: AccessMask) -> Result<()> {
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::access(&txn, &self.env(), ctx, ino, mask).await
    }

    async fn lookup(&self, ctx: &Context, parent: Ino, name: &str) -> Result<(Ino, Attr)> {
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::lookup(&txn, &self.env(), ctx, parent, name).await
    }

    async fn resolve(&self, ctx: &Context, parent: Ino, path: &str) -> Result<(Ino, Attr)> {
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::resolve(&txn, &self.env(), ctx, parent, path).await
    }

    async fn getattr(&self, _ctx: &Context, ino: Ino) -> Result<Attr> {
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::getattr(&txn, ino).await
    }

    async fn setattr(
        &self,
        ctx: &Context,
        ino: Ino,
        set: SetAttrMask,
        sggid_clear_mode: u16,
        attr: &Attr,
    ) -> Result<Attr> {
        retry_txn!(self, "setattr", |txn, env, fx| {
            ops::set_attr::setattr(txn, &env, &mut fx, ctx, ino, set, sggid_clear_mode, attr).await
        })
    }

    async fn truncate(
        &self,
        ctx: &Context,
        ino: Ino,
        flags: TruncateFlags,
        length: u64,
    ) -> Result<Attr> {
        retry_txn!(self, "truncate", |txn, env, fx| {
            ops::set_attr::truncate(txn, &env, &mut fx, ctx, ino, flags, length).await
        })
    }

    async fn fallocate(
        &self,
        ctx: &Context,
        ino: Ino,
        mode: FallocateMode,
        off: u64,
        size: u64,
    ) -> Result<()> {
        retry_txn!(self, "fallocate", |txn, env, fx| {
            ops::set_attr::fallocate(txn, &env, &mut fx, ctx, ino, mode, off, size).await
        })
    }

    async fn readlink(&self, _ctx: &Context, ino: Ino) -> Result<String> {
        let txn = self.engine.create_readonly_transaction();
        ops::lookup::readlink(&txn, ino).await
    }

    async fn symlink(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &str,
        target: &str,
    ) -> Result<(Ino, Attr)> {
        let mut node = NewNode::new(parent, name, InodeType::Symlink, 0o777, 0);
        node.target = target;
        self.create_node(ctx, node).await
    }

    async fn mknod(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &str,
        typ: InodeType,
        mode: u16,
        cumask: u16,
        rdev: u32,
    ) -> Result<(Ino, Attr)> {
        if typ == InodeType::Symlink {
            return make_error_msg(StatusCode::INVALID_ARG, "use symlink to create symlinks");
        }
        let mut node = NewNode::new(parent, name, typ, mode, cumask);
        node.rdev = rdev;
        self.create_node(ctx, node).await
    }

    async fn mkdir(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &str,
        mode: u16,
        cumask: u16,
        copysgid: bool,
    ) -> Result<(Ino, Attr)> {
        let mut node = NewNode::new(parent, name, InodeType::Directory, mode, cumask);
        node.copysgid = copysgid;
        self.create_node(ctx, node).await
    }

    async fn unlink(&self, ctx: &Context, parent: Ino, name: &str) -> Result<()> {
        retry_txn!(self, "unlink", |txn, env, fx| {
            ops::remove::unlink(txn, &env, &mut fx, ctx, parent, name).await
        })
    }

    async fn rmdir(&self, ctx: &Context, parent: Ino, name: &str) -> Result<()> {
        retry_txn!(self, "rmdir", |txn, env, fx| {
            ops::remove::rmdir(txn, &env, &mut fx, ctx, parent, name).await
        })
    }

    async fn rename(
        &self,
        ctx: &Context,
        parent_src: Ino,
        name_src: &str,
        parent_dst: Ino,
        name_dst: &str,
        flags: RenameFlags,
    ) -> Result<(Ino, Attr)> {
        ops::rename::check_flags(flags)?;
        retry_txn!(self, "rename", |txn, env, fx| {
            ops::rename::rename(txn, &env, &mut fx, ctx, parent_src, name_src, parent_dst, name_dst, flags)
                .await
        })
    }

    async fn link(&self, ctx: &Context, ino: Ino, parent: Ino, name: &str) -> Result<Attr> {
        retry_txn!(self, "link", |txn, env, fx| {
            ops::link::link(txn, &env, ctx, ino, parent, name).await
        })
    }

    async fn readdir(&self, ctx: &Context, ino: Ino, plus: bool) -> Result<Vec<Entry>> {
        let txn = self.engine.create_readonly_transaction();
        ops::readdir::readdir(&txn, &self.env(), ctx, ino, plus).await
    }

    async fn create(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &str,
        mode: u16,
        cumask: u16,
        flags: i32,
    ) -> Result<(Ino, Attr)> {
        let ino = self.alloc_inode().await?;
        let (ino, attr, created) = retry_txn!(self, "create", |txn, env, fx| {
            ops::mknod::create(txn, &env, ctx, parent, name, mode, cumask, flags, ino).await
        })?;
        self.open_files.open(ino);
        tracing::debug!(parent, name, inode = ino, created, "create: opened");
        Ok((ino, attr))
    }

    async fn open(&self, ctx: &Context, ino: Ino, flags: i32) -> Result<Attr> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_TRUNC != 0 {
            self.check_readonly()?;
        }
        let txn = self.engine.create_readonly_transaction();
        let mut attr = ops::lookup::getattr(&txn, ino).await?;
        ops::check_perm(&self.env(), ctx, &attr, ops::open_mask(flags))?;
        if attr.is_file() {
            attr.keep_cache = self.open_files.is_open(ino);
            self.open_files.open(ino);
        }
        Ok(attr)
    }

    async fn close(&self, _ctx: &Context, ino: Ino) -> Result<()> {
        if self.open_files.close(ino) > 0 {
            return Ok(());
        }
        invalidate_inode(&mut self.chunk_cache.lock(), ino);
        let Some(sid) = self.session_id() else {
            return Ok(());
        };
        let sustained = {
            let txn = self.engine.create_readonly_transaction();
            Sustained::exists(&txn, ino, sid).await?
        };
        if sustained {
            retry_txn!(@run self, "close", |txn, env, fx| {
                ops::remove::release_inode(txn, &env, &mut fx, ino, sid).await
            })?;
        }
        Ok(())
    }

    async fn read(&self, _ctx: &Context, ino: Ino, indx: u32) -> Result<Vec<Slice>> {
        let cached = self.open_files.is_open(ino);
        if cached {
            if let Some(slices) = self.chunk_cache.lock().get(&(ino, indx)) {
                return Ok(slices.clone());
            }
        }
        let txn = self.engine.create_readonly_transaction();
        let slices = ops::data::read(&txn, ino, indx).await?;
        if cached {
            self.chunk_cache.lock().put((ino, indx), slices.clone());
        }
        Ok(slices)
    }

    async fn new_chunk(&self, _ctx: &Context) -> Result<u64> {
        self.check_readonly()?;
        self.alloc_chunk_id().await
    }

    async fn write(
        &self,
        _ctx: &Context,
        ino: Ino,
        indx: u32,
        off: u32,
        slice: Slice,
    ) -> Result<()> {
        retry_txn!(self, "write", |txn, env, fx| {
            ops::data::write(txn, &env, &mut fx, ino, indx, off, slice).await
        })?;
        self.run_pending_compactions().await;
        Ok(())
    }

    async fn invalidate_chunk_cache(&self, _ctx: &Context, ino: Ino, indx: u32) -> Result<()> {
        self.chunk_cache.lock().remove(&(ino, indx));
        Ok(())
    }

    async fn copy_file_range(
        &self,
        ctx: &Context,
        fin: Ino,
        off_in: u64,
        fout: Ino,
        off_out: u64,
        size: u64,
        flags: u32,
    ) -> Result<u64> {
        let copied = retry_txn!(self, "copy_file_range", |txn, env, fx| {
            ops::data::copy_file_range(txn, &env, &mut fx, ctx, fin, off_in, fout, off_out, size, flags)
                .await
        })?;
        self.run_pending_compactions().await;
        Ok(copied)
    }

    async fn getxattr(&self, _ctx: &Context, ino: Ino, name: &str) -> Result<Vec<u8>> {
        let txn = self.engine.create_readonly_transaction();
        ops::xattr::getxattr(&txn, ino, name).await
    }

    async fn listxattr(&self, _ctx: &Context, ino: Ino) -> Result<Vec<u8>> {
        let txn = self.engine.create_readonly_transaction();
        ops::xattr::listxattr(&txn, ino).await
    }

    async fn setxattr(
        &self,
        ctx: &Context,
        ino: Ino,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
    ) -> Result<()> {
        retry_txn!(self, "setxattr", |txn, env, fx| {
            ops::xattr::setxattr(txn, &env, ctx, ino, name, value, flags).await
        })
    }

    async fn removexattr(&self, ctx: &Context, ino: Ino, name: &str) -> Result<()> {
        retry_txn!(self, "removexattr", |txn, env, fx| {
            ops::xattr::removexattr(txn, &env, ctx, ino, name).await
        })
    }

    async fn flock(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: u64,
        typ: LockType,
        block: bool,
    ) -> Result<()> {
        self.wait_lock(ctx, block && typ != LockType::Unlock, move || async move {
            retry_txn!(@run self, "flock", |txn, env, fx| {
                ops::lock::flock(txn, &env, ino, owner, typ).await
            })
        })
        .await
    }

    async fn getlk(
        &self,
        _ctx: &Context,
        ino: Ino,
        owner: u64,
        lock: &PlockRecord,
    ) -> Result<Option<PlockRecord>> {
        let mut txn = self.engine.create_readwrite_transaction();
        ops::lock::getlk(&mut txn, &self.env(), ino, owner, lock).await
    }

    async fn setlk(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: u64,
        block: bool,
        lock: &PlockRecord,
    ) -> Result<()> {
        self.wait_lock(ctx, block && lock.typ != LockType::Unlock, move || async move {
            retry_txn!(@run self, "setlk", |txn, env, fx| {
                ops::lock::setlk(txn, &env, ino, owner, lock).await
            })
        })
        .await
    }

    async fn new_session(&self, info: SessionInfo) -> Result<SessionId> {
        let now = Timespec::now().sec;
        let sid = retry_txn!(@run self, "new_session", |txn, env, fx| {
            ops::session::new_session(txn, now, &info).await
        })?;
        *self.sid.write() = Some(sid);
        let replayed = self.replay_pending_deletes().await?;
        self.events.publish(MetaEvent::Info {
            message: format!("session {} started on {}", sid.get(), info.hostname),
        });
        tracing::info!(sid = sid.get(), host = %info.hostname, mount = %info.mount_point, replayed, "session: registered");
        Ok(sid)
    }

    async fn refresh_session(&self) -> Result<()> {
        let Some(sid) = self.session_id() else {
            return make_error(MetaCode::NO_SESSION);
        };
        let now = Timespec::now().sec;
        retry_txn!(@run self, "refresh_session", |txn, env, fx| {
            ops::session::refresh_session(txn, sid, now).await
        })
    }

    async fn close_session(&self) -> Result<()> {
        let Some(sid) = self.session_id() else {
            return Ok(());
        };
        retry_txn!(@run self, "close_session", |txn, env, fx| {
            ops::session::cleanup_session(txn, &env, &mut fx, sid).await
        })?;
        *self.sid.write() = None;
        tracing::info!(sid = sid.get(), "session: closed");
        Ok(())
    }

    async fn get_session(&self, sid: SessionId) -> Result<Session> {
        let txn = self.engine.create_readonly_transaction();
        ops::session::get_session(&txn, sid).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let txn = self.engine.create_readonly_transaction();
        ops::session::list_sessions(&txn).await
    }

    async fn clean_stale_sessions(&self) -> Result<Vec<SessionId>> {
        let cutoff = Timespec::now().sec - self.config.session_expire.as_secs() as i64;
        let stale = {
            let txn = self.engine.create_readonly_transaction();
            ops::session::stale_sessions(&txn, cutoff).await?
        };
        let own = self.session_id();
        let mut cleaned = Vec::with_capacity(stale.len());
        for sid in stale {
            if Some(sid) == own {
                continue;
            }
            if self.reclaim_stale_session(sid, cutoff).await? {
                cleaned.push(sid);
            }
        }
        Ok(cleaned)
    }

    async fn compact_all(&self, _ctx: &Context) -> Result<CompactStats> {
        self.check_readonly()?;
        let chunks = {
            let txn = self.engine.create_readonly_transaction();
            ops::compact::list_chunks(&txn).await?
        };
        let mut stats = CompactStats::default();
        for (ino, indx, records) in chunks {
            stats.chunks_scanned += 1;
            if records < 2 {
                continue;
            }
            let (pruned, requested) = self.compact_chunk(ino, indx).await?;
            stats.slices_pruned += pruned;
            stats.compactions_requested += requested as u64;
        }
        tracing::info!(?stats, "compact: pass finished");
        Ok(stats)
    }

    async fn commit_compaction(
        &self,
        _ctx: &Context,
        ino: Ino,
        indx: u32,
        origin: &[Slice],
        slice: Slice,
    ) -> Result<()> {
        retry_txn!(self, "commit_compaction", |txn, env, fx| {
            ops::compact::commit_compaction(txn, &env, &mut fx, ino, indx, origin, slice).await
        })
    }

    async fn list_slices(&self, _ctx: &Context, delete: bool) -> Result<BTreeMap<Ino, Vec<Slice>>> {
        if delete {
            self.check_readonly()?;
            let orphans = {
                let txn = self.engine.create_readonly_transaction();
                ops::compact::find_orphans(&txn).await?
            };
            for ino in orphans {
                retry_txn!(self, "delete_orphan", |txn, env, fx| {
                    ops::compact::delete_orphan(txn, &env, &mut fx, ino).await
                })?;
            }
            let replayed = self.replay_pending_deletes().await?;
            tracing::debug!(replayed, "list_slices: flushed pending deletes");
        }
        let txn = self.engine.create_readonly_transaction();
        ops::compact::list_slices(&txn).await
    }

    async fn ack_chunk_deleted(&self, chunkid: u64, size: u32) -> Result<()> {
        retry_txn!(self, "ack_chunk_deleted", |txn, env, fx| {
            ops::compact::ack_chunk_deleted(txn, chunkid, size).await
        })
    }

    async fn rmr(&self, ctx: &Context, parent: Ino, name: &str) -> Result<u64> {
        self.check_readonly()?;
        let removed = self.remove_tree(ctx, parent, name).await?;
        self.events.publish(MetaEvent::Rmr {
            parent,
            name: name.to_string(),
            removed,
        });
        tracing::info!(parent, name, removed, "rmr: done");
        Ok(removed)
    }

    async fn summary(&self, _ctx: &Context, ino: Ino) -> Result<Summary> {
        let txn = self.engine.create_readonly_transaction();
        ops::readdir::summary(&txn, ino).await
    }

    async fn fill_cache(&self, _ctx: &Context, ino: Ino) -> Result<()> {
        let txn = self.engine.create_readonly_transaction();
        let attr = ops::lookup::getattr(&txn, ino).await?;
        if !attr.is_file() {
            return make_error(MetaCode::NOT_FILE);
        }
        for chunk in ChunkSlices::load_all(&txn, ino, true).await? {
            self.events.publish(MetaEvent::FillCache {
                inode: ino,
                indx: chunk.indx,
                slices: chunk.visible(),
            });
        }
        Ok(())
    }

    async fn dump_meta(&self, w: &mut (dyn Write + Send), root: Ino) -> Result<()> {
        let txn = self.engine.create_readonly_transaction();
        dump::dump(&txn, w, root).await
    }

    async fn load_meta(&self, r: &mut (dyn Read + Send)) -> Result<()> {
        let doc = dump::read_document(r)?;
        retry_txn!(self, "load_meta", |txn, env, fx| dump::load(txn, &doc).await)?;
        self.load().await?;
        *self.inode_ids.lock() = IdRange::default();
        *self.chunk_ids.lock() = IdRange::default();
        Ok(())
    }

    fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests;
