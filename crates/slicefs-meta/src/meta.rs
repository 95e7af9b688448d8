//! The metadata engine contract.
//!
//! Every backend implements [`Meta`]. Callers hold it as `Arc<dyn Meta>` and
//! never learn which backend they talk to. Each mutation is atomic; backends
//! retry their own transaction conflicts.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use async_trait::async_trait;
use slicefs_types::{Result, SessionId};

use crate::event::EventReceiver;
use crate::format::Format;
use crate::types::*;

#[async_trait]
pub trait Meta: Send + Sync {
    /// Name of the backend driver.
    fn name(&self) -> &str;

    // ---- Volume ----

    /// Format the volume. With `force` an existing format is overwritten;
    /// without it only quota fields may change.
    async fn init(&self, format: Format, force: bool) -> Result<()>;

    /// Read the volume format. Fails with `NOT_FORMATTED` on a blank store.
    async fn load(&self) -> Result<Format>;

    /// Erase every record, including the format.
    async fn reset(&self) -> Result<()>;

    async fn stat_fs(&self, ctx: &Context, ino: Ino) -> Result<StatFs>;

    async fn access(&self, ctx: &Context, ino: Ino, mask: AccessMask) -> Result<()>;

    // ---- Namespace ----

    /// Find `name` in `parent`. Handles `.` and `..`.
    async fn lookup(&self, ctx: &Context, parent: Ino, name: &str) -> Result<(Ino, Attr)>;

    /// Walk a `/`-separated path from `parent`. A symlink in the middle of the
    /// path fails with `NOT_SUPPORTED`; a trailing one is returned as is.
    async fn resolve(&self, ctx: &Context, parent: Ino, path: &str) -> Result<(Ino, Attr)>;

    async fn getattr(&self, ctx: &Context, ino: Ino) -> Result<Attr>;

    async fn setattr(
        &self,
        ctx: &Context,
        ino: Ino,
        set: SetAttrMask,
        sggid_clear_mode: u16,
        attr: &Attr,
    ) -> Result<Attr>;

    async fn truncate(
        &self,
        ctx: &Context,
        ino: Ino,
        flags: TruncateFlags,
        length: u64,
    ) -> Result<Attr>;

    async fn fallocate(
        &self,
        ctx: &Context,
        ino: Ino,
        mode: FallocateMode,
        off: u64,
        size: u64,
    ) -> Result<()>;

    async fn readlink(&self, ctx: &Context, ino: Ino) -> Result<String>;

    async fn symlink(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &str,
        target: &str,
    ) -> Result<(Ino, Attr)>;

    #[allow(clippy::too_many_arguments)]
    async fn mknod(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &str,
        typ: InodeType,
        mode: u16,
        cumask: u16,
        rdev: u32,
    ) -> Result<(Ino, Attr)>;

    async fn mkdir(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &str,
        mode: u16,
        cumask: u16,
        copysgid: bool,
    ) -> Result<(Ino, Attr)>;

    async fn unlink(&self, ctx: &Context, parent: Ino, name: &str) -> Result<()>;

    async fn rmdir(&self, ctx: &Context, parent: Ino, name: &str) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn rename(
        &self,
        ctx: &Context,
        parent_src: Ino,
        name_src: &str,
        parent_dst: Ino,
        name_dst: &str,
        flags: RenameFlags,
    ) -> Result<(Ino, Attr)>;

    async fn link(&self, ctx: &Context, ino: Ino, parent: Ino, name: &str) -> Result<Attr>;

    /// Entries of a directory, starting with `.` and `..`. With `plus` every
    /// entry carries its attributes.
    async fn readdir(&self, ctx: &Context, ino: Ino, plus: bool) -> Result<Vec<Entry>>;

    /// Create a regular file, or open it when it exists and `O_EXCL` is not set.
    async fn create(
        &self,
        ctx: &Context,
        parent: Ino,
        name: &str,
        mode: u16,
        cumask: u16,
        flags: i32,
    ) -> Result<(Ino, Attr)>;

    async fn open(&self, ctx: &Context, ino: Ino, flags: i32) -> Result<Attr>;

    async fn close(&self, ctx: &Context, ino: Ino) -> Result<()>;

    // ---- Data mapping ----

    /// Visible slices of chunk `indx`.
    async fn read(&self, ctx: &Context, ino: Ino, indx: u32) -> Result<Vec<Slice>>;

    async fn new_chunk(&self, ctx: &Context) -> Result<u64>;

    /// Record that `slice` was written at offset `off` of chunk `indx`.
    async fn write(&self, ctx: &Context, ino: Ino, indx: u32, off: u32, slice: Slice)
        -> Result<()>;

    async fn invalidate_chunk_cache(&self, ctx: &Context, ino: Ino, indx: u32) -> Result<()>;

    /// Share the slices of a byte range with another file. Returns the number
    /// of bytes copied.
    #[allow(clippy::too_many_arguments)]
    async fn copy_file_range(
        &self,
        ctx: &Context,
        fin: Ino,
        off_in: u64,
        fout: Ino,
        off_out: u64,
        size: u64,
        flags: u32,
    ) -> Result<u64>;

    // ---- Extended attributes ----

    async fn getxattr(&self, ctx: &Context, ino: Ino, name: &str) -> Result<Vec<u8>>;

    /// Names, each followed by a NUL byte.
    async fn listxattr(&self, ctx: &Context, ino: Ino) -> Result<Vec<u8>>;

    async fn setxattr(
        &self,
        ctx: &Context,
        ino: Ino,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
    ) -> Result<()>;

    async fn removexattr(&self, ctx: &Context, ino: Ino, name: &str) -> Result<()>;

    // ---- Locks ----

    async fn flock(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: u64,
        typ: LockType,
        block: bool,
    ) -> Result<()>;

    /// The first lock of another owner that conflicts with `lock`, if any.
    async fn getlk(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: u64,
        lock: &PlockRecord,
    ) -> Result<Option<PlockRecord>>;

    async fn setlk(
        &self,
        ctx: &Context,
        ino: Ino,
        owner: u64,
        block: bool,
        lock: &PlockRecord,
    ) -> Result<()>;

    // ---- Sessions ----

    async fn new_session(&self, info: SessionInfo) -> Result<SessionId>;

    async fn refresh_session(&self) -> Result<()>;

    /// Release everything held by the current session.
    async fn close_session(&self) -> Result<()>;

    async fn get_session(&self, sid: SessionId) -> Result<Session>;

    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Reclaim sessions whose heartbeat expired. Returns the reclaimed ids.
    async fn clean_stale_sessions(&self) -> Result<Vec<SessionId>>;

    // ---- Maintenance ----

    async fn compact_all(&self, ctx: &Context) -> Result<CompactStats>;

    /// Replace the slices `origin` of a chunk with the compacted `slice`.
    async fn commit_compaction(
        &self,
        ctx: &Context,
        ino: Ino,
        indx: u32,
        origin: &[Slice],
        slice: Slice,
    ) -> Result<()>;

    /// Every stored slice (holes excluded), by inode.
    async fn list_slices(&self, ctx: &Context, delete: bool) -> Result<BTreeMap<Ino, Vec<Slice>>>;

    async fn ack_chunk_deleted(&self, chunkid: u64, size: u32) -> Result<()>;

    /// Remove `name` and everything below it. Returns the removed entry count.
    async fn rmr(&self, ctx: &Context, parent: Ino, name: &str) -> Result<u64>;

    async fn summary(&self, ctx: &Context, ino: Ino) -> Result<Summary>;

    /// Publish a fill-cache event for every chunk of a file.
    async fn fill_cache(&self, ctx: &Context, ino: Ino) -> Result<()>;

    /// Write the tree below `root` (0 for everything) as JSON.
    async fn dump_meta(&self, w: &mut (dyn Write + Send), root: Ino) -> Result<()>;

    /// Load a full dump into a blank store.
    async fn load_meta(&self, r: &mut (dyn Read + Send)) -> Result<()>;

    fn subscribe(&self) -> EventReceiver;
}
