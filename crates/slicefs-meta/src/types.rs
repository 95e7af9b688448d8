//! Data model shared by every metadata backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use slicefs_types::SessionId;

/// Inode number.
pub type Ino = u64;

/// The root directory.
pub const ROOT_INODE: Ino = 1;

/// Inodes at or above this value belong to the internal trash namespace.
pub const TRASH_INODE: Ino = 0x7FFF_FFFF_1000_0000;

/// Name of the trash directory under the root.
pub const TRASH_NAME: &str = ".trash";

/// Size of one chunk of a file.
pub const CHUNK_SIZE: u64 = 1 << 26;

/// Largest file length the engine accepts.
pub const MAX_FILE_SIZE: u64 = CHUNK_SIZE << 31;

/// Largest extended attribute value.
pub const MAX_XATTR_VALUE: usize = 65536;

pub fn is_trash(ino: Ino) -> bool {
    ino >= TRASH_INODE
}

/// Round up to the 4 KiB accounting unit.
pub fn align4k(length: u64) -> u64 {
    if length == 0 {
        return 4096;
    }
    ((length - 1) / 4096 + 1) * 4096
}

/// Kind of an inode. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum InodeType {
    File = 1,
    Directory = 2,
    Symlink = 3,
    Fifo = 4,
    BlockDev = 5,
    CharDev = 6,
    Socket = 7,
}

impl InodeType {
    /// The `S_IFMT` bits for this type.
    pub fn mode_bits(self) -> u32 {
        match self {
            InodeType::File => libc::S_IFREG as u32,
            InodeType::Directory => libc::S_IFDIR as u32,
            InodeType::Symlink => libc::S_IFLNK as u32,
            InodeType::Fifo => libc::S_IFIFO as u32,
            InodeType::BlockDev => libc::S_IFBLK as u32,
            InodeType::CharDev => libc::S_IFCHR as u32,
            InodeType::Socket => libc::S_IFSOCK as u32,
        }
    }
}

impl TryFrom<u8> for InodeType {
    type Error = u8;

    fn try_from(v: u8) -> std::result::Result<Self, u8> {
        Ok(match v {
            1 => InodeType::File,
            2 => InodeType::Directory,
            3 => InodeType::Symlink,
            4 => InodeType::Fifo,
            5 => InodeType::BlockDev,
            6 => InodeType::CharDev,
            7 => InodeType::Socket,
            other => return Err(other),
        })
    }
}

/// Inode attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    #[serde(default)]
    pub flags: u8,
    #[serde(rename = "type")]
    pub typ: InodeType,
    /// Permission bits, including setuid/setgid/sticky.
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub rdev: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    #[serde(default)]
    pub atimensec: u32,
    #[serde(default)]
    pub mtimensec: u32,
    #[serde(default)]
    pub ctimensec: u32,
    pub nlink: u32,
    pub length: u64,
    pub parent: Ino,
    /// The record was read in full from the backend. Anything decoded is.
    #[serde(skip, default = "decoded_in_full")]
    pub full: bool,
    #[serde(skip)]
    pub keep_cache: bool,
}

fn decoded_in_full() -> bool {
    true
}

impl Attr {
    pub fn new(typ: InodeType, mode: u16, uid: u32, gid: u32, now: Timespec) -> Self {
        Self {
            flags: 0,
            typ,
            mode,
            uid,
            gid,
            rdev: 0,
            atime: now.sec,
            mtime: now.sec,
            ctime: now.sec,
            atimensec: now.nsec,
            mtimensec: now.nsec,
            ctimensec: now.nsec,
            nlink: 1,
            length: 0,
            parent: 0,
            full: true,
            keep_cache: false,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.typ == InodeType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.typ == InodeType::File
    }

    /// Full `st_mode` value.
    pub fn smode(&self) -> u32 {
        self.typ.mode_bits() | self.mode as u32
    }

    pub fn touch_mtime(&mut self, now: Timespec) {
        self.mtime = now.sec;
        self.mtimensec = now.nsec;
        self.touch_ctime(now);
    }

    pub fn touch_ctime(&mut self, now: Timespec) {
        self.ctime = now.sec;
        self.ctimensec = now.nsec;
    }

    pub fn touch_atime(&mut self, now: Timespec) {
        self.atime = now.sec;
        self.atimensec = now.nsec;
    }
}

/// Wall-clock timestamp with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            sec: now.timestamp(),
            nsec: now.timestamp_subsec_nanos(),
        }
    }
}

/// A directory entry returned by lookup or readdir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub inode: Ino,
    pub name: String,
    pub attr: Option<Attr>,
}

/// A reference to a byte range of a stored chunk object.
///
/// `chunkid == 0` is a hole that reads as zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Slice {
    pub chunkid: u64,
    /// Size of the whole stored object.
    pub size: u32,
    /// Offset of the visible range inside the object.
    pub off: u32,
    pub len: u32,
}

impl Slice {
    pub fn new(chunkid: u64, size: u32, off: u32, len: u32) -> Self {
        Self {
            chunkid,
            size,
            off,
            len,
        }
    }

    pub fn hole(len: u32) -> Self {
        Self::new(0, len, 0, len)
    }

    pub fn is_hole(&self) -> bool {
        self.chunkid == 0
    }
}

/// Aggregated usage of a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub length: u64,
    pub size: u64,
    pub files: u64,
    pub dirs: u64,
}

/// Volume-wide usage, as reported to `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatFs {
    pub total_space: u64,
    pub avail_space: u64,
    pub used_inodes: u64,
    pub avail_inodes: u64,
}

/// Description of a mounted client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub version: String,
    pub hostname: String,
    pub mount_point: String,
    pub process_id: u32,
}

impl SessionInfo {
    /// Info describing the current process.
    pub fn for_current_process(mount_point: impl Into<String>) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
            mount_point: mount_point.into(),
            process_id: std::process::id(),
        }
    }
}

/// A client session with the resources it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub sid: SessionId,
    /// Last heartbeat, unix seconds.
    pub heartbeat: i64,
    pub info: SessionInfo,
    pub sustained: Vec<Ino>,
    pub flocks: Vec<Flock>,
    pub plocks: Vec<Plock>,
}

/// Lock type shared by flock and POSIX record locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    Read,
    Write,
    Unlock,
}

impl LockType {
    /// Map an `F_RDLCK`/`F_WRLCK`/`F_UNLCK` value.
    pub fn from_fcntl(v: i32) -> Option<Self> {
        match v {
            x if x == libc::F_RDLCK as i32 => Some(LockType::Read),
            x if x == libc::F_WRLCK as i32 => Some(LockType::Write),
            x if x == libc::F_UNLCK as i32 => Some(LockType::Unlock),
            _ => None,
        }
    }
}

/// A BSD advisory lock held by one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flock {
    pub inode: Ino,
    pub owner: u64,
    #[serde(rename = "type")]
    pub typ: LockType,
}

/// One byte range of a POSIX record lock. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlockRecord {
    #[serde(rename = "type")]
    pub typ: LockType,
    pub start: u64,
    pub end: u64,
    pub pid: u32,
}

impl PlockRecord {
    pub fn new(typ: LockType, start: u64, end: u64, pid: u32) -> Self {
        Self {
            typ,
            start,
            end,
            pid,
        }
    }

    pub fn overlaps(&self, other: &PlockRecord) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// All record locks one owner holds on one inode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plock {
    pub inode: Ino,
    pub owner: u64,
    pub records: Vec<PlockRecord>,
}

/// Caller identity and cancellation for one request.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
    pub pid: u32,
    canceled: Arc<AtomicBool>,
}

impl Context {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            gids: vec![gid],
            pid: std::process::id(),
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A superuser context, used by maintenance tools.
    pub fn background() -> Self {
        Self::new(0, 0)
    }

    pub fn with_gids(mut self, gids: Vec<u32>) -> Self {
        self.gids = gids;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Cancel the request. Shared by every clone of this context.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.gids.contains(&gid)
    }
}

bitflags! {
    /// Which fields of an [`Attr`] a setattr call changes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SetAttrMask: u16 {
        const MODE = 1;
        const UID = 2;
        const GID = 4;
        const SIZE = 8;
        const ATIME = 16;
        const MTIME = 32;
        const CTIME = 64;
        const ATIME_NOW = 128;
        const MTIME_NOW = 256;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RenameFlags: u32 {
        const NOREPLACE = 1;
        const EXCHANGE = 2;
        const WHITEOUT = 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FallocateMode: u8 {
        const KEEP_SIZE = 0x01;
        const PUNCH_HOLE = 0x02;
        const COLLAPSE_RANGE = 0x08;
        const ZERO_RANGE = 0x10;
        const INSERT_RANGE = 0x20;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct XattrFlags: u32 {
        const CREATE = 1;
        const REPLACE = 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TruncateFlags: u8 {
        /// The caller already checked write permission.
        const SKIP_PERM_CHECK = 1;
    }
}

bitflags! {
    /// Access mask for [`crate::Meta::access`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccessMask: u8 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

/// Counters returned by a compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompactStats {
    pub chunks_scanned: u64,
    pub slices_pruned: u64,
    pub compactions_requested: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align4k() {
        assert_eq!(align4k(0), 4096);
        assert_eq!(align4k(1), 4096);
        assert_eq!(align4k(4096), 4096);
        assert_eq!(align4k(4097), 8192);
    }

    #[test]
    fn test_inode_type_from_u8() {
        assert_eq!(InodeType::try_from(2), Ok(InodeType::Directory));
        assert_eq!(InodeType::try_from(9), Err(9));
        assert_eq!(InodeType::Symlink as u8, 3);
    }

    fn attr_without_cache_flag(mut attr: Attr) -> Attr {
        attr.keep_cache = false;
        attr
    }

    #[test]
    fn test_attr_serde_skips_runtime_flags() {
        let mut attr = Attr::new(InodeType::File, 0o644, 1, 2, Timespec { sec: 5, nsec: 6 });
        attr.keep_cache = true;
        let json = serde_json::to_string(&attr).unwrap();
        assert!(json.contains("\"type\":\"file\""));
        assert!(!json.contains("full"));
        let back: Attr = serde_json::from_str(&json).unwrap();
        assert!(!back.keep_cache);
        assert!(back.full);
        assert_eq!(back, attr_without_cache_flag(attr));
        assert_eq!(back.mtimensec, 6);
    }

    #[test]
    fn test_context_cancel_is_shared() {
        let ctx = Context::new(1000, 1000);
        let clone = ctx.clone();
        assert!(!clone.is_canceled());
        ctx.cancel();
        assert!(clone.is_canceled());
        assert!(ctx.in_group(1000));
        assert!(!ctx.in_group(0));
    }

    #[test]
    fn test_plock_overlap() {
        let a = PlockRecord::new(LockType::Write, 0, 9, 1);
        let b = PlockRecord::new(LockType::Read, 9, 20, 1);
        let c = PlockRecord::new(LockType::Read, 10, 20, 1);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_lock_type_from_fcntl() {
        assert_eq!(LockType::from_fcntl(libc::F_WRLCK as i32), Some(LockType::Write));
        assert_eq!(LockType::from_fcntl(99), None);
    }
}
