use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use slicefs_meta::Ino;

/// Counters gathered by one check. Partial results merge by addition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FsckStats {
    pub found_blocks: u64,
    pub found_bytes: u64,
    pub scanned_slices: u64,
    pub scanned_bytes: u64,
    pub lost_blocks: u64,
    pub lost_bytes: u64,
}

impl FsckStats {
    pub fn merge(&mut self, other: &FsckStats) {
        self.found_blocks += other.found_blocks;
        self.found_bytes += other.found_bytes;
        self.scanned_slices += other.scanned_slices;
        self.scanned_bytes += other.scanned_bytes;
        self.lost_blocks += other.lost_blocks;
        self.lost_bytes += other.lost_bytes;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FsckReport {
    pub stats: FsckStats,
    /// Files with lost blocks, by inode. The value is the file's path, or the
    /// reason it could not be resolved.
    pub broken: BTreeMap<Ino, String>,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.stats.lost_blocks == 0
    }

    pub(crate) fn merge(&mut self, other: FsckReport) {
        self.stats.merge(&other.stats);
        self.broken.extend(other.broken);
    }
}

/// The loss summary followed by one line per broken file, ordered by inode.
/// Empty when nothing was lost.
impl fmt::Display for FsckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return Ok(());
        }
        writeln!(
            f,
            "{} objects are lost ({} bytes), {} broken files:",
            self.stats.lost_blocks,
            self.stats.lost_bytes,
            self.broken.len()
        )?;
        write!(f, "{:>13}: PATH", "INODE")?;
        for (ino, path) in &self.broken {
            write!(f, "\n{:>13}: {}", ino, path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_files_by_inode() {
        let mut report = FsckReport::default();
        report.stats.lost_blocks = 3;
        report.stats.lost_bytes = 30;
        report.broken.insert(12, "/b".into());
        report.broken.insert(2, "/a".into());
        assert_eq!(
            report.to_string(),
            "3 objects are lost (30 bytes), 2 broken files:\n        INODE: PATH\n            2: /a\n           12: /b"
        );
    }

    #[test]
    fn test_clean_report_renders_nothing() {
        let mut report = FsckReport::default();
        report.stats.found_blocks = 4;
        assert!(report.is_ok());
        assert_eq!(report.to_string(), "");
    }

    #[test]
    fn test_merge_adds_counters() {
        let mut a = FsckReport::default();
        a.stats.lost_blocks = 1;
        a.broken.insert(5, "/x".into());
        let mut b = FsckReport::default();
        b.stats.lost_blocks = 2;
        b.stats.scanned_slices = 7;
        b.broken.insert(6, "/y".into());
        a.merge(b);
        assert_eq!(a.stats.lost_blocks, 3);
        assert_eq!(a.stats.scanned_slices, 7);
        assert_eq!(a.broken.len(), 2);
    }
}
