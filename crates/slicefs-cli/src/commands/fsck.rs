use clap::Args;
use slicefs_fsck::FsckConfig;

use crate::env::{AdminEnv, MetaUrl};
use crate::output::{kv_row, CommandOutput};

/// Check that every block referenced by metadata exists in object storage.
#[derive(Debug, Args)]
pub struct CheckVolume {
    #[command(flatten)]
    pub meta: MetaUrl,

    /// Inodes checked in parallel; overrides `[fsck] concurrency`.
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl CheckVolume {
    pub async fn execute(&self, env: &AdminEnv) -> anyhow::Result<CommandOutput> {
        let mut config: FsckConfig = env.config.fsck.clone();
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        let meta = env.open_meta(&self.meta)?;
        let format = meta.load().await?;
        let store = slicefs_object::create_storage(&format)?;

        let report = slicefs_fsck::check(meta.as_ref(), store, &config).await?;
        if !report.is_ok() {
            anyhow::bail!("{}", report);
        }
        let s = &report.stats;
        let table = vec![
            kv_row("FoundBlocks", s.found_blocks),
            kv_row("FoundBytes", s.found_bytes),
            kv_row("ScannedSlices", s.scanned_slices),
            kv_row("ScannedBytes", s.scanned_bytes),
            kv_row("LostBlocks", s.lost_blocks),
        ];
        CommandOutput::document(table, &report)
    }
}
