//! `format` and `status`.

use clap::Args;
use serde::Serialize;
use slicefs_meta::{Context, Format, Session, StatFs, ROOT_INODE};
use slicefs_types::status_code::MetaCode;

use crate::env::{AdminEnv, MetaUrl};
use crate::output::{format_bytes, format_timestamp, kv_row, table_with_header, CommandOutput};

#[derive(Debug, Args)]
pub struct FormatVolume {
    #[command(flatten)]
    pub meta: MetaUrl,

    /// Volume name.
    pub name: String,

    /// Object storage kind: `file` or `mem`.
    #[arg(long, default_value = "file")]
    pub storage: String,

    /// Bucket; the data directory for `file` storage.
    #[arg(long, default_value = "")]
    pub bucket: String,

    #[arg(long, env = "ACCESS_KEY", default_value = "")]
    pub access_key: String,

    #[arg(long, env = "SECRET_KEY", default_value = "", hide_env_values = true)]
    pub secret_key: String,

    /// Block size in KiB.
    #[arg(long, default_value_t = 4096)]
    pub block_size: u32,

    #[arg(long, default_value = "none")]
    pub compress: String,

    /// Space quota in GiB, 0 for unlimited.
    #[arg(long, default_value_t = 0)]
    pub capacity: u64,

    /// Inode quota, 0 for unlimited.
    #[arg(long, default_value_t = 0)]
    pub inodes: u64,

    #[arg(long, default_value_t = 0)]
    pub trash_days: u32,

    /// Overwrite an existing format, even an incompatible one.
    #[arg(long)]
    pub force: bool,
}

impl FormatVolume {
    fn to_format(&self) -> anyhow::Result<Format> {
        if self.storage == "file" && self.bucket.is_empty() {
            anyhow::bail!("--bucket is required for file storage");
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            anyhow::bail!("block size must be a power of two, got {}", self.block_size);
        }
        let mut format = Format::new(&self.name);
        format.storage = self.storage.clone();
        format.bucket = self.bucket.clone();
        format.access_key = self.access_key.clone();
        format.secret_key = self.secret_key.clone();
        format.block_size = self.block_size;
        format.compression = self.compress.clone();
        format.capacity = self.capacity << 30;
        format.inodes = self.inodes;
        format.trash_days = self.trash_days;
        Ok(format)
    }

    pub async fn execute(&self, env: &AdminEnv) -> anyhow::Result<CommandOutput> {
        let mut format = self.to_format()?;
        let meta = env.open_meta(&self.meta)?;
        match meta.load().await {
            Ok(old) if !self.force => {
                // Keeping the uuid turns this into an update of the volume.
                format.uuid = old.uuid;
            }
            Ok(_) => {}
            Err(e) if e.code() == MetaCode::NOT_FORMATTED => {}
            Err(e) => return Err(e.into()),
        }
        meta.init(format.clone(), self.force).await?;
        tracing::info!(name = %format.name, uuid = %format.uuid, "format: done");
        let shown = format.redacted();
        CommandOutput::document(format_rows(&shown), &shown)
    }
}

fn format_rows(format: &Format) -> Vec<Vec<String>> {
    let capacity = match format.capacity {
        0 => "unlimited".to_string(),
        c => format_bytes(c),
    };
    vec![
        kv_row("Name", &format.name),
        kv_row("UUID", &format.uuid),
        kv_row("Storage", format!("{}://{}", format.storage, format.bucket)),
        kv_row("BlockSize", format!("{} KiB", format.block_size)),
        kv_row("Compression", &format.compression),
        kv_row("Capacity", capacity),
        kv_row("Inodes", format.inodes),
        kv_row("TrashDays", format.trash_days),
    ]
}

#[derive(Debug, Args)]
pub struct VolumeStatus {
    #[command(flatten)]
    pub meta: MetaUrl,
}

#[derive(Debug, Serialize)]
struct StatusDocument {
    setting: Format,
    usage: StatFs,
    sessions: Vec<Session>,
}

impl VolumeStatus {
    pub async fn execute(&self, env: &AdminEnv) -> anyhow::Result<CommandOutput> {
        let meta = env.open_meta(&self.meta)?;
        let setting = meta.load().await?.redacted();
        let usage = meta.stat_fs(&Context::background(), ROOT_INODE).await?;
        let sessions = meta.list_sessions().await?;

        let mut table = format_rows(&setting);
        table.push(kv_row("UsedSpace", format_bytes(usage.total_space.saturating_sub(usage.avail_space))));
        table.push(kv_row("UsedInodes", usage.used_inodes));
        table.push(Vec::new());
        table.extend(table_with_header(&[
            "Sid", "Hostname", "MountPoint", "ProcessId", "Heartbeat", "Sustained", "Flocks", "Plocks",
        ]));
        for s in &sessions {
            table.push(vec![
                s.sid.to_string(),
                s.info.hostname.clone(),
                s.info.mount_point.clone(),
                s.info.process_id.to_string(),
                format_timestamp(s.heartbeat),
                s.sustained.len().to_string(),
                s.flocks.len().to_string(),
                s.plocks.len().to_string(),
            ]);
        }
        CommandOutput::document(
            table,
            &StatusDocument {
                setting,
                usage,
                sessions,
            },
        )
    }
}
