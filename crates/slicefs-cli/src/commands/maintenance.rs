//! `compact` and `gc-sessions`.

use clap::Args;
use slicefs_meta::Context;

use crate::env::{AdminEnv, MetaUrl};
use crate::output::{format_timestamp, kv_row, table_with_header, CommandOutput};

/// Drop slices hidden by newer writes and request compaction of crowded chunks.
#[derive(Debug, Args)]
pub struct CompactVolume {
    #[command(flatten)]
    pub meta: MetaUrl,
}

impl CompactVolume {
    pub async fn execute(&self, env: &AdminEnv) -> anyhow::Result<CommandOutput> {
        let meta = env.open_meta(&self.meta)?;
        let stats = meta.compact_all(&Context::background()).await?;
        let table = vec![
            kv_row("ChunksScanned", stats.chunks_scanned),
            kv_row("SlicesPruned", stats.slices_pruned),
            kv_row("CompactionsRequested", stats.compactions_requested),
        ];
        CommandOutput::document(table, &stats)
    }
}

/// Remove sessions whose heartbeat expired and release what they held.
#[derive(Debug, Args)]
pub struct GcSessions {
    #[command(flatten)]
    pub meta: MetaUrl,

    /// Only list the stale sessions.
    #[arg(long)]
    pub dry_run: bool,
}

impl GcSessions {
    pub async fn execute(&self, env: &AdminEnv) -> anyhow::Result<CommandOutput> {
        let meta = env.open_meta(&self.meta)?;
        let mut table = table_with_header(&["Sid", "Hostname", "Heartbeat", "Action"]);

        if self.dry_run {
            let expire = env.config.meta.session_expire.as_secs() as i64;
            let deadline = chrono::Utc::now().timestamp() - expire;
            for s in meta.list_sessions().await? {
                if s.heartbeat < deadline {
                    table.push(vec![
                        s.sid.to_string(),
                        s.info.hostname,
                        format_timestamp(s.heartbeat),
                        "stale".to_string(),
                    ]);
                }
            }
            return Ok(CommandOutput::Table(table));
        }

        let cleaned = meta.clean_stale_sessions().await?;
        tracing::info!(count = cleaned.len(), "gc-sessions: done");
        for sid in cleaned {
            table.push(vec![sid.to_string(), String::new(), String::new(), "removed".to_string()]);
        }
        Ok(CommandOutput::Table(table))
    }
}
