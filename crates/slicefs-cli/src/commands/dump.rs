//! `dump` and `load` of the metadata as JSON.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use slicefs_meta::{Context, ROOT_INODE};

use crate::env::{AdminEnv, MetaUrl};
use crate::output::{kv_row, CommandOutput};

#[derive(Debug, Args)]
pub struct DumpMeta {
    #[command(flatten)]
    pub meta: MetaUrl,

    /// Output file; stdout when omitted.
    pub file: Option<PathBuf>,

    /// Dump only this directory.
    #[arg(long)]
    pub subdir: Option<String>,
}

impl DumpMeta {
    pub async fn execute(&self, env: &AdminEnv) -> anyhow::Result<CommandOutput> {
        let meta = env.open_meta(&self.meta)?;
        let root = match &self.subdir {
            Some(dir) => {
                let (ino, _) = meta
                    .resolve(&Context::background(), ROOT_INODE, dir)
                    .await
                    .with_context(|| format!("resolve {}", dir))?;
                ino
            }
            None => ROOT_INODE,
        };

        match &self.file {
            Some(path) => {
                let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
                let mut w = BufWriter::new(file);
                meta.dump_meta(&mut w, root).await?;
                w.flush()?;
                tracing::info!(path = %path.display(), inode = root, "dump: done");
                Ok(CommandOutput::Table(vec![
                    kv_row("Dumped", path.display()),
                    kv_row("Root", root),
                ]))
            }
            None => {
                let mut w = std::io::stdout();
                meta.dump_meta(&mut w, root).await?;
                w.flush()?;
                Ok(CommandOutput::Nothing)
            }
        }
    }
}

#[derive(Debug, Args)]
pub struct LoadMeta {
    #[command(flatten)]
    pub meta: MetaUrl,

    /// Input file; stdin when omitted.
    pub file: Option<PathBuf>,
}

impl LoadMeta {
    pub async fn execute(&self, env: &AdminEnv) -> anyhow::Result<CommandOutput> {
        let meta = env.open_meta(&self.meta)?;
        let source = match &self.file {
            Some(path) => {
                let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
                meta.load_meta(&mut BufReader::new(file)).await?;
                path.display().to_string()
            }
            None => {
                meta.load_meta(&mut std::io::stdin()).await?;
                "stdin".to_string()
            }
        };
        let format = meta.load().await?;
        tracing::info!(name = %format.name, %source, "load: done");
        Ok(CommandOutput::Table(vec![
            kv_row("Loaded", source),
            kv_row("Name", format.name),
        ]))
    }
}
