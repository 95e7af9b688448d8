pub mod dump;
pub mod fsck;
pub mod maintenance;
pub mod volume;

use clap::Subcommand;

use crate::env::AdminEnv;
use crate::output::{CommandOutput, OutputFormat, Printer};

#[derive(Debug, Subcommand)]
pub enum AdminCommands {
    /// Format a volume, or update the settings of a formatted one.
    Format(volume::FormatVolume),

    /// Show the volume settings, usage and client sessions.
    Status(volume::VolumeStatus),

    /// Check consistency of the volume.
    Fsck(fsck::CheckVolume),

    /// Dump metadata into a JSON file.
    Dump(dump::DumpMeta),

    /// Load metadata from a JSON dump into an empty engine.
    Load(dump::LoadMeta),

    Compact(maintenance::CompactVolume),

    #[command(name = "gc-sessions")]
    GcSessions(maintenance::GcSessions),
}

impl AdminCommands {
    pub async fn execute(&self, env: &AdminEnv) -> anyhow::Result<CommandOutput> {
        match self {
            Self::Format(cmd) => cmd.execute(env).await,
            Self::Status(cmd) => cmd.execute(env).await,
            Self::Fsck(cmd) => cmd.execute(env).await,
            Self::Dump(cmd) => cmd.execute(env).await,
            Self::Load(cmd) => cmd.execute(env).await,
            Self::Compact(cmd) => cmd.execute(env).await,
            Self::GcSessions(cmd) => cmd.execute(env).await,
        }
    }

    /// Execute and print the result in `output_format`.
    pub async fn run(&self, env: &AdminEnv, output_format: OutputFormat) -> anyhow::Result<()> {
        let mut printer = Printer::stdout(output_format);
        match self.execute(env).await {
            Ok(output) => {
                printer.print(&output)?;
                Ok(())
            }
            Err(e) => {
                printer.print_error(&format!("{:#}", e))?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliConfig;
    use clap::Parser;
    use slicefs_meta::{Context, ROOT_INODE};

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: AdminCommands,
    }

    fn parse(args: &[&str]) -> AdminCommands {
        let mut argv = vec!["slicefs-admin"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().command
    }

    fn rows(output: &CommandOutput) -> &Vec<Vec<String>> {
        match output {
            CommandOutput::Table(t) | CommandOutput::Document { table: t, .. } => t,
            CommandOutput::Nothing => panic!("no output"),
        }
    }

    #[tokio::test]
    async fn test_format_status_and_fsck_on_file_volume() {
        let dir = tempfile::tempdir().unwrap();
        let meta_url = format!("file://{}", dir.path().join("meta.json").display());
        let bucket = dir.path().join("data").display().to_string();
        let env = AdminEnv::new(CliConfig::default(), None);

        let out = parse(&["format", &meta_url, "vol", "--bucket", &bucket, "--capacity", "1"])
            .execute(&env)
            .await
            .unwrap();
        assert!(rows(&out).contains(&vec!["Name".to_string(), "vol".to_string()]));

        // A second format keeps the uuid and updates the quota.
        parse(&["format", &meta_url, "vol", "--bucket", &bucket, "--capacity", "2"])
            .execute(&env)
            .await
            .unwrap();

        let out = parse(&["status", &meta_url]).execute(&env).await.unwrap();
        let CommandOutput::Document { value, .. } = out else {
            panic!("status returns a document");
        };
        assert_eq!(value["setting"]["capacity"], 2u64 << 30);
        assert_eq!(value["sessions"].as_array().unwrap().len(), 0);

        let out = parse(&["fsck", &meta_url]).execute(&env).await.unwrap();
        assert!(rows(&out).contains(&vec!["LostBlocks".to_string(), "0".to_string()]));
    }

    #[tokio::test]
    async fn test_fsck_fails_on_lost_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let meta_url = format!("file://{}", dir.path().join("meta.json").display());
        let bucket = dir.path().join("data").display().to_string();
        let env = AdminEnv::new(CliConfig::default(), None);
        parse(&["format", &meta_url, "vol", "--bucket", &bucket])
            .execute(&env)
            .await
            .unwrap();

        let meta = env.open_meta(&crate::env::MetaUrl { meta_url: meta_url.clone() }).unwrap();
        let ctx = Context::background();
        let (ino, _) = meta.create(&ctx, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
        let chunkid = meta.new_chunk(&ctx).await.unwrap();
        meta.write(&ctx, ino, 0, 0, slicefs_meta::Slice::new(chunkid, 100, 0, 100))
            .await
            .unwrap();
        drop(meta);

        let err = parse(&["fsck", &meta_url]).execute(&env).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("1 objects are lost (100 bytes), 1 broken files:"), "{msg}");
        assert!(msg.ends_with(&format!("{:>13}: /f", ino)), "{msg}");
    }

    #[tokio::test]
    async fn test_dump_and_load_between_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let src = "mem://src".to_string();
        let dst = "mem://dst".to_string();
        let env = AdminEnv::new(CliConfig::default(), None);
        parse(&["format", &src, "vol", "--storage", "mem"])
            .execute(&env)
            .await
            .unwrap();
        let meta = env.open_meta(&crate::env::MetaUrl { meta_url: src.clone() }).unwrap();
        let ctx = Context::background();
        let (d, _) = meta.mkdir(&ctx, ROOT_INODE, "docs", 0o755, 0, false).await.unwrap();
        meta.create(&ctx, d, "a.txt", 0o644, 0, 0).await.unwrap();

        let path = dir.path().join("dump.json");
        let path_arg = path.display().to_string();
        parse(&["dump", &src, &path_arg]).execute(&env).await.unwrap();
        let out = parse(&["load", &dst, &path_arg]).execute(&env).await.unwrap();
        assert!(rows(&out).contains(&vec!["Name".to_string(), "vol".to_string()]));

        let copy = env.open_meta(&crate::env::MetaUrl { meta_url: dst }).unwrap();
        let (found, _) = copy.resolve(&ctx, ROOT_INODE, "/docs/a.txt").await.unwrap();
        assert!(found > ROOT_INODE);

        // Loading into a formatted volume is refused.
        assert!(parse(&["load", &src, &path_arg]).execute(&env).await.is_err());
    }

    #[tokio::test]
    async fn test_compact_and_gc_on_empty_volume() {
        let env = AdminEnv::new(CliConfig::default(), None);
        parse(&["format", "mem://m", "vol", "--storage", "mem"])
            .execute(&env)
            .await
            .unwrap();
        let out = parse(&["compact", "mem://m"]).execute(&env).await.unwrap();
        assert!(rows(&out).contains(&vec!["SlicesPruned".to_string(), "0".to_string()]));
        let out = parse(&["gc-sessions", "mem://m", "--dry-run"]).execute(&env).await.unwrap();
        assert_eq!(rows(&out).len(), 1);
        let out = parse(&["gc-sessions", "mem://m"]).execute(&env).await.unwrap();
        assert_eq!(rows(&out).len(), 1);
    }

    #[test]
    fn test_format_requires_bucket_for_file_storage() {
        let cmd = parse(&["format", "mem://x", "vol"]);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let env = AdminEnv::new(CliConfig::default(), None);
        let err = rt.block_on(cmd.execute(&env)).unwrap_err();
        assert!(err.to_string().contains("--bucket"));
    }
}
