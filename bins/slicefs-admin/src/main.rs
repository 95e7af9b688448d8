use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

use slicefs_cli::config::CONFIG_ENV;
use slicefs_cli::{AdminCommands, AdminEnv, CliConfig, OutputFormat};

/// slicefs administration tool
///
/// Formats, inspects, checks, dumps and restores slicefs volumes.
#[derive(Parser, Debug)]
#[command(name = "slicefs-admin", version, about)]
struct Cli {
    /// Config file with `[meta]`, `[log]` and `[fsck]` tables.
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// More logging; repeat for trace.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log how long the command took.
    #[arg(long, global = true)]
    profile: bool,

    #[command(subcommand)]
    command: AdminCommands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if cli.verbose > 0 || cli.quiet {
        config.log.level = slicefs_logging::level_for(cli.verbose, cli.quiet).to_string();
    }
    let _guard = slicefs_logging::init_logging(&config.log)?;

    let env = AdminEnv::from_env(config);
    let start = Instant::now();
    let result = cli.command.run(&env, cli.format).await;
    if cli.profile {
        tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "command finished");
    }
    result
}
