//! Administration commands for slicefs volumes.
//!
//! - [`commands::AdminCommands`] - the subcommands and their handlers
//! - [`config`] - the TOML config file with `[meta]`, `[log]` and `[fsck]` tables
//! - [`env`] - the environment commands open engines through
//! - [`output`] - aligned table and JSON output
//!
//! ```ignore
//! use clap::Parser;
//! use slicefs_cli::{AdminCommands, AdminEnv, CliConfig, OutputFormat};
//!
//! #[derive(Parser)]
//! struct Cli {
//!     #[command(subcommand)]
//!     command: AdminCommands,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse();
//!     let env = AdminEnv::new(CliConfig::default(), None);
//!     cli.command.run(&env, OutputFormat::Table).await
//! }
//! ```

pub mod commands;
pub mod config;
pub mod env;
pub mod output;

pub use commands::AdminCommands;
pub use config::CliConfig;
pub use env::AdminEnv;
pub use output::{CommandOutput, OutputFormat, OutputTable, Printer};
