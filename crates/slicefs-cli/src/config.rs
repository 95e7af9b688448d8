//! Config file of the admin tool.
//!
//! ```toml
//! [meta]
//! retries = 20
//! readonly = false
//!
//! [log]
//! level = "debug"
//!
//! [fsck]
//! concurrency = 32
//! ```

use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use slicefs_fsck::FsckConfig;
use slicefs_logging::LogConfig;
use slicefs_meta::MetaConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SLICEFS_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub meta: MetaConfig,
    pub log: LogConfig,
    pub fsck: FsckConfig,
}

impl CliConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("parse config")
    }

    /// Read `path`, or return the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = Self::from_toml(&text).with_context(|| format!("in {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config: loaded");
        Ok(config)
    }
}
