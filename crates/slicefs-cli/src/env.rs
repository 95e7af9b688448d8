//! Environment shared by every command.

use std::sync::Arc;

use anyhow::Context as _;
use slicefs_meta::{remove_password, Meta, MetaRegistry};

use crate::config::CliConfig;

/// Environment variable holding the metadata engine password.
pub const PASSWORD_ENV: &str = "META_PASSWORD";

/// The META-URL argument every command takes.
#[derive(Debug, Clone, clap::Args)]
pub struct MetaUrl {
    /// Metadata engine URL, e.g. `file:///var/lib/slicefs/meta.json`.
    #[arg(value_name = "META-URL")]
    pub meta_url: String,
}

pub struct AdminEnv {
    pub config: CliConfig,
    pub registry: MetaRegistry,
    password: Option<String>,
}

impl AdminEnv {
    pub fn new(config: CliConfig, password: Option<String>) -> Self {
        Self {
            config,
            registry: MetaRegistry::with_default_drivers(),
            password,
        }
    }

    /// Reads the password from [`PASSWORD_ENV`].
    pub fn from_env(config: CliConfig) -> Self {
        Self::new(config, std::env::var(PASSWORD_ENV).ok())
    }

    pub fn open_meta(&self, url: &MetaUrl) -> anyhow::Result<Arc<dyn Meta>> {
        self.registry
            .new_client(&url.meta_url, &self.config.meta, self.password.as_deref())
            .with_context(|| format!("open meta {}", remove_password(&url.meta_url)))
    }
}

impl std::fmt::Debug for AdminEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminEnv")
            .field("config", &self.config)
            .field("schemes", &self.registry.schemes())
            .finish()
    }
}
