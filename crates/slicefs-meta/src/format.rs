//! Volume format: the settings fixed when a volume is created.

use serde::{Deserialize, Serialize};

/// Settings of a volume, persisted under the setting key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub name: String,
    pub uuid: String,
    /// Object storage kind, e.g. `mem` or `file`.
    pub storage: String,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
    /// Block size in KiB.
    pub block_size: u32,
    #[serde(default)]
    pub compression: String,
    /// Space quota in bytes, 0 for unlimited.
    #[serde(default)]
    pub capacity: u64,
    /// Inode quota, 0 for unlimited.
    #[serde(default)]
    pub inodes: u64,
    #[serde(default)]
    pub trash_days: u32,
}

impl Format {
    /// A new format with a fresh uuid and default storage settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid::Uuid::new_v4().to_string(),
            storage: "mem".to_string(),
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            block_size: 4096,
            compression: String::new(),
            capacity: 0,
            inodes: 0,
            trash_days: 0,
        }
    }

    /// Block size in bytes.
    pub fn block_bytes(&self) -> u64 {
        self.block_size as u64 * 1024
    }

    /// A copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut f = self.clone();
        if !f.secret_key.is_empty() {
            f.secret_key = "removed".to_string();
        }
        f
    }

    /// Fields that may not change once the volume holds data.
    pub(crate) fn check_compatible(&self, new: &Format) -> std::result::Result<(), String> {
        if self.name != new.name {
            return Err(format!("name: {} -> {}", self.name, new.name));
        }
        if self.block_size != new.block_size {
            return Err(format!("block size: {} -> {}", self.block_size, new.block_size));
        }
        if self.compression != new.compression {
            return Err(format!("compression: {:?} -> {:?}", self.compression, new.compression));
        }
        if self.storage != new.storage || self.bucket != new.bucket {
            return Err(format!(
                "storage: {}://{} -> {}://{}",
                self.storage, self.bucket, new.storage, new.bucket
            ));
        }
        Ok(())
    }
}
