//! Configuration for a metadata engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of a metadata engine. Every field has a default, so a partial
/// `[meta]` table is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Retries of a conflicting transaction before giving up.
    pub retries: u32,
    #[serde(with = "millis")]
    pub retry_init_wait: Duration,
    #[serde(with = "millis")]
    pub retry_max_wait: Duration,
    /// Enforce permission bits on every request.
    pub strict: bool,
    /// Reject every mutation with `READ_ONLY_MODE`.
    pub readonly: bool,
    /// Let rename replace an existing target. When off the target must not exist.
    pub atomic_replace: bool,
    /// Interval between session heartbeats.
    #[serde(with = "secs")]
    pub heartbeat: Duration,
    /// A session whose heartbeat is older than this is stale.
    #[serde(with = "secs")]
    pub session_expire: Duration,
    pub max_name_len: usize,
    /// Slices in one chunk above which a write requests compaction.
    pub compact_threshold: usize,
    /// Visible slice lists cached for open files.
    pub chunk_cache_capacity: usize,
    /// Chunk ids reserved per counter update.
    pub chunk_id_batch: u64,
    /// Buffered events per subscriber.
    pub event_capacity: usize,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            retry_init_wait: Duration::from_millis(2),
            retry_max_wait: Duration::from_millis(200),
            strict: true,
            readonly: false,
            atomic_replace: true,
            heartbeat: Duration::from_secs(12),
            session_expire: Duration::from_secs(300),
            max_name_len: 255,
            compact_threshold: 100,
            chunk_cache_capacity: 1024,
            chunk_id_batch: 1000,
            event_capacity: 1024,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
