//! Events the engine publishes for the data layer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{Ino, Slice};

/// Message tags, stable across versions.
pub const DELETE_CHUNK: u32 = 1000;
pub const COMPACT_CHUNK: u32 = 1001;
pub const RMR: u32 = 1002;
pub const INFO: u32 = 1003;
pub const FILL_CACHE: u32 = 1004;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetaEvent {
    /// A slice has no references left; its blocks may be deleted. Answer with
    /// `ack_chunk_deleted`. May be delivered more than once.
    DeleteChunk { chunkid: u64, size: u32 },
    /// Rewrite the visible slices of a chunk into object `chunkid` and answer
    /// with `commit_compaction`.
    CompactChunk {
        inode: Ino,
        indx: u32,
        chunkid: u64,
        slices: Vec<Slice>,
    },
    Rmr { parent: Ino, name: String, removed: u64 },
    Info { message: String },
    /// Warm the block cache for one chunk.
    FillCache {
        inode: Ino,
        indx: u32,
        slices: Vec<Slice>,
    },
}

impl MetaEvent {
    pub fn tag(&self) -> u32 {
        match self {
            MetaEvent::DeleteChunk { .. } => DELETE_CHUNK,
            MetaEvent::CompactChunk { .. } => COMPACT_CHUNK,
            MetaEvent::Rmr { .. } => RMR,
            MetaEvent::Info { .. } => INFO,
            MetaEvent::FillCache { .. } => FILL_CACHE,
        }
    }
}

pub type EventReceiver = broadcast::Receiver<MetaEvent>;

/// Fan-out of events to every subscriber.
pub struct EventBus {
    tx: broadcast::Sender<MetaEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: MetaEvent) {
        let tag = event.tag();
        // No subscriber is fine: delete events stay pending and are replayed.
        if self.tx.send(event).is_err() {
            tracing::trace!(tag, "event: no subscriber");
        }
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = MetaEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(MetaEvent::DeleteChunk { chunkid: 1, size: 2 }.tag(), 1000);
        assert_eq!(
            MetaEvent::Info {
                message: String::new()
            }
            .tag(),
            1003
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new(8);
        bus.publish(MetaEvent::Info {
            message: "dropped".into(),
        });
        let mut rx = bus.subscribe();
        bus.publish(MetaEvent::DeleteChunk { chunkid: 9, size: 10 });
        assert_eq!(
            rx.recv().await.unwrap(),
            MetaEvent::DeleteChunk { chunkid: 9, size: 10 }
        );
    }

    #[test]
    fn test_serde_is_tagged() {
        let json = serde_json::to_string(&MetaEvent::Rmr {
            parent: 1,
            name: "d".into(),
            removed: 3,
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"rmr\""));
    }
}
