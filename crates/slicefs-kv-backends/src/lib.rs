//! KV store backend implementations for slicefs.
//!
//! - **memdb** -- In-memory BTreeMap-backed store, optionally persisted to a
//!   JSON file.

pub mod memdb;

pub use memdb::MemDbEngine;
