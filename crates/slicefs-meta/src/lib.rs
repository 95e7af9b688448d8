//! slicefs-meta: metadata engine of the slicefs file system.
//!
//! The namespace, attributes, chunk/slice indices, locks and sessions live in
//! a transactional KV store; file data lives as blocks in an object store.
//!
//! Architecture:
//! - [`Meta`] - the engine contract every backend implements
//! - [`KvMeta`] - the engine over any [`slicefs_kv::KvEngine`], retrying
//!   conflicting transactions
//! - [`ops`] - individual operations, each running inside one transaction
//! - [`MetaRegistry`] - constructs engines from `scheme://` URIs
//! - [`get_path`] - reverse path lookup for diagnostics

pub mod background;
pub mod chunk;
pub mod chunk_cache;
pub mod config;
pub mod counter;
pub mod dir_entry;
pub mod dump;
pub mod event;
pub mod format;
pub mod inode;
pub mod key_prefix;
pub mod kv_meta;
pub mod link_parent;
pub mod lock;
pub mod meta;
pub mod open_files;
pub mod ops;
pub mod path;
pub mod registry;
pub mod retry;
pub mod session;
pub mod types;
pub mod xattr;

pub use background::BackgroundRunner;
pub use config::MetaConfig;
pub use event::{EventReceiver, MetaEvent};
pub use format::Format;
pub use kv_meta::KvMeta;
pub use meta::Meta;
pub use path::get_path;
pub use registry::{remove_password, MetaRegistry};
pub use types::*;
