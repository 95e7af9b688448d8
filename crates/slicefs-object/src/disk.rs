//! Object store keeping each object as a file under a root directory.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use slicefs_types::status_code::{status_code_t, StatusCode, StorageCode};
use slicefs_types::{make_error_msg, Result, Status};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{ObjectInfo, ObjectStorage};

pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return make_error_msg(StatusCode::INVALID_CONFIG, "file storage needs a bucket directory");
        }
        std::fs::create_dir_all(root).map_err(|e| {
            Status::with_message(
                StorageCode::OBJECT_WRITE_FAILED,
                format!("create {}: {}", root.display(), e),
            )
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path_of(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.ends_with('/')
            || key.split('/').any(|part| part == ".." || part == ".")
        {
            return make_error_msg(StorageCode::INVALID_KEY, format!("invalid object key {:?}", key));
        }
        Ok(self.root.join(key))
    }
}

fn io_error(code: status_code_t, key: &str, e: std::io::Error) -> Status {
    if e.kind() == ErrorKind::NotFound {
        return Status::with_message(StorageCode::OBJECT_NOT_FOUND, format!("object {} not found", key));
    }
    Status::with_message(code, format!("{}: {}", key, e))
}

fn mtime_of(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp())
        .unwrap_or_default()
}

struct ListState {
    root: PathBuf,
    prefix: String,
    dirs: Vec<String>,
    pending: VecDeque<ObjectInfo>,
    failed: bool,
}

impl ListState {
    /// Whether the subtree keyed `dir_key` (ending in `/`) may hold matches.
    fn may_contain(&self, dir_key: &str) -> bool {
        dir_key.starts_with(&self.prefix) || self.prefix.starts_with(dir_key)
    }

    async fn scan(&mut self, dir_key: String) -> std::io::Result<()> {
        let mut rd = match tokio::fs::read_dir(self.root.join(&dir_key)).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut found = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(".tmp.") {
                continue;
            }
            let meta = entry.metadata().await?;
            found.push((format!("{}{}", dir_key, name), meta));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));

        let mut subdirs = Vec::new();
        for (key, meta) in found {
            if meta.is_dir() {
                let key = format!("{}/", key);
                if !self.may_contain(&key) {
                    continue;
                }
                if key.starts_with(&self.prefix) {
                    self.pending.push_back(ObjectInfo {
                        key: key.clone(),
                        size: 0,
                        mtime: mtime_of(&meta),
                        is_dir: true,
                    });
                }
                subdirs.push(key);
            } else if key.starts_with(&self.prefix) {
                self.pending
                    .push_back(ObjectInfo::file(key, meta.len(), mtime_of(&meta)));
            }
        }
        // Depth first, in key order.
        self.dirs.extend(subdirs.into_iter().rev());
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for DiskStorage {
    fn describe(&self) -> String {
        format!("file://{}/", self.root.display())
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo> {
        let path = self.path_of(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error(StorageCode::OBJECT_READ_FAILED, key, e))?;
        if meta.is_dir() {
            return make_error_msg(StorageCode::OBJECT_NOT_FOUND, format!("{} is a directory", key));
        }
        Ok(ObjectInfo::file(key, meta.len(), mtime_of(&meta)))
    }

    async fn get(&self, key: &str, off: u64, limit: Option<u64>) -> Result<Bytes> {
        let path = self.path_of(key)?;
        let read = async {
            let mut file = tokio::fs::File::open(&path).await?;
            let len = file.metadata().await?.len();
            if off > len {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("offset {} beyond {} bytes", off, len),
                ));
            }
            file.seek(std::io::SeekFrom::Start(off)).await?;
            let want = limit.map_or(len - off, |l| l.min(len - off));
            let mut buf = Vec::with_capacity(want as usize);
            file.take(want).read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };
        let buf = read
            .await
            .map_err(|e| io_error(StorageCode::OBJECT_READ_FAILED, key, e))?;
        Ok(Bytes::from(buf))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path_of(key)?;
        let write = async {
            let dir = path.parent().unwrap_or(&self.root);
            tokio::fs::create_dir_all(dir).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let tmp = dir.join(format!(".tmp.{}.{}", name, uuid_suffix()));
            if let Err(e) = tokio::fs::write(&tmp, &data).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
            tokio::fs::rename(&tmp, &path).await
        };
        write
            .await
            .map_err(|e| Status::with_message(StorageCode::OBJECT_WRITE_FAILED, format!("{}: {}", key, e)))?;
        tracing::trace!(key, size = data.len(), "object: put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_of(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => make_error_msg(StorageCode::OBJECT_WRITE_FAILED, format!("{}: {}", key, e)),
        }
    }

    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectInfo>> {
        let state = ListState {
            root: self.root.clone(),
            prefix: prefix.to_string(),
            dirs: vec![String::new()],
            pending: VecDeque::new(),
            failed: false,
        };
        stream::unfold(state, |mut state| async move {
            loop {
                if state.failed {
                    return None;
                }
                if let Some(info) = state.pending.pop_front() {
                    return Some((Ok(info), state));
                }
                let dir = state.dirs.pop()?;
                if let Err(e) = state.scan(dir.clone()).await {
                    state.failed = true;
                    let status = Status::with_message(
                        StorageCode::OBJECT_LIST_FAILED,
                        format!("list {}: {}", dir, e),
                    );
                    return Some((Err(status), state));
                }
            }
        })
        .boxed()
    }
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_put_get_and_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(dir.path()).unwrap();
        store.put("chunks/0/0/1_0_11", Bytes::from_static(b"hello world")).await.unwrap();

        let info = store.head("chunks/0/0/1_0_11").await.unwrap();
        assert_eq!(info.size, 11);
        assert!(!info.is_dir);
        assert_eq!(store.get("chunks/0/0/1_0_11", 6, Some(3)).await.unwrap(), Bytes::from_static(b"wor"));
        assert_eq!(store.get("chunks/0/0/1_0_11", 6, None).await.unwrap(), Bytes::from_static(b"world"));

        store.delete("chunks/0/0/1_0_11").await.unwrap();
        store.delete("chunks/0/0/1_0_11").await.unwrap();
        let err = store.get("chunks/0/0/1_0_11", 0, None).await.unwrap_err();
        assert_eq!(err.code(), StorageCode::OBJECT_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(dir.path()).unwrap();
        for key in ["../x", "/abs", "a/../../b", "", "dir/"] {
            let err = store.put(key, Bytes::new()).await.unwrap_err();
            assert_eq!(err.code(), StorageCode::INVALID_KEY, "{key}");
        }
    }

    #[tokio::test]
    async fn test_list_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(dir.path()).unwrap();
        for key in ["chunks/0/0/2_0_1", "chunks/0/0/1_0_1", "chunks/1/1000/1000000_0_1", "meta.json"] {
            store.put(key, Bytes::from_static(b"x")).await.unwrap();
        }
        let all: Vec<ObjectInfo> = store.list("chunks/").try_collect().await.unwrap();
        let files: Vec<&str> = all.iter().filter(|o| !o.is_dir).map(|o| o.key.as_str()).collect();
        assert_eq!(files, vec!["chunks/0/0/1_0_1", "chunks/0/0/2_0_1", "chunks/1/1000/1000000_0_1"]);
        assert!(all.iter().any(|o| o.is_dir && o.key == "chunks/0/"));
        assert!(all.iter().all(|o| o.key.starts_with("chunks/")));

        let none: Vec<ObjectInfo> = store.list("nothing/").try_collect().await.unwrap();
        assert!(none.is_empty());
    }
}
