//! Session records: heartbeats, client info and sustained inodes.

use slicefs_kv::{scan_prefix, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{Result, SessionId};

use crate::key_prefix::{self, SESSION_INFO_PREFIX, SESSION_PREFIX, SUSTAINED_PREFIX};
use crate::types::{Ino, SessionInfo};

/// Heartbeat and info of one session.
pub struct SessionRecord;

impl SessionRecord {
    pub fn heartbeat_key(sid: SessionId) -> Vec<u8> {
        key_prefix::pack1(SESSION_PREFIX, sid.get())
    }

    pub fn info_key(sid: SessionId) -> Vec<u8> {
        key_prefix::pack1(SESSION_INFO_PREFIX, sid.get())
    }

    pub async fn store(
        txn: &mut dyn ReadWriteTransaction,
        sid: SessionId,
        heartbeat: i64,
        info: &SessionInfo,
    ) -> Result<()> {
        Self::store_heartbeat(txn, sid, heartbeat).await?;
        let value = key_prefix::encode("session info", info)?;
        txn.set(&Self::info_key(sid), &value).await
    }

    pub async fn store_heartbeat(
        txn: &mut dyn ReadWriteTransaction,
        sid: SessionId,
        heartbeat: i64,
    ) -> Result<()> {
        let value = key_prefix::encode("heartbeat", &heartbeat)?;
        txn.set(&Self::heartbeat_key(sid), &value).await
    }

    pub async fn load_heartbeat<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        sid: SessionId,
    ) -> Result<Option<i64>> {
        match txn.get(&Self::heartbeat_key(sid)).await? {
            Some(v) => Ok(Some(key_prefix::decode("heartbeat", &v)?)),
            None => Ok(None),
        }
    }

    pub async fn load_info<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        sid: SessionId,
    ) -> Result<SessionInfo> {
        match txn.snapshot_get(&Self::info_key(sid)).await? {
            Some(v) => key_prefix::decode("session info", &v),
            None => Ok(SessionInfo::default()),
        }
    }

    /// `(sid, heartbeat)` of every session.
    pub async fn list<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<(SessionId, i64)>> {
        let kvs = scan_prefix(txn, &[SESSION_PREFIX], true).await?;
        kvs.iter()
            .map(|kv| {
                key_prefix::expect_key(&kv.key, SESSION_PREFIX, 9)?;
                Ok((
                    SessionId(key_prefix::read_u64(&kv.key, 1)?),
                    key_prefix::decode("heartbeat", &kv.value)?,
                ))
            })
            .collect()
    }

    pub async fn remove(txn: &mut dyn ReadWriteTransaction, sid: SessionId) -> Result<()> {
        txn.clear(&Self::heartbeat_key(sid)).await?;
        txn.clear(&Self::info_key(sid)).await
    }
}

/// Marks an unlinked inode that a session still has open.
pub struct Sustained;

impl Sustained {
    pub fn pack_key_for(ino: Ino, sid: SessionId) -> Vec<u8> {
        key_prefix::pack2(SUSTAINED_PREFIX, ino, sid.get())
    }

    pub async fn add(txn: &mut dyn ReadWriteTransaction, ino: Ino, sid: SessionId) -> Result<()> {
        txn.set(&Self::pack_key_for(ino, sid), b"").await
    }

    pub async fn remove(txn: &mut dyn ReadWriteTransaction, ino: Ino, sid: SessionId) -> Result<()> {
        txn.clear(&Self::pack_key_for(ino, sid)).await
    }

    pub async fn exists<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        ino: Ino,
        sid: SessionId,
    ) -> Result<bool> {
        Ok(txn.get(&Self::pack_key_for(ino, sid)).await?.is_some())
    }

    /// Sessions sustaining `ino`. Joins the conflict set.
    pub async fn holders<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Vec<SessionId>> {
        let kvs = scan_prefix(txn, &key_prefix::pack1(SUSTAINED_PREFIX, ino), false).await?;
        kvs.iter()
            .map(|kv| Ok(SessionId(key_prefix::read_u64(&kv.key, 9)?)))
            .collect()
    }

    /// Every `(ino, sid)` pair.
    pub async fn list<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<(Ino, SessionId)>> {
        let kvs = scan_prefix(txn, &[SUSTAINED_PREFIX], true).await?;
        kvs.iter()
            .map(|kv| {
                key_prefix::expect_key(&kv.key, SUSTAINED_PREFIX, 17)?;
                Ok((
                    key_prefix::read_u64(&kv.key, 1)?,
                    SessionId(key_prefix::read_u64(&kv.key, 9)?),
                ))
            })
            .collect()
    }
}
