//! Advisory (flock) and POSIX record (plock) lock records.
//!
//! Locks are keyed by `(ino, sid, owner)`, so every holder of a lock on an
//! inode is found with one prefix scan.

use slicefs_kv::{scan_prefix, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{Result, SessionId};

use crate::key_prefix::{self, FLOCK_PREFIX, PLOCK_PREFIX};
use crate::types::{Ino, LockType, PlockRecord};

fn pack_key(prefix: u8, ino: Ino, sid: SessionId, owner: u64) -> Vec<u8> {
    let mut key = key_prefix::pack2(prefix, ino, sid.get());
    key.extend_from_slice(&owner.to_be_bytes());
    key
}

fn unpack_key(prefix: u8, key: &[u8]) -> Result<(Ino, SessionId, u64)> {
    key_prefix::expect_key(key, prefix, 25)?;
    Ok((
        key_prefix::read_u64(key, 1)?,
        SessionId(key_prefix::read_u64(key, 9)?),
        key_prefix::read_u64(key, 17)?,
    ))
}

/// One holder's flock on an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlockEntry {
    pub ino: Ino,
    pub sid: SessionId,
    pub owner: u64,
    pub typ: LockType,
}

impl FlockEntry {
    pub fn pack_key_for(ino: Ino, sid: SessionId, owner: u64) -> Vec<u8> {
        pack_key(FLOCK_PREFIX, ino, sid, owner)
    }

    pub fn pack_key(&self) -> Vec<u8> {
        Self::pack_key_for(self.ino, self.sid, self.owner)
    }

    pub fn unpack(key: &[u8], value: &[u8]) -> Result<Self> {
        let (ino, sid, owner) = unpack_key(FLOCK_PREFIX, key)?;
        Ok(Self {
            ino,
            sid,
            owner,
            typ: key_prefix::decode("flock", value)?,
        })
    }

    /// Every flock held on `ino`. Joins the conflict set.
    pub async fn load_inode<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Vec<Self>> {
        let kvs = scan_prefix(txn, &key_prefix::pack1(FLOCK_PREFIX, ino), false).await?;
        kvs.iter().map(|kv| Self::unpack(&kv.key, &kv.value)).collect()
    }

    /// Every flock in the volume.
    pub async fn load_all<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<Self>> {
        let kvs = scan_prefix(txn, &[FLOCK_PREFIX], false).await?;
        kvs.iter().map(|kv| Self::unpack(&kv.key, &kv.value)).collect()
    }

    pub async fn store(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        let value = key_prefix::encode("flock", &self.typ)?;
        txn.set(&self.pack_key(), &value).await
    }

    pub async fn remove(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        txn.clear(&self.pack_key()).await
    }

    /// Whether a request of type `typ` conflicts with this lock.
    pub fn conflicts_with(&self, typ: LockType) -> bool {
        typ == LockType::Write || self.typ == LockType::Write
    }
}

/// One holder's record locks on an inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlockEntry {
    pub ino: Ino,
    pub sid: SessionId,
    pub owner: u64,
    pub records: Vec<PlockRecord>,
}

impl PlockEntry {
    pub fn pack_key_for(ino: Ino, sid: SessionId, owner: u64) -> Vec<u8> {
        pack_key(PLOCK_PREFIX, ino, sid, owner)
    }

    pub fn pack_key(&self) -> Vec<u8> {
        Self::pack_key_for(self.ino, self.sid, self.owner)
    }

    pub fn unpack(key: &[u8], value: &[u8]) -> Result<Self> {
        let (ino, sid, owner) = unpack_key(PLOCK_PREFIX, key)?;
        Ok(Self {
            ino,
            sid,
            owner,
            records: key_prefix::decode("plock", value)?,
        })
    }

    pub async fn load_inode<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Vec<Self>> {
        let kvs = scan_prefix(txn, &key_prefix::pack1(PLOCK_PREFIX, ino), false).await?;
        kvs.iter().map(|kv| Self::unpack(&kv.key, &kv.value)).collect()
    }

    pub async fn load_all<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<Self>> {
        let kvs = scan_prefix(txn, &[PLOCK_PREFIX], false).await?;
        kvs.iter().map(|kv| Self::unpack(&kv.key, &kv.value)).collect()
    }

    /// Write the record set, clearing the key once it is empty.
    pub async fn store(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        if self.records.is_empty() {
            return txn.clear(&self.pack_key()).await;
        }
        let value = key_prefix::encode("plock", &self.records)?;
        txn.set(&self.pack_key(), &value).await
    }

    pub async fn remove(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        txn.clear(&self.pack_key()).await
    }

    /// The first record of this holder that blocks `req`.
    pub fn find_conflict(&self, req: &PlockRecord) -> Option<PlockRecord> {
        self.records
            .iter()
            .find(|r| {
                r.overlaps(req) && (r.typ == LockType::Write || req.typ == LockType::Write)
            })
            .copied()
    }
}

/// Apply `req` to one owner's record set.
///
/// The requested range replaces whatever the owner held there (unlocking
/// splits records). Afterwards adjacent or overlapping records of the same type
/// are merged.
pub fn update_plocks(records: &[PlockRecord], req: PlockRecord) -> Vec<PlockRecord> {
    let mut out: Vec<PlockRecord> = Vec::with_capacity(records.len() + 2);
    for r in records {
        if !r.overlaps(&req) {
            out.push(*r);
            continue;
        }
        if r.start < req.start {
            out.push(PlockRecord { end: req.start - 1, ..*r });
        }
        if r.end > req.end {
            out.push(PlockRecord { start: req.end + 1, ..*r });
        }
    }
    if req.typ != LockType::Unlock {
        out.push(req);
    }
    out.sort_by_key(|r| r.start);

    let mut merged: Vec<PlockRecord> = Vec::with_capacity(out.len());
    for r in out {
        if let Some(last) = merged.last_mut() {
            let touches = last.end == u64::MAX || last.end + 1 >= r.start;
            if last.typ == r.typ && touches {
                last.end = last.end.max(r.end);
                continue;
            }
        }
        merged.push(r);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(start: u64, end: u64) -> PlockRecord {
        PlockRecord::new(LockType::Write, start, end, 1)
    }

    fn r(start: u64, end: u64) -> PlockRecord {
        PlockRecord::new(LockType::Read, start, end, 1)
    }

    fn un(start: u64, end: u64) -> PlockRecord {
        PlockRecord::new(LockType::Unlock, start, end, 1)
    }

    #[test]
    fn test_unlock_splits_record() {
        let out = update_plocks(&[w(0, 99)], un(10, 19));
        assert_eq!(out, vec![w(0, 9), w(20, 99)]);
    }

    #[test]
    fn test_adjacent_same_type_coalesce() {
        let out = update_plocks(&[w(0, 9)], w(10, 19));
        assert_eq!(out, vec![w(0, 19)]);
    }

    #[test]
    fn test_type_change_in_middle() {
        let out = update_plocks(&[w(0, 99)], r(40, 59));
        assert_eq!(out, vec![w(0, 39), r(40, 59), w(60, 99)]);
    }

    #[test]
    fn test_lock_to_eof_and_unlock_all() {
        let out = update_plocks(&[r(0, 10)], w(5, u64::MAX));
        assert_eq!(out, vec![r(0, 4), w(5, u64::MAX)]);
        assert!(update_plocks(&out, un(0, u64::MAX)).is_empty());
    }

    #[test]
    fn test_conflict_rules() {
        let holder = PlockEntry {
            ino: 2,
            sid: SessionId(1),
            owner: 7,
            records: vec![r(0, 9)],
        };
        assert!(holder.find_conflict(&r(5, 20)).is_none());
        assert_eq!(holder.find_conflict(&w(5, 20)), Some(r(0, 9)));
        assert!(holder.find_conflict(&w(10, 20)).is_none());
    }

    #[test]
    fn test_flock_key_roundtrip() {
        let entry = FlockEntry {
            ino: 3,
            sid: SessionId(4),
            owner: 5,
            typ: LockType::Read,
        };
        let value = key_prefix::encode("flock", &entry.typ).unwrap();
        assert_eq!(FlockEntry::unpack(&entry.pack_key(), &value).unwrap(), entry);
        assert!(entry.conflicts_with(LockType::Write));
        assert!(!entry.conflicts_with(LockType::Read));
    }
}
