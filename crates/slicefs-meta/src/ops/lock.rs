use slicefs_kv::ReadWriteTransaction;
use slicefs_types::status_code::{MetaCode, StatusCode};
use slicefs_types::{make_error, make_error_msg, Result, SessionId};

use crate::inode::Inode;
use crate::lock::{update_plocks, FlockEntry, PlockEntry};
use crate::ops::OpEnv;
use crate::types::{Ino, LockType, PlockRecord};

fn require_session(env: &OpEnv<'_>) -> Result<SessionId> {
    match env.sid {
        Some(sid) => Ok(sid),
        None => make_error_msg(MetaCode::NO_SESSION, "locks need a session"),
    }
}

/// One non-blocking flock attempt.
pub async fn flock(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    ino: Ino,
    owner: u64,
    typ: LockType,
) -> Result<()> {
    let sid = require_session(env)?;
    Inode::load_existing(&*txn, ino).await?;
    let held = FlockEntry::load_inode(&*txn, ino).await?;
    let own = FlockEntry { ino, sid, owner, typ };

    if typ == LockType::Unlock {
        if held.iter().any(|h| h.sid == sid && h.owner == owner) {
            own.remove(txn).await?;
        }
        return Ok(());
    }
    if let Some(other) = held
        .iter()
        .find(|h| !(h.sid == sid && h.owner == owner) && h.conflicts_with(typ))
    {
        tracing::trace!(inode = ino, owner, holder = other.owner, "flock: conflict");
        return make_error(MetaCode::WOULD_BLOCK);
    }
    own.store(txn).await?;
    tracing::debug!(inode = ino, sid = sid.get(), owner, ?typ, "flock: granted");
    Ok(())
}

/// The first record of another owner that blocks `lock`.
pub async fn getlk(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    ino: Ino,
    owner: u64,
    lock: &PlockRecord,
) -> Result<Option<PlockRecord>> {
    if lock.typ == LockType::Unlock {
        return Ok(None);
    }
    Inode::load_existing(&*txn, ino).await?;
    for entry in PlockEntry::load_inode(&*txn, ino).await? {
        if Some(entry.sid) == env.sid && entry.owner == owner {
            continue;
        }
        if let Some(found) = entry.find_conflict(lock) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// One non-blocking record lock attempt.
pub async fn setlk(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    ino: Ino,
    owner: u64,
    lock: &PlockRecord,
) -> Result<()> {
    let sid = require_session(env)?;
    if lock.start > lock.end {
        return make_error(StatusCode::INVALID_ARG);
    }
    Inode::load_existing(&*txn, ino).await?;
    let entries = PlockEntry::load_inode(&*txn, ino).await?;

    if lock.typ != LockType::Unlock {
        let blocked = entries
            .iter()
            .filter(|e| !(e.sid == sid && e.owner == owner))
            .any(|e| e.find_conflict(lock).is_some());
        if blocked {
            return make_error(MetaCode::WOULD_BLOCK);
        }
    }
    let mut own = entries
        .into_iter()
        .find(|e| e.sid == sid && e.owner == owner)
        .unwrap_or(PlockEntry {
            ino,
            sid,
            owner,
            records: Vec::new(),
        });
    own.records = update_plocks(&own.records, *lock);
    own.store(txn).await?;
    tracing::debug!(inode = ino, sid = sid.get(), owner, typ = ?lock.typ, start = lock.start, end = lock.end, "setlk: applied");
    Ok(())
}
