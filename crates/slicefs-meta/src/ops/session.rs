use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::status_code::MetaCode;
use slicefs_types::{make_error_msg, Result, SessionId, Status};

use crate::counter;
use crate::lock::{FlockEntry, PlockEntry};
use crate::ops::remove::release_inode;
use crate::ops::{Effects, OpEnv};
use crate::session::{SessionRecord, Sustained};
use crate::types::{Flock, Plock, Session, SessionInfo};

pub async fn new_session(
    txn: &mut dyn ReadWriteTransaction,
    heartbeat: i64,
    info: &SessionInfo,
) -> Result<SessionId> {
    let sid = SessionId(counter::add(txn, counter::NEXT_SESSION, 1).await? as u64);
    SessionRecord::store(txn, sid, heartbeat, info).await?;
    Ok(sid)
}

pub async fn refresh_session(
    txn: &mut dyn ReadWriteTransaction,
    sid: SessionId,
    heartbeat: i64,
) -> Result<()> {
    if SessionRecord::load_heartbeat(&*txn, sid).await?.is_none() {
        return make_error_msg(MetaCode::NO_SESSION, format!("session {} was cleaned", sid.get()));
    }
    SessionRecord::store_heartbeat(txn, sid, heartbeat).await
}

/// Attach the held resources to each `(sid, heartbeat)`.
async fn build_sessions<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    records: Vec<(SessionId, i64)>,
) -> Result<Vec<Session>> {
    let flocks = FlockEntry::load_all(txn).await?;
    let plocks = PlockEntry::load_all(txn).await?;
    let sustained = Sustained::list(txn).await?;
    let mut out = Vec::with_capacity(records.len());
    for (sid, heartbeat) in records {
        out.push(Session {
            sid,
            heartbeat,
            info: SessionRecord::load_info(txn, sid).await?,
            sustained: sustained
                .iter()
                .filter(|(_, s)| *s == sid)
                .map(|(ino, _)| *ino)
                .collect(),
            flocks: flocks
                .iter()
                .filter(|f| f.sid == sid)
                .map(|f| Flock {
                    inode: f.ino,
                    owner: f.owner,
                    typ: f.typ,
                })
                .collect(),
            plocks: plocks
                .iter()
                .filter(|p| p.sid == sid)
                .map(|p| Plock {
                    inode: p.ino,
                    owner: p.owner,
                    records: p.records.clone(),
                })
                .collect(),
        });
    }
    Ok(out)
}

pub async fn get_session<T: ReadOnlyTransaction + ?Sized>(txn: &T, sid: SessionId) -> Result<Session> {
    let heartbeat = match SessionRecord::load_heartbeat(txn, sid).await? {
        Some(hb) => hb,
        None => return make_error_msg(MetaCode::NO_SESSION, format!("session {}", sid.get())),
    };
    let mut sessions = build_sessions(txn, vec![(sid, heartbeat)]).await?;
    sessions
        .pop()
        .ok_or_else(|| Status::new(MetaCode::FOUND_BUG))
}

pub async fn list_sessions<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Vec<Session>> {
    let records = SessionRecord::list(txn).await?;
    build_sessions(txn, records).await
}

/// Sessions whose last heartbeat is older than `cutoff`.
pub async fn stale_sessions<T: ReadOnlyTransaction + ?Sized>(txn: &T, cutoff: i64) -> Result<Vec<SessionId>> {
    Ok(SessionRecord::list(txn)
        .await?
        .into_iter()
        .filter(|(_, hb)| *hb < cutoff)
        .map(|(sid, _)| sid)
        .collect())
}

/// Clean up `sid` only if its heartbeat is still older than `cutoff`.
///
/// The heartbeat is read with conflict tracking, so a refresh committed
/// concurrently aborts this transaction. Returns whether the session was
/// removed.
pub async fn reclaim_stale_session(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    sid: SessionId,
    cutoff: i64,
) -> Result<bool> {
    match SessionRecord::load_heartbeat(&*txn, sid).await? {
        Some(hb) if hb < cutoff => {
            cleanup_session(txn, env, fx, sid).await?;
            Ok(true)
        }
        hb => {
            tracing::debug!(sid = sid.get(), heartbeat = ?hb, "session: no longer stale, skipped");
            Ok(false)
        }
    }
}

/// Release every lock and sustained inode of `sid` and drop its records.
pub async fn cleanup_session(
    txn: &mut dyn ReadWriteTransaction,
    env: &OpEnv<'_>,
    fx: &mut Effects,
    sid: SessionId,
) -> Result<()> {
    let mut released = 0usize;
    for f in FlockEntry::load_all(&*txn).await? {
        if f.sid == sid {
            f.remove(txn).await?;
            released += 1;
        }
    }
    for p in PlockEntry::load_all(&*txn).await? {
        if p.sid == sid {
            p.remove(txn).await?;
            released += 1;
        }
    }
    let mut deleted = 0usize;
    for (ino, holder) in Sustained::list(&*txn).await? {
        if holder == sid && release_inode(txn, env, fx, ino, sid).await? {
            deleted += 1;
        }
    }
    SessionRecord::remove(txn, sid).await?;
    tracing::info!(sid = sid.get(), locks = released, inodes = deleted, "session: cleaned up");
    Ok(())
}
