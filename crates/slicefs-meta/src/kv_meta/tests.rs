use super::*;
use crate::path::get_path;
use crate::session::SessionRecord;
use slicefs_kv_backends::MemDbEngine;

fn ctx() -> Context {
    Context::background()
}

async fn formatted(engine: MemDbEngine, config: MetaConfig) -> KvMeta<MemDbEngine> {
    let meta = KvMeta::new("mem", engine, config);
    meta.init(Format::new("test"), false).await.unwrap();
    meta
}

async fn new_meta() -> KvMeta<MemDbEngine> {
    formatted(MemDbEngine::new(), MetaConfig::default()).await
}

fn drain(rx: &mut EventReceiver) -> Vec<MetaEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

async fn write_new_slice(meta: &KvMeta<MemDbEngine>, ino: Ino, indx: u32, off: u32, len: u32) -> u64 {
    let chunkid = meta.new_chunk(&ctx()).await.unwrap();
    meta.write(&ctx(), ino, indx, off, Slice::new(chunkid, len, 0, len))
        .await
        .unwrap();
    chunkid
}

#[tokio::test]
async fn test_load_requires_format() {
    let meta = KvMeta::new("mem", MemDbEngine::new(), MetaConfig::default());
    let err = meta.load().await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NOT_FORMATTED);
    meta.init(Format::new("vol"), false).await.unwrap();
    assert_eq!(meta.load().await.unwrap().name, "vol");
    let root = meta.getattr(&ctx(), ROOT_INODE).await.unwrap();
    assert!(root.is_dir());
    assert_eq!(root.nlink, 2);
}

#[tokio::test]
async fn test_get_path_round_trips_through_resolve() {
    let meta = new_meta().await;
    let c = ctx();
    let (a, _) = meta.mkdir(&c, ROOT_INODE, "a", 0o755, 0, false).await.unwrap();
    let (b, _) = meta.mkdir(&c, a, "b", 0o755, 0, false).await.unwrap();
    let (f1, _) = meta.create(&c, b, "f1", 0o644, 0, 0).await.unwrap();
    let (f2, _) = meta.create(&c, ROOT_INODE, "f2", 0o644, 0, 0).await.unwrap();
    let (s, _) = meta.symlink(&c, a, "ln", "../f2").await.unwrap();

    for ino in [ROOT_INODE, a, b, f1, f2, s] {
        let path = get_path(&meta, &c, ino).await.unwrap();
        let (found, _) = meta.resolve(&c, ROOT_INODE, &path).await.unwrap();
        assert_eq!(found, ino, "path {}", path);
    }
    assert_eq!(get_path(&meta, &c, f1).await.unwrap(), "/a/b/f1");
    assert_eq!(get_path(&meta, &c, ROOT_INODE).await.unwrap(), "/");

    let err = meta.resolve(&c, ROOT_INODE, "/a/ln/x").await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NOT_SUPPORTED);
    assert_eq!(meta.readlink(&c, s).await.unwrap(), "../f2");
}

#[tokio::test]
async fn test_get_path_of_unlinked_inode_fails() {
    let meta = new_meta().await;
    let c = ctx();
    meta.new_session(SessionInfo::for_current_process("/mnt")).await.unwrap();
    let (f, _) = meta.create(&c, ROOT_INODE, "gone", 0o644, 0, 0).await.unwrap();
    meta.unlink(&c, ROOT_INODE, "gone").await.unwrap();
    let err = get_path(&meta, &c, f).await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_without_excl_opens_existing() {
    let meta = new_meta().await;
    let c = ctx();
    let (ino, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let (again, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    assert_eq!(ino, again);
    let err = meta
        .create(&c, ROOT_INODE, "f", 0o644, 0, libc::O_EXCL)
        .await
        .unwrap_err();
    assert_eq!(err.code(), MetaCode::EXISTS);
    meta.mkdir(&c, ROOT_INODE, "d", 0o755, 0, false).await.unwrap();
    let err = meta.create(&c, ROOT_INODE, "d", 0o644, 0, 0).await.unwrap_err();
    assert_eq!(err.code(), MetaCode::EXISTS);
}

#[tokio::test]
async fn test_permissions_in_strict_mode() {
    let meta = new_meta().await;
    let (d, _) = meta.mkdir(&ctx(), ROOT_INODE, "private", 0o700, 0, false).await.unwrap();
    let user = Context::new(1000, 1000);
    let err = meta.create(&user, d, "f", 0o644, 0, 0).await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NO_PERMISSION);
    let err = meta.access(&user, d, AccessMask::READ).await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NO_PERMISSION);
    meta.access(&ctx(), d, AccessMask::READ | AccessMask::WRITE).await.unwrap();
}

#[tokio::test]
async fn test_readdir_lists_dot_entries_and_attrs() {
    let meta = new_meta().await;
    let c = ctx();
    let (d, _) = meta.mkdir(&c, ROOT_INODE, "d", 0o755, 0, false).await.unwrap();
    meta.create(&c, d, "x", 0o644, 0, 0).await.unwrap();
    meta.mkdir(&c, d, "y", 0o755, 0, false).await.unwrap();

    let names: Vec<String> = meta
        .readdir(&c, d, false)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec![".", "..", "x", "y"]);
    let plus = meta.readdir(&c, d, true).await.unwrap();
    assert!(plus.iter().all(|e| e.attr.is_some()));
    assert_eq!(meta.getattr(&c, d).await.unwrap().nlink, 3);

    let err = meta.rmdir(&c, ROOT_INODE, "d").await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NOT_EMPTY);
}

#[tokio::test]
async fn test_rename_flags_and_replace() {
    let meta = new_meta().await;
    let c = ctx();
    meta.create(&c, ROOT_INODE, "a", 0o644, 0, 0).await.unwrap();
    let (b, _) = meta.create(&c, ROOT_INODE, "b", 0o644, 0, 0).await.unwrap();

    let err = meta
        .rename(&c, ROOT_INODE, "a", ROOT_INODE, "b", RenameFlags::NOREPLACE | RenameFlags::EXCHANGE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::INVALID_ARG);
    let err = meta
        .rename(&c, ROOT_INODE, "a", ROOT_INODE, "b", RenameFlags::NOREPLACE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), MetaCode::EXISTS);

    let (moved, _) = meta
        .rename(&c, ROOT_INODE, "a", ROOT_INODE, "b", RenameFlags::empty())
        .await
        .unwrap();
    let (now_b, _) = meta.lookup(&c, ROOT_INODE, "b").await.unwrap();
    assert_eq!(now_b, moved);
    assert_ne!(now_b, b);
    assert_eq!(meta.getattr(&c, b).await.unwrap_err().code(), MetaCode::NOT_FOUND);
    assert_eq!(meta.lookup(&c, ROOT_INODE, "a").await.unwrap_err().code(), MetaCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rename_without_atomic_replace_refuses_existing() {
    let config = MetaConfig {
        atomic_replace: false,
        ..MetaConfig::default()
    };
    let meta = formatted(MemDbEngine::new(), config).await;
    let c = ctx();
    meta.create(&c, ROOT_INODE, "a", 0o644, 0, 0).await.unwrap();
    meta.create(&c, ROOT_INODE, "b", 0o644, 0, 0).await.unwrap();
    let err = meta
        .rename(&c, ROOT_INODE, "a", ROOT_INODE, "b", RenameFlags::empty())
        .await
        .unwrap_err();
    assert_eq!(err.code(), MetaCode::EXISTS);
}

#[tokio::test]
async fn test_rename_exchange_and_directory_moves() {
    let meta = new_meta().await;
    let c = ctx();
    let (d1, _) = meta.mkdir(&c, ROOT_INODE, "d1", 0o755, 0, false).await.unwrap();
    let (d2, _) = meta.mkdir(&c, ROOT_INODE, "d2", 0o755, 0, false).await.unwrap();
    let (f, _) = meta.create(&c, d1, "f", 0o644, 0, 0).await.unwrap();

    meta.rename(&c, ROOT_INODE, "d1", ROOT_INODE, "d2", RenameFlags::EXCHANGE)
        .await
        .unwrap();
    assert_eq!(meta.lookup(&c, ROOT_INODE, "d2").await.unwrap().0, d1);
    assert_eq!(meta.lookup(&c, ROOT_INODE, "d1").await.unwrap().0, d2);

    let err = meta
        .rename(&c, ROOT_INODE, "d2", d1, "inner", RenameFlags::empty())
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::INVALID_ARG);

    meta.rename(&c, d1, "f", d2, "f", RenameFlags::empty()).await.unwrap();
    assert_eq!(meta.getattr(&c, f).await.unwrap().parent, d2);
    assert_eq!(get_path(&meta, &c, f).await.unwrap(), "/d1/f");
}

#[tokio::test]
async fn test_hard_link_keeps_parent_valid() {
    let meta = new_meta().await;
    let c = ctx();
    let (d, _) = meta.mkdir(&c, ROOT_INODE, "d", 0o755, 0, false).await.unwrap();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let attr = meta.link(&c, f, d, "g").await.unwrap();
    assert_eq!(attr.nlink, 2);
    let err = meta.link(&c, d, ROOT_INODE, "dl").await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NOT_PERMITTED);

    meta.unlink(&c, ROOT_INODE, "f").await.unwrap();
    let attr = meta.getattr(&c, f).await.unwrap();
    assert_eq!(attr.nlink, 1);
    assert_eq!(attr.parent, d);
    assert_eq!(get_path(&meta, &c, f).await.unwrap(), "/d/g");
}

#[tokio::test]
async fn test_unlink_open_file_is_sustained_until_close() {
    let meta = new_meta().await;
    let c = ctx();
    let mut rx = meta.subscribe();
    meta.new_session(SessionInfo::for_current_process("/mnt")).await.unwrap();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let chunkid = write_new_slice(&meta, f, 0, 0, 4096).await;
    drain(&mut rx);

    meta.unlink(&c, ROOT_INODE, "f").await.unwrap();
    let attr = meta.getattr(&c, f).await.unwrap();
    assert_eq!(attr.nlink, 0);
    let sid = meta.session_id().unwrap();
    assert_eq!(meta.get_session(sid).await.unwrap().sustained, vec![f]);
    assert!(drain(&mut rx).is_empty());

    meta.close(&c, f).await.unwrap();
    assert_eq!(meta.getattr(&c, f).await.unwrap_err().code(), MetaCode::NOT_FOUND);
    assert_eq!(
        drain(&mut rx),
        vec![MetaEvent::DeleteChunk { chunkid, size: 4096 }]
    );
    assert!(meta.get_session(sid).await.unwrap().sustained.is_empty());
}

#[tokio::test]
async fn test_clean_stale_sessions_releases_everything() {
    let engine = MemDbEngine::new();
    let stale = formatted(engine.clone(), MetaConfig::default()).await;
    let fresh = KvMeta::new("mem", engine.clone(), MetaConfig::default());
    fresh.load().await.unwrap();
    let c = ctx();

    let stale_sid = stale.new_session(SessionInfo::for_current_process("/a")).await.unwrap();
    let fresh_sid = fresh.new_session(SessionInfo::for_current_process("/b")).await.unwrap();
    let (f, _) = stale.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let (g, _) = fresh.create(&c, ROOT_INODE, "g", 0o644, 0, 0).await.unwrap();
    stale.flock(&c, g, 1, LockType::Read, false).await.unwrap();
    stale
        .setlk(&c, g, 1, false, &PlockRecord::new(LockType::Write, 0, 99, 7))
        .await
        .unwrap();
    fresh.flock(&c, f, 2, LockType::Write, false).await.unwrap();
    stale.unlink(&c, ROOT_INODE, "f").await.unwrap();

    let stale_session = stale.get_session(stale_sid).await.unwrap();
    assert_eq!(stale_session.flocks.len(), 1);
    assert_eq!(stale_session.plocks.len(), 1);
    assert_eq!(stale_session.sustained, vec![f]);

    let mut txn = engine.create_readwrite_transaction();
    SessionRecord::store_heartbeat(&mut txn, stale_sid, Timespec::now().sec - 3600)
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let cleaned = fresh.clean_stale_sessions().await.unwrap();
    assert_eq!(cleaned, vec![stale_sid]);
    assert_eq!(
        fresh.get_session(stale_sid).await.unwrap_err().code(),
        MetaCode::NO_SESSION
    );
    assert_eq!(fresh.getattr(&c, f).await.unwrap_err().code(), MetaCode::NOT_FOUND);

    // The stale session's locks are gone, so the fresh one can take them.
    fresh.flock(&c, g, 2, LockType::Write, false).await.unwrap();
    fresh
        .setlk(&c, g, 2, false, &PlockRecord::new(LockType::Write, 0, 10, 8))
        .await
        .unwrap();

    let sessions = fresh.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].sid, fresh_sid);
    assert!(sessions[0].flocks.iter().any(|l| l.inode == g && l.typ == LockType::Write));
    assert_eq!(stale.refresh_session().await.unwrap_err().code(), MetaCode::NO_SESSION);
}

async fn expire_heartbeat(engine: &MemDbEngine, sid: SessionId) {
    let mut txn = engine.create_readwrite_transaction();
    SessionRecord::store_heartbeat(&mut txn, sid, 0).await.unwrap();
    txn.commit().await.unwrap();
}

#[tokio::test]
async fn test_clean_stale_sessions_skips_session_refreshed_after_listing() {
    let engine = MemDbEngine::new();
    let victim = formatted(engine.clone(), MetaConfig::default()).await;
    let cleaner = KvMeta::new("mem", engine.clone(), MetaConfig::default());
    cleaner.load().await.unwrap();
    let c = ctx();

    let sid = victim.new_session(SessionInfo::for_current_process("/v")).await.unwrap();
    let (f, _) = victim.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    victim.flock(&c, f, 1, LockType::Write, false).await.unwrap();
    expire_heartbeat(&engine, sid).await;

    let cutoff = Timespec::now().sec - cleaner.config().session_expire.as_secs() as i64;
    let stale = {
        let txn = engine.create_readonly_transaction();
        ops::session::stale_sessions(&txn, cutoff).await.unwrap()
    };
    assert_eq!(stale, vec![sid]);

    // The victim heartbeats between the listing and the reclaim.
    victim.refresh_session().await.unwrap();
    assert!(!cleaner.reclaim_stale_session(sid, cutoff).await.unwrap());

    victim.refresh_session().await.unwrap();
    let session = cleaner.get_session(sid).await.unwrap();
    assert_eq!(session.flocks.len(), 1);
    assert!(cleaner.clean_stale_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reclaim_conflicts_with_concurrent_refresh() {
    let engine = MemDbEngine::new();
    let victim = formatted(engine.clone(), MetaConfig::default()).await;
    let cleaner = KvMeta::new("mem", engine.clone(), MetaConfig::default());
    cleaner.load().await.unwrap();

    let sid = victim.new_session(SessionInfo::for_current_process("/v")).await.unwrap();
    expire_heartbeat(&engine, sid).await;
    let cutoff = Timespec::now().sec - 60;

    let mut txn = engine.create_readwrite_transaction();
    let mut fx = Effects::default();
    let env = cleaner.env();
    let removed = ops::session::reclaim_stale_session(&mut txn, &env, &mut fx, sid, cutoff)
        .await
        .unwrap();
    assert!(removed);

    victim.refresh_session().await.unwrap();
    let err = txn.commit().await.unwrap_err();
    assert_eq!(err.code(), slicefs_types::status_code::TransactionCode::CONFLICT);
    assert!(cleaner.get_session(sid).await.is_ok());
}

#[tokio::test]
async fn test_flock_conflicts_and_cancellation() {
    let engine = MemDbEngine::new();
    let a = formatted(engine.clone(), MetaConfig::default()).await;
    let b = KvMeta::new("mem", engine, MetaConfig::default());
    let c = ctx();
    let (f, _) = a.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();

    let err = a.flock(&c, f, 1, LockType::Write, false).await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NO_SESSION);

    a.new_session(SessionInfo::default()).await.unwrap();
    b.new_session(SessionInfo::default()).await.unwrap();
    a.flock(&c, f, 1, LockType::Read, false).await.unwrap();
    b.flock(&c, f, 1, LockType::Read, false).await.unwrap();
    let err = b.flock(&c, f, 1, LockType::Write, false).await.unwrap_err();
    assert_eq!(err.code(), MetaCode::WOULD_BLOCK);

    let canceled = ctx();
    canceled.cancel();
    let err = b.flock(&canceled, f, 1, LockType::Write, true).await.unwrap_err();
    assert_eq!(err.code(), StatusCode::INTERRUPTED);

    a.flock(&c, f, 1, LockType::Unlock, false).await.unwrap();
    b.flock(&c, f, 1, LockType::Write, true).await.unwrap();
}

#[tokio::test]
async fn test_blocking_setlk_waits_for_release() {
    let engine = MemDbEngine::new();
    let a = Arc::new(formatted(engine.clone(), MetaConfig::default()).await);
    let b = Arc::new(KvMeta::new("mem", engine, MetaConfig::default()));
    let c = ctx();
    let (f, _) = a.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    a.new_session(SessionInfo::default()).await.unwrap();
    b.new_session(SessionInfo::default()).await.unwrap();

    let held = PlockRecord::new(LockType::Write, 0, 99, 1);
    a.setlk(&c, f, 1, false, &held).await.unwrap();
    let wanted = PlockRecord::new(LockType::Write, 50, 60, 2);
    assert_eq!(b.getlk(&c, f, 2, &wanted).await.unwrap(), Some(held));

    let waiter = {
        let b = b.clone();
        tokio::spawn(async move { b.setlk(&ctx(), f, 2, true, &wanted).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    a.setlk(&c, f, 1, false, &PlockRecord::new(LockType::Unlock, 0, 99, 1))
        .await
        .unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(a.getlk(&c, f, 1, &held).await.unwrap(), Some(wanted));
}

#[tokio::test]
async fn test_xattr_flags() {
    let meta = new_meta().await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();

    let err = meta.getxattr(&c, f, "user.a").await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NO_ATTR);
    let err = meta
        .setxattr(&c, f, "user.a", b"1", XattrFlags::REPLACE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), MetaCode::NO_ATTR);
    meta.setxattr(&c, f, "user.a", b"1", XattrFlags::CREATE).await.unwrap();
    let err = meta
        .setxattr(&c, f, "user.a", b"2", XattrFlags::CREATE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), MetaCode::EXISTS);
    meta.setxattr(&c, f, "user.a", b"2", XattrFlags::REPLACE).await.unwrap();
    meta.setxattr(&c, f, "user.b", b"", XattrFlags::empty()).await.unwrap();

    assert_eq!(meta.getxattr(&c, f, "user.a").await.unwrap(), b"2");
    assert_eq!(meta.listxattr(&c, f).await.unwrap(), b"user.a\0user.b\0");
    meta.removexattr(&c, f, "user.a").await.unwrap();
    let err = meta.removexattr(&c, f, "user.a").await.unwrap_err();
    assert_eq!(err.code(), MetaCode::NO_ATTR);
}

#[tokio::test]
async fn test_unlink_drops_xattrs_of_destroyed_inode() {
    let engine = MemDbEngine::new();
    let meta = formatted(engine.clone(), MetaConfig::default()).await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    meta.setxattr(&c, f, "user.a", b"1", XattrFlags::empty()).await.unwrap();
    meta.setxattr(&c, f, "user.b", b"2", XattrFlags::empty()).await.unwrap();
    meta.unlink(&c, ROOT_INODE, "f").await.unwrap();

    let txn = engine.create_readonly_transaction();
    let left = slicefs_kv::scan_prefix(&txn, &crate::xattr::pack_prefix(f), true)
        .await
        .unwrap();
    assert!(left.is_empty());
    assert_eq!(meta.getattr(&c, f).await.unwrap_err().code(), MetaCode::NOT_FOUND);
}

#[tokio::test]
async fn test_setattr_and_truncate() {
    let meta = new_meta().await;
    let c = ctx();
    let mut rx = meta.subscribe();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let mut want = meta.getattr(&c, f).await.unwrap();
    want.mode = 0o600;
    want.uid = 42;
    let attr = meta
        .setattr(&c, f, SetAttrMask::MODE | SetAttrMask::UID, 0, &want)
        .await
        .unwrap();
    assert_eq!((attr.mode, attr.uid), (0o600, 42));

    let first = write_new_slice(&meta, f, 0, 0, 1000).await;
    let second = write_new_slice(&meta, f, 1, 0, 1000).await;
    assert_eq!(meta.getattr(&c, f).await.unwrap().length, CHUNK_SIZE + 1000);
    drain(&mut rx);

    let attr = meta.truncate(&c, f, TruncateFlags::empty(), 500).await.unwrap();
    assert_eq!(attr.length, 500);
    assert_eq!(drain(&mut rx), vec![MetaEvent::DeleteChunk { chunkid: second, size: 1000 }]);
    let slices = meta.read(&c, f, 0).await.unwrap();
    assert_eq!(slices[0], Slice::new(first, 1000, 0, 500));
    assert!(slices.iter().skip(1).all(|s| s.is_hole()));
}

#[tokio::test]
async fn test_setattr_now_bits_override_explicit_times() {
    let meta = new_meta().await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let mut old = meta.getattr(&c, f).await.unwrap();
    old.atime = 1000;
    old.mtime = 2000;
    let attr = meta
        .setattr(&c, f, SetAttrMask::ATIME | SetAttrMask::MTIME, 0, &old)
        .await
        .unwrap();
    assert_eq!((attr.atime, attr.mtime), (1000, 2000));

    let before = Timespec::now().sec;
    let set = SetAttrMask::ATIME | SetAttrMask::ATIME_NOW | SetAttrMask::MTIME | SetAttrMask::MTIME_NOW;
    let attr = meta.setattr(&c, f, set, 0, &old).await.unwrap();
    let after = Timespec::now().sec;
    assert!((before..=after).contains(&attr.atime), "atime {}", attr.atime);
    assert!((before..=after).contains(&attr.mtime), "mtime {}", attr.mtime);
    assert_eq!(meta.getattr(&c, f).await.unwrap().mtime, attr.mtime);
}

#[tokio::test]
async fn test_fallocate_modes() {
    let meta = new_meta().await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    meta.fallocate(&c, f, FallocateMode::empty(), 0, 8192).await.unwrap();
    assert_eq!(meta.getattr(&c, f).await.unwrap().length, 8192);
    meta.fallocate(&c, f, FallocateMode::KEEP_SIZE, 0, 1 << 20).await.unwrap();
    assert_eq!(meta.getattr(&c, f).await.unwrap().length, 8192);

    let err = meta
        .fallocate(&c, f, FallocateMode::PUNCH_HOLE, 0, 10)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::INVALID_ARG);
    let err = meta
        .fallocate(&c, f, FallocateMode::COLLAPSE_RANGE, 0, 10)
        .await
        .unwrap_err();
    assert_eq!(err.code(), MetaCode::NOT_SUPPORTED);
    meta.fallocate(&c, f, FallocateMode::PUNCH_HOLE | FallocateMode::KEEP_SIZE, 0, 4096)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_copy_file_range_shares_slices() {
    let meta = new_meta().await;
    let c = ctx();
    let mut rx = meta.subscribe();
    let (src, _) = meta.create(&c, ROOT_INODE, "src", 0o644, 0, 0).await.unwrap();
    let (dst, _) = meta.create(&c, ROOT_INODE, "dst", 0o644, 0, 0).await.unwrap();
    let chunkid = write_new_slice(&meta, src, 0, 0, 8192).await;

    let copied = meta.copy_file_range(&c, src, 4096, dst, 0, 1 << 20, 0).await.unwrap();
    assert_eq!(copied, 4096);
    assert_eq!(meta.getattr(&c, dst).await.unwrap().length, 4096);
    assert_eq!(
        meta.read(&c, dst, 0).await.unwrap(),
        vec![Slice::new(chunkid, 8192, 4096, 4096)]
    );
    let err = meta.copy_file_range(&c, src, 0, src, 100, 200, 0).await.unwrap_err();
    assert_eq!(err.code(), StatusCode::INVALID_ARG);
    drain(&mut rx);

    meta.unlink(&c, ROOT_INODE, "src").await.unwrap();
    assert!(drain(&mut rx).is_empty());
    meta.unlink(&c, ROOT_INODE, "dst").await.unwrap();
    assert_eq!(drain(&mut rx), vec![MetaEvent::DeleteChunk { chunkid, size: 8192 }]);
}

#[tokio::test]
async fn test_write_beyond_capacity_fails() {
    let meta = KvMeta::new("mem", MemDbEngine::new(), MetaConfig::default());
    let mut format = Format::new("small");
    format.capacity = 16384;
    meta.init(format, false).await.unwrap();
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    meta.write(&c, f, 0, 0, Slice::new(1, 4096, 0, 4096)).await.unwrap();
    let err = meta
        .write(&c, f, 0, 4096, Slice::new(2, 16384, 0, 16384))
        .await
        .unwrap_err();
    assert_eq!(err.code(), MetaCode::NO_SPACE);

    let st = meta.stat_fs(&c, ROOT_INODE).await.unwrap();
    assert_eq!(st.total_space, 16384);
    assert_eq!(st.avail_space, 16384 - 8192);
    assert_eq!(st.used_inodes, 2);
}

#[tokio::test]
async fn test_write_rejects_slice_past_its_object() {
    let meta = new_meta().await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let err = meta
        .write(&c, f, 0, 0, Slice::new(3, 100, 50, 60))
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::INVALID_ARG);
    assert_eq!(meta.getattr(&c, f).await.unwrap().length, 0);
    assert!(meta.list_slices(&c, false).await.unwrap().is_empty());

    meta.write(&c, f, 0, 0, Slice::new(3, 100, 50, 50)).await.unwrap();
    assert_eq!(meta.getattr(&c, f).await.unwrap().length, 50);
}

#[tokio::test]
async fn test_readonly_rejects_mutations() {
    let engine = MemDbEngine::new();
    formatted(engine.clone(), MetaConfig::default()).await;
    let config = MetaConfig {
        readonly: true,
        ..MetaConfig::default()
    };
    let meta = KvMeta::new("mem", engine, config);
    meta.load().await.unwrap();
    let err = meta
        .mkdir(&ctx(), ROOT_INODE, "d", 0o755, 0, false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), StatusCode::READ_ONLY_MODE);
    assert!(meta.readdir(&ctx(), ROOT_INODE, false).await.is_ok());
}

#[tokio::test]
async fn test_compact_all_and_commit() {
    let meta = new_meta().await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let shadowed = write_new_slice(&meta, f, 0, 0, 100).await;
    let a = write_new_slice(&meta, f, 0, 0, 200).await;
    let b = write_new_slice(&meta, f, 0, 200, 50).await;
    let mut rx = meta.subscribe();

    let stats = meta.compact_all(&c).await.unwrap();
    assert_eq!(stats.chunks_scanned, 1);
    assert_eq!(stats.slices_pruned, 1);
    assert_eq!(stats.compactions_requested, 1);

    let events = drain(&mut rx);
    assert_eq!(events[0], MetaEvent::DeleteChunk { chunkid: shadowed, size: 100 });
    let MetaEvent::CompactChunk { inode, indx, chunkid, slices } = events[1].clone() else {
        panic!("expected a compact event, got {:?}", events[1]);
    };
    assert_eq!((inode, indx), (f, 0));
    assert_eq!(slices, vec![Slice::new(a, 200, 0, 200), Slice::new(b, 50, 0, 50)]);

    meta.commit_compaction(&c, f, 0, &slices, Slice::new(chunkid, 250, 0, 250))
        .await
        .unwrap();
    assert_eq!(meta.read(&c, f, 0).await.unwrap(), vec![Slice::new(chunkid, 250, 0, 250)]);
    let retired: Vec<MetaEvent> = drain(&mut rx);
    assert_eq!(retired.len(), 2);

    let listed = meta.list_slices(&c, false).await.unwrap();
    assert_eq!(listed[&f], vec![Slice::new(chunkid, 250, 0, 250)]);
}

#[tokio::test]
async fn test_pending_deletes_replay_until_acked() {
    let engine = MemDbEngine::new();
    let meta = formatted(engine.clone(), MetaConfig::default()).await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let chunkid = write_new_slice(&meta, f, 0, 0, 10).await;
    meta.unlink(&c, ROOT_INODE, "f").await.unwrap();

    let restarted = KvMeta::new("mem", engine.clone(), MetaConfig::default());
    let mut rx = restarted.subscribe();
    restarted.new_session(SessionInfo::default()).await.unwrap();
    let events = drain(&mut rx);
    assert_eq!(events[0], MetaEvent::DeleteChunk { chunkid, size: 10 });
    assert_eq!(events[1].tag(), crate::event::INFO);

    restarted.ack_chunk_deleted(chunkid, 10).await.unwrap();
    restarted.list_slices(&c, true).await.unwrap();
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_rmr_and_summary() {
    let meta = new_meta().await;
    let c = ctx();
    let mut rx = meta.subscribe();
    let (top, _) = meta.mkdir(&c, ROOT_INODE, "top", 0o755, 0, false).await.unwrap();
    let (sub, _) = meta.mkdir(&c, top, "sub", 0o755, 0, false).await.unwrap();
    let (f, _) = meta.create(&c, sub, "f", 0o644, 0, 0).await.unwrap();
    meta.write(&c, f, 0, 0, Slice::new(9, 5000, 0, 5000)).await.unwrap();
    meta.symlink(&c, top, "l", "sub/f").await.unwrap();

    let summary = meta.summary(&c, top).await.unwrap();
    assert_eq!(summary.dirs, 2);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.length, 5000 + 5);

    let removed = meta.rmr(&c, ROOT_INODE, "top").await.unwrap();
    assert_eq!(removed, 4);
    assert_eq!(meta.lookup(&c, ROOT_INODE, "top").await.unwrap_err().code(), MetaCode::NOT_FOUND);
    let events = drain(&mut rx);
    assert!(events.contains(&MetaEvent::Rmr {
        parent: ROOT_INODE,
        name: "top".to_string(),
        removed: 4
    }));
    assert_eq!(meta.getattr(&c, ROOT_INODE).await.unwrap().nlink, 2);
}

#[tokio::test]
async fn test_read_uses_cache_for_open_files() {
    let meta = new_meta().await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    meta.write(&c, f, 0, 0, Slice::new(3, 10, 0, 10)).await.unwrap();
    assert_eq!(meta.read(&c, f, 0).await.unwrap().len(), 1);
    assert_eq!(meta.chunk_cache.lock().len(), 1);
    meta.write(&c, f, 0, 10, Slice::new(4, 10, 0, 10)).await.unwrap();
    assert!(meta.chunk_cache.lock().is_empty());
    assert_eq!(meta.read(&c, f, 0).await.unwrap().len(), 2);

    meta.close(&c, f).await.unwrap();
    assert!(meta.chunk_cache.lock().is_empty());
    meta.read(&c, f, 0).await.unwrap();
    assert!(meta.chunk_cache.lock().is_empty());
}

#[tokio::test]
async fn test_fill_cache_publishes_every_chunk() {
    let meta = new_meta().await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    meta.write(&c, f, 0, 0, Slice::new(3, 10, 0, 10)).await.unwrap();
    meta.write(&c, f, 2, 0, Slice::new(4, 10, 0, 10)).await.unwrap();
    let mut rx = meta.subscribe();
    meta.fill_cache(&c, f).await.unwrap();
    let indices: Vec<u32> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            MetaEvent::FillCache { indx, .. } => Some(indx),
            _ => None,
        })
        .collect();
    assert_eq!(indices, vec![0, 2]);
}

#[tokio::test]
async fn test_dump_meta_into_fresh_engine() {
    let meta = new_meta().await;
    let c = ctx();
    let (d, _) = meta.mkdir(&c, ROOT_INODE, "d", 0o755, 0, false).await.unwrap();
    let (f, _) = meta.create(&c, d, "f", 0o644, 0, 0).await.unwrap();
    meta.write(&c, f, 0, 0, Slice::new(5, 64, 0, 64)).await.unwrap();

    let mut buf = Vec::new();
    meta.dump_meta(&mut buf, 0).await.unwrap();

    let restored = KvMeta::new("mem", MemDbEngine::new(), MetaConfig::default());
    restored.load_meta(&mut buf.as_slice()).await.unwrap();
    let (found, attr) = restored.resolve(&c, ROOT_INODE, "/d/f").await.unwrap();
    assert_eq!(found, f);
    assert_eq!(attr.length, 64);
    assert_eq!(restored.read(&c, f, 0).await.unwrap(), vec![Slice::new(5, 64, 0, 64)]);
    let (g, _) = restored.create(&c, d, "g", 0o644, 0, 0).await.unwrap();
    assert!(g > f);
}

#[tokio::test]
async fn test_background_heartbeat_refreshes_session() {
    let config = MetaConfig {
        heartbeat: Duration::from_millis(30),
        session_expire: Duration::from_secs(1),
        ..MetaConfig::default()
    };
    let engine = MemDbEngine::new();
    let meta = Arc::new(formatted(engine.clone(), config).await);
    let sid = meta.new_session(SessionInfo::default()).await.unwrap();

    let mut txn = engine.create_readwrite_transaction();
    SessionRecord::store_heartbeat(&mut txn, sid, 0).await.unwrap();
    txn.commit().await.unwrap();

    let runner = meta.clone().spawn_background();
    tokio::time::sleep(Duration::from_millis(150)).await;
    runner.shutdown().await;
    let session = meta.get_session(sid).await.unwrap();
    assert!(session.heartbeat > 0);
}

#[tokio::test]
async fn test_close_session_releases_locks() {
    let meta = new_meta().await;
    let c = ctx();
    let (f, _) = meta.create(&c, ROOT_INODE, "f", 0o644, 0, 0).await.unwrap();
    let sid = meta.new_session(SessionInfo::default()).await.unwrap();
    meta.flock(&c, f, 1, LockType::Write, false).await.unwrap();
    meta.close_session().await.unwrap();
    assert!(meta.session_id().is_none());
    assert_eq!(meta.get_session(sid).await.unwrap_err().code(), MetaCode::NO_SESSION);
    assert!(meta.list_sessions().await.unwrap().is_empty());
}
