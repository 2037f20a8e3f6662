//! Reconciliation cycles: uploads, removals, replacements and renames

use std::collections::BTreeMap;
use std::time::Duration;

use autocloud_sync::normalizer::RawFsEvent;
use autocloud_sync::orchestrator::SyncOptions;
use tokio_util::sync::CancellationToken;

use crate::common::{self, DeniableFileSystem, MemoryRemote, Workspace};

fn files(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
    entries
        .iter()
        .map(|(path, size)| (path.to_string(), *size))
        .collect()
}

// ============================================================================
// Uploads and removals
// ============================================================================

#[tokio::test]
async fn test_first_cycle_uploads_then_second_cycle_is_idle() {
    let ws = Workspace::new();
    ws.write("f.txt", 100);
    let remote = MemoryRemote::new();
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;

    orchestrator.initialize().await.unwrap();
    remote.clear_calls();

    let first = orchestrator.run_cycle().await;
    assert!(first.connected);
    assert_eq!(first.uploaded, 1);
    assert_eq!(first.removed, 0);
    assert!(first.is_clean(), "unexpected report: {first:?}");

    assert_eq!(
        remote.files().get("/AutoCloud/Docs/f.txt").copied(),
        Some(100)
    );
    let mirror = orchestrator.mirror();
    assert_eq!(common::size_in(&mirror, "/Docs/f.txt"), Some(100));
    assert_eq!(ws.cache().load().await, Some(mirror));
    assert!(!orchestrator.connection().is_connected());

    remote.clear_calls();
    let second = orchestrator.run_cycle().await;
    assert!(!second.connected);
    assert_eq!(second.operations(), 0);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_new_folder_uploaded_recursively() {
    let ws = Workspace::new();
    ws.write("a.txt", 1);
    let remote = MemoryRemote::new();
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;
    orchestrator.initialize().await.unwrap();
    orchestrator.run_cycle().await;

    ws.write("album/one.jpg", 10);
    ws.write("album/nested/two.jpg", 20);
    std::fs::create_dir_all(ws.folder.join("album/empty")).unwrap();

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.uploaded, 2);
    assert!(report.is_clean(), "unexpected report: {report:?}");
    let files = remote.files();
    assert_eq!(files.get("/AutoCloud/Docs/album/one.jpg"), Some(&10));
    assert_eq!(files.get("/AutoCloud/Docs/album/nested/two.jpg"), Some(&20));
    assert!(remote.is_dir("/AutoCloud/Docs/album/empty"));
    assert!(orchestrator.mirror().contains("/Docs/album/empty"));
}

#[tokio::test]
async fn test_extra_remote_entries_removed() {
    let ws = Workspace::new();
    ws.write("keep.txt", 4);
    let remote = MemoryRemote::new();
    remote.insert_file("/AutoCloud/Docs/old.txt", 3);
    remote.insert_file("/AutoCloud/Docs/olddir/inner.txt", 3);
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;
    orchestrator.initialize().await.unwrap();

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.removed, 2);
    assert_eq!(report.uploaded, 1);
    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(
        remote.files().keys().cloned().collect::<Vec<_>>(),
        vec!["/AutoCloud/Docs/keep.txt".to_string()]
    );
    assert_eq!(remote.calls_of("delete"), vec!["delete /AutoCloud/Docs/old.txt"]);
    assert_eq!(
        remote.calls_of("rmdir"),
        vec!["rmdir /AutoCloud/Docs/olddir true"]
    );
}

#[tokio::test]
async fn test_size_change_reuploads_file() {
    let ws = Workspace::new();
    ws.write("f.txt", 10);
    let remote = MemoryRemote::new();
    remote.insert_file("/AutoCloud/Docs/f.txt", 99);
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;
    orchestrator.initialize().await.unwrap();

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(remote.files().get("/AutoCloud/Docs/f.txt"), Some(&10));
    assert_eq!(common::size_in(&orchestrator.mirror(), "/Docs/f.txt"), Some(10));
}

#[tokio::test]
async fn test_kind_mismatch_removes_before_upload() {
    let ws = Workspace::new();
    ws.write("thing/inner.txt", 5);
    let remote = MemoryRemote::new();
    remote.insert_file("/AutoCloud/Docs/thing", 3);
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;
    orchestrator.initialize().await.unwrap();
    remote.clear_calls();

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.removed, 1);
    assert_eq!(report.uploaded, 1);
    assert!(report.is_clean(), "unexpected report: {report:?}");

    let calls = remote.calls();
    let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
    assert!(position("delete /AutoCloud/Docs/thing") < position("mkdir /AutoCloud/Docs/thing true"));
    assert!(
        position("mkdir /AutoCloud/Docs/thing true")
            < position("put /AutoCloud/Docs/thing/inner.txt")
    );
    assert_eq!(
        remote.files().get("/AutoCloud/Docs/thing/inner.txt"),
        Some(&5)
    );
}

#[tokio::test]
async fn test_depth_limited_folder_created_without_contents() {
    let ws = Workspace::new();
    ws.write("a/mid.txt", 1);
    ws.write("a/b/deep.txt", 1);
    let remote = MemoryRemote::new();
    let options = SyncOptions {
        max_depth: 1,
        ..common::options()
    };
    let mut orchestrator = common::orchestrator(&ws, &remote, options).await;
    orchestrator.initialize().await.unwrap();

    let report = orchestrator.run_cycle().await;

    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(report.uploaded, 1);
    assert!(remote.is_dir("/AutoCloud/Docs/a/b"));
    assert!(!remote.files().contains_key("/AutoCloud/Docs/a/b/deep.txt"));
}

#[tokio::test]
async fn test_two_folders_reconciled_in_one_cycle() {
    let ws = Workspace::new();
    let photos = ws.sibling("Photos");
    ws.write("a.txt", 1);
    ws.write("old.txt", 2);
    ws.write_in("Photos", "p1.jpg", 3);
    ws.write_in("Photos", "album/p2.jpg", 4);
    let remote = MemoryRemote::new();
    remote.insert_file("/AutoCloud/Docs/old.txt", 2);
    remote.insert_file("/AutoCloud/Docs/stale.txt", 5);
    remote.insert_file("/AutoCloud/Photos/gone/x.jpg", 6);
    let folders = [ws.folder.clone(), photos];
    let mut orchestrator = common::orchestrator_over(
        &ws,
        &remote,
        common::options(),
        &folders,
        DeniableFileSystem::new(),
    )
    .await;
    orchestrator.initialize().await.unwrap();

    let first = orchestrator.run_cycle().await;

    assert_eq!(first.uploaded, 3);
    assert_eq!(first.removed, 2);
    assert!(first.residual.is_empty());
    assert!(first.is_clean(), "unexpected report: {first:?}");
    assert_eq!(
        remote.files(),
        files(&[
            ("/AutoCloud/Docs/a.txt", 1),
            ("/AutoCloud/Docs/old.txt", 2),
            ("/AutoCloud/Photos/album/p2.jpg", 4),
            ("/AutoCloud/Photos/p1.jpg", 3),
        ])
    );
    assert!(!remote.is_dir("/AutoCloud/Photos/gone"));
    let mirror = orchestrator.mirror();
    assert_eq!(common::size_in(&mirror, "/Docs/a.txt"), Some(1));
    assert_eq!(common::size_in(&mirror, "/Photos/album/p2.jpg"), Some(4));
    assert!(!mirror.contains("/Docs/stale.txt"));
    assert_eq!(ws.cache().load().await, Some(mirror));

    std::fs::remove_file(ws.folder.join("old.txt")).unwrap();
    ws.write_in("Photos", "album/p3.jpg", 7);
    std::fs::remove_file(folders[1].join("p1.jpg")).unwrap();
    ws.write("notes/n.txt", 8);

    let second = orchestrator.run_cycle().await;

    assert_eq!(second.uploaded, 2);
    assert_eq!(second.removed, 2);
    assert!(second.is_clean(), "unexpected report: {second:?}");
    assert_eq!(
        remote.files(),
        files(&[
            ("/AutoCloud/Docs/a.txt", 1),
            ("/AutoCloud/Docs/notes/n.txt", 8),
            ("/AutoCloud/Photos/album/p2.jpg", 4),
            ("/AutoCloud/Photos/album/p3.jpg", 7),
        ])
    );
    assert_eq!(ws.cache().load().await, Some(orchestrator.mirror()));
}

#[tokio::test]
async fn test_unreadable_subfolder_keeps_remote_copy() {
    let ws = Workspace::new();
    ws.write("keep/a.txt", 1);
    ws.write("keep/b.txt", 2);
    ws.write("top.txt", 3);
    let fs = DeniableFileSystem::new();
    let remote = MemoryRemote::new();
    let folders = [ws.folder.clone()];
    let mut orchestrator =
        common::orchestrator_over(&ws, &remote, common::options(), &folders, fs.clone()).await;
    orchestrator.initialize().await.unwrap();
    let first = orchestrator.run_cycle().await;
    assert_eq!(first.uploaded, 3);
    assert!(first.is_clean(), "unexpected report: {first:?}");

    let locked = ws.folder.join("keep");
    fs.deny_listing(&locked);
    ws.write("later.txt", 4);
    let denied = orchestrator.run_cycle().await;

    assert_eq!(denied.removed, 0);
    assert_eq!(denied.uploaded, 1);
    assert_eq!(denied.errors.len(), 1);
    assert!(denied.errors[0].contains("keep"), "{:?}", denied.errors);
    assert!(remote.calls_of("delete").is_empty());
    assert!(remote.calls_of("rmdir").is_empty());
    assert_eq!(remote.files().get("/AutoCloud/Docs/keep/a.txt"), Some(&1));
    assert_eq!(remote.files().get("/AutoCloud/Docs/keep/b.txt"), Some(&2));
    assert!(orchestrator.mirror().contains("/Docs/keep/b.txt"));

    fs.allow(&locked);
    let healed = orchestrator.run_cycle().await;
    assert_eq!(healed.operations(), 0);
    assert!(healed.is_clean(), "unexpected report: {healed:?}");
}

// ============================================================================
// Local event driven cycles
// ============================================================================

#[tokio::test]
async fn test_local_rename_becomes_remote_rename() {
    let ws = Workspace::new();
    ws.write("a.txt", 4);
    let remote = MemoryRemote::new();
    let (mut orchestrator, tx) = common::watched_orchestrator(&ws, &remote, common::options()).await;
    orchestrator.initialize().await.unwrap();
    assert_eq!(orchestrator.run_cycle().await.uploaded, 1);

    std::fs::rename(ws.folder.join("a.txt"), ws.folder.join("b.txt")).unwrap();
    tx.send(RawFsEvent::NameChanged {
        path: ws.folder.join("a.txt"),
        exists: false,
    })
    .await
    .unwrap();
    tx.send(RawFsEvent::NameChanged {
        path: ws.folder.join("b.txt"),
        exists: true,
    })
    .await
    .unwrap();
    remote.clear_calls();

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.renamed, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.removed, 0);
    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(
        remote.calls_of("rename"),
        vec!["rename /AutoCloud/Docs/a.txt /AutoCloud/Docs/b.txt"]
    );
    assert!(remote.calls_of("put").is_empty());
    assert_eq!(remote.files().get("/AutoCloud/Docs/b.txt"), Some(&4));
    assert_eq!(common::size_in(&orchestrator.mirror(), "/Docs/a.txt"), None);
}

#[tokio::test]
async fn test_rename_survives_failed_refresh() {
    let ws = Workspace::new();
    ws.write("a.txt", 4);
    let fs = DeniableFileSystem::new();
    let remote = MemoryRemote::new();
    let (mut orchestrator, tx) =
        common::watched_orchestrator_over(&ws, &remote, common::options(), fs.clone()).await;
    orchestrator.initialize().await.unwrap();
    assert_eq!(orchestrator.run_cycle().await.uploaded, 1);

    std::fs::rename(ws.folder.join("a.txt"), ws.folder.join("b.txt")).unwrap();
    tx.send(RawFsEvent::NameChanged {
        path: ws.folder.join("a.txt"),
        exists: false,
    })
    .await
    .unwrap();
    tx.send(RawFsEvent::NameChanged {
        path: ws.folder.join("b.txt"),
        exists: true,
    })
    .await
    .unwrap();
    tx.send(RawFsEvent::Rescan(ws.folder.clone())).await.unwrap();
    fs.deny_stat(&ws.folder);
    remote.clear_calls();

    let failed = orchestrator.run_cycle().await;

    assert_eq!(failed.operations(), 0);
    assert_eq!(failed.errors.len(), 1);
    assert!(failed.errors[0].starts_with("refresh"), "{:?}", failed.errors);
    assert!(remote.calls_of("put").is_empty());

    fs.allow(&ws.folder);
    let report = orchestrator.run_cycle().await;

    assert_eq!(report.renamed, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.removed, 0);
    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(
        remote.calls_of("rename"),
        vec!["rename /AutoCloud/Docs/a.txt /AutoCloud/Docs/b.txt"]
    );
    assert_eq!(
        remote.files(),
        files(&[("/AutoCloud/Docs/b.txt", 4)])
    );
}

#[tokio::test]
async fn test_vanished_source_is_skipped_and_reported() {
    let ws = Workspace::new();
    let remote = MemoryRemote::new();
    let options = SyncOptions {
        connect_timeout: Some(Duration::from_millis(200)),
        ..common::options()
    };
    let (mut orchestrator, tx) = common::watched_orchestrator(&ws, &remote, options).await;
    orchestrator.initialize().await.unwrap();

    let path = ws.write("brief.txt", 7);
    tx.send(RawFsEvent::ContentChanged(path.clone())).await.unwrap();
    remote.set_offline(true);
    assert!(!orchestrator.run_cycle().await.connected);

    // Deleted without an event: the index still lists the file.
    std::fs::remove_file(&path).unwrap();
    remote.set_offline(false);
    let report = orchestrator.run_cycle().await;

    assert!(report.connected);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.residual.len(), 1);
    assert_eq!(report.residual[0].missing_paths, vec!["/Docs/brief.txt"]);
    assert!(!remote.files().contains_key("/AutoCloud/Docs/brief.txt"));
}

#[tokio::test]
async fn test_unreachable_remote_aborts_cycle_and_recovers() {
    let ws = Workspace::new();
    ws.write("f.txt", 9);
    let remote = MemoryRemote::new();
    let options = SyncOptions {
        connect_timeout: Some(Duration::from_millis(200)),
        ..common::options()
    };
    let mut orchestrator = common::orchestrator(&ws, &remote, options).await;
    orchestrator.initialize().await.unwrap();

    remote.set_offline(true);
    let aborted = orchestrator.run_cycle().await;

    assert!(!aborted.connected);
    assert_eq!(aborted.uploaded, 0);
    assert_eq!(aborted.errors.len(), 1);
    assert!(remote.calls_of("connect").len() > 1);
    assert!(!orchestrator.mirror().contains("/Docs/f.txt"));

    remote.set_offline(false);
    let recovered = orchestrator.run_cycle().await;
    assert_eq!(recovered.uploaded, 1);
    assert!(recovered.is_clean(), "unexpected report: {recovered:?}");
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let ws = Workspace::new();
    ws.write("f.txt", 2);
    let remote = MemoryRemote::new();
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), orchestrator.run(shutdown))
        .await
        .expect("run loop stops after cancellation");

    assert!(orchestrator.is_initialized());
    assert_eq!(remote.files().get("/AutoCloud/Docs/f.txt"), Some(&2));
    assert!(!orchestrator.connection().is_connected());
}
