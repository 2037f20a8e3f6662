//! Mirror initialization: cache fast path, remote listing and relisting

use autocloud_core::domain::IndexTree;
use autocloud_sync::orchestrator::SyncOptions;

use crate::common::{self, MemoryRemote, Workspace, REMOTE_ROOT};

#[tokio::test]
async fn test_cached_mirror_skips_remote_listing() {
    let ws = Workspace::new();
    ws.write("f.txt", 100);
    let mut cached = IndexTree::with_base_path(REMOTE_ROOT);
    cached.add_file("/AutoCloud/Docs/f.txt", 100);
    ws.cache().store(&cached).await.unwrap();

    let remote = MemoryRemote::new();
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;
    orchestrator.initialize().await.unwrap();

    assert!(remote.calls().is_empty());
    assert_eq!(orchestrator.mirror(), cached);

    let report = orchestrator.run_cycle().await;
    assert!(!report.connected);
    assert_eq!(report.operations(), 0);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_missing_cache_builds_mirror_from_listing() {
    let ws = Workspace::new();
    let remote = MemoryRemote::new();
    remote.insert_file("/AutoCloud/Docs/remote.txt", 8);
    remote.insert_dir("/AutoCloud/Other");
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;

    orchestrator.initialize().await.unwrap();

    let mirror = orchestrator.mirror();
    assert_eq!(common::size_in(&mirror, "/Docs/remote.txt"), Some(8));
    assert!(mirror.contains("/Other"));
    assert_eq!(remote.calls_of("connect").len(), 1);
    assert_eq!(remote.calls_of("disconnect").len(), 1);
    assert_eq!(ws.cache().load().await, Some(mirror));
}

#[tokio::test]
async fn test_cache_for_other_root_is_ignored() {
    let ws = Workspace::new();
    let mut foreign = IndexTree::with_base_path("/Elsewhere");
    foreign.add_file("/Elsewhere/Docs/stale.txt", 1);
    ws.cache().store(&foreign).await.unwrap();

    let remote = MemoryRemote::new();
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;
    orchestrator.initialize().await.unwrap();

    assert_eq!(remote.calls_of("connect").len(), 1);
    assert_eq!(orchestrator.mirror().base_path(), Some(REMOTE_ROOT));
    assert!(!orchestrator.mirror().contains("/Docs/stale.txt"));
}

#[tokio::test]
async fn test_corrupt_cache_falls_back_to_listing() {
    let ws = Workspace::new();
    std::fs::create_dir_all(&ws.cache_dir).unwrap();
    std::fs::write(ws.cache().path(), b"not json").unwrap();

    let remote = MemoryRemote::new();
    remote.insert_file("/AutoCloud/Docs/remote.txt", 8);
    let mut orchestrator = common::orchestrator(&ws, &remote, common::options()).await;
    orchestrator.initialize().await.unwrap();

    assert!(orchestrator.mirror().contains("/Docs/remote.txt"));
    assert!(ws.cache().load().await.is_some());
}

#[tokio::test]
async fn test_periodic_relist_corrects_stale_mirror() {
    let ws = Workspace::new();
    ws.write("f.txt", 5);
    let mut stale = IndexTree::with_base_path(REMOTE_ROOT);
    stale.add_file("/AutoCloud/Docs/f.txt", 5);
    ws.cache().store(&stale).await.unwrap();

    // The remote lost the file behind our back.
    let remote = MemoryRemote::new();
    let options = SyncOptions {
        remote_relist_cycles: 2,
        ..common::options()
    };
    let mut orchestrator = common::orchestrator(&ws, &remote, options).await;
    orchestrator.initialize().await.unwrap();

    let first = orchestrator.run_cycle().await;
    assert!(!first.connected);
    assert!(remote.files().is_empty());

    let second = orchestrator.run_cycle().await;
    assert!(second.connected);
    assert_eq!(second.uploaded, 1);
    assert!(second.is_clean(), "unexpected report: {second:?}");
    assert_eq!(remote.files().get("/AutoCloud/Docs/f.txt"), Some(&5));
}
