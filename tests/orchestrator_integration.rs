//! Integration tests for the download orchestrator.
//!
//! A fake mounter exposes fixture trees at the mount point; everything else
//! (queue, registry, readiness polling, copy loop) is real.

mod support;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mountfetch_core::config::MirrorDescriptor;
use mountfetch_core::{ItemUpdate, TransferStatus};
use support::{
    FakeLocator, FakeMounter, FixedDiskSpace, MountBehavior, SlowQueue, assert_tree_matches,
    harness, wait_for_len, with_mirror,
};

const GIB: u64 = 1024 * 1024 * 1024;

fn populate(fixture: &std::path::Path) -> FakeMounter {
    FakeMounter::new(MountBehavior::Populate(fixture.to_path_buf()))
}

// ==================== Completion ====================

#[tokio::test]
async fn test_start_download_completes_and_signals_extraction() {
    let h = harness(
        &[("data.pak", 4096), ("maps/level1.bin", 1500), ("maps/level2.bin", 700)],
        populate,
        |_, _| {},
    )
    .await;
    h.queue.insert_item("Game-A", Some("6 KB"), None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.start_extraction);
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Completed);
    assert_eq!(item.progress, 100);
    assert!(item.error.is_none());
    assert_eq!(item.pid, None);
    assert_eq!(
        item.destination.as_deref(),
        Some(h.download_dir("Game-A").display().to_string().as_str())
    );

    assert_tree_matches(&h.fixture, &h.download_dir("Game-A"));
    assert_eq!(h.mounter.mounts(), vec!["public"]);
    assert_eq!(h.mounter.teardowns(), 1);
    assert!(!h.orchestrator.is_download_active("Game-A"));
}

#[tokio::test]
async fn test_explicit_destination_is_used() {
    let h = harness(&[("a.bin", 512)], populate, |_, _| {}).await;
    let dest = h.dir.path().join("library").join("custom");
    h.queue
        .insert_item("Game-A", None, Some(&dest.display().to_string()))
        .await
        .unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(result.success);
    assert_tree_matches(&h.fixture, &dest);
    assert!(!h.download_dir("Game-A").exists());
}

#[tokio::test]
async fn test_retry_resumes_from_partial_files() {
    let h = harness(&[("big.bin", 1000), ("small.bin", 200)], populate, |_, _| {}).await;
    h.queue.insert_item("Game-B", None, None).await.unwrap();

    let dest = h.download_dir("Game-B");
    std::fs::create_dir_all(&dest).unwrap();
    let source = std::fs::read(h.fixture.join("big.bin")).unwrap();
    std::fs::write(dest.join("big.bin"), &source[..500]).unwrap();

    let result = h.orchestrator.start_download("Game-B").await;

    assert!(result.success);
    assert_tree_matches(&h.fixture, &dest);
    assert_eq!(std::fs::metadata(dest.join("big.bin")).unwrap().len(), 1000);
}

// ==================== Preflight ====================

#[tokio::test]
async fn test_insufficient_disk_space_rejects_without_mounting() {
    let mut h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;
    h.orchestrator = h
        .orchestrator
        .clone()
        .with_disk_space(Arc::new(FixedDiskSpace(GIB)));
    h.queue.insert_item("Game-A", Some("2 GB"), None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(!result.success);
    assert!(!result.start_extraction);
    let error = result.error.unwrap();
    assert!(error.contains("Insufficient disk space"), "{error}");
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Error);
    assert!(item.error.unwrap().contains("Insufficient disk space"));
    assert!(h.mounter.mounts().is_empty());
    assert!(!h.orchestrator.is_download_active("Game-A"));
}

#[tokio::test]
async fn test_unknown_size_skips_disk_check() {
    let mut h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;
    h.orchestrator = h
        .orchestrator
        .clone()
        .with_disk_space(Arc::new(FixedDiskSpace(0)));
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(result.success);
}

#[tokio::test]
async fn test_missing_endpoint_is_config_error() {
    let h = harness(&[("a.bin", 16)], populate, |settings, _| {
        settings.endpoint.base_uri = None;
    })
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("endpoint.base_uri"));
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Error);
    assert!(h.mounter.mounts().is_empty());
}

#[tokio::test]
async fn test_blank_credential_is_config_error() {
    let h = harness(&[("a.bin", 16)], populate, |settings, _| {
        settings.endpoint.credential = Some("   ".to_string());
    })
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(result.error.unwrap().contains("endpoint.credential"));
}

#[tokio::test]
async fn test_missing_mount_utility_is_dependency_error() {
    let mut h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;
    h.orchestrator = h
        .orchestrator
        .clone()
        .with_locator(Arc::new(FakeLocator(None)));
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("Required dependency not found: rclone"));
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Error);
    assert!(h.mounter.mounts().is_empty());
}

#[tokio::test]
async fn test_unknown_key_fails_without_side_effects() {
    let h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;

    let result = h.orchestrator.start_download("Nope").await;

    assert!(!result.success);
    assert!(result.item.is_none());
    assert!(result.error.unwrap().contains("not found"));
    assert!(h.mounter.mounts().is_empty());
}

#[tokio::test]
async fn test_second_start_while_active_fails_fast() {
    let h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let held = h.orchestrator.active_downloads().register("Game-A").unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("already active"));
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Queued);
    assert!(h.mounter.mounts().is_empty());

    drop(held);
    assert!(!h.orchestrator.is_download_active("Game-A"));
}

// ==================== Mount failures ====================

#[tokio::test]
async fn test_mount_timeout_tears_down_once() {
    let h = harness(
        &[("a.bin", 16)],
        |_| FakeMounter::new(MountBehavior::NeverReady),
        |_, _| {},
    )
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("did not become ready"));
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Error);
    assert_eq!(h.mounter.teardowns(), 1);
    assert!(!h.orchestrator.is_download_active("Game-A"));
}

#[tokio::test]
async fn test_empty_mount_is_an_error() {
    let h = harness(
        &[("a.bin", 16)],
        |_| FakeMounter::new(MountBehavior::Empty),
        |_, _| {},
    )
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(result.error.unwrap().contains("is empty"));
    assert_eq!(h.mounter.teardowns(), 1);
    let leftovers = std::fs::read_dir(h.mount_root())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_mirror_failure_falls_back_to_public() {
    let h = harness(
        &[("a.bin", 2048), ("b.bin", 100)],
        |fixture| populate(fixture).with_mirror(MountBehavior::Fail),
        with_mirror,
    )
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.start_extraction);
    assert_eq!(h.mounter.mounts(), vec!["eu-mirror", "public"]);
    assert_eq!(h.mounter.teardowns(), 2);
    assert_tree_matches(&h.fixture, &h.download_dir("Game-A"));
}

#[tokio::test]
async fn test_mirror_success_skips_public() {
    let h = harness(
        &[("a.bin", 64)],
        |fixture| {
            FakeMounter::new(MountBehavior::Fail)
                .with_mirror(MountBehavior::Populate(fixture.to_path_buf()))
        },
        with_mirror,
    )
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(result.success);
    assert_eq!(h.mounter.mounts(), vec!["eu-mirror"]);
}

#[tokio::test]
async fn test_disabled_mirror_is_not_tried() {
    let h = harness(
        &[("a.bin", 64)],
        |fixture| populate(fixture).with_mirror(MountBehavior::Fail),
        |settings, dir| {
            with_mirror(settings, dir);
            if let Some(mirror) = settings.mirror.as_mut() {
                mirror.enabled = false;
            }
        },
    )
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(result.success);
    assert_eq!(h.mounter.mounts(), vec!["public"]);
}

#[tokio::test]
async fn test_mount_based_download_with_explicit_mirror() {
    let h = harness(
        &[("a.bin", 64)],
        |fixture| {
            FakeMounter::new(MountBehavior::NeverReady)
                .with_mirror(MountBehavior::Populate(fixture.to_path_buf()))
        },
        |_, _| {},
    )
    .await;
    h.queue.insert_item("Game-A", Some("1 TB"), None).await.unwrap();
    let mirror = MirrorDescriptor {
        name: "lan-cache".to_string(),
        config_file: PathBuf::from("/etc/rclone/lan.conf"),
        remote_name: "lan".to_string(),
    };

    let result = h
        .orchestrator
        .start_mount_based_download("Game-A", Some(mirror))
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(h.mounter.mounts(), vec!["lan-cache"]);
}

// ==================== Cancel / pause / resume ====================

#[tokio::test]
async fn test_cancel_after_two_of_five_files() {
    let files = [
        ("file_1.bin", 1024),
        ("file_2.bin", 1024),
        ("file_3.bin", 1024),
        ("file_4.bin", 1024),
        ("file_5.bin", 1024),
    ];
    // 1 KB/s: each 1 KiB file holds the copy loop for about a second.
    let h = harness(&files, populate, |settings, _| settings.speed_limit_kbps = 1).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let dest = h.download_dir("Game-A");

    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.start_download("Game-A").await });

    assert!(wait_for_len(&dest.join("file_2.bin"), 1024, Duration::from_secs(10)).await);
    let cancel = h
        .orchestrator
        .cancel_download("Game-A", TransferStatus::Cancelled)
        .await;
    assert!(cancel.success);

    let result = task.await.unwrap();
    assert!(!result.success);
    assert!(!result.start_extraction);

    assert_eq!(std::fs::metadata(dest.join("file_1.bin")).unwrap().len(), 1024);
    assert_eq!(std::fs::metadata(dest.join("file_2.bin")).unwrap().len(), 1024);
    assert!(!dest.join("file_4.bin").exists());
    assert!(!dest.join("file_5.bin").exists());

    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Cancelled);
    assert_eq!(item.progress, 0);
    assert!(item.error.is_none());
    assert!(h.orchestrator.active_downloads().is_empty());
    assert_eq!(h.mounter.teardowns(), 1);
}

#[tokio::test]
async fn test_double_cancel_is_idempotent() {
    let h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let first = h
        .orchestrator
        .cancel_download("Game-A", TransferStatus::Cancelled)
        .await;
    let second = h
        .orchestrator
        .cancel_download("Game-A", TransferStatus::Cancelled)
        .await;

    assert!(first.success);
    assert!(second.success);
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Cancelled);
    assert!(h.orchestrator.active_downloads().is_empty());
}

#[tokio::test]
async fn test_error_status_is_sticky() {
    let h = harness(&[("a.bin", 16)], populate, |settings, _| {
        settings.endpoint = mountfetch_core::config::EndpointConfig::default();
    })
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    h.orchestrator.start_download("Game-A").await;

    h.orchestrator
        .cancel_download("Game-A", TransferStatus::Cancelled)
        .await;
    h.orchestrator.pause_download("Game-A").await;

    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Error);
    assert!(item.error.unwrap().contains("endpoint.base_uri"));
}

#[tokio::test]
async fn test_cancel_with_error_status_sets_generic_message() {
    let h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h
        .orchestrator
        .cancel_download("Game-A", TransferStatus::Error)
        .await;

    assert!(result.success);
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Error);
    assert_eq!(item.error.as_deref(), Some("Download stopped"));
}

#[tokio::test]
async fn test_resume_requires_paused_item() {
    let h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();

    let result = h.orchestrator.resume_download("Game-A").await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("Only paused items"));
    assert!(h.mounter.mounts().is_empty());
    assert!(!h.orchestrator.is_download_active("Game-A"));
}

#[tokio::test]
async fn test_pause_then_resume_completes() {
    let files = [
        ("part_1.bin", 1024),
        ("part_2.bin", 1024),
        ("part_3.bin", 1024),
        ("part_4.bin", 1024),
    ];
    let h = harness(&files, populate, |settings, _| settings.speed_limit_kbps = 1).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let dest = h.download_dir("Game-A");

    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.start_download("Game-A").await });
    assert!(wait_for_len(&dest.join("part_1.bin"), 1024, Duration::from_secs(10)).await);

    let paused = h.orchestrator.pause_download("Game-A").await;
    assert!(paused.success);
    let stopped = task.await.unwrap();
    assert!(!stopped.start_extraction);

    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Paused);
    assert!(!dest.join("part_4.bin").exists());

    h.settings.set_speed_limit_kbps(0);
    let resumed = h.orchestrator.resume_download("Game-A").await;

    assert!(resumed.success, "error: {:?}", resumed.error);
    assert!(resumed.start_extraction);
    assert_tree_matches(&h.fixture, &dest);
    assert_eq!(h.mounter.mounts(), vec!["public", "public"]);
}

#[tokio::test]
async fn test_external_status_change_stops_attempt() {
    let files = [("a.bin", 1024), ("b.bin", 1024), ("c.bin", 1024)];
    let h = harness(&files, populate, |settings, _| settings.speed_limit_kbps = 1).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let dest = h.download_dir("Game-A");

    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.start_download("Game-A").await });
    assert!(wait_for_len(&dest.join("a.bin"), 1024, Duration::from_secs(10)).await);

    // Another component moves the item out of `downloading` directly.
    h.queue
        .update_item("Game-A", &ItemUpdate::status(TransferStatus::Paused))
        .await
        .unwrap();

    let result = task.await.unwrap();
    assert!(!result.start_extraction);
    assert!(!dest.join("c.bin").exists());
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Paused);
    assert!(h.orchestrator.active_downloads().is_empty());
}

#[tokio::test]
async fn test_pause_wins_over_attempt_stopping_first() {
    let files = [
        ("part_1.bin", 1024),
        ("part_2.bin", 1024),
        ("part_3.bin", 1024),
        ("part_4.bin", 1024),
    ];
    let h = harness(&files, populate, |settings, _| settings.speed_limit_kbps = 1).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let dest = h.download_dir("Game-A");
    let slow = Arc::new(SlowQueue::new(h.queue.clone()));
    let orchestrator = h.orchestrator_over(slow.clone());

    let runner = orchestrator.clone();
    let task = tokio::spawn(async move { runner.start_download("Game-A").await });
    assert!(wait_for_len(&dest.join("part_1.bin"), 1024, Duration::from_secs(10)).await);

    // The pause's own read is slow, so a stopping attempt would have plenty
    // of time to write a status of its own.
    slow.set_read_delay(Duration::from_millis(300));
    let paused = orchestrator.pause_download("Game-A").await;
    let stopped = task.await.unwrap();
    slow.set_read_delay(Duration::ZERO);

    assert!(paused.success, "error: {:?}", paused.error);
    assert!(!stopped.start_extraction);
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Paused);
    assert!(item.error.is_none());
    assert!(!dest.join("part_4.bin").exists());

    h.settings.set_speed_limit_kbps(0);
    let resumed = orchestrator.resume_download("Game-A").await;
    assert!(resumed.success, "error: {:?}", resumed.error);
    assert_tree_matches(&h.fixture, &dest);
}

#[tokio::test]
async fn test_cancel_of_errored_item_stays_error_during_attempt() {
    let files = [("a.bin", 1024), ("b.bin", 1024), ("c.bin", 1024)];
    let h = harness(&files, populate, |settings, _| settings.speed_limit_kbps = 1).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let dest = h.download_dir("Game-A");

    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.start_download("Game-A").await });
    assert!(wait_for_len(&dest.join("a.bin"), 1024, Duration::from_secs(10)).await);

    h.orchestrator
        .cancel_download("Game-A", TransferStatus::Error)
        .await;
    h.orchestrator
        .cancel_download("Game-A", TransferStatus::Cancelled)
        .await;
    task.await.unwrap();

    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Error);
    assert_eq!(item.error.as_deref(), Some("Download stopped"));
}

#[tokio::test]
async fn test_status_write_retries_when_database_is_locked() {
    let h = harness(&[("a.bin", 16)], populate, |_, _| {}).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let slow = Arc::new(SlowQueue::new(h.queue.clone()));
    let orchestrator = h.orchestrator_over(slow.clone());

    slow.fail_next_writes(2);
    let cancelled = orchestrator
        .cancel_download("Game-A", TransferStatus::Cancelled)
        .await;

    assert!(cancelled.success, "error: {:?}", cancelled.error);
    assert_eq!(slow.pending_failures(), 0);
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Cancelled);

    // A lock that never clears is reported instead of retried forever.
    slow.fail_next_writes(10);
    let failed = orchestrator
        .cancel_download("Game-A", TransferStatus::Error)
        .await;
    assert!(!failed.success);
    assert!(failed.error.unwrap().contains("database is locked"));
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Cancelled);
}

// ==================== Mount Session Failures ====================

#[tokio::test]
async fn test_transfer_io_error_marks_error_and_tears_down() {
    let h = harness(&[("a.bin", 1024), ("b.bin", 1024)], populate, |_, _| {}).await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let dest = h.download_dir("Game-A");
    // A directory where b.bin must be written makes the copy fail mid-transfer.
    std::fs::create_dir_all(dest.join("b.bin").join("occupied")).unwrap();

    let result = h.orchestrator.start_download("Game-A").await;

    assert!(!result.success);
    assert!(!result.start_extraction);
    assert!(result.error.unwrap().contains("b.bin"));
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Error);
    assert!(item.error.unwrap().starts_with("IO error transferring"));
    assert_eq!(item.pid, None);
    assert_eq!(std::fs::metadata(dest.join("a.bin")).unwrap().len(), 1024);
    assert_eq!(h.mounter.teardowns(), 1);
    assert!(h.orchestrator.active_downloads().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminated_mount_process_ends_cancelled() {
    let files = [("a.bin", 1024), ("b.bin", 1024), ("c.bin", 1024)];
    let h = harness(
        &files,
        |fixture| FakeMounter::new(MountBehavior::PopulateWithProcess(fixture.to_path_buf())),
        |settings, _| settings.speed_limit_kbps = 1,
    )
    .await;
    h.queue.insert_item("Game-A", None, None).await.unwrap();
    let dest = h.download_dir("Game-A");
    // Once the process is gone, reading c.bin fails like a dead mount would.
    std::fs::create_dir_all(dest.join("c.bin").join("occupied")).unwrap();

    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.start_download("Game-A").await });
    assert!(wait_for_len(&dest.join("a.bin"), 1024, Duration::from_secs(10)).await);

    let process = h.mounter.last_process().unwrap();
    let pid = process.pid().unwrap();
    let running = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(running.pid, Some(i64::from(pid)));
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let result = task.await.unwrap();

    assert!(!result.success);
    assert!(result.error.is_none(), "got {:?}", result.error);
    let item = h.queue.find_item("Game-A").await.unwrap().unwrap();
    assert_eq!(item.status(), TransferStatus::Cancelled);
    assert_eq!(item.progress, 0);
    assert!(item.error.is_none());
    assert!(process.exited_by_termination());
    assert_eq!(h.mounter.teardowns(), 1);
}
