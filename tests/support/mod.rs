//! Shared fixtures for the download integration tests.
//!
//! The fake mounter "mounts" by copying a fixture tree into the mount point,
//! so the real readiness polling, enumeration and copy loop run unchanged.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mountfetch_core::config::{EndpointConfig, MirrorSettings, Settings, SharedSettings};
use mountfetch_core::download::{
    DiskSpace, DownloadError, MountHandle, MountRequest, MountSource, Mounter, ProcessHandle,
};
use mountfetch_core::locator::DependencyLocator;
use mountfetch_core::queue::{QueueDbErrorKind, QueueRepository};
use mountfetch_core::{Database, DownloadOrchestrator, ItemUpdate, Queue, QueueError, TransferItem};
use tempfile::TempDir;

/// What a fake mount does for one source.
#[derive(Debug, Clone)]
pub enum MountBehavior {
    /// Expose a copy of this directory.
    Populate(PathBuf),
    /// Expose a copy of this directory, backed by a live `sleep` process
    /// standing in for the mount utility.
    PopulateWithProcess(PathBuf),
    /// Create the mount point but leave it empty.
    Empty,
    /// Never create the mount point; readiness times out.
    NeverReady,
    /// Fail to start.
    Fail,
}

/// [`Mounter`] that records every call.
pub struct FakeMounter {
    public: MountBehavior,
    mirror: MountBehavior,
    mounts: Mutex<Vec<String>>,
    processes: Mutex<Vec<ProcessHandle>>,
    teardowns: AtomicUsize,
}

impl FakeMounter {
    pub fn new(public: MountBehavior) -> Self {
        Self {
            public,
            mirror: MountBehavior::Fail,
            mounts: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
            teardowns: AtomicUsize::new(0),
        }
    }

    pub fn with_mirror(mut self, mirror: MountBehavior) -> Self {
        self.mirror = mirror;
        self
    }

    /// Source labels in mount order.
    pub fn mounts(&self) -> Vec<String> {
        self.mounts.lock().unwrap().clone()
    }

    /// The most recently spawned mount process.
    pub fn last_process(&self) -> Option<ProcessHandle> {
        self.processes.lock().unwrap().last().cloned()
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn mount(
        &self,
        _binary: &Path,
        request: &MountRequest,
    ) -> Result<MountHandle, DownloadError> {
        self.mounts
            .lock()
            .unwrap()
            .push(request.source.label().to_string());

        let behavior = match request.source {
            MountSource::Mirror { .. } => &self.mirror,
            MountSource::Public { .. } => &self.public,
        };
        match behavior {
            MountBehavior::Populate(fixture) => {
                copy_tree(fixture, &request.mount_point);
            }
            MountBehavior::PopulateWithProcess(fixture) => {
                copy_tree(fixture, &request.mount_point);
                let child = tokio::process::Command::new("sleep")
                    .arg("30")
                    .kill_on_drop(true)
                    .spawn()
                    .unwrap();
                let process = ProcessHandle::new(child);
                self.processes.lock().unwrap().push(process.clone());
                return Ok(MountHandle::with_process(process));
            }
            MountBehavior::Empty => {
                std::fs::create_dir_all(&request.mount_point).unwrap();
            }
            MountBehavior::NeverReady => {}
            MountBehavior::Fail => {
                return Err(DownloadError::MountFailed {
                    source_label: request.source.label().to_string(),
                    source: std::io::Error::other("remote refused the connection"),
                });
            }
        }
        Ok(MountHandle::default())
    }

    async fn teardown(&self, mount_point: &Path, handle: Option<&MountHandle>) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        if let Some(process) = handle.and_then(|h| h.process.as_ref()) {
            let _ = process.kill();
        }
        let _ = tokio::fs::remove_dir_all(mount_point).await;
    }
}

/// Queue wrapper that can slow reads down and fail writes with a lock error.
pub struct SlowQueue {
    inner: Arc<Queue>,
    read_delay_ms: AtomicU64,
    busy_writes: AtomicUsize,
}

impl SlowQueue {
    pub fn new(inner: Arc<Queue>) -> Self {
        Self {
            inner,
            read_delay_ms: AtomicU64::new(0),
            busy_writes: AtomicUsize::new(0),
        }
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// The next `count` writes fail as if another process held the lock.
    pub fn fail_next_writes(&self, count: usize) {
        self.busy_writes.store(count, Ordering::SeqCst);
    }

    /// Injected failures not yet consumed.
    pub fn pending_failures(&self) -> usize {
        self.busy_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueRepository for SlowQueue {
    async fn find_item(&self, key: &str) -> Result<Option<TransferItem>, QueueError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.find_item(key).await
    }

    async fn update_item(&self, key: &str, update: &ItemUpdate) -> Result<bool, QueueError> {
        let failed = self
            .busy_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(QueueError::Database {
                kind: QueueDbErrorKind::Busy,
                message: "database is locked".to_string(),
            });
        }
        self.inner.update_item(key, update).await
    }
}

/// Reports a fixed amount of free space.
pub struct FixedDiskSpace(pub u64);

impl DiskSpace for FixedDiskSpace {
    fn available_space(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.0)
    }
}

/// Resolves every binary to a fixed answer.
pub struct FakeLocator(pub Option<PathBuf>);

impl DependencyLocator for FakeLocator {
    fn locate(&self, _name: &str) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Deterministic, non-repeating-ish content for a fixture file.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).unwrap().wrapping_add(seed))
        .collect()
}

/// Writes `files` (relative path, size) under `root`.
pub fn write_fixture(root: &Path, files: &[(&str, usize)]) {
    for (index, (relative, size)) in files.iter().enumerate() {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, pattern(*size, u8::try_from(index).unwrap())).unwrap();
    }
}

pub fn copy_tree(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Polls until `path` holds at least `len` bytes.
pub async fn wait_for_len(path: &Path, len: u64, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if std::fs::metadata(path).is_ok_and(|m| m.len() >= len) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// An orchestrator over an in-memory queue and a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub fixture: PathBuf,
    pub queue: Arc<Queue>,
    pub settings: Arc<SharedSettings>,
    pub mounter: Arc<FakeMounter>,
    pub orchestrator: DownloadOrchestrator,
}

impl Harness {
    pub fn download_dir(&self, key: &str) -> PathBuf {
        self.dir.path().join("downloads").join(key)
    }

    pub fn mount_root(&self) -> PathBuf {
        self.dir.path().join("mounts")
    }

    /// A second orchestrator over `queue`, sharing this harness's settings
    /// and fakes.
    pub fn orchestrator_over(&self, queue: Arc<dyn QueueRepository>) -> DownloadOrchestrator {
        DownloadOrchestrator::new(queue, self.settings.clone(), self.settings.clone())
            .with_mounter(self.mounter.clone())
            .with_locator(Arc::new(FakeLocator(Some(PathBuf::from("/usr/bin/rclone")))))
            .with_disk_space(Arc::new(FixedDiskSpace(u64::MAX)))
    }
}

/// Settings pointing into `dir` with a complete endpoint and fast readiness.
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings {
        download_root: dir.join("downloads"),
        mount_root: dir.join("mounts"),
        endpoint: EndpointConfig {
            base_uri: Some("https://cdn.example.test/releases".to_string()),
            credential: Some("test-credential".to_string()),
        },
        ..Settings::default()
    };
    settings.mount.ready_attempts = 3;
    settings.mount.ready_interval_ms = 10;
    settings
}

/// Adds an enabled mirror whose config file exists.
pub fn with_mirror(settings: &mut Settings, dir: &Path) {
    let config_file = dir.join("rclone.conf");
    std::fs::write(&config_file, "[eu]\ntype = s3\n").unwrap();
    settings.mirror = Some(MirrorSettings {
        name: "eu-mirror".to_string(),
        remote_name: "eu".to_string(),
        config_file,
        enabled: true,
    });
}

/// Builds a harness. `build_mounter` receives the fixture directory;
/// `configure` may adjust the settings before they are shared.
pub async fn harness(
    files: &[(&str, usize)],
    build_mounter: impl FnOnce(&Path) -> FakeMounter,
    configure: impl FnOnce(&mut Settings, &Path),
) -> Harness {
    let dir = TempDir::new().unwrap();
    let fixture = dir.path().join("fixture");
    std::fs::create_dir_all(&fixture).unwrap();
    write_fixture(&fixture, files);

    let mut settings = test_settings(dir.path());
    configure(&mut settings, dir.path());
    let settings = Arc::new(SharedSettings::new(settings));

    let queue = Arc::new(Queue::new(Database::new_in_memory().await.unwrap()));
    let mounter = Arc::new(build_mounter(&fixture));
    let orchestrator = DownloadOrchestrator::new(queue.clone(), settings.clone(), settings.clone())
        .with_mounter(mounter.clone())
        .with_locator(Arc::new(FakeLocator(Some(PathBuf::from("/usr/bin/rclone")))))
        .with_disk_space(Arc::new(FixedDiskSpace(u64::MAX)));

    Harness {
        dir,
        fixture,
        queue,
        settings,
        mounter,
        orchestrator,
    }
}

/// Asserts every fixture file landed byte-identical under `dest`.
pub fn assert_tree_matches(fixture: &Path, dest: &Path) {
    for entry in walkdir::WalkDir::new(fixture) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(fixture).unwrap();
        let expected = std::fs::read(entry.path()).unwrap();
        let actual = std::fs::read(dest.join(relative))
            .unwrap_or_else(|e| panic!("missing {}: {e}", relative.display()));
        assert_eq!(actual, expected, "content differs for {}", relative.display());
    }
}
