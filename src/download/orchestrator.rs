//! Download orchestrator: the public face of the download core.
//!
//! Each public operation runs to completion and reports a [`DownloadResult`];
//! failures are mapped onto the item through the queue collaborator instead
//! of being returned as errors.
//!
//! # Attempt pipeline
//!
//! 1. Claim the key in the [`ActiveDownloads`] registry (fails fast if taken)
//! 2. Preflight: endpoint config, mount utility, destination dir, disk space
//! 3. Mark the item `downloading`
//! 4. For each source (mirror first, then public): mount, wait for
//!    readiness, enumerate, copy with resume, tear the mount down
//! 5. Map the outcome to a terminal status
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mountfetch_core::config::{Settings, SharedSettings};
//! use mountfetch_core::download::DownloadOrchestrator;
//! use mountfetch_core::queue::Queue;
//! use mountfetch_core::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Arc::new(Queue::new(Database::new_in_memory().await?));
//! let settings = Arc::new(SharedSettings::new(Settings::default()));
//! let orchestrator = DownloadOrchestrator::new(queue, settings.clone(), settings);
//! let result = orchestrator.start_download("Game-A").await;
//! if result.start_extraction {
//!     println!("ready for extraction");
//! }
//! # Ok(())
//! # }
//! ```

mod status_mapping;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use self::status_mapping::{
    completion_update, failure_update, preflight_failure_update, stop_update, stopped_update,
};
use super::constants::{
    BUSY_RETRY_DELAY, BUSY_WRITE_ATTEMPTS, DISK_SPACE_FACTOR, PROGRESS_WRITE_INTERVAL,
    STOP_WRITE_ATTEMPTS,
};
use super::error::DownloadError;
use super::mount::{
    MountHandle, MountOptions, MountRequest, MountSource, Mounter, RcloneMounter, await_populated,
    await_ready, mount_point_for, sanitize_key,
};
use super::registry::{ActiveDownloads, Registration};
use super::size::{DiskSpace, SystemDiskSpace, parse_size};
use super::transfer::{TransferHooks, TransferOutcome, TransferProgress, enumerate, run_transfer};
use crate::config::{MirrorDescriptor, MirrorProvider, MountSettings, SettingsStore};
use crate::locator::{DependencyLocator, WhichLocator};
use crate::queue::{
    ChangeNotifier, ItemUpdate, NoopNotifier, QueueRepository, TransferItem, TransferStatus,
};

/// Outcome of a public orchestrator operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadResult {
    pub success: bool,
    /// Set when all files were copied and the extraction stage should run.
    pub start_extraction: bool,
    /// Item snapshot after the operation, if the item exists.
    pub item: Option<TransferItem>,
    /// Human-readable cause when `success` is false for a failure.
    pub error: Option<String>,
}

impl DownloadResult {
    fn ok(item: Option<TransferItem>) -> Self {
        Self {
            success: true,
            item,
            ..Self::default()
        }
    }

    fn failed(item: Option<TransferItem>, error: Option<String>) -> Self {
        Self {
            success: false,
            item,
            error,
            ..Self::default()
        }
    }
}

/// Everything preflight resolved for an attempt.
#[derive(Debug)]
struct Prepared {
    binary: PathBuf,
    dest_root: PathBuf,
    base_uri: String,
    credential: String,
}

/// Drives mount sessions and transfers for queue items.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    queue: Arc<dyn QueueRepository>,
    notifier: Arc<dyn ChangeNotifier>,
    settings: Arc<dyn SettingsStore>,
    mirrors: Arc<dyn MirrorProvider>,
    locator: Arc<dyn DependencyLocator>,
    mounter: Arc<dyn Mounter>,
    disk: Arc<dyn DiskSpace>,
    active: Arc<ActiveDownloads>,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    /// Creates an orchestrator that mounts with `rclone`, finds it on `PATH`
    /// and checks real free space.
    #[must_use]
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        settings: Arc<dyn SettingsStore>,
        mirrors: Arc<dyn MirrorProvider>,
    ) -> Self {
        Self {
            queue,
            notifier: Arc::new(NoopNotifier),
            settings,
            mirrors,
            locator: Arc::new(WhichLocator),
            mounter: Arc::new(RcloneMounter),
            disk: Arc::new(SystemDiskSpace),
            active: Arc::new(ActiveDownloads::new()),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_locator(mut self, locator: Arc<dyn DependencyLocator>) -> Self {
        self.locator = locator;
        self
    }

    #[must_use]
    pub fn with_mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounter = mounter;
        self
    }

    #[must_use]
    pub fn with_disk_space(mut self, disk: Arc<dyn DiskSpace>) -> Self {
        self.disk = disk;
        self
    }

    /// The registry shared by every operation on this orchestrator.
    #[must_use]
    pub fn active_downloads(&self) -> &Arc<ActiveDownloads> {
        &self.active
    }

    /// Whether an attempt currently holds `key`.
    #[must_use]
    pub fn is_download_active(&self, key: &str) -> bool {
        self.active.is_active(key)
    }

    /// Validates, preflights and runs a full attempt for `key`, trying the
    /// active mirror first and the public endpoint second.
    #[instrument(skip(self))]
    pub async fn start_download(&self, key: &str) -> DownloadResult {
        let (registration, item) = match self.claim(key).await {
            Ok(claimed) => claimed,
            Err(result) => return *result,
        };

        let prepared = match self.preflight(&item, true).await {
            Ok(prepared) => prepared,
            Err(error) => return self.reject(key, &error).await,
        };

        if !self.mark_downloading(key, &prepared, item.status(), false).await {
            return self.stopped_before_start(key).await;
        }

        let mirror = match self.mirrors.active_mirror() {
            Ok(mirror) => mirror,
            Err(error) => {
                warn!(key, error = %error, "mirror unavailable, using public endpoint");
                None
            }
        };
        info!(key, mirror = ?mirror.as_ref().map(|m| &m.name), "starting download");
        self.run_sources(key, &prepared, mirror, &registration).await
    }

    /// Runs one attempt against `mirror` (or the public endpoint when
    /// `None`), without the disk-space preflight.
    #[instrument(skip(self, mirror), fields(mirror = ?mirror.as_ref().map(|m| &m.name)))]
    pub async fn start_mount_based_download(
        &self,
        key: &str,
        mirror: Option<MirrorDescriptor>,
    ) -> DownloadResult {
        let (registration, item) = match self.claim(key).await {
            Ok(claimed) => claimed,
            Err(result) => return *result,
        };

        let prepared = match self.preflight(&item, false).await {
            Ok(prepared) => prepared,
            Err(error) => return self.reject(key, &error).await,
        };

        if item.status() != TransferStatus::Downloading
            && !self.mark_downloading(key, &prepared, item.status(), false).await
        {
            return self.stopped_before_start(key).await;
        }

        self.run_sources(key, &prepared, mirror, &registration).await
    }

    /// Resumes a paused item from the bytes already on disk.
    #[instrument(skip(self))]
    pub async fn resume_download(&self, key: &str) -> DownloadResult {
        let (registration, item) = match self.claim(key).await {
            Ok(claimed) => claimed,
            Err(result) => return *result,
        };

        if item.status() != TransferStatus::Paused {
            let message = format!("Only paused items can be resumed (status: {})", item.status());
            return DownloadResult::failed(Some(item), Some(message));
        }

        let prepared = match self.preflight(&item, false).await {
            Ok(prepared) => prepared,
            Err(error) => return self.reject(key, &error).await,
        };

        if !self
            .mark_downloading(key, &prepared, TransferStatus::Paused, true)
            .await
        {
            return self.stopped_before_start(key).await;
        }

        let mirror = self.mirrors.active_mirror().unwrap_or_else(|error| {
            warn!(key, error = %error, "mirror unavailable, using public endpoint");
            None
        });
        info!(key, progress = item.progress, "resuming download");
        self.run_sources(key, &prepared, mirror, &registration).await
    }

    /// Stops the attempt for `key` and writes `final_status`.
    ///
    /// `Cancelled` resets progress and clears the error; `Error` keeps or
    /// sets a message. An item already in `Error` is never downgraded.
    ///
    /// The status is written before the attempt's token is flipped, so the
    /// stopping attempt always observes the requested status and never
    /// writes its own.
    #[instrument(skip(self))]
    pub async fn cancel_download(&self, key: &str, final_status: TransferStatus) -> DownloadResult {
        let result = self.write_stop(key, final_status).await;
        let was_active = self.active.cancel(key);
        debug!(key, was_active, "stop requested");
        result
    }

    /// Writes the stop status guarded on the status it was computed from,
    /// re-reading when a concurrent writer got there first.
    async fn write_stop(&self, key: &str, final_status: TransferStatus) -> DownloadResult {
        for _ in 0..STOP_WRITE_ATTEMPTS {
            let item = match self.queue.find_item(key).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    return DownloadResult::failed(
                        None,
                        Some(DownloadError::ItemNotFound { key: key.to_string() }.to_string()),
                    );
                }
                Err(error) => return DownloadResult::failed(None, Some(error.to_string())),
            };

            let Some(update) = stop_update(item.status(), final_status, item.error.as_deref()) else {
                debug!(key, status = %item.status(), requested = %final_status, "status kept");
                return DownloadResult::ok(Some(item));
            };

            match self.write(key, &update.only_if(item.status())).await {
                Ok(true) => {
                    info!(key, status = %final_status, "download stopped");
                    return DownloadResult::ok(self.snapshot(key).await);
                }
                Ok(false) => debug!(key, status = %item.status(), "status moved, retrying stop"),
                Err(error) => return DownloadResult::failed(Some(item), Some(error.to_string())),
            }
        }
        warn!(key, requested = %final_status, "item kept changing, stop not recorded");
        DownloadResult::failed(self.snapshot(key).await, None)
    }

    /// Stops the attempt for `key` and keeps its progress for a later resume.
    pub async fn pause_download(&self, key: &str) -> DownloadResult {
        self.cancel_download(key, TransferStatus::Paused).await
    }

    /// Looks the item up and takes its registry slot.
    async fn claim(&self, key: &str) -> Result<(Registration, TransferItem), Box<DownloadResult>> {
        let item = match self.queue.find_item(key).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                let error = DownloadError::ItemNotFound { key: key.to_string() };
                return Err(Box::new(DownloadResult::failed(None, Some(error.to_string()))));
            }
            Err(error) => {
                return Err(Box::new(DownloadResult::failed(None, Some(error.to_string()))));
            }
        };

        match self.active.register(key) {
            Ok(registration) => Ok((registration, item)),
            Err(error) => {
                warn!(key, "attempt already running");
                Err(Box::new(DownloadResult::failed(
                    Some(item),
                    Some(error.to_string()),
                )))
            }
        }
    }

    async fn preflight(&self, item: &TransferItem, check_disk: bool) -> Result<Prepared, DownloadError> {
        let endpoint = self.settings.endpoint();
        let Some((base_uri, credential)) = endpoint.complete() else {
            let base_missing = endpoint
                .base_uri
                .as_deref()
                .is_none_or(|uri| uri.trim().is_empty());
            let field = if base_missing {
                "endpoint.base_uri"
            } else {
                "endpoint.credential"
            };
            return Err(DownloadError::ConfigMissing { field });
        };

        let binary_name = self.settings.mount_binary();
        let binary = self
            .locator
            .locate(&binary_name)
            .ok_or(DownloadError::DependencyMissing { name: binary_name })?;

        let dest_root = match item.destination.as_deref() {
            Some(destination) if !destination.is_empty() => PathBuf::from(destination),
            _ => self.settings.download_root().join(sanitize_key(&item.key)),
        };
        tokio::fs::create_dir_all(&dest_root)
            .await
            .map_err(|e| DownloadError::transfer_io(&dest_root, e))?;

        if check_disk {
            self.check_disk_space(item, &dest_root)?;
        }

        Ok(Prepared {
            binary,
            dest_root,
            base_uri: base_uri.to_string(),
            credential: credential.to_string(),
        })
    }

    fn check_disk_space(&self, item: &TransferItem, dest_root: &Path) -> Result<(), DownloadError> {
        let Some(declared) = item.size.as_deref().and_then(parse_size).filter(|s| *s > 0) else {
            debug!(key = %item.key, size = ?item.size, "size unknown, skipping disk check");
            return Ok(());
        };
        let required = declared.saturating_mul(DISK_SPACE_FACTOR);
        match self.disk.available_space(dest_root) {
            Ok(available) if available < required => {
                Err(DownloadError::DiskSpaceInsufficient { required, available })
            }
            Ok(_) => Ok(()),
            Err(error) => {
                warn!(key = %item.key, error = %error, "disk space query failed, skipping check");
                Ok(())
            }
        }
    }

    /// Moves the item to `downloading` if it is still in `expected`.
    async fn mark_downloading(
        &self,
        key: &str,
        prepared: &Prepared,
        expected: TransferStatus,
        keep_progress: bool,
    ) -> bool {
        // Our own pid until the mount process replaces it, so a restart can
        // tell this attempt from a crashed one.
        let mut update = ItemUpdate::status(TransferStatus::Downloading)
            .with_error(None)
            .idle()
            .with_pid(Some(std::process::id()))
            .with_destination(prepared.dest_root.display().to_string())
            .only_if(expected);
        if !keep_progress && expected != TransferStatus::Paused {
            update = update.with_progress(0);
        }
        match self.write(key, &update).await {
            Ok(changed) => changed,
            Err(error) => {
                warn!(key, error = %error, "failed to mark item downloading");
                false
            }
        }
    }

    async fn stopped_before_start(&self, key: &str) -> DownloadResult {
        debug!(key, "item changed before the attempt started");
        DownloadResult::failed(self.snapshot(key).await, None)
    }

    async fn reject(&self, key: &str, error: &DownloadError) -> DownloadResult {
        warn!(key, kind = %error.kind(), error = %error, "download rejected");
        if let Err(write_error) = self.write(key, &preflight_failure_update(error)).await {
            warn!(key, error = %write_error, "failed to record rejection");
        }
        DownloadResult::failed(self.snapshot(key).await, Some(error.item_message()))
    }

    /// Tries each source in order; the first one that completes wins.
    async fn run_sources(
        &self,
        key: &str,
        prepared: &Prepared,
        mirror: Option<MirrorDescriptor>,
        registration: &Registration,
    ) -> DownloadResult {
        let mut sources = Vec::with_capacity(2);
        if let Some(mirror) = &mirror {
            sources.push(MountSource::mirror(mirror, key));
        }
        sources.push(MountSource::public(&prepared.base_uri, &prepared.credential, key));

        let last = sources.len() - 1;
        for (index, source) in sources.iter().enumerate() {
            let result = self.attempt(key, source, prepared, registration).await;
            match result {
                Err(error)
                    if index < last
                        && error.allows_fallback()
                        && !registration.token().is_cancelled() =>
                {
                    warn!(key, mirror = source.label(), error = %error, "mirror failed, falling back to public endpoint");
                }
                result => return self.finish(key, result, registration).await,
            }
        }
        DownloadResult::failed(self.snapshot(key).await, None)
    }

    /// One mount session: mount, drive the transfer, tear down exactly once.
    async fn attempt(
        &self,
        key: &str,
        source: &MountSource,
        prepared: &Prepared,
        registration: &Registration,
    ) -> Result<TransferOutcome, DownloadError> {
        let mount_settings = self.settings.mount_settings();
        let mount_point = mount_point_for(&self.settings.mount_root(), key);
        let request = MountRequest {
            source: source.clone(),
            mount_point: mount_point.clone(),
            options: MountOptions {
                read_ahead: mount_settings.read_ahead.clone(),
            },
        };

        debug!(key, source = source.label(), mount_point = %mount_point.display(), "mounting");
        let handle = match self.mounter.mount(&prepared.binary, &request).await {
            Ok(handle) => handle,
            Err(error) => {
                self.mounter.teardown(&mount_point, None).await;
                return Err(error);
            }
        };

        let result = self
            .drive(key, &request, &handle, prepared, registration, &mount_settings)
            .await;
        self.mounter.teardown(&mount_point, Some(&handle)).await;
        result
    }

    async fn drive(
        &self,
        key: &str,
        request: &MountRequest,
        handle: &MountHandle,
        prepared: &Prepared,
        registration: &Registration,
        mount_settings: &MountSettings,
    ) -> Result<TransferOutcome, DownloadError> {
        let token = registration.token();
        let mount_point = request.mount_point.as_path();

        if let Some(process) = &handle.process {
            registration.attach_process(process.clone());
            if let Some(pid) = process.pid() {
                let update = ItemUpdate::default()
                    .with_pid(Some(pid))
                    .only_if(TransferStatus::Downloading);
                if let Err(error) = self.write(key, &update).await {
                    warn!(key, error = %error, "failed to record mount pid");
                }
            }
        }

        let attempts = mount_settings.ready_attempts;
        let interval = mount_settings.ready_interval();
        let ready = tokio::select! {
            () = token.cancelled() => return stopped_early(),
            ready = await_ready(mount_point, attempts, interval) => ready,
        };
        if !ready {
            return Err(DownloadError::MountTimeout {
                mount_point: mount_point.to_path_buf(),
                attempts,
            });
        }

        let populated = tokio::select! {
            () = token.cancelled() => return stopped_early(),
            populated = await_populated(mount_point, attempts, interval) => populated,
        };
        if let Some(process) = &handle.process
            && let Some(status) = process.exit_status()
        {
            if process.exited_by_termination() {
                return stopped_early();
            }
            return Err(DownloadError::MountFailed {
                source_label: request.source.label().to_string(),
                source: std::io::Error::other(format!("mount process exited early ({status})")),
            });
        }
        if !populated {
            return Err(DownloadError::MountEmpty {
                mount_point: mount_point.to_path_buf(),
            });
        }

        let files = enumerate(mount_point).await?;
        if files.is_empty() {
            return Err(DownloadError::MountEmpty {
                mount_point: mount_point.to_path_buf(),
            });
        }

        let (progress_tx, progress_rx) = watch::channel(None);
        let publisher = tokio::spawn(publish_progress(
            key.to_string(),
            Arc::clone(&self.queue),
            Arc::clone(&self.notifier),
            progress_rx,
        ));
        let hooks = AttemptHooks {
            key,
            queue: self.queue.as_ref(),
            settings: self.settings.as_ref(),
            progress: progress_tx,
        };

        let result = run_transfer(&files, mount_point, &prepared.dest_root, token, &hooks).await;
        drop(hooks);
        if let Err(error) = publisher.await {
            warn!(key, error = %error, "progress publisher failed");
        }

        match result {
            Err(error @ DownloadError::TransferIo { .. }) => {
                let terminated = handle
                    .process
                    .as_ref()
                    .is_some_and(super::mount::ProcessHandle::exited_by_termination);
                if token.is_cancelled() || terminated {
                    debug!(key, error = %error, "IO error after stop request");
                    stopped_early()
                } else {
                    Err(error)
                }
            }
            other => other,
        }
    }

    /// Maps an attempt outcome onto the item.
    async fn finish(
        &self,
        key: &str,
        result: Result<TransferOutcome, DownloadError>,
        registration: &Registration,
    ) -> DownloadResult {
        match result {
            Ok(TransferOutcome::Completed { bytes_copied }) => {
                let still_ours = matches!(
                    self.queue.find_item(key).await,
                    Ok(Some(ref item)) if item.status() == TransferStatus::Downloading
                );
                let completed = still_ours
                    && self
                        .write(key, &completion_update())
                        .await
                        .unwrap_or_else(|error| {
                            warn!(key, error = %error, "failed to record completion");
                            false
                        });
                if !completed {
                    debug!(key, "item changed before completion was recorded");
                    return DownloadResult::failed(self.snapshot(key).await, None);
                }
                info!(key, bytes_copied, "download completed, ready for extraction");
                DownloadResult {
                    start_extraction: true,
                    ..DownloadResult::ok(self.snapshot(key).await)
                }
            }
            Ok(TransferOutcome::Stopped { bytes_copied }) => {
                self.record_stop(key, bytes_copied, registration).await
            }
            Err(DownloadError::Cancelled) => self.record_stop(key, 0, registration).await,
            Err(error) => {
                warn!(key, kind = %error.kind(), error = %error, "download failed");
                if let Err(write_error) = self.write(key, &failure_update(&error)).await {
                    warn!(key, error = %write_error, "failed to record failure");
                }
                DownloadResult::failed(self.snapshot(key).await, Some(error.item_message()))
            }
        }
    }

    /// Records a stop the attempt caused itself.
    ///
    /// A cancel or pause releases the registration after writing its status,
    /// so only a stop nobody requested (a killed mount) writes `cancelled`.
    async fn record_stop(
        &self,
        key: &str,
        bytes_copied: u64,
        registration: &Registration,
    ) -> DownloadResult {
        if registration.is_current() {
            if let Err(error) = self.write(key, &stopped_update()).await {
                warn!(key, error = %error, "failed to record stop");
            }
        } else {
            debug!(key, "stop already recorded by the requester");
        }
        info!(key, bytes_copied, "download stopped");
        DownloadResult::failed(self.snapshot(key).await, None)
    }

    /// Writes through the queue and signals the UI on change.
    ///
    /// A write that loses a lock race with another process is retried a few
    /// times before the error is surfaced.
    async fn write(&self, key: &str, update: &ItemUpdate) -> Result<bool, DownloadError> {
        let mut tries = 1;
        let changed = loop {
            match self.queue.update_item(key, update).await {
                Ok(changed) => break changed,
                Err(error) if error.is_busy() && tries < BUSY_WRITE_ATTEMPTS => {
                    debug!(key, tries, error = %error, "queue busy, retrying write");
                    tries += 1;
                    tokio::time::sleep(BUSY_RETRY_DELAY).await;
                }
                Err(error) => return Err(error.into()),
            }
        };
        if changed {
            self.notifier.notify();
        }
        Ok(changed)
    }

    async fn snapshot(&self, key: &str) -> Option<TransferItem> {
        self.queue.find_item(key).await.ok().flatten()
    }
}

fn stopped_early() -> Result<TransferOutcome, DownloadError> {
    Ok(TransferOutcome::Stopped { bytes_copied: 0 })
}

/// Copy-loop hooks backed by the live queue and settings.
struct AttemptHooks<'a> {
    key: &'a str,
    queue: &'a dyn QueueRepository,
    settings: &'a dyn SettingsStore,
    progress: watch::Sender<Option<TransferProgress>>,
}

#[async_trait]
impl TransferHooks for AttemptHooks<'_> {
    async fn should_continue(&self) -> bool {
        match self.queue.find_item(self.key).await {
            Ok(Some(item)) => {
                let downloading = item.status() == TransferStatus::Downloading;
                if !downloading {
                    info!(key = self.key, status = %item.status(), "item left downloading, stopping");
                }
                downloading
            }
            Ok(None) => {
                info!(key = self.key, "item removed, stopping");
                false
            }
            Err(error) => {
                warn!(key = self.key, error = %error, "cannot re-read item, continuing");
                true
            }
        }
    }

    fn speed_limit_bytes(&self) -> u64 {
        self.settings.speed_limit_kbps().saturating_mul(1024)
    }

    fn publish(&self, progress: &TransferProgress) {
        self.progress.send_replace(Some(progress.clone()));
    }
}

/// Writes progress snapshots to the queue, at most one per
/// [`PROGRESS_WRITE_INTERVAL`] unless the percentage changed.
async fn publish_progress(
    key: String,
    queue: Arc<dyn QueueRepository>,
    notifier: Arc<dyn ChangeNotifier>,
    mut updates: watch::Receiver<Option<TransferProgress>>,
) {
    let mut last_write: Option<Instant> = None;
    let mut last_percent: Option<u8> = None;
    let mut last_bytes: Option<u64> = None;

    let write = |progress: TransferProgress| {
        let queue = Arc::clone(&queue);
        let notifier = Arc::clone(&notifier);
        let key = key.clone();
        async move {
            let update = ItemUpdate::default()
                .with_progress(progress.percent)
                .with_speed_eta(progress.speed_label(), progress.eta_label())
                .only_if(TransferStatus::Downloading);
            match queue.update_item(&key, &update).await {
                Ok(true) => notifier.notify(),
                Ok(false) => {}
                Err(error) => warn!(key = %key, error = %error, "failed to record progress"),
            }
        }
    };

    while updates.changed().await.is_ok() {
        let Some(progress) = updates.borrow_and_update().clone() else {
            continue;
        };
        let due = last_percent != Some(progress.percent)
            || last_write.is_none_or(|at| at.elapsed() >= PROGRESS_WRITE_INTERVAL);
        if due {
            last_write = Some(Instant::now());
            last_percent = Some(progress.percent);
            last_bytes = Some(progress.bytes_done);
            write(progress).await;
        }
    }

    let last = updates.borrow().clone();
    if let Some(progress) = last
        && last_bytes != Some(progress.bytes_done)
    {
        write(progress).await;
    }
}
