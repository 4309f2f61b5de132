//! Transfer engine: enumerate the mounted tree and copy it with resume.
//!
//! Resume works at byte granularity per file: the size of an existing
//! destination file is both the read offset into the source and the append
//! position in the destination. Re-running [`run_transfer`] after any
//! interruption therefore never re-copies bytes already on disk.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::constants::COPY_CHUNK_SIZE;
use super::error::DownloadError;
use super::size::{format_eta, format_speed};
use super::throttle::Throttle;

/// One regular file found under the mount root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Path relative to the mount root, using the local separator.
    pub relative_path: PathBuf,
    /// Declared size in bytes.
    pub size: u64,
}

/// Lists every regular file under `root`, recursively.
///
/// Entries are sorted by name at each level so the order is stable across
/// attempts.
///
/// # Errors
///
/// Returns [`DownloadError::TransferIo`] if the tree cannot be walked.
pub fn enumerate_blocking(root: &Path) -> Result<Vec<FileDescriptor>, DownloadError> {
    let root_text = root.to_string_lossy();
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|error| {
            let path = error.path().unwrap_or(root).to_path_buf();
            DownloadError::transfer_io(path, error.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|error| DownloadError::transfer_io(entry.path(), error.into()))?;
        let Some(relative) = relative_path(&root_text, &entry.path().to_string_lossy()) else {
            continue;
        };
        files.push(FileDescriptor {
            relative_path: relative.split('/').collect(),
            size: metadata.len(),
        });
    }
    Ok(files)
}

/// Async wrapper around [`enumerate_blocking`]; the walk runs on the blocking pool.
///
/// # Errors
///
/// Returns [`DownloadError::TransferIo`] if the tree cannot be walked.
pub async fn enumerate(root: &Path) -> Result<Vec<FileDescriptor>, DownloadError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || enumerate_blocking(&root))
        .await
        .map_err(DownloadError::unknown)?
}

/// Strips `root` from `full`, accepting `/` and `\` in either input.
///
/// Returns the remainder with `/` separators, or `None` when `full` is not
/// strictly below `root`.
#[must_use]
pub fn relative_path(root: &str, full: &str) -> Option<String> {
    let normalize = |s: &str| s.replace('\\', "/");
    let root = normalize(root);
    let root = root.trim_end_matches('/');
    let full = normalize(full);

    let rest = full.strip_prefix(root)?.strip_prefix('/')?;
    let rest = rest.trim_matches('/');
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "..") {
        return None;
    }
    Some(segments.join("/"))
}

/// Size of an existing destination file, or 0 if it does not exist.
///
/// # Errors
///
/// Returns [`DownloadError::TransferIo`] for errors other than "not found".
pub async fn resume_offset(dest: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(dest).await {
        Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
        Ok(_) => Ok(0),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(error) => Err(DownloadError::transfer_io(dest, error)),
    }
}

/// Bytes already present under `dest_root` for `files`, capped per file at
/// its declared size.
///
/// # Errors
///
/// Returns [`DownloadError::TransferIo`] if a destination cannot be inspected.
pub async fn existing_bytes(dest_root: &Path, files: &[FileDescriptor]) -> Result<u64, DownloadError> {
    let mut total = 0u64;
    for file in files {
        let present = resume_offset(&dest_root.join(&file.relative_path)).await?;
        total = total.saturating_add(present.min(file.size));
    }
    Ok(total)
}

/// How a single file copy ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Source exhausted; bytes copied in this call.
    Finished(u64),
    /// Token tripped; bytes copied in this call before stopping.
    Cancelled(u64),
}

impl CopyOutcome {
    #[must_use]
    pub fn bytes(self) -> u64 {
        match self {
            Self::Finished(n) | Self::Cancelled(n) => n,
        }
    }
}

/// Copies `source` to `dest` starting at `start_offset`.
///
/// With a non-zero offset the source is read from that position and the
/// destination is opened for append; otherwise the destination is created
/// or truncated. `on_progress` receives the file's byte count (offset
/// included) after every chunk, once the throttle allows it.
///
/// # Errors
///
/// Returns [`DownloadError::TransferIo`] on any read or write failure.
#[instrument(skip_all, fields(source = %source.display(), offset = start_offset))]
pub async fn copy_file(
    source: &Path,
    dest: &Path,
    start_offset: u64,
    throttle: &mut Throttle,
    token: &CancellationToken,
    on_progress: &mut (dyn FnMut(u64) + Send),
) -> Result<CopyOutcome, DownloadError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::transfer_io(parent, e))?;
    }

    let mut reader = File::open(source)
        .await
        .map_err(|e| DownloadError::transfer_io(source, e))?;
    if start_offset > 0 {
        reader
            .seek(SeekFrom::Start(start_offset))
            .await
            .map_err(|e| DownloadError::transfer_io(source, e))?;
    }

    let mut options = OpenOptions::new();
    if start_offset > 0 {
        options.append(true);
    } else {
        options.write(true).create(true).truncate(true);
    }
    let mut writer = options
        .open(dest)
        .await
        .map_err(|e| DownloadError::transfer_io(dest, e))?;

    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        if token.is_cancelled() {
            break;
        }
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| DownloadError::transfer_io(source, e))?;
        if read == 0 {
            writer
                .flush()
                .await
                .map_err(|e| DownloadError::transfer_io(dest, e))?;
            return Ok(CopyOutcome::Finished(copied));
        }
        writer
            .write_all(&buffer[..read])
            .await
            .map_err(|e| DownloadError::transfer_io(dest, e))?;
        copied += read as u64;

        tokio::select! {
            () = token.cancelled() => break,
            _ = throttle.record(read as u64) => {}
        }
        on_progress(start_offset + copied);
    }

    // Keep what was written; the next attempt resumes from it.
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::transfer_io(dest, e))?;
    debug!(copied, "copy stopped by cancellation");
    Ok(CopyOutcome::Cancelled(copied))
}

/// Snapshot of overall progress.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Overall percentage, 0..=100.
    pub percent: u8,
    /// Bytes present at the destination, including earlier attempts.
    pub bytes_done: u64,
    /// Sum of declared sizes.
    pub total: u64,
    /// Current file throughput in bytes per second.
    pub speed_bps: f64,
    /// Time remaining at the current speed; `None` when speed is zero.
    pub eta: Option<Duration>,
}

impl TransferProgress {
    #[must_use]
    pub fn speed_label(&self) -> String {
        format_speed(self.speed_bps)
    }

    #[must_use]
    pub fn eta_label(&self) -> String {
        format_eta(self.eta)
    }
}

/// Aggregates per-file progress into overall percentage, speed and ETA.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    done: u64,
    file_offset: u64,
    file_started: Instant,
}

impl ProgressTracker {
    /// `already_present` is the byte count found on disk before the loop.
    #[must_use]
    pub fn new(total: u64, already_present: u64) -> Self {
        Self {
            total,
            done: already_present,
            file_offset: 0,
            file_started: Instant::now(),
        }
    }

    /// Marks the start of a file copy resuming at `offset`.
    pub fn begin_file(&mut self, offset: u64) {
        self.file_offset = offset;
        self.file_started = Instant::now();
    }

    /// Adds the bytes one finished copy wrote in this attempt.
    pub fn finish_file(&mut self, copied: u64) {
        self.done = self.done.saturating_add(copied);
    }

    /// Progress before any file is in flight.
    #[must_use]
    pub fn snapshot(&self) -> TransferProgress {
        self.build(self.done, 0.0)
    }

    /// Progress while the current file is at `file_bytes` (offset included).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn file_progress(&self, file_bytes: u64) -> TransferProgress {
        let in_flight = file_bytes.saturating_sub(self.file_offset);
        let elapsed = self.file_started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            in_flight as f64 / elapsed
        } else {
            0.0
        };
        self.build(self.done.saturating_add(in_flight), speed)
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn build(&self, bytes_done: u64, speed_bps: f64) -> TransferProgress {
        let bytes_done = bytes_done.min(self.total);
        let percent = if self.total == 0 {
            100
        } else {
            (100.0 * bytes_done as f64 / self.total as f64)
                .round()
                .clamp(0.0, 100.0) as u8
        };
        // Absurdly slow speeds give ETAs past Duration::MAX; show none.
        let eta = (speed_bps.is_finite() && speed_bps > 0.0)
            .then(|| (self.total - bytes_done) as f64 / speed_bps)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        TransferProgress {
            percent,
            bytes_done,
            total: self.total,
            speed_bps,
            eta,
        }
    }
}

/// Callbacks the copy loop uses to consult and report live state.
#[async_trait]
pub trait TransferHooks: Send + Sync {
    /// Checked before each file. `false` stops the transfer as if cancelled.
    async fn should_continue(&self) -> bool;

    /// Current speed cap in bytes per second, 0 for none. Read once per file.
    fn speed_limit_bytes(&self) -> u64;

    /// Receives progress after each chunk.
    fn publish(&self, progress: &TransferProgress);
}

/// How a whole multi-file transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every file is fully present.
    Completed { bytes_copied: u64 },
    /// Stopped by the token or by `should_continue`.
    Stopped { bytes_copied: u64 },
}

/// Copies `files` from `mount_root` to `dest_root`, resuming each file from
/// whatever is already on disk.
///
/// A `false` from [`TransferHooks::should_continue`] cancels `token`, so every
/// holder of the token sees the stop.
///
/// # Errors
///
/// Returns [`DownloadError::TransferIo`] on the first read or write failure;
/// files finished before it are kept.
#[instrument(skip_all, fields(files = files.len(), dest = %dest_root.display()))]
pub async fn run_transfer(
    files: &[FileDescriptor],
    mount_root: &Path,
    dest_root: &Path,
    token: &CancellationToken,
    hooks: &dyn TransferHooks,
) -> Result<TransferOutcome, DownloadError> {
    let total: u64 = files.iter().map(|f| f.size).sum();
    let present = existing_bytes(dest_root, files).await?;
    let mut tracker = ProgressTracker::new(total, present);
    hooks.publish(&tracker.snapshot());
    info!(total, present, "starting transfer");

    let mut bytes_copied = 0u64;
    for file in files {
        if token.is_cancelled() || !hooks.should_continue().await {
            token.cancel();
            return Ok(TransferOutcome::Stopped { bytes_copied });
        }

        if !is_contained(&file.relative_path) {
            warn!(file = %file.relative_path.display(), "skipping path outside destination");
            continue;
        }
        let dest = dest_root.join(&file.relative_path);
        let offset = resume_offset(&dest).await?;
        if offset >= file.size {
            debug!(file = %file.relative_path.display(), "already complete");
            continue;
        }

        let mut throttle = Throttle::new(hooks.speed_limit_bytes());
        tracker.begin_file(offset);
        let outcome = {
            let tracker = &tracker;
            let mut on_progress = |file_bytes: u64| hooks.publish(&tracker.file_progress(file_bytes));
            copy_file(
                &mount_root.join(&file.relative_path),
                &dest,
                offset,
                &mut throttle,
                token,
                &mut on_progress,
            )
            .await?
        };

        match outcome {
            CopyOutcome::Finished(copied) => {
                tracker.finish_file(copied);
                bytes_copied += copied;
            }
            CopyOutcome::Cancelled(copied) => {
                return Ok(TransferOutcome::Stopped {
                    bytes_copied: bytes_copied + copied,
                });
            }
        }
    }

    hooks.publish(&tracker.snapshot());
    Ok(TransferOutcome::Completed { bytes_copied })
}

/// Rejects descriptors that would write outside the destination root.
#[must_use]
pub fn is_contained(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}
