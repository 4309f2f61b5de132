//! Mount controller: starts, polls and tears down the external mount process.
//!
//! A mount session lives for exactly one attempt. The orchestrator asks a
//! [`Mounter`] to mount a [`MountSource`] at a fresh mount point, polls it
//! with [`await_ready`], and calls [`Mounter::teardown`] once on every exit
//! path. Teardown never fails: each step logs and moves on.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use super::constants::{DEFAULT_READ_AHEAD, MIRROR_VIRTUAL_ROOT, PROCESS_EXIT_GRACE};
use super::error::DownloadError;
use crate::config::MirrorDescriptor;

/// Environment variable the mount utility reads extra HTTP headers from.
const HTTP_HEADERS_ENV: &str = "RCLONE_HTTP_HEADERS";

/// Exit codes shells report for SIGINT, SIGKILL and SIGTERM.
const TERMINATION_EXIT_CODES: [i32; 3] = [130, 137, 143];

/// Poll step while waiting for a killed process to exit.
const EXIT_POLL_STEP: Duration = Duration::from_millis(50);

/// Remote address a mount reads from.
#[derive(Clone, PartialEq, Eq)]
pub enum MountSource {
    /// A configured mirror remote, scoped under the virtual releases root.
    Mirror {
        name: String,
        remote: String,
        config_file: PathBuf,
    },
    /// The public endpoint, addressed by a hash of the item key.
    Public { url: String, credential: String },
}

impl MountSource {
    /// Source for `key` on the given mirror.
    #[must_use]
    pub fn mirror(mirror: &MirrorDescriptor, key: &str) -> Self {
        Self::Mirror {
            name: mirror.name.clone(),
            remote: format!("{}:{MIRROR_VIRTUAL_ROOT}/{key}", mirror.remote_name),
            config_file: mirror.config_file.clone(),
        }
    }

    /// Source for `key` on the public endpoint.
    #[must_use]
    pub fn public(base_uri: &str, credential: &str, key: &str) -> Self {
        Self::Public {
            url: format!("{}/{}/", base_uri.trim_end_matches('/'), public_hash(key)),
            credential: credential.to_string(),
        }
    }

    /// Short label for logs and error messages.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Mirror { name, .. } => name,
            Self::Public { .. } => "public",
        }
    }

    /// Remote address handed to the mount utility.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Mirror { remote, .. } => remote,
            Self::Public { .. } => ":http:",
        }
    }

    fn command_args(&self, mount_point: &Path, options: &MountOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "mount".into(),
            self.address().into(),
            mount_point.as_os_str().to_owned(),
            "--read-only".into(),
            "--vfs-cache-mode".into(),
            "minimal".into(),
            "--buffer-size".into(),
            options.read_ahead.clone().into(),
        ];
        match self {
            Self::Mirror { config_file, .. } => {
                args.push("--config".into());
                args.push(config_file.as_os_str().to_owned());
            }
            Self::Public { url, .. } => {
                args.push("--http-url".into());
                args.push(url.into());
            }
        }
        args
    }

    fn command_env(&self) -> Option<(&'static str, String)> {
        match self {
            Self::Mirror { .. } => None,
            Self::Public { credential, .. } => {
                Some((HTTP_HEADERS_ENV, format!("Authorization,Bearer {credential}")))
            }
        }
    }
}

// Keep credentials out of logs.
impl fmt::Debug for MountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mirror {
                name,
                remote,
                config_file,
            } => f
                .debug_struct("Mirror")
                .field("name", name)
                .field("remote", remote)
                .field("config_file", config_file)
                .finish(),
            Self::Public { url, .. } => f
                .debug_struct("Public")
                .field("url", url)
                .field("credential", &"<redacted>")
                .finish(),
        }
    }
}

/// Hex-encoded SHA-256 of `key` followed by a newline.
#[must_use]
pub fn public_hash(key: &str) -> String {
    hex::encode(Sha256::digest(format!("{key}\n").as_bytes()))
}

/// Mode flags passed to the mount utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Read-ahead buffer size in the utility's own notation (e.g. `128M`).
    pub read_ahead: String,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_ahead: DEFAULT_READ_AHEAD.to_string(),
        }
    }
}

/// Everything needed to start one mount.
#[derive(Debug, Clone)]
pub struct MountRequest {
    pub source: MountSource,
    pub mount_point: PathBuf,
    pub options: MountOptions,
}

/// Shared handle to the backing mount process.
///
/// Clones refer to the same child; the registry keeps one so a concurrent
/// cancel can kill the process while the attempt still owns the session.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    child: Arc<Mutex<Child>>,
}

impl ProcessHandle {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Arc::new(Mutex::new(child)),
        }
    }

    /// OS process id, if the process was running when spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn lock(&self) -> MutexGuard<'_, Child> {
        match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Sends a kill signal without waiting for the exit.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the signal could not be delivered.
    pub fn kill(&self) -> io::Result<()> {
        let mut child = self.lock();
        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        child.start_kill()
    }

    /// Exit status if the process has already exited.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.lock().try_wait().ok().flatten()
    }

    /// True if the process exited because of a termination signal.
    #[must_use]
    pub fn exited_by_termination(&self) -> bool {
        self.exit_status().is_some_and(is_termination)
    }

    /// Polls for exit for up to `grace`. Returns whether the process exited.
    pub async fn wait_for_exit(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.exit_status().is_some() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_STEP).await;
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Whether `status` reflects an operator-initiated termination.
#[must_use]
pub fn is_termination(status: ExitStatus) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            // SIGINT, SIGKILL, SIGTERM
            return matches!(signal, 2 | 9 | 15);
        }
    }
    status
        .code()
        .is_some_and(|code| TERMINATION_EXIT_CODES.contains(&code))
}

/// Whether a process with `pid` still exists on this host.
///
/// Used at startup to tell a crashed transfer from one another process is
/// still running. Unknown platforms report `false`.
#[must_use]
pub fn pid_is_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        return Path::new("/proc").join(pid.to_string()).exists();
    }
    if cfg!(unix) {
        return std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
    }
    false
}

/// A started mount. `process` is `None` for mounts not backed by a child.
#[derive(Debug, Clone, Default)]
pub struct MountHandle {
    pub process: Option<ProcessHandle>,
}

impl MountHandle {
    #[must_use]
    pub fn with_process(process: ProcessHandle) -> Self {
        Self {
            process: Some(process),
        }
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ProcessHandle::pid)
    }
}

/// Starts and stops mounts.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Starts a mount for `request` using the utility at `binary`.
    ///
    /// Returns once the process is spawned; readiness is polled separately.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::MountFailed`] if the mount cannot be started.
    async fn mount(
        &self,
        binary: &Path,
        request: &MountRequest,
    ) -> Result<MountHandle, DownloadError>;

    /// Best-effort teardown of one session. Never fails.
    async fn teardown(&self, mount_point: &Path, handle: Option<&MountHandle>) {
        teardown_mount_point(mount_point, handle).await;
    }
}

/// [`Mounter`] that runs `rclone mount` as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct RcloneMounter;

#[async_trait]
impl Mounter for RcloneMounter {
    #[instrument(skip(self, request), fields(source = %request.source.label(), mount_point = %request.mount_point.display()))]
    async fn mount(
        &self,
        binary: &Path,
        request: &MountRequest,
    ) -> Result<MountHandle, DownloadError> {
        let mount_failed = |source: io::Error| DownloadError::MountFailed {
            source_label: request.source.label().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&request.mount_point)
            .await
            .map_err(mount_failed)?;

        let mut command = Command::new(binary);
        command
            .args(request.source.command_args(&request.mount_point, &request.options))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some((name, value)) = request.source.command_env() {
            command.env(name, value);
        }

        let child = command.spawn().map_err(mount_failed)?;
        let process = ProcessHandle::new(child);
        info!(pid = ?process.pid(), "mount process started");
        Ok(MountHandle::with_process(process))
    }
}

/// Polls `mount_point` with a directory listing until one succeeds.
///
/// Any successful listing counts, even an empty one.
#[instrument(skip(mount_point), fields(mount_point = %mount_point.display()))]
pub async fn await_ready(mount_point: &Path, attempts: u32, interval: Duration) -> bool {
    for attempt in 1..=attempts {
        match tokio::fs::read_dir(mount_point).await {
            Ok(_) => {
                debug!(attempt, "mount point answered");
                return true;
            }
            Err(error) => debug!(attempt, error = %error, "mount point not ready"),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}

/// Polls until `mount_point` lists at least one entry.
///
/// A fresh mount can answer with the empty underlying directory before the
/// remote tree appears, so emptiness is re-checked within the same budget.
pub async fn await_populated(mount_point: &Path, attempts: u32, interval: Duration) -> bool {
    for attempt in 1..=attempts.max(1) {
        if let Ok(mut entries) = tokio::fs::read_dir(mount_point).await
            && matches!(entries.next_entry().await, Ok(Some(_)))
        {
            return true;
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}

/// Best-effort teardown: kill the process, unmount, remove the directory.
#[instrument(skip(mount_point, handle), fields(mount_point = %mount_point.display()))]
pub async fn teardown_mount_point(mount_point: &Path, handle: Option<&MountHandle>) {
    if let Some(process) = handle.and_then(|h| h.process.as_ref()) {
        if let Err(error) = process.kill() {
            warn!(pid = ?process.pid(), error = %error, "failed to kill mount process");
        }
        if !process.wait_for_exit(PROCESS_EXIT_GRACE).await {
            warn!(pid = ?process.pid(), "mount process still running after kill");
        }
    }

    unmount(mount_point).await;

    match tokio::fs::remove_dir(mount_point).await {
        Ok(()) => debug!("mount point removed"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(error = %error, "failed to remove mount point"),
    }
}

async fn unmount(mount_point: &Path) {
    if !tokio::fs::try_exists(mount_point).await.unwrap_or(false) {
        return;
    }
    for &(program, args) in unmount_commands() {
        let status = Command::new(program)
            .args(args)
            .arg(mount_point)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {
                debug!(program, "unmounted");
                return;
            }
            // Usually just "not mounted" after the process was killed.
            Ok(status) => debug!(program, %status, "unmount command failed"),
            Err(error) => debug!(program, error = %error, "unmount command unavailable"),
        }
    }
}

fn unmount_commands() -> &'static [(&'static str, &'static [&'static str])] {
    if cfg!(target_os = "linux") {
        &[("fusermount", &["-u"]), ("umount", &[])]
    } else if cfg!(target_os = "macos") {
        &[("umount", &[])]
    } else {
        &[]
    }
}

/// Replaces everything but ASCII alphanumerics, `-`, `_` and `.` with `_`.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // "." and ".." would escape the mount root.
    if sanitized.chars().all(|c| c == '.') {
        sanitized.replace('.', "_")
    } else {
        sanitized
    }
}

/// Unique mount point for one attempt on `key`.
#[must_use]
pub fn mount_point_for(mount_root: &Path, key: &str) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    mount_root.join(format!("{}_{millis}", sanitize_key(key)))
}

/// Removes empty directories left under `mount_root` by crashed runs.
///
/// Returns how many were removed. Non-empty entries are left alone.
#[instrument(skip(mount_root), fields(mount_root = %mount_root.display()))]
pub async fn sweep_stale_mount_points(mount_root: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(mount_root).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(error = %error, "cannot scan mount root");
            }
            return 0;
        }
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            continue;
        }
        match tokio::fs::remove_dir(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale mount point");
                removed += 1;
            }
            Err(error) => debug!(path = %path.display(), error = %error, "stale mount point kept"),
        }
    }
    if removed > 0 {
        info!(removed, "swept stale mount points");
    }
    removed
}
