//! Constants for the download module (polling, streaming, limits).

use std::time::Duration;

/// Mount readiness: number of directory-listing attempts.
pub const MOUNT_READY_ATTEMPTS: u32 = 10;

/// Mount readiness: pause between listing attempts.
pub const MOUNT_READY_INTERVAL: Duration = Duration::from_secs(1);

/// How long teardown waits for a killed mount process to exit.
pub const PROCESS_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Read/write chunk size for the copy loop (64 KiB).
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Length of one throttling window.
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(1);

/// Free space required per declared byte (room for simultaneous extraction).
pub const DISK_SPACE_FACTOR: u64 = 2;

/// Longest error message stored on an item.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Minimum spacing between progress writes to the queue.
pub const PROGRESS_WRITE_INTERVAL: Duration = Duration::from_millis(500);

/// Path segment under which a mirror remote exposes releases.
pub const MIRROR_VIRTUAL_ROOT: &str = "releases";

/// Default read-ahead passed to the mount utility.
pub const DEFAULT_READ_AHEAD: &str = "128M";

/// Default mount utility binary name.
pub const DEFAULT_MOUNT_BINARY: &str = "rclone";

/// Re-reads allowed when a stop request races another status write.
pub const STOP_WRITE_ATTEMPTS: u32 = 3;

/// Tries for a queue write that hits a locked database.
pub const BUSY_WRITE_ATTEMPTS: u32 = 3;

/// Pause between busy write retries.
pub const BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);
