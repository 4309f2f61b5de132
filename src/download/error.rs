//! Error types for the download module.
//!
//! Every failure inside one attempt is caught at the orchestrator boundary
//! and stored on the item as [`DownloadError::item_message`]; nothing here
//! escapes to callers of the public operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::constants::MAX_ERROR_MESSAGE_CHARS;
use super::size::format_bytes;
use crate::queue::QueueError;

/// Coarse classification used for status mapping and fallback decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ConfigMissing,
    DependencyMissing,
    DiskSpaceInsufficient,
    MountFailed,
    MountTimeout,
    MountEmpty,
    TransferIo,
    Cancelled,
    AlreadyActive,
    Unknown,
}

impl FailureKind {
    /// Returns the stable label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigMissing => "config_missing",
            Self::DependencyMissing => "dependency_missing",
            Self::DiskSpaceInsufficient => "disk_space_insufficient",
            Self::MountFailed => "mount_failed",
            Self::MountTimeout => "mount_timeout",
            Self::MountEmpty => "mount_empty",
            Self::TransferIo => "transfer_io",
            Self::Cancelled => "cancelled",
            Self::AlreadyActive => "already_active",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while preparing or running a transfer attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Endpoint or credential configuration is absent.
    #[error("Download endpoint is not configured: missing {field}")]
    ConfigMissing {
        /// Name of the missing setting.
        field: &'static str,
    },

    /// The mount utility could not be located.
    #[error("Required dependency not found: {name}")]
    DependencyMissing {
        /// Binary name that was looked up.
        name: String,
    },

    /// Preflight found less free space than the transfer budget needs.
    #[error(
        "Insufficient disk space: need {}, only {} available",
        format_bytes(*required),
        format_bytes(*available)
    )]
    DiskSpaceInsufficient {
        /// Bytes required (declared size times the extraction factor).
        required: u64,
        /// Bytes available on the destination volume.
        available: u64,
    },

    /// The mount process could not be started.
    #[error("failed to start mount for {source_label}: {source}")]
    MountFailed {
        /// Mirror name or `public`.
        source_label: String,
        #[source]
        source: std::io::Error,
    },

    /// The mount point never answered a directory listing.
    #[error("Mount at {} did not become ready after {attempts} attempts", mount_point.display())]
    MountTimeout {
        mount_point: PathBuf,
        attempts: u32,
    },

    /// The mount answered but exposes no files.
    #[error("Mounted source at {} is empty", mount_point.display())]
    MountEmpty { mount_point: PathBuf },

    /// Reading from the mount or writing the destination failed.
    #[error("IO error transferring {}: {source}", path.display())]
    TransferIo {
        /// File being read or written.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The attempt was stopped by its cancellation token.
    #[error("Download cancelled")]
    Cancelled,

    /// Another attempt already owns this key.
    #[error("A download is already active for {key}")]
    AlreadyActive { key: String },

    /// The queue has no item under this key.
    #[error("Transfer item not found: {key}")]
    ItemNotFound { key: String },

    /// The queue collaborator failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Anything else, already rendered to text.
    #[error("{message}")]
    Unknown { message: String },
}

impl DownloadError {
    /// Creates a transfer IO error.
    pub fn transfer_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::TransferIo {
            path: path.into(),
            source,
        }
    }

    /// Creates a catch-all error from any displayable failure.
    pub fn unknown(message: impl fmt::Display) -> Self {
        Self::Unknown {
            message: message.to_string(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ConfigMissing { .. } => FailureKind::ConfigMissing,
            Self::DependencyMissing { .. } => FailureKind::DependencyMissing,
            Self::DiskSpaceInsufficient { .. } => FailureKind::DiskSpaceInsufficient,
            Self::MountFailed { .. } => FailureKind::MountFailed,
            Self::MountTimeout { .. } => FailureKind::MountTimeout,
            Self::MountEmpty { .. } => FailureKind::MountEmpty,
            Self::TransferIo { .. } => FailureKind::TransferIo,
            Self::Cancelled => FailureKind::Cancelled,
            Self::AlreadyActive { .. } => FailureKind::AlreadyActive,
            Self::ItemNotFound { .. } | Self::Queue(_) | Self::Unknown { .. } => {
                FailureKind::Unknown
            }
        }
    }

    /// True for failures tied to one source, where trying the next source
    /// is worthwhile. Bytes already streamed are kept and resumed.
    #[must_use]
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::MountFailed
                | FailureKind::MountTimeout
                | FailureKind::MountEmpty
                | FailureKind::TransferIo
        )
    }

    /// Message stored in the item's `error` field.
    #[must_use]
    pub fn item_message(&self) -> String {
        truncate_message(&self.to_string(), MAX_ERROR_MESSAGE_CHARS)
    }
}

/// Truncates `message` to at most `max_chars` characters, marking the cut.
#[must_use]
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push('…');
    truncated
}
