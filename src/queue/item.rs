//! Transfer item types, status definitions and partial updates.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status of a transfer item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Waiting for the queue coordinator to start it.
    Queued,
    /// A transfer attempt is running.
    Downloading,
    /// Stopped by the operator; partial files stay on disk for resume.
    Paused,
    /// Stopped by the operator; progress reset.
    Cancelled,
    /// The last attempt failed.
    Error,
    /// All files copied.
    Completed,
    /// Handed to the extraction stage (set externally).
    Extracting,
}

impl TransferStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Completed => "completed",
            Self::Extracting => "extracting",
        }
    }

    /// Returns true for statuses that end an attempt for good.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Error | Self::Completed)
    }

    /// Whether a stop request (`Cancelled` or `Paused`) may overwrite this status.
    ///
    /// `Error` is sticky: a late cancel or pause never downgrades it.
    #[must_use]
    pub fn yields_to_stop(&self) -> bool {
        !matches!(self, Self::Error)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            "error" => Ok(Self::Error),
            "completed" => Ok(Self::Completed),
            "extracting" => Ok(Self::Extracting),
            _ => Err(format!("invalid transfer status: {s}")),
        }
    }
}

/// A single release/package tracked by the queue.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct TransferItem {
    /// Stable release/package identifier.
    pub key: String,
    /// Current status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_str: String,
    /// Overall progress percentage, 0..=100.
    pub progress: i64,
    /// Human-readable transfer speed, empty when idle.
    pub speed: String,
    /// Human-readable time remaining, empty when idle.
    pub eta: String,
    /// Short cause of the last failure.
    pub error: Option<String>,
    /// Process id of the backing mount process while an attempt runs.
    pub pid: Option<i64>,
    /// Declared total size as entered (e.g. `"2 GB"`).
    pub size: Option<String>,
    /// Local destination root for this item.
    pub destination: Option<String>,
    /// When the item was created.
    pub created_at: String,
    /// When the item was last updated.
    pub updated_at: String,
}

impl TransferItem {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Queued` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.status_str.parse().unwrap_or(TransferStatus::Queued)
    }

    /// Progress as a percentage clamped into `0..=100`.
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        u8::try_from(self.progress.clamp(0, 100)).unwrap_or(100)
    }
}

impl fmt::Display for TransferItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransferItem {{ key: {}, status: {}, progress: {}% }}",
            self.key,
            self.status(),
            self.progress
        )
    }
}

/// Partial update applied through [`QueueRepository::update_item`](super::QueueRepository::update_item).
///
/// `None` leaves a field untouched. The nested options on `error` and `pid`
/// distinguish "leave" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemUpdate {
    pub status: Option<TransferStatus>,
    pub progress: Option<u8>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub error: Option<Option<String>>,
    pub pid: Option<Option<u32>>,
    pub destination: Option<String>,
    /// Apply only while the stored status equals this value.
    pub only_if_status: Option<TransferStatus>,
}

impl ItemUpdate {
    /// Update that only changes the status.
    #[must_use]
    pub fn status(status: TransferStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    #[must_use]
    pub fn with_speed_eta(mut self, speed: impl Into<String>, eta: impl Into<String>) -> Self {
        self.speed = Some(speed.into());
        self.eta = Some(eta.into());
        self
    }

    /// Clears speed and ETA, used on every transition out of `Downloading`.
    #[must_use]
    pub fn idle(self) -> Self {
        self.with_speed_eta("", "")
    }

    #[must_use]
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = Some(pid);
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Makes the update conditional on the stored status.
    #[must_use]
    pub fn only_if(mut self, status: TransferStatus) -> Self {
        self.only_if_status = Some(status);
        self
    }

    /// Applies the update to an in-memory item, honouring `only_if_status`.
    ///
    /// Returns whether the item changed.
    pub fn apply(&self, item: &mut TransferItem) -> bool {
        if let Some(required) = self.only_if_status
            && item.status() != required
        {
            return false;
        }
        if let Some(status) = self.status {
            item.status_str = status.as_str().to_string();
        }
        if let Some(progress) = self.progress {
            item.progress = i64::from(progress);
        }
        if let Some(speed) = &self.speed {
            item.speed.clone_from(speed);
        }
        if let Some(eta) = &self.eta {
            item.eta.clone_from(eta);
        }
        if let Some(error) = &self.error {
            item.error.clone_from(error);
        }
        if let Some(pid) = self.pid {
            item.pid = pid.map(i64::from);
        }
        if let Some(destination) = &self.destination {
            item.destination = Some(destination.clone());
        }
        true
    }
}
