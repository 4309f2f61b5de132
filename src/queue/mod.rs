//! Queue module for transfer item persistence.
//!
//! This module provides `SQLite`-backed storage for transfer items and the
//! seams the download core talks to (the queue collaborator and the UI
//! notification hook).
//!
//! # Overview
//!
//! - [`Queue`] - `SQLite` implementation of [`QueueRepository`]
//! - [`TransferItem`] - One release/package and its transfer state
//! - [`TransferStatus`] - Item lifecycle states
//! - [`ItemUpdate`] - Partial, optionally status-guarded update
//! - [`ChangeNotifier`] - Debounced "something changed" signal
//!
//! # Example
//!
//! ```ignore
//! use mountfetch_core::queue::{ItemUpdate, Queue, TransferStatus};
//! use mountfetch_core::Database;
//!
//! let db = Database::new_in_memory().await?;
//! let queue = Queue::new(db);
//!
//! queue.insert_item("Game-A", Some("2 GB"), None).await?;
//! queue
//!     .update_item("Game-A", &ItemUpdate::status(TransferStatus::Downloading))
//!     .await?;
//! ```

mod error;
mod item;
mod notify;
mod repository;

pub use error::{QueueDbErrorKind, QueueError};
pub use item::{ItemUpdate, TransferItem, TransferStatus};
pub use notify::{ChangeNotifier, DEFAULT_NOTIFY_WINDOW, DebouncedNotifier, NoopNotifier};
pub use repository::QueueRepository;

use crate::db::Database;
use tracing::{debug, instrument};

/// Returns `Ok(())` if at least one row was affected; otherwise [`QueueError::ItemNotFound`].
fn check_affected(key: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(QueueError::ItemNotFound(key.to_string()))
    } else {
        Ok(())
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Parses a user-supplied status label.
///
/// # Errors
///
/// Returns [`QueueError::InvalidStatus`] for unknown labels.
pub fn parse_status(label: &str) -> Result<TransferStatus> {
    label
        .trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| QueueError::InvalidStatus(label.to_string()))
}

/// Transfer queue backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct Queue {
    db: Database,
}

impl Queue {
    /// Creates a new queue over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds a new item in `queued` status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DuplicateKey`] if the key is already tracked,
    /// [`QueueError::Database`] if the insert fails otherwise.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn insert_item(
        &self,
        key: &str,
        size: Option<&str>,
        destination: Option<&str>,
    ) -> Result<TransferItem> {
        let result = sqlx::query_as::<_, TransferItem>(
            r"INSERT INTO transfer_items (key, status, size, destination)
              VALUES (?, ?, ?, ?)
              RETURNING *",
        )
        .bind(key)
        .bind(TransferStatus::Queued.as_str())
        .bind(size)
        .bind(destination)
        .fetch_one(self.db.pool())
        .await;

        match result {
            Ok(item) => Ok(item),
            Err(error) => {
                let error = QueueError::from(error);
                if error.database_kind() == Some(QueueDbErrorKind::ConstraintViolation) {
                    Err(QueueError::DuplicateKey(key.to_string()))
                } else {
                    Err(error)
                }
            }
        }
    }

    /// Gets an item by key.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_item(&self, key: &str) -> Result<Option<TransferItem>> {
        let item = sqlx::query_as::<_, TransferItem>(r"SELECT * FROM transfer_items WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(item)
    }

    /// Applies a partial update in a single statement.
    ///
    /// When `update.only_if_status` is set the row is only touched while its
    /// status still matches, so a guarded progress write can never clobber a
    /// terminal transition written concurrently.
    ///
    /// # Returns
    ///
    /// `true` if a row changed, `false` if the key is unknown or the guard
    /// did not match.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, update), fields(key = %key, status = ?update.status))]
    pub async fn update_item(&self, key: &str, update: &ItemUpdate) -> Result<bool> {
        let status = update.status.map(|s| s.as_str());
        let progress = update.progress.map(i64::from);
        let error_set = update.error.is_some();
        let error = update.error.as_ref().and_then(|e| e.as_deref());
        let pid_set = update.pid.is_some();
        let pid = update.pid.flatten().map(i64::from);
        let guard = update.only_if_status.map(|s| s.as_str());

        let result = sqlx::query(
            r"UPDATE transfer_items
              SET status = COALESCE(?, status),
                  progress = COALESCE(?, progress),
                  speed = COALESCE(?, speed),
                  eta = COALESCE(?, eta),
                  error = CASE WHEN ? THEN ? ELSE error END,
                  pid = CASE WHEN ? THEN ? ELSE pid END,
                  destination = COALESCE(?, destination),
                  updated_at = datetime('now')
              WHERE key = ? AND (? IS NULL OR status = ?)",
        )
        .bind(status)
        .bind(progress)
        .bind(update.speed.as_deref())
        .bind(update.eta.as_deref())
        .bind(error_set)
        .bind(error)
        .bind(pid_set)
        .bind(pid)
        .bind(update.destination.as_deref())
        .bind(key)
        .bind(guard)
        .bind(guard)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists all items, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<TransferItem>> {
        let items = sqlx::query_as::<_, TransferItem>(
            r"SELECT * FROM transfer_items ORDER BY created_at ASC, key ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(items)
    }

    /// Lists items in one status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: TransferStatus) -> Result<Vec<TransferItem>> {
        let items = sqlx::query_as::<_, TransferItem>(
            r"SELECT * FROM transfer_items
              WHERE status = ?
              ORDER BY created_at ASC, key ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;

        Ok(items)
    }

    /// Removes an item.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if no item exists with the given key.
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> Result<()> {
        let result = sqlx::query(r"DELETE FROM transfer_items WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;

        check_affected(key, result.rows_affected())
    }

    /// Moves items left `downloading` by a crashed process to `paused`.
    ///
    /// An item whose recorded pid `is_alive` belongs to a transfer another
    /// process is still running and is left alone. `paused` lets the operator
    /// resume from the bytes already on disk.
    ///
    /// # Returns
    ///
    /// The number of items that were reset.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if reading or updating fails.
    #[instrument(skip(self, is_alive))]
    pub async fn reset_interrupted(&self, is_alive: impl Fn(u32) -> bool) -> Result<u64> {
        let reset = ItemUpdate::status(TransferStatus::Paused)
            .idle()
            .with_pid(None)
            .only_if(TransferStatus::Downloading);

        let mut count = 0;
        for item in self.list_by_status(TransferStatus::Downloading).await? {
            let live_pid = item
                .pid
                .and_then(|pid| u32::try_from(pid).ok())
                .filter(|pid| is_alive(*pid));
            if let Some(pid) = live_pid {
                debug!(key = %item.key, pid, "transfer still running elsewhere");
                continue;
            }
            if self.update_item(&item.key, &reset).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}
