//! Error types for queue operations.

use std::fmt;

use thiserror::Error;

/// Database failures the download core reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDbErrorKind {
    /// `SQLite` gave up waiting for a lock; the write may be retried.
    Busy,
    /// Unique or check constraint failed (duplicate key, bad status text).
    ConstraintViolation,
    Other,
}

impl QueueDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::Busy,
            sqlx::Error::Database(database_error) => classify(database_error.as_ref()),
            _ => Self::Other,
        }
    }
}

impl fmt::Display for QueueDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Busy => "busy",
            Self::ConstraintViolation => "constraint_violation",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify(database_error: &(dyn sqlx::error::DatabaseError + 'static)) -> QueueDbErrorKind {
    if database_error.is_unique_violation() || database_error.is_check_violation() {
        return QueueDbErrorKind::ConstraintViolation;
    }
    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
    let busy_code = matches!(database_error.code().as_deref(), Some("5" | "6"));
    let message = database_error.message().to_ascii_lowercase();
    if busy_code || message.contains("database is locked") {
        return QueueDbErrorKind::Busy;
    }
    QueueDbErrorKind::Other
}

/// Failures of the item queue.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("database error ({kind}): {message}")]
    Database {
        kind: QueueDbErrorKind,
        message: String,
    },

    #[error("no item with key '{0}'\n  Suggestion: list keys with `mountfetch status`")]
    ItemNotFound(String),

    #[error("an item with key '{0}' is already queued")]
    DuplicateKey(String),

    /// A stored row carries a status label this build does not know.
    #[error("unknown status '{0}' stored in the queue")]
    InvalidStatus(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: QueueDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl QueueError {
    #[must_use]
    pub fn database_kind(&self) -> Option<QueueDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when the write lost a lock race and is worth retrying.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.database_kind() == Some(QueueDbErrorKind::Busy)
    }
}
