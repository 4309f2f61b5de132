//! Registry of in-flight attempts, one per item key.
//!
//! Holding a [`Registration`] is what makes an attempt "active". The map
//! entry is inserted atomically (a second registration for the same key
//! fails) and removed either by an explicit [`ActiveDownloads::cancel`] or
//! when the registration guard drops at the end of the attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::DownloadError;
use super::mount::ProcessHandle;

#[derive(Debug)]
struct ActiveEntry {
    attempt: u64,
    token: CancellationToken,
    process: Option<ProcessHandle>,
}

/// Process-wide map from item key to the attempt's cancellation handles.
#[derive(Debug, Default)]
pub struct ActiveDownloads {
    entries: DashMap<String, ActiveEntry>,
    next_attempt: AtomicU64,
}

impl ActiveDownloads {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key` for a new attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::AlreadyActive`] if another attempt holds the key.
    pub fn register(self: &Arc<Self>, key: &str) -> Result<Registration, DownloadError> {
        let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Err(DownloadError::AlreadyActive {
                key: key.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(ActiveEntry {
                    attempt,
                    token: token.clone(),
                    process: None,
                });
                debug!(key, attempt, "attempt registered");
                Ok(Registration {
                    registry: Arc::clone(self),
                    key: key.to_string(),
                    attempt,
                    token,
                })
            }
        }
    }

    /// Flips the token, kills the mount process and drops the entry.
    ///
    /// Returns `false` if nothing was registered for `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            return false;
        };
        entry.token.cancel();
        if let Some(process) = entry.process
            && let Err(error) = process.kill()
        {
            warn!(key, pid = ?process.pid(), error = %error, "failed to kill mount process");
        }
        debug!(key, attempt = entry.attempt, "attempt cancelled");
        true
    }

    #[must_use]
    pub fn is_active(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn attach_process(&self, key: &str, attempt: u64, process: ProcessHandle) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.attempt == attempt => {
                entry.process = Some(process);
                true
            }
            _ => false,
        }
    }

    fn holds(&self, key: &str, attempt: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.attempt == attempt)
    }

    fn release(&self, key: &str, attempt: u64) {
        if self
            .entries
            .remove_if(key, |_, entry| entry.attempt == attempt)
            .is_some()
        {
            debug!(key, attempt, "attempt released");
        }
    }
}

/// Ownership of one registry entry for the duration of an attempt.
///
/// Dropping it removes the entry, unless a cancel already did or a newer
/// attempt has since taken the key.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ActiveDownloads>,
    key: String,
    attempt: u64,
    token: CancellationToken,
}

impl Registration {
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True while this attempt still owns its entry, i.e. no cancel or
    /// pause has claimed the stop.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.registry.holds(&self.key, self.attempt)
    }

    /// Records the mount process so a cancel can kill it.
    ///
    /// If the entry is already gone (cancelled while mounting) the process
    /// is killed right away and `false` is returned.
    pub fn attach_process(&self, process: ProcessHandle) -> bool {
        if self
            .registry
            .attach_process(&self.key, self.attempt, process.clone())
        {
            return true;
        }
        if let Err(error) = process.kill() {
            warn!(key = %self.key, error = %error, "failed to kill mount process");
        }
        false
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.attempt);
    }
}
