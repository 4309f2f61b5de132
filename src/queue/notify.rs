//! "Something changed" hook fired after every successful item update.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::trace;

/// Default coalescing window for [`DebouncedNotifier`].
pub const DEFAULT_NOTIFY_WINDOW: Duration = Duration::from_millis(250);

/// Receiver of change signals (usually a UI refresh).
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self);
}

/// Notifier that drops every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self) {}
}

/// Coalesces bursts of signals into one callback per window.
///
/// The first signal arms a timer; signals arriving before it fires are
/// absorbed. Outside a Tokio runtime the callback runs inline.
pub struct DebouncedNotifier {
    window: Duration,
    pending: Arc<AtomicBool>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl DebouncedNotifier {
    #[must_use]
    pub fn new(window: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            window,
            pending: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for DebouncedNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebouncedNotifier")
            .field("window", &self.window)
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ChangeNotifier for DebouncedNotifier {
    fn notify(&self) {
        if self.pending.swap(true, Ordering::SeqCst) {
            trace!("change signal coalesced");
            return;
        }

        let pending = Arc::clone(&self.pending);
        let callback = Arc::clone(&self.callback);
        let window = self.window;

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(window).await;
                // Re-arm before firing so a signal raised by the callback is not lost.
                pending.store(false, Ordering::SeqCst);
                callback();
            });
        } else {
            pending.store(false, Ordering::SeqCst);
            callback();
        }
    }
}
