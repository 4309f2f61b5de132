//! Bandwidth throttling for the copy loop.
//!
//! The [`Throttle`] accounts bytes in one-second wall-clock windows. A window
//! closes when a second has elapsed or when it has already carried a full
//! second's worth of bytes; if the window moved more bytes than the cap
//! allows, the next progress notification is held back until the average
//! rate is back at the cap.
//!
//! # Example
//!
//! ```
//! use mountfetch_core::download::Throttle;
//!
//! # async fn example() {
//! let mut throttle = Throttle::from_kbps(512);
//! // after each streamed chunk:
//! throttle.record(64 * 1024).await;
//! # }
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::constants::THROTTLE_WINDOW;

/// Per-copy bandwidth limiter.
///
/// Created once per file copy so a changed speed setting applies from the
/// next file on.
#[derive(Debug)]
pub struct Throttle {
    /// Cap in bytes per second; `None` means unthrottled.
    cap_bytes_per_sec: Option<u64>,
    window_start: Instant,
    window_bytes: u64,
    total_delay: Duration,
}

impl Throttle {
    /// Creates a throttle capped at `cap_bytes_per_sec`; zero disables it.
    #[must_use]
    pub fn new(cap_bytes_per_sec: u64) -> Self {
        Self {
            cap_bytes_per_sec: (cap_bytes_per_sec > 0).then_some(cap_bytes_per_sec),
            window_start: Instant::now(),
            window_bytes: 0,
            total_delay: Duration::ZERO,
        }
    }

    /// Creates a throttle from a KB/s setting (`1 KB = 1024 B`).
    #[must_use]
    pub fn from_kbps(kbps: u64) -> Self {
        Self::new(kbps.saturating_mul(1024))
    }

    /// Creates a throttle that never delays.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.cap_bytes_per_sec.is_none()
    }

    /// Total time spent sleeping so far.
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.total_delay
    }

    /// Accounts `bytes` just transferred and sleeps if the window ran ahead
    /// of the cap. Returns the delay applied.
    #[allow(clippy::cast_precision_loss)]
    pub async fn record(&mut self, bytes: u64) -> Duration {
        let Some(cap) = self.cap_bytes_per_sec else {
            return Duration::ZERO;
        };

        self.window_bytes = self.window_bytes.saturating_add(bytes);
        let elapsed = self.window_start.elapsed();
        if elapsed < THROTTLE_WINDOW && self.window_bytes < cap {
            return Duration::ZERO;
        }

        let budget = Duration::from_secs_f64(self.window_bytes as f64 / cap as f64);
        let delay = budget.saturating_sub(elapsed);
        if delay.is_zero() {
            trace!(window_bytes = self.window_bytes, cap, "window within cap");
        } else {
            debug!(
                window_bytes = self.window_bytes,
                cap,
                delay_ms = delay.as_millis(),
                "throttling transfer"
            );
            tokio::time::sleep(delay).await;
            self.total_delay += delay;
        }

        self.window_start = Instant::now();
        self.window_bytes = 0;
        delay
    }
}
