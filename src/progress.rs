//! Progress bar for a running transfer, fed by polling the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mountfetch_core::{Queue, TransferStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawns the progress bar when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `enabled` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    enabled: bool,
    queue: Arc<Queue>,
    key: String,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !enabled {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_bar(queue, key, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_bar(queue: Arc<Queue>, key: String, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner} {prefix} [{bar:30}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(key.clone());
        bar.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            if let Ok(Some(item)) = queue.find_item(&key).await {
                bar.set_position(u64::from(item.progress_percent()));
                let message = if item.status() == TransferStatus::Downloading {
                    if item.speed.is_empty() {
                        "mounting...".to_string()
                    } else {
                        format!("{}  ETA {}", item.speed, item.eta)
                    }
                } else {
                    item.status().to_string()
                };
                bar.set_message(message);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        bar.finish_and_clear();
    })
}
