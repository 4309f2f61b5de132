use crate::queue::{ItemUpdate, TransferStatus};

use super::super::DownloadError;

/// Message stored when an item is stopped with `Error` and has no cause yet.
pub(super) const STOPPED_WITH_ERROR: &str = "Download stopped";

/// Update written when an attempt fails.
///
/// Guarded on `Downloading` so a concurrent cancel or pause keeps its status.
pub(super) fn failure_update(error: &DownloadError) -> ItemUpdate {
    ItemUpdate::status(TransferStatus::Error)
        .with_error(Some(error.item_message()))
        .idle()
        .with_pid(None)
        .only_if(TransferStatus::Downloading)
}

/// Update written when preflight rejects an item; no attempt was made.
pub(super) fn preflight_failure_update(error: &DownloadError) -> ItemUpdate {
    ItemUpdate::status(TransferStatus::Error)
        .with_error(Some(error.item_message()))
        .idle()
        .with_pid(None)
}

/// Update written when every file is present and the item is still ours.
pub(super) fn completion_update() -> ItemUpdate {
    ItemUpdate::status(TransferStatus::Completed)
        .with_progress(100)
        .with_error(None)
        .idle()
        .with_pid(None)
        .only_if(TransferStatus::Downloading)
}

/// Update written when an attempt stopped without a cancel or pause request
/// (a signal-terminated mount) while the item still reads `Downloading`.
pub(super) fn stopped_update() -> ItemUpdate {
    cancelled_update().only_if(TransferStatus::Downloading)
}

fn cancelled_update() -> ItemUpdate {
    ItemUpdate::status(TransferStatus::Cancelled)
        .with_progress(0)
        .with_error(None)
        .idle()
        .with_pid(None)
}

/// Update for an explicit cancel or pause request, or `None` when the
/// current status must be kept.
///
/// `Error` is sticky against `Cancelled` and `Paused`. Pausing only applies
/// to items that have not finished.
pub(super) fn stop_update(
    current: TransferStatus,
    requested: TransferStatus,
    current_error: Option<&str>,
) -> Option<ItemUpdate> {
    match requested {
        TransferStatus::Error => Some(
            ItemUpdate::status(TransferStatus::Error)
                .with_error(Some(
                    current_error.unwrap_or(STOPPED_WITH_ERROR).to_string(),
                ))
                .idle()
                .with_pid(None),
        ),
        _ if !current.yields_to_stop() => None,
        TransferStatus::Cancelled => Some(cancelled_update()),
        TransferStatus::Paused => matches!(
            current,
            TransferStatus::Queued | TransferStatus::Downloading | TransferStatus::Paused
        )
        .then(|| {
            ItemUpdate::status(TransferStatus::Paused)
                .idle()
                .with_pid(None)
        }),
        other => Some(ItemUpdate::status(other).idle().with_pid(None)),
    }
}
